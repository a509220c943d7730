use std::collections::{BTreeSet, HashMap};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use mundap_db::models::{AnswerRow, PairRow};
use mundap_db::rotation::{service_day, service_today};
use mundap_notify::NotificationJob;
use mundap_types::api::{
    AnswerStats, AnswerView, ApiResponse, HistoryEntry, PageQuery, PaginatedResponse, Pagination,
    ReactionView, SubmitAnswerRequest, UpdateAnswerRequest,
};

use crate::error::{AppError, AppResult};
use crate::middleware::{ActivePair, AuthUser};
use crate::state::{AppState, AppStateInner};
use crate::validation;
use crate::views::{
    answer_entry, question_answers, question_view, reaction_view, split_answers, with_reactions,
};

pub async fn submit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
    WithRejection(Json(req), _): WithRejection<Json<SubmitAnswerRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let content =
        validation::answer_content(&req.content).map_err(|msg| AppError::field("content", msg))?;
    let user = &auth.user;

    state
        .store
        .find_question(req.question_id)
        .await?
        .filter(|q| q.is_active)
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    if state
        .store
        .find_answer_for(req.question_id, user.id, pair.id)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "You have already answered this question".to_string(),
        ));
    }

    let now = Utc::now();
    let answer = AnswerRow {
        id: Uuid::new_v4(),
        question_id: req.question_id,
        user_id: user.id,
        pair_id: pair.id,
        content,
        answered_at: now,
        updated_at: now,
    };
    state.store.create_answer(&answer).await?;

    if let Some(partner) = pair.partner_of(user.id) {
        state.notify(NotificationJob::partner_answered(partner, pair.id, &user.name));
    }

    info!("User {} answered question {}", user.id, answer.question_id);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Answer submitted", own_view(&auth, answer))),
    ))
}

pub async fn for_question(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
    WithRejection(Path(question_id), _): WithRejection<Path<i64>, AppError>,
) -> AppResult<impl IntoResponse> {
    let question = state
        .store
        .find_question(question_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    let body = question_answers(state.store.as_ref(), &pair, auth.user.id, &question, None).await?;
    Ok(Json(ApiResponse::ok("Answers retrieved", body)))
}

pub async fn for_pair(
    State(state): State<AppState>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
    WithRejection(Query(query), _): WithRejection<Query<PageQuery>, AppError>,
) -> AppResult<impl IntoResponse> {
    let (page, limit) = validation::pagination(query.page, query.limit)?;
    let (sql_limit, offset) = validation::window(page, limit);

    let (rows, total) = state.store.answers_for_pair(pair.id, sql_limit, offset).await?;
    Ok(Json(PaginatedResponse::new(
        "Answers retrieved",
        rows.into_iter().map(answer_entry).collect(),
        Pagination::new(page, limit, total),
    )))
}

/// Answered questions, most recent first, each with both members' answers.
pub async fn history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
    WithRejection(Query(query), _): WithRejection<Query<PageQuery>, AppError>,
) -> AppResult<impl IntoResponse> {
    let (page, limit) = validation::pagination(query.page, query.limit)?;
    let (sql_limit, offset) = validation::window(page, limit);

    let (rows, total) = state.store.pair_history(pair.id, sql_limit, offset).await?;
    let ids: Vec<i64> = rows.iter().map(|r| r.question_id).collect();

    let mut by_question: HashMap<i64, Vec<AnswerView>> = HashMap::new();
    if !ids.is_empty() {
        let details = state.store.answers_for_questions(pair.id, &ids).await?;
        for answer in with_reactions(state.store.as_ref(), details).await? {
            by_question.entry(answer.question_id).or_default().push(answer);
        }
    }

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(question) = state.store.find_question(row.question_id).await? else {
            continue;
        };
        let answers = by_question.remove(&row.question_id).unwrap_or_default();
        let (my_answer, partner_answer) = split_answers(&answers, auth.user.id);
        entries.push(HistoryEntry {
            question: question_view(&question),
            both_answered: my_answer.is_some() && partner_answer.is_some(),
            my_answer,
            partner_answer,
            last_answered_at: row.last_answered_at,
        });
    }

    Ok(Json(PaginatedResponse::new(
        "History retrieved",
        entries,
        Pagination::new(page, limit, total),
    )))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
) -> AppResult<impl IntoResponse> {
    let body = answer_stats(&state, &pair, auth.user.id).await?;
    Ok(Json(ApiResponse::ok("Answer statistics retrieved", body)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
    WithRejection(Path(id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateAnswerRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let content =
        validation::answer_content(&req.content).map_err(|msg| AppError::field("content", msg))?;
    let mut answer = own_answer(&state, &auth, &pair, id, "edit").await?;

    let now = Utc::now();
    state.store.update_answer(answer.id, &content, now).await?;
    answer.content = content;
    answer.updated_at = now;

    let mut view = own_view(&auth, answer);
    view.reactions = with_reactions_for(&state, view.id).await?;
    Ok(Json(ApiResponse::ok("Answer updated", view)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
    WithRejection(Path(id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<impl IntoResponse> {
    let answer = own_answer(&state, &auth, &pair, id, "delete").await?;
    state.store.delete_answer(answer.id).await?;

    info!("User {} deleted answer {}", auth.user.id, answer.id);
    Ok(Json(ApiResponse::<()>::empty("Answer deleted")))
}

/// Loads an answer of `pair` and checks the caller wrote it.
async fn own_answer(
    state: &AppStateInner,
    auth: &AuthUser,
    pair: &PairRow,
    id: Uuid,
    action: &str,
) -> AppResult<AnswerRow> {
    let answer = state
        .store
        .find_answer(id)
        .await?
        .filter(|a| a.pair_id == pair.id)
        .ok_or_else(|| AppError::NotFound("Answer not found".to_string()))?;

    if answer.user_id != auth.user.id {
        return Err(AppError::Forbidden(format!(
            "You can only {action} your own answers"
        )));
    }
    Ok(answer)
}

fn own_view(auth: &AuthUser, answer: AnswerRow) -> AnswerView {
    AnswerView {
        id: answer.id,
        question_id: answer.question_id,
        user_id: answer.user_id,
        author_name: auth.user.name.clone(),
        author_role: auth.user.role,
        content: answer.content,
        answered_at: answer.answered_at,
        updated_at: answer.updated_at,
        reactions: Vec::new(),
    }
}

async fn with_reactions_for(state: &AppStateInner, answer_id: Uuid) -> AppResult<Vec<ReactionView>> {
    Ok(state
        .store
        .reactions_for_answers(&[answer_id])
        .await?
        .into_iter()
        .map(reaction_view)
        .collect())
}

pub(crate) async fn answer_stats(
    state: &AppStateInner,
    pair: &PairRow,
    user_id: Uuid,
) -> AppResult<AnswerStats> {
    let offset = state.settings.utc_offset_hours;
    let all = state.store.all_answers_for_pair(pair.id).await?;
    let mine = all.iter().filter(|d| d.answer.user_id == user_id).count() as i64;

    let days: BTreeSet<NaiveDate> = state
        .store
        .answer_timestamps(pair.id, user_id)
        .await?
        .into_iter()
        .map(|at| service_day(at, offset))
        .collect();

    Ok(AnswerStats {
        total_answers: all.len() as i64,
        my_answers: mine,
        partner_answers: all.len() as i64 - mine,
        both_answered_questions: state.store.count_both_answered(pair.id).await?,
        current_streak: current_streak(&days, service_today(offset)),
        reactions_received: state.store.count_reactions_received(pair.id, user_id).await?,
    })
}

/// Consecutive days ending today, or yesterday when nothing is in yet today.
pub fn current_streak(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let start = if days.contains(&today) {
        Some(today)
    } else {
        today.pred_opt().filter(|d| days.contains(d))
    };

    let mut streak = 0;
    let mut day = start;
    while let Some(d) = day.filter(|d| days.contains(d)) {
        streak += 1;
        day = d.pred_opt();
    }
    streak
}
