use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{NaiveDate, Utc};
use tracing::info;

use mundap_db::models::{PairRow, QuestionRow};
use mundap_db::rotation::{question_for_day, service_today};
use mundap_types::api::{
    ApiResponse, CategoryCount, CreateQuestionRequest, PageQuery, PaginatedResponse, Pagination,
    QuestionAnswers, QuestionStats, SearchQuery, UpdateQuestionRequest,
};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::state::{AppState, AppStateInner};
use crate::validation;
use crate::views::{question_answers, question_view};

/// Today's question for the caller, with whatever the pair has answered.
pub async fn today(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let day = service_today(state.settings.utc_offset_hours);
    let Some(question) = question_for_day(state.store.as_ref(), day).await? else {
        return Ok(Json(ApiResponse::<Option<QuestionAnswers>>::ok(
            "No questions available",
            None,
        )));
    };

    let body = with_pair_answers(&state, &auth, &question, Some(day)).await?;
    Ok(Json(ApiResponse::ok("Today's question retrieved", Some(body))))
}

pub async fn get_question(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, AppError>,
) -> AppResult<impl IntoResponse> {
    let question = state
        .store
        .find_question(id)
        .await?
        .filter(|q| q.is_active)
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    let body = with_pair_answers(&state, &auth, &question, None).await?;
    Ok(Json(ApiResponse::ok("Question retrieved", body)))
}

pub async fn categories(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let categories = category_counts(&state).await?;
    Ok(Json(ApiResponse::ok("Categories retrieved", categories)))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let (total, active) = state.store.question_counts().await?;
    let body = QuestionStats {
        total,
        active,
        inactive: total - active,
        categories: category_counts(&state).await?,
    };
    Ok(Json(ApiResponse::ok("Question statistics retrieved", body)))
}

pub async fn search(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<SearchQuery>, AppError>,
) -> AppResult<impl IntoResponse> {
    let term = validation::search_term(query.q.as_deref()).map_err(|msg| AppError::field("q", msg))?;
    let (page, limit) = validation::pagination(query.page, query.limit)?;
    let (sql_limit, offset) = validation::window(page, limit);

    let (rows, total) = state.store.search_questions(&term, sql_limit, offset).await?;
    Ok(Json(PaginatedResponse::new(
        format!("Found {total} questions"),
        rows.iter().map(question_view).collect(),
        Pagination::new(page, limit, total),
    )))
}

pub async fn by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    WithRejection(Query(query), _): WithRejection<Query<PageQuery>, AppError>,
) -> AppResult<impl IntoResponse> {
    let category = validation::category(&category).map_err(|msg| AppError::field("category", msg))?;
    let (page, limit) = validation::pagination(query.page, query.limit)?;
    let (sql_limit, offset) = validation::window(page, limit);

    let (rows, total) = state
        .store
        .questions_by_category(&category, sql_limit, offset)
        .await?;
    Ok(Json(PaginatedResponse::new(
        "Questions retrieved",
        rows.iter().map(question_view).collect(),
        Pagination::new(page, limit, total),
    )))
}

// -- Admin --

pub async fn create_question(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<CreateQuestionRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let new = validation::new_question(&req)?;
    let question = state.store.create_question(&new, Utc::now()).await?;

    info!("Question {} created in {}", question.id, question.category);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Question created", question_view(&question))),
    ))
}

pub async fn update_question(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateQuestionRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let changes = validation::question_update(&req)?;
    let mut question = state
        .store
        .find_question(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    if let Some(content) = changes.content {
        question.content = content;
    }
    if let Some(category) = changes.category {
        question.category = category;
    }
    if let Some(order_num) = changes.order_num {
        question.order_num = order_num;
    }
    if let Some(is_active) = changes.is_active {
        question.is_active = is_active;
    }
    question.updated_at = Utc::now();

    state.store.update_question(&question).await?;

    info!("Question {} updated", question.id);
    Ok(Json(ApiResponse::ok("Question updated", question_view(&question))))
}

pub async fn delete_question(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, AppError>,
) -> AppResult<impl IntoResponse> {
    if !state.store.deactivate_question(id, Utc::now()).await? {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    info!("Question {} deactivated", id);
    Ok(Json(ApiResponse::<()>::empty("Question deactivated")))
}

async fn category_counts(state: &AppStateInner) -> AppResult<Vec<CategoryCount>> {
    Ok(state
        .store
        .question_categories()
        .await?
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect())
}

/// Callers without a usable pair see the question with no answers.
async fn with_pair_answers(
    state: &AppStateInner,
    auth: &AuthUser,
    question: &QuestionRow,
    date: Option<NaiveDate>,
) -> AppResult<QuestionAnswers> {
    let pair = state
        .store
        .find_active_pair_for_user(auth.user.id)
        .await?
        .filter(PairRow::is_usable);

    match pair {
        Some(pair) => question_answers(state.store.as_ref(), &pair, auth.user.id, question, date).await,
        None => Ok(QuestionAnswers {
            date,
            question: question_view(question),
            answers: Vec::new(),
            my_answer: None,
            partner_answer: None,
            both_answered: false,
        }),
    }
}
