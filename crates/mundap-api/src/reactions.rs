use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use uuid::Uuid;

use mundap_db::models::{AnswerRow, PairRow, ReactionRow};
use mundap_notify::NotificationJob;
use mundap_types::api::{ApiResponse, ReactionRequest};

use crate::error::{AppError, AppResult};
use crate::middleware::{ActivePair, AuthUser};
use crate::state::{AppState, AppStateInner};
use crate::validation;
use crate::views::reaction_view;

/// Sets the caller's reaction on an answer, replacing any earlier emoji.
pub async fn react(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
    WithRejection(Path(answer_id), _): WithRejection<Path<Uuid>, AppError>,
    WithRejection(Json(req), _): WithRejection<Json<ReactionRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let emoji = validation::emoji(&req.emoji).map_err(|msg| AppError::field("emoji", msg))?;
    let answer = pair_answer(&state, &pair, answer_id).await?;

    let reaction = ReactionRow {
        answer_id: answer.id,
        user_id: auth.user.id,
        emoji,
        created_at: Utc::now(),
    };
    state.store.upsert_reaction(&reaction).await?;

    if answer.user_id != auth.user.id {
        state.notify(NotificationJob::reaction_received(
            answer.user_id,
            pair.id,
            &auth.user.name,
            &reaction.emoji,
        ));
    }

    Ok(Json(ApiResponse::ok("Reaction saved", reaction_view(reaction))))
}

pub async fn unreact(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Extension(ActivePair(pair)): Extension<ActivePair>,
    WithRejection(Path(answer_id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<impl IntoResponse> {
    let answer = pair_answer(&state, &pair, answer_id).await?;

    if !state.store.delete_reaction(answer.id, auth.user.id).await? {
        return Err(AppError::NotFound("Reaction not found".to_string()));
    }
    Ok(Json(ApiResponse::<()>::empty("Reaction removed")))
}

async fn pair_answer(state: &AppStateInner, pair: &PairRow, answer_id: Uuid) -> AppResult<AnswerRow> {
    state
        .store
        .find_answer(answer_id)
        .await?
        .filter(|a| a.pair_id == pair.id)
        .ok_or_else(|| AppError::NotFound("Answer not found".to_string()))
}
