use axum::{
    Router,
    http::Uri,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};

use crate::error::AppError;
use crate::middleware::{rate_limit, require_active_pair, require_admin, require_auth};
use crate::state::AppState;
use crate::{answers, auth, export, health, questions, reactions};

/// The full `/api` surface. Transport layers (CORS, tracing, static files)
/// are added by the binary.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", auth_routes(&state))
        .nest("/api/questions", question_routes(&state))
        .nest("/api/answers", answer_routes(&state))
        .nest("/api/health", health_routes())
        .fallback(not_found)
        .with_state(state)
}

fn auth_routes(state: &AppState) -> Router<AppState> {
    let credentials = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route_layer(from_fn_with_state(state.clone(), rate_limit));

    let public = Router::new()
        .route("/verify/{code}", get(auth::verify_invitation))
        .route("/refresh", post(auth::refresh));

    let protected = Router::new()
        .route("/invite", post(auth::create_invitation))
        .route("/accept", post(auth::accept_invitation))
        .route("/profile", get(auth::profile).put(auth::update_profile))
        .route("/logout", post(auth::logout))
        .route("/pairs", get(auth::list_pairs))
        .route("/pairs/{id}", delete(auth::deactivate_pair))
        .route("/account", delete(auth::delete_account))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    credentials.merge(public).merge(protected)
}

fn question_routes(state: &AppState) -> Router<AppState> {
    let reader = Router::new()
        .route("/today", get(questions::today))
        .route("/categories", get(questions::categories))
        .route("/stats", get(questions::stats))
        .route("/search", get(questions::search))
        .route("/category/{category}", get(questions::by_category))
        .route("/{id}", get(questions::get_question))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let admin = Router::new()
        .route("/", post(questions::create_question))
        .route("/{id}", put(questions::update_question).delete(questions::delete_question))
        .route_layer(from_fn_with_state(state.clone(), require_admin));

    reader.merge(admin)
}

fn answer_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(answers::submit))
        .route("/question/{id}", get(answers::for_question))
        .route("/pair", get(answers::for_pair))
        .route("/history", get(answers::history))
        .route("/stats", get(answers::stats))
        .route("/export", get(export::export_csv))
        .route("/{id}", put(answers::update).delete(answers::delete))
        .route("/{id}/reactions", post(reactions::react).delete(reactions::unreact))
        .route_layer(from_fn_with_state(state.clone(), require_active_pair))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(health::basic))
        .route("/detailed", get(health::detailed))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
        .route("/metrics", get(health::metrics))
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("Route {} not found", uri.path()))
}
