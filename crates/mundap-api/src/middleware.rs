use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use mundap_db::models::{PairRow, UserRow};
use mundap_types::api::Claims;
use mundap_types::models::{TokenKind, UserStatus};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// The caller of a protected route.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: Claims,
    pub user: UserRow,
}

/// The caller's active, complete pair.
#[derive(Debug, Clone)]
pub struct ActivePair(pub PairRow);

/// Extract and validate the access token from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> AppResult<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
        .ok_or_else(|| AppError::Unauthorized("Access token required".to_string()))?;

    let claims = state.tokens.verify(TokenKind::Access, &token)?;

    if state.store.is_token_revoked(claims.jti).await? {
        return Err(AppError::Unauthorized("Token has been revoked".to_string()));
    }

    let user = state
        .store
        .find_user(claims.sub)
        .await?
        .filter(|u| u.status == UserStatus::Active)
        .ok_or_else(|| AppError::Unauthorized("User not found or inactive".to_string()))?;

    req.extensions_mut().insert(AuthUser { claims, user });
    Ok(next.run(req).await)
}

/// Runs inside `require_auth`; answer routes need a partner to talk to.
pub async fn require_active_pair(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> AppResult<Response> {
    let user_id = req
        .extensions()
        .get::<AuthUser>()
        .map(|auth| auth.user.id)
        .ok_or_else(|| AppError::Unauthorized("Access token required".to_string()))?;

    let pair = state
        .store
        .find_active_pair_for_user(user_id)
        .await?
        .filter(PairRow::is_usable)
        .ok_or_else(|| AppError::Forbidden("An active pair is required".to_string()))?;

    req.extensions_mut().insert(ActivePair(pair));
    Ok(next.run(req).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> AppResult<Response> {
    let presented = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match (state.settings.admin_api_key.as_deref(), presented) {
        (Some(expected), Some(given)) if expected == given => Ok(next.run(req).await),
        _ => Err(AppError::Forbidden("Admin access required".to_string())),
    }
}

/// Per-IP quota on the credential endpoints.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> AppResult<Response> {
    let ip = client_ip(&req);
    if state.auth_limiter.check_key(&ip).is_err() {
        tracing::warn!("Rate limit exceeded for {}", ip);
        return Err(AppError::TooManyRequests);
    }
    Ok(next.run(req).await)
}

fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
