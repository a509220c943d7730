use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use mundap_crypto::keys::generate_invite_code;
use mundap_db::DbError;
use mundap_db::models::{PairRow, UserRow};
use mundap_types::api::{
    AcceptInvitationRequest, ApiResponse, AuthResponse, InvitationCheck, InvitationResponse,
    LoginRequest, LogoutRequest, PairView, ProfileResponse, RefreshRequest, RegisterRequest,
    UpdateProfileRequest,
};
use mundap_types::models::{PairStatus, Role, TokenKind, UserStatus};

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::state::{AppState, AppStateInner};
use crate::token::expires_at;
use crate::validation;
use crate::views::{pair_view, user_view};

pub const INVITATION_TTL_HOURS: i64 = 24;
const INVITE_CODE_ATTEMPTS: u32 = 3;

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let reg = validation::registration(&req)?;
    let now = Utc::now();

    let sealed = state.phones.seal(&reg.phone)?;
    if state.store.find_user_by_phone_lookup(&sealed.lookup).await?.is_some() {
        return Err(AppError::Conflict("Phone number is already registered".to_string()));
    }

    let user = UserRow {
        id: Uuid::new_v4(),
        name: reg.name,
        role: reg.role,
        phone_ciphertext: sealed.field.ciphertext,
        phone_iv: sealed.field.iv,
        phone_lookup: sealed.lookup,
        status: UserStatus::Active,
        created_at: now,
        updated_at: now,
    };

    let pair = match reg.invite_code {
        Some(code) => {
            let pair = open_invitation(&state, &code, user.role, None, now).await?;
            if !state.store.register_with_invitation(&user, pair.id, now).await? {
                return Err(AppError::Conflict(
                    "Invitation has already been accepted".to_string(),
                ));
            }
            info!("User {} registered and joined pair {}", user.id, pair.id);
            state.store.find_pair(pair.id).await?
        }
        None => {
            state.store.create_user(&user).await?;
            info!("User {} registered as {}", user.id, user.role);
            None
        }
    };

    let pair = match pair {
        Some(p) => Some(pair_view(state.store.as_ref(), &p, user.id).await?),
        None => None,
    };
    let body = AuthResponse {
        user: user_view(&state.phones, &user)?,
        tokens: state.tokens.issue(&user)?,
        pair,
    };

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Registration successful", body)),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let (phone, name) = validation::login(&req)?;
    let invalid = || AppError::Unauthorized("Invalid phone number or name".to_string());

    let lookup = state.phones.lookup_digest(&phone)?;
    let user = state
        .store
        .find_user_by_phone_lookup(&lookup)
        .await?
        .ok_or_else(invalid)?;

    if user.name != name {
        return Err(invalid());
    }
    if user.status != UserStatus::Active {
        return Err(AppError::Unauthorized("Account is deactivated".to_string()));
    }

    let pair = current_pair(&state, &user).await?;
    let body = AuthResponse {
        user: user_view(&state.phones, &user)?,
        tokens: state.tokens.issue(&user)?,
        pair,
    };

    info!("User {} logged in", user.id);
    Ok(Json(ApiResponse::ok("Login successful", body)))
}

/// Issues an invitation code, reusing the caller's pending pair if there is one.
pub async fn create_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let user = &auth.user;
    if state.store.find_active_pair_for_user(user.id).await?.is_some() {
        return Err(AppError::Conflict("You are already in an active pair".to_string()));
    }

    let now = Utc::now();
    let expires = now + Duration::hours(INVITATION_TTL_HOURS);
    let pending = state.store.find_pending_pair_for_user(user.id).await?;

    let mut attempt = 0;
    let (pair_id, code) = loop {
        attempt += 1;
        let code = generate_invite_code();
        let stored = match &pending {
            Some(pair) => state
                .store
                .refresh_invitation(pair.id, &code, expires, now)
                .await
                .map(|refreshed| refreshed.then_some(pair.id)),
            None => {
                let pair = PairRow::invitation(user.id, user.role, code.clone(), expires, now);
                state.store.create_pair(&pair).await.map(|_| Some(pair.id))
            }
        };

        match stored {
            Ok(Some(id)) => break (id, code),
            Ok(None) => {
                return Err(AppError::Conflict(
                    "Invitation is no longer pending".to_string(),
                ));
            }
            Err(DbError::UniqueViolation(_)) if attempt < INVITE_CODE_ATTEMPTS => {
                warn!("Invitation code collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    };

    info!("User {} created invitation for pair {}", user.id, pair_id);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(
            "Invitation created",
            InvitationResponse {
                pair_id,
                invite_code: code,
                expires_at: expires,
            },
        )),
    ))
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    WithRejection(Json(req), _): WithRejection<Json<AcceptInvitationRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let code = validation::invite_code(&req.invite_code)
        .map_err(|msg| AppError::field("invite_code", msg))?;
    let user = &auth.user;
    let now = Utc::now();

    if state.store.find_active_pair_for_user(user.id).await?.is_some() {
        return Err(AppError::Conflict("You are already in an active pair".to_string()));
    }

    let pair = open_invitation(&state, &code, user.role, Some(user.id), now).await?;
    if !state.store.activate_pair(pair.id, user.id, user.role, now).await? {
        return Err(AppError::Conflict(
            "Invitation has already been accepted".to_string(),
        ));
    }

    // The caller's own outstanding invitation is moot now.
    if let Some(own) = state.store.find_pending_pair_for_user(user.id).await? {
        state.store.deactivate_pair(own.id, now).await?;
    }

    let pair = state
        .store
        .find_pair(pair.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Pair not found".to_string()))?;

    info!("User {} joined pair {}", user.id, pair.id);
    Ok(Json(ApiResponse::ok(
        "Invitation accepted",
        pair_view(state.store.as_ref(), &pair, user.id).await?,
    )))
}

pub async fn verify_invitation(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<impl IntoResponse> {
    let code = validation::invite_code(&code).map_err(|msg| AppError::field("code", msg))?;
    let not_found = || AppError::NotFound("Invitation not found".to_string());

    let pair = state
        .store
        .find_pair_by_invitation(&code)
        .await?
        .ok_or_else(not_found)?;
    let inviter = match pair.inviter() {
        Some(id) => state.store.find_user(id).await?.ok_or_else(not_found)?,
        None => return Err(not_found()),
    };

    let now = Utc::now();
    let check = InvitationCheck {
        valid: pair.status == PairStatus::Pending && !pair.invitation_expired(now),
        inviter_name: inviter.name,
        inviter_role: inviter.role,
        required_role: pair.open_role().unwrap_or(inviter.role.complement()),
        expires_at: pair.invitation_expires_at,
    };

    Ok(Json(ApiResponse::ok("Invitation found", check)))
}

pub async fn refresh(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RefreshRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let claims = state.tokens.verify(TokenKind::Refresh, &req.refresh_token)?;

    let user = state
        .store
        .find_user(claims.sub)
        .await?
        .filter(|u| u.status == UserStatus::Active)
        .ok_or_else(|| AppError::Unauthorized("User not found or inactive".to_string()))?;

    // Claiming the jti is the revocation check; a concurrent redeem loses here.
    if !state.store.revoke_token(claims.jti, expires_at(&claims)).await? {
        return Err(AppError::Unauthorized("Token has been revoked".to_string()));
    }

    Ok(Json(ApiResponse::ok(
        "Token refreshed",
        state.tokens.issue(&user)?,
    )))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let body = ProfileResponse {
        user: user_view(&state.phones, &auth.user)?,
        pair: current_pair(&state, &auth.user).await?,
    };
    Ok(Json(ApiResponse::ok("Profile retrieved", body)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateProfileRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let changes = validation::profile_update(&req)?;
    let mut user = auth.user;

    if let Some(name) = changes.name {
        user.name = name;
    }
    if let Some(phone) = changes.phone {
        let sealed = state.phones.seal(&phone)?;
        if let Some(owner) = state.store.find_user_by_phone_lookup(&sealed.lookup).await?
            && owner.id != user.id
        {
            return Err(AppError::Conflict("Phone number is already registered".to_string()));
        }
        user.phone_ciphertext = sealed.field.ciphertext;
        user.phone_iv = sealed.field.iv;
        user.phone_lookup = sealed.lookup;
    }
    user.updated_at = Utc::now();

    state.store.update_user(&user).await?;

    Ok(Json(ApiResponse::ok(
        "Profile updated",
        user_view(&state.phones, &user)?,
    )))
}

/// Revokes the presented access token, and the refresh token when the
/// body carries one.
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let req: LogoutRequest = if body.is_empty() {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::bad_request(e.to_string()))?
    };

    state
        .store
        .revoke_token(auth.claims.jti, expires_at(&auth.claims))
        .await?;

    if let Some(token) = req.refresh_token {
        match state.tokens.verify(TokenKind::Refresh, &token) {
            Ok(claims) if claims.sub == auth.user.id => {
                state.store.revoke_token(claims.jti, expires_at(&claims)).await?;
            }
            Ok(_) => warn!("User {} presented another user's refresh token at logout", auth.user.id),
            Err(e) => warn!("Ignoring unusable refresh token at logout: {}", e),
        }
    }

    info!("User {} logged out", auth.user.id);
    Ok(Json(ApiResponse::<()>::empty("Logged out")))
}

pub async fn list_pairs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let pairs = state.store.list_pairs_for_user(auth.user.id).await?;
    let mut views = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        views.push(pair_view(state.store.as_ref(), pair, auth.user.id).await?);
    }
    Ok(Json(ApiResponse::ok("Pairs retrieved", views)))
}

pub async fn deactivate_pair(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    WithRejection(Path(pair_id), _): WithRejection<Path<Uuid>, AppError>,
) -> AppResult<impl IntoResponse> {
    let pair = state
        .store
        .find_pair(pair_id)
        .await?
        .filter(|p| p.has_member(auth.user.id))
        .ok_or_else(|| AppError::NotFound("Pair not found".to_string()))?;

    if !state.store.deactivate_pair(pair.id, Utc::now()).await? {
        return Err(AppError::bad_request("Pair is already inactive"));
    }

    info!("User {} deactivated pair {}", auth.user.id, pair.id);
    Ok(Json(ApiResponse::<()>::empty("Pair deactivated")))
}

/// Soft delete: the row stays for the pair's history.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let now = Utc::now();
    let mut user = auth.user;
    user.status = UserStatus::Inactive;
    user.updated_at = now;

    state.store.update_user(&user).await?;
    let pairs = state.store.deactivate_pairs_for_user(user.id, now).await?;
    state
        .store
        .revoke_token(auth.claims.jti, expires_at(&auth.claims))
        .await?;

    info!("User {} deleted their account ({} pairs closed)", user.id, pairs);
    Ok(Json(ApiResponse::<()>::empty("Account deleted")))
}

/// Looks up an invitation and checks that a `role` user (`caller`, when
/// already registered) may take its open slot.
async fn open_invitation(
    state: &AppStateInner,
    code: &str,
    role: Role,
    caller: Option<Uuid>,
    now: DateTime<Utc>,
) -> AppResult<PairRow> {
    let pair = state
        .store
        .find_pair_by_invitation(code)
        .await?
        .ok_or_else(|| AppError::NotFound("Invitation not found".to_string()))?;

    if pair.status != PairStatus::Pending || pair.invitation_expired(now) {
        return Err(AppError::bad_request("Invitation has expired or is no longer valid"));
    }
    if caller.is_some_and(|id| pair.has_member(id)) {
        return Err(AppError::bad_request("You cannot accept your own invitation"));
    }
    match pair.open_role() {
        Some(open) if open == role => Ok(pair),
        Some(open) => Err(AppError::bad_request(format!(
            "This invitation is for a {open}, not a {role}"
        ))),
        None => Err(AppError::bad_request("Invitation has expired or is no longer valid")),
    }
}

/// The active pair, or the pending invitation while waiting for a partner.
async fn current_pair(
    state: &AppStateInner,
    user: &UserRow,
) -> AppResult<Option<PairView>> {
    let pair = match state.store.find_active_pair_for_user(user.id).await? {
        Some(p) => Some(p),
        None => state.store.find_pending_pair_for_user(user.id).await?,
    };
    match pair {
        Some(p) => Ok(Some(pair_view(state.store.as_ref(), &p, user.id).await?)),
        None => Ok(None),
    }
}
