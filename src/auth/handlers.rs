use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::{debug, info, instrument, warn};

use super::{
    dto::{
        ForgetPasswordRequest, LoginRequest, MessageResponse, RefreshRequest, ResetPasswordRequest,
        TokenResponse,
    },
    extractors::CurrentUser,
};
use crate::{
    error::{AppError, AppResult},
    extract::Json,
    state::AppState,
    users::{
        dto::{normalize_email, validate_password, PublicUser, SignupRequest},
        repo_types::{User, UserPatch},
    },
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/refresh", post(refresh))
        .route("/auth/forget-password", post(forget_password))
        .route("/auth/reset-password", post(reset_password))
}

fn user_not_found_or_inactive() -> AppError {
    AppError::not_found("User not found or inactive")
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<PublicUser>)> {
    payload.validate()?;

    if state.users.find_by_email(&payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AppError::conflict(Some("email")));
    }

    let user = state.users.signup(payload).await?;
    info!(user_id = user.id, email = %user.email, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let email = payload.email.trim().to_lowercase();
    let user = state
        .users
        .authenticate(&email, &payload.password)
        .await?
        .ok_or_else(|| {
            warn!(email = %email, "login rejected");
            AppError::Authentication("Invalid credentials".into())
        })?;
    if !user.is_active {
        warn!(user_id = user.id, "login by inactive user");
        return Err(AppError::InactiveAccount);
    }

    let (access_token, refresh_token) = state.keys.generate_tokens(user.id)?;
    info!(user_id = user.id, "user logged in");
    Ok(Json(TokenResponse::bearer(access_token, refresh_token)))
}

#[instrument(skip_all)]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user.into())
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let subject = state.keys.decode_refresh_token(&payload.refresh_token)?;
    let user_id: i64 = subject
        .parse()
        .map_err(|_| AppError::Authentication("Invalid refresh token".into()))?;

    let user = state
        .users
        .get(user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(user_not_found_or_inactive)?;

    let (access_token, refresh_token) = state.keys.generate_tokens(user.id)?;
    debug!(user_id = user.id, "tokens refreshed");
    Ok(Json(TokenResponse::bearer(access_token, refresh_token)))
}

async fn active_user_by_email(state: &AppState, email: &str) -> AppResult<User> {
    state
        .users
        .find_by_email(email)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(user_not_found_or_inactive)
}

#[instrument(skip(state, payload))]
pub async fn forget_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let email = normalize_email(&payload.email)?;
    let user = active_user_by_email(&state, &email).await?;

    // TODO: hand the token to a mail sender once one exists.
    let _reset_token = state.keys.issue_reset_token(&user.email)?;
    info!(user_id = user.id, "password reset requested");
    Ok(Json(MessageResponse::new("Password reset email sent.")))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let email = state
        .keys
        .verify_reset_token(&payload.token)
        .ok_or_else(|| AppError::validation("Invalid or expired token."))?;
    validate_password(&payload.new_password)?;
    let user = active_user_by_email(&state, &email).await?;

    let password_hash = state.users.hasher().hash(&payload.new_password)?;
    let patch = UserPatch {
        password_hash: Some(password_hash),
        ..UserPatch::default()
    };
    state.users.update(&user, patch).await?;
    info!(user_id = user.id, "password reset");
    Ok(Json(MessageResponse::new("Password has been reset successfully.")))
}
