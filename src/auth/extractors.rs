use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::jwt::JwtKeys;
use crate::{
    error::{AppError, AppResult},
    state::AppState,
    users::{
        repo::UserRepository,
        repo_types::{Role, User},
    },
};

/// Resolves an access token to a live, active user.
pub async fn authorize(keys: &JwtKeys, users: &UserRepository, token: &str) -> AppResult<User> {
    let claims = keys.decode_access_token(token)?;
    let user_id: i64 = claims.sub.parse().map_err(|_| {
        warn!(sub = %claims.sub, "access token subject is not a user id");
        AppError::Authentication("Could not validate credentials".into())
    })?;

    // with_deleted so a soft-deleted account reports as inactive, not missing
    let user = users
        .with_deleted()
        .get(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    if !user.is_active || user.is_deleted {
        warn!(user_id, "inactive or deleted account presented a token");
        return Err(AppError::InactiveAccount);
    }
    Ok(user)
}

/// Errors with 403 unless `user` holds `role`.
pub fn require_role(user: &User, role: Role) -> AppResult<()> {
    if user.role != role {
        warn!(user_id = user.id, required = ?role, "role check failed");
        return Err(AppError::Authorization(
            "Not authorized to perform this action".into(),
        ));
    }
    Ok(())
}

fn bearer_token(parts: &Parts) -> AppResult<&str> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Authentication("Not authenticated".into()))?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or_else(|| AppError::Authentication("Not authenticated".into()))
}

/// The authenticated caller of a protected route.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user = authorize(&state.keys, &state.users, token).await?;
        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        repo::Entity,
        users::{dto::SignupRequest, repo_types::UserPatch},
    };

    async fn seeded() -> (AppState, User) {
        let state = AppState::fake();
        let user = state
            .users
            .signup(SignupRequest {
                username: "ann".into(),
                email: "ann@example.com".into(),
                phone_number: "1".into(),
                password: "passw0rd".into(),
                password_confirm: "passw0rd".into(),
            })
            .await
            .unwrap();
        (state, user)
    }

    fn access_for(state: &AppState, subject: &str) -> String {
        state
            .keys
            .issue_token(subject, None, crate::auth::claims::TokenKind::Access)
            .unwrap()
    }

    #[tokio::test]
    async fn valid_token_yields_user() {
        let (state, user) = seeded().await;
        let token = access_for(&state, &user.id.to_string());
        let got = authorize(&state.keys, &state.users, &token).await.unwrap();
        assert_eq!(got.id, user.id);
    }

    #[tokio::test]
    async fn bad_token_is_unauthenticated() {
        let (state, _) = seeded().await;
        let err = authorize(&state.keys, &state.users, "nope").await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn unknown_subject_is_not_found() {
        let (state, _) = seeded().await;
        let token = access_for(&state, "999");
        let err = authorize(&state.keys, &state.users, &token).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "User not found"));
    }

    #[tokio::test]
    async fn inactive_and_deleted_accounts_are_refused() {
        let (state, user) = seeded().await;
        let token = access_for(&state, &user.id.to_string());

        let patch = UserPatch {
            is_active: Some(false),
            ..UserPatch::default()
        };
        let inactive = state.users.update(&user, patch).await.unwrap();
        let err = authorize(&state.keys, &state.users, &token).await.unwrap_err();
        assert!(matches!(err, AppError::InactiveAccount));

        let patch = UserPatch {
            is_active: Some(true),
            ..UserPatch::default()
        };
        state.users.update(&inactive, patch).await.unwrap();
        state.users.delete(user.id()).await.unwrap();
        let err = authorize(&state.keys, &state.users, &token).await.unwrap_err();
        assert!(matches!(err, AppError::InactiveAccount));
    }

    #[tokio::test]
    async fn role_check() {
        let (_, user) = seeded().await;
        assert!(require_role(&user, Role::IndividualUser).is_ok());
        let err = require_role(&user, Role::SystemAdmin).unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }
}
