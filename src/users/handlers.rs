use axum::{
    extract::{Path, State},
    routing::put,
    Router,
};
use tracing::{info, instrument};

use super::{
    dto::UpdateUserRequest,
    repo_types::{Role, UserPatch},
};
use crate::{
    auth::{
        dto::MessageResponse,
        extractors::{require_role, CurrentUser},
    },
    error::{AppError, AppResult},
    extract::Json,
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new().route("/users/:id", put(update_user).delete(delete_user))
}

#[instrument(skip(state, admin, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<i64>,
    Json(mut payload): Json<UpdateUserRequest>,
) -> AppResult<Json<MessageResponse>> {
    require_role(&admin, Role::SystemAdmin)?;
    payload.validate()?;

    let user = state
        .users
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    let UpdateUserRequest {
        username,
        email,
        is_active,
        role,
    } = payload;
    let patch = UserPatch {
        username,
        email,
        is_active,
        role,
        ..UserPatch::default()
    };
    state.users.update(&user, patch).await?;
    info!(user_id = id, admin_id = admin.id, "user updated");
    Ok(Json(MessageResponse::new("User has been updated successfully.")))
}

#[instrument(skip(state, admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<MessageResponse>> {
    require_role(&admin, Role::SystemAdmin)?;

    state
        .users
        .delete(id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    info!(user_id = id, admin_id = admin.id, "user deleted");
    Ok(Json(MessageResponse::new("User has been deleted successfully.")))
}
