use axum::{Extension, Json, extract::State};

use rollcall_types::api::UserResponse;
use rollcall_types::models::User;

use crate::auth::{AppState, blocking};
use crate::error::ApiError;

/// GET /me/: the caller's profile with group names.
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<UserResponse>, ApiError> {
    let uid = user.id.to_string();
    let groups = blocking(&state, move |db| Ok(db.get_user_groups(&uid)?)).await?;

    Ok(Json(UserResponse {
        id: user.id,
        username: user.username,
        first_name: user.first_name,
        last_name: user.last_name,
        role: user.role,
        academic_groups: groups.into_iter().map(|g| g.name).collect(),
    }))
}
