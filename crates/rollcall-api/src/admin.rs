use std::collections::{BTreeSet, HashMap};

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use rollcall_db::is_unique_violation;
use rollcall_db::models::{UserRow, id_from_sql};
use rollcall_types::api::{
    CreateGroupRequest, CreateUserRequest, GroupResponse, SetGroupsRequest, UserResponse,
};
use rollcall_types::models::{Role, User};

use crate::auth::{AppState, blocking, hash_password};
use crate::error::ApiError;
use crate::projection::user_response;

fn require_admin(user: &User) -> Result<(), ApiError> {
    match user.role {
        Role::Admin => Ok(()),
        Role::Student | Role::Teacher => Err(ApiError::Forbidden),
    }
}

/// Dedupe and check that every id names an existing group. Returns the
/// id → name map for the response.
fn resolve_groups(db: &rollcall_db::Database, ids: &[Uuid]) -> Result<(Vec<String>, HashMap<Uuid, String>), ApiError> {
    let wanted: Vec<String> = ids
        .iter()
        .map(|g| g.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let rows = db.get_groups_by_ids(&wanted)?;
    if rows.len() != wanted.len() {
        return Err(ApiError::BadRequest("unknown group in group_ids".into()));
    }
    let mut names = HashMap::with_capacity(rows.len());
    for g in rows {
        names.insert(id_from_sql(&g.id)?, g.name);
    }
    Ok((wanted, names))
}

/// GET /admin/groups/
pub async fn list_groups(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<GroupResponse>>, ApiError> {
    require_admin(&user)?;

    let groups = blocking(&state, |db| {
        db.list_groups()?
            .into_iter()
            .map(|g| -> Result<GroupResponse, ApiError> {
                Ok(GroupResponse {
                    id: id_from_sql(&g.id)?,
                    name: g.name,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()
    })
    .await?;

    Ok(Json(groups))
}

/// POST /admin/groups/
pub async fn create_group(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&user)?;
    let Json(req) = payload?;

    let name = req.name.trim().to_string();
    if name.is_empty() || name.len() > 50 {
        return Err(ApiError::BadRequest("group name must be 1-50 characters".into()));
    }

    let id = Uuid::new_v4();
    let group_name = name.clone();
    blocking(&state, move |db| match db.create_group(&id.to_string(), &group_name) {
        Ok(()) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            Err(ApiError::Conflict(format!("group '{}' already exists", group_name)))
        }
        Err(e) => Err(e.into()),
    })
    .await?;

    info!("Group {} '{}' created", id, name);
    Ok((StatusCode::CREATED, Json(GroupResponse { id, name })))
}

/// POST /admin/users/
pub async fn create_user(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&user)?;
    let Json(req) = payload?;

    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3-32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }

    let created = blocking(&state, move |db| {
        let (group_ids, names) = resolve_groups(db, &req.group_ids)?;
        let id = Uuid::new_v4();
        let row = UserRow {
            id: id.to_string(),
            username: req.username.clone(),
            password: hash_password(&req.password)?,
            first_name: req.first_name.clone(),
            last_name: req.last_name.clone(),
            role: req.role.as_str().to_string(),
        };

        match db.create_user(&row, &group_ids) {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::Conflict(format!(
                    "username '{}' is taken",
                    req.username
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let user = User {
            id,
            username: req.username,
            first_name: req.first_name,
            last_name: req.last_name,
            role: req.role,
            group_ids: names.keys().copied().collect(),
        };
        Ok(user_response(&user, &names))
    })
    .await?;

    info!("User {} '{}' created as {}", created.id, created.username, created.role);
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /admin/users/{user_id}/groups/
///
/// Replaces the user's memberships.
pub async fn set_user_groups(
    State(state): State<AppState>,
    user_id: Result<Path<Uuid>, PathRejection>,
    Extension(user): Extension<User>,
    payload: Result<Json<SetGroupsRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    require_admin(&user)?;
    let Path(user_id) = user_id?;
    let Json(req) = payload?;

    let updated = blocking(&state, move |db| {
        let (group_ids, names) = resolve_groups(db, &req.group_ids)?;
        let uid = user_id.to_string();
        if !db.set_user_groups(&uid, &group_ids)? {
            return Err(ApiError::NotFound);
        }
        let user = db.load_user(&uid)?.ok_or(ApiError::NotFound)?;
        Ok(user_response(&user, &names))
    })
    .await?;

    Ok(Json(updated))
}

/// DELETE /admin/users/{user_id}/
pub async fn delete_user(
    State(state): State<AppState>,
    user_id: Result<Path<Uuid>, PathRejection>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, ApiError> {
    require_admin(&user)?;
    let Path(user_id) = user_id?;
    if user_id == user.id {
        return Err(ApiError::BadRequest("admins cannot delete themselves".into()));
    }

    let deleted = blocking(&state, move |db| Ok(db.delete_user(&user_id.to_string())?)).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }

    info!("User {} deleted by {}", user_id, user.username);
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/lessons/{lesson_id}/
pub async fn delete_lesson(
    State(state): State<AppState>,
    lesson_id: Result<Path<Uuid>, PathRejection>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, ApiError> {
    require_admin(&user)?;
    let Path(lesson_id) = lesson_id?;

    let deleted =
        blocking(&state, move |db| Ok(db.delete_lesson(&lesson_id.to_string())?)).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }

    info!("Lesson {} deleted by {}", lesson_id, user.username);
    Ok(StatusCode::NO_CONTENT)
}
