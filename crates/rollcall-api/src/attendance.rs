use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{error, warn};

use rollcall_types::api::{MarkAttendanceRequest, MarkAttendanceResponse};
use rollcall_core::Rejection;
use rollcall_types::models::{Role, User};

use crate::auth::AppState;
use crate::error::ApiError;

/// POST /attendance/mark/
///
/// Guard evaluation and the insert run in one storage transaction; see
/// `Database::mark_attendance`.
pub async fn mark_attendance(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    payload: Result<Json<MarkAttendanceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // The role guard outranks a malformed body.
    match user.role {
        Role::Student => {}
        Role::Teacher | Role::Admin => return Err(Rejection::NotAStudent.into()),
    }
    let Json(req) = payload?;

    let now = Utc::now();
    let db = state.clone();
    let scanner = user.clone();

    let result = tokio::task::spawn_blocking(move || {
        db.db
            .mark_attendance(&scanner, &req.qr_token, &req.device_id, now)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("blocking task failed"))
    })?;

    let record = result.map_err(|e| {
        let err = ApiError::from(e);
        if let ApiError::Rejected(r) = &err {
            warn!("Scan by {} rejected: {}", user.username, r.code());
        }
        err
    })?;

    Ok((
        StatusCode::CREATED,
        Json(MarkAttendanceResponse {
            success: "Attendance marked successfully".to_string(),
            attendance_id: record.id,
            lesson_id: record.lesson_id,
            scan_time: record.scan_time,
        }),
    ))
}
