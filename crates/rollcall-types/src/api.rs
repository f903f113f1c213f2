use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Role;

// -- JWT Claims --

/// Access token claims. Role and groups are deliberately absent: they are
/// re-read from storage on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

// -- Profile --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    /// Group names, not ids.
    pub academic_groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponse {
    pub id: Uuid,
    pub name: String,
}

// -- Lessons --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonResponse {
    pub id: Uuid,
    pub course_name: String,
    pub teacher: UserResponse,
    pub lesson_groups: Vec<GroupResponse>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Only populated for admins.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub qr_token: Option<String>,
    pub is_active: bool,
    pub attendance_info: Option<AttendanceInfo>,
    /// `dd.mm.YYYY HH:MM` in the configured display offset.
    pub server_time: String,
}

/// Role-scoped attendance projection attached to each lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum AttendanceInfo {
    Student {
        is_present: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        scan_time: Option<String>,
    },
    Teacher,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateLessonRequest {
    pub course_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub group_ids: Vec<Uuid>,
    /// Required when an admin creates the lesson; ignored for teachers.
    #[serde(default)]
    pub teacher_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonDetailResponse {
    pub id: Uuid,
    pub course_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub students_attendance: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: Uuid,
    pub full_name: String,
    pub username: String,
    pub is_present: bool,
    /// `HH:MM`, or `-` when absent.
    pub scan_time: String,
}

// -- Attendance --

#[derive(Debug, Deserialize)]
pub struct MarkAttendanceRequest {
    pub qr_token: String,
    /// Missing is treated as the empty string, which still collides with
    /// another empty device id on the same lesson.
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkAttendanceResponse {
    pub success: String,
    pub attendance_id: Uuid,
    pub lesson_id: Uuid,
    pub scan_time: DateTime<Utc>,
}

// -- Admin --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: Role,
    #[serde(default)]
    pub group_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetGroupsRequest {
    pub group_ids: Vec<Uuid>,
}

/// Structured error body returned for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}
