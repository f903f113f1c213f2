//! Role-specific views over committed state. Nothing here touches storage.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use uuid::Uuid;

use rollcall_core::is_active;
use rollcall_db::models::{RosterRow, id_from_sql, ts_from_sql};
use rollcall_types::api::{AttendanceInfo, GroupResponse, LessonResponse, RosterEntry, UserResponse};
use rollcall_types::models::{Attendance, Lesson, Role, User, full_name};

/// `HH:MM` in the display offset.
pub fn format_clock(ts: DateTime<Utc>, offset: FixedOffset) -> String {
    ts.with_timezone(&offset).format("%H:%M").to_string()
}

/// `dd.mm.YYYY HH:MM` in the display offset.
pub fn format_server_time(now: DateTime<Utc>, offset: FixedOffset) -> String {
    now.with_timezone(&offset).format("%d.%m.%Y %H:%M").to_string()
}

pub fn user_response(user: &User, group_names: &HashMap<Uuid, String>) -> UserResponse {
    let mut academic_groups: Vec<String> = user
        .group_ids
        .iter()
        .filter_map(|id| group_names.get(id).cloned())
        .collect();
    academic_groups.sort();

    UserResponse {
        id: user.id,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        role: user.role,
        academic_groups,
    }
}

/// What the viewer learns about their own attendance on a lesson.
pub fn attendance_info(
    viewer: Role,
    own_mark: Option<&Attendance>,
    offset: FixedOffset,
) -> Option<AttendanceInfo> {
    match viewer {
        Role::Student => Some(AttendanceInfo::Student {
            is_present: own_mark.is_some(),
            scan_time: own_mark.map(|a| format_clock(a.scan_time, offset)),
        }),
        Role::Teacher => Some(AttendanceInfo::Teacher),
        Role::Admin => None,
    }
}

pub struct LessonView<'a> {
    pub viewer: Role,
    pub teacher: UserResponse,
    pub group_names: &'a HashMap<Uuid, String>,
    pub own_mark: Option<&'a Attendance>,
    pub now: DateTime<Utc>,
    pub offset: FixedOffset,
}

pub fn lesson_response(lesson: &Lesson, view: LessonView<'_>) -> LessonResponse {
    let mut lesson_groups: Vec<GroupResponse> = lesson
        .group_ids
        .iter()
        .filter_map(|id| {
            view.group_names.get(id).map(|name| GroupResponse {
                id: *id,
                name: name.clone(),
            })
        })
        .collect();
    lesson_groups.sort_by(|a, b| a.name.cmp(&b.name));

    // The raw token is the scan credential; only admins get it.
    let qr_token = match view.viewer {
        Role::Admin => Some(lesson.token.clone()),
        Role::Student | Role::Teacher => None,
    };

    LessonResponse {
        id: lesson.id,
        course_name: lesson.course_name.clone(),
        teacher: view.teacher,
        lesson_groups,
        start_time: lesson.start_time,
        end_time: lesson.end_time,
        qr_token,
        is_active: is_active(lesson, view.now),
        attendance_info: attendance_info(view.viewer, view.own_mark, view.offset),
        server_time: format_server_time(view.now, view.offset),
    }
}

/// Present students first, then by full name, then username.
pub fn build_roster(rows: Vec<RosterRow>, offset: FixedOffset) -> Result<Vec<RosterEntry>> {
    let mut entries = rows
        .into_iter()
        .map(|row| -> Result<RosterEntry> {
            let scan_time = row.scan_time.as_deref().map(ts_from_sql).transpose()?;
            Ok(RosterEntry {
                id: id_from_sql(&row.student_id)?,
                full_name: full_name(&row.first_name, &row.last_name),
                username: row.username,
                is_present: scan_time.is_some(),
                scan_time: scan_time
                    .map(|ts| format_clock(ts, offset))
                    .unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    entries.sort_by(|a, b| {
        b.is_present
            .cmp(&a.is_present)
            .then_with(|| a.full_name.cmp(&b.full_name))
            .then_with(|| a.username.cmp(&b.username))
    });
    Ok(entries)
}
