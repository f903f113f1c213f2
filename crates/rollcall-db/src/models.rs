//! Database row types. These map directly to SQLite rows and stay stringly
//! typed; `into_*` converts them to the domain models in rollcall-types.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use rollcall_types::models::{Attendance, Group, Lesson, Role, User};

pub struct GroupRow {
    pub id: String,
    pub name: String,
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

pub struct LessonRow {
    pub id: String,
    pub course_name: String,
    pub teacher_id: String,
    pub start_time: String,
    pub end_time: String,
    pub token: String,
}

pub struct AttendanceRow {
    pub id: String,
    pub student_id: String,
    pub lesson_id: String,
    pub scan_time: String,
    pub device_id: String,
}

/// A student in one of a lesson's groups, with their mark if any.
pub struct RosterRow {
    pub student_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub scan_time: Option<String>,
}

/// Fixed-width UTC text at full nanosecond precision, so `ORDER BY` on the
/// column sorts chronologically and reads return the instant that was written.
pub fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn ts_from_sql(s: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(s).with_context(|| format!("bad timestamp '{}'", s))?;
    Ok(ts.with_timezone(&Utc))
}

pub fn id_from_sql(s: &str) -> Result<Uuid> {
    s.parse().with_context(|| format!("bad id '{}'", s))
}

impl GroupRow {
    pub fn into_group(self) -> Result<Group> {
        Ok(Group {
            id: id_from_sql(&self.id)?,
            name: self.name,
        })
    }
}

impl UserRow {
    pub fn into_user(self, group_ids: Vec<Uuid>) -> Result<User> {
        Ok(User {
            id: id_from_sql(&self.id)?,
            role: self
                .role
                .parse::<Role>()
                .with_context(|| format!("user {}", self.id))?,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            group_ids,
        })
    }
}

impl LessonRow {
    pub fn into_lesson(self, group_ids: Vec<Uuid>) -> Result<Lesson> {
        Ok(Lesson {
            id: id_from_sql(&self.id)?,
            course_name: self.course_name,
            teacher_id: id_from_sql(&self.teacher_id)?,
            group_ids,
            start_time: ts_from_sql(&self.start_time)?,
            end_time: ts_from_sql(&self.end_time)?,
            token: self.token,
        })
    }
}

impl AttendanceRow {
    pub fn into_attendance(self) -> Result<Attendance> {
        Ok(Attendance {
            id: id_from_sql(&self.id)?,
            student_id: id_from_sql(&self.student_id)?,
            lesson_id: id_from_sql(&self.lesson_id)?,
            scan_time: ts_from_sql(&self.scan_time)?,
            device_id: self.device_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn timestamps_sort_as_text() {
        let base = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let later = base + Duration::nanoseconds(1);
        let much_later = base + Duration::days(300);

        let mut texts = vec![ts_to_sql(much_later), ts_to_sql(base), ts_to_sql(later)];
        texts.sort();
        assert_eq!(texts, vec![ts_to_sql(base), ts_to_sql(later), ts_to_sql(much_later)]);
        assert_eq!(ts_from_sql(&texts[1]).unwrap(), later);
    }

    #[test]
    fn sub_microsecond_instants_survive_storage() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 8, 22, 18).unwrap()
            + Duration::nanoseconds(384_351_923);
        let text = ts_to_sql(ts);
        assert_eq!(text, "2026-03-02T08:22:18.384351923Z");
        assert_eq!(ts_from_sql(&text).unwrap(), ts);
        assert_eq!(ts_to_sql(base_of_day()).len(), text.len());
    }

    fn base_of_day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn corrupt_role_is_an_error() {
        let row = UserRow {
            id: Uuid::new_v4().to_string(),
            username: "x".into(),
            password: "h".into(),
            first_name: String::new(),
            last_name: String::new(),
            role: "root".into(),
        };
        assert!(row.into_user(vec![]).is_err());
    }
}
