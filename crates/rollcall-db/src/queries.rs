use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{Connection, Row, types::ToSql};
use uuid::Uuid;

use rollcall_types::models::{Attendance, Lesson, User};

use crate::Database;
use crate::models::{
    AttendanceRow, GroupRow, LessonRow, RosterRow, UserRow, id_from_sql, ts_to_sql,
};

const USER_COLUMNS: &str = "id, username, password, first_name, last_name, role";
const LESSON_COLUMNS: &str = "l.id, l.course_name, l.teacher_id, l.start_time, l.end_time, l.token";

impl Database {
    // -- Groups --

    pub fn create_group(&self, id: &str, name: &str) -> Result<()> {
        self.with_conn(|conn| insert_group(conn, id, name))
    }

    pub fn list_groups(&self) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM academic_groups ORDER BY name")?;
            let rows = stmt
                .query_map([], group_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_groups_by_ids(&self, ids: &[String]) -> Result<Vec<GroupRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, name FROM academic_groups WHERE id IN ({}) ORDER BY name",
                placeholders(1, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids), group_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_user_groups(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name
                 FROM academic_groups g
                 JOIN user_groups ug ON ug.group_id = g.id
                 WHERE ug.user_id = ?1
                 ORDER BY g.name",
            )?;
            let rows = stmt
                .query_map([user_id], group_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Users --

    /// Insert a user and their group memberships in one transaction.
    pub fn create_user(&self, user: &UserRow, group_ids: &[String]) -> Result<()> {
        self.with_tx(|tx| insert_user(tx, user, group_ids))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                [username],
                user_from_row,
            )
            .optional()
        })
    }

    /// The user with their group memberships.
    pub fn load_user(&self, id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let Some(row) = query_user_by_id(conn, id)? else {
                return Ok(None);
            };
            let mut groups = query_user_group_ids(conn, &[row.id.clone()])?;
            let group_ids = groups.remove(&row.id).unwrap_or_default();
            Ok(Some(row.into_user(group_ids)?))
        })
    }

    pub fn load_users(&self, ids: &[String]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE id IN ({})",
                USER_COLUMNS,
                placeholders(1, ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut groups = query_user_group_ids(conn, ids)?;
            rows.into_iter()
                .map(|row| {
                    let group_ids = groups.remove(&row.id).unwrap_or_default();
                    row.into_user(group_ids)
                })
                .collect()
        })
    }

    /// Replace a user's memberships. Returns false if the user does not exist.
    pub fn set_user_groups(&self, user_id: &str, group_ids: &[String]) -> Result<bool> {
        self.with_tx(|tx| {
            if query_user_by_id(tx, user_id)?.is_none() {
                return Ok(false);
            }
            tx.execute("DELETE FROM user_groups WHERE user_id = ?1", [user_id])?;
            insert_user_groups(tx, user_id, group_ids)?;
            Ok(true)
        })
    }

    /// Cascades to the user's memberships, attendance, and (for teachers) lessons.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn has_admin(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                [],
                |r| r.get(0),
            )?;
            Ok(n > 0)
        })
    }

    // -- Lessons --

    /// Insert a lesson and its audience groups in one transaction.
    pub fn create_lesson(&self, lesson: &Lesson) -> Result<()> {
        self.with_tx(|tx| insert_lesson(tx, lesson))
    }

    pub fn get_lesson(&self, id: &str) -> Result<Option<Lesson>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM lessons l WHERE l.id = ?1", LESSON_COLUMNS),
                    [id],
                    lesson_from_row,
                )
                .optional()?;
            match row {
                Some(row) => Ok(attach_lesson_groups(conn, vec![row])?.pop()),
                None => Ok(None),
            }
        })
    }

    /// Lessons owned by `teacher_id`, most recent start first.
    pub fn get_lessons_for_teacher(&self, teacher_id: &str) -> Result<Vec<Lesson>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM lessons l
                 WHERE l.teacher_id = ?1
                 ORDER BY l.start_time DESC",
                LESSON_COLUMNS
            );
            query_lessons(conn, &sql, &[&teacher_id])
        })
    }

    /// Lessons whose audience shares a group with the student, each listed
    /// once, most recent start first.
    pub fn get_lessons_for_student(&self, student_id: &str) -> Result<Vec<Lesson>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM lessons l
                 WHERE EXISTS (
                     SELECT 1 FROM lesson_groups lg
                     JOIN user_groups ug ON ug.group_id = lg.group_id
                     WHERE lg.lesson_id = l.id AND ug.user_id = ?1
                 )
                 ORDER BY l.start_time DESC",
                LESSON_COLUMNS
            );
            query_lessons(conn, &sql, &[&student_id])
        })
    }

    pub fn get_all_lessons(&self) -> Result<Vec<Lesson>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM lessons l ORDER BY l.start_time DESC",
                LESSON_COLUMNS
            );
            query_lessons(conn, &sql, &[])
        })
    }

    /// Cascades to the lesson's attendance.
    pub fn delete_lesson(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM lessons WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    // -- Attendance --

    pub fn get_attendance(&self, student_id: &str, lesson_id: &str) -> Result<Option<Attendance>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, student_id, lesson_id, scan_time, device_id
                     FROM attendance WHERE student_id = ?1 AND lesson_id = ?2",
                    [student_id, lesson_id],
                    attendance_from_row,
                )
                .optional()?;
            row.map(AttendanceRow::into_attendance).transpose()
        })
    }

    /// Batch-fetch one student's marks for a set of lessons.
    pub fn get_student_marks(&self, student_id: &str, lesson_ids: &[String]) -> Result<Vec<Attendance>> {
        if lesson_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, student_id, lesson_id, scan_time, device_id
                 FROM attendance WHERE student_id = ?1 AND lesson_id IN ({})",
                placeholders(2, lesson_ids.len())
            );
            let mut params: Vec<&dyn ToSql> = vec![&student_id];
            params.extend(lesson_ids.iter().map(|id| id as &dyn ToSql));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), attendance_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(AttendanceRow::into_attendance).collect()
        })
    }

    /// Every student in any of the lesson's groups, counted once, left-joined
    /// with their mark for this lesson. Ordered by username only; presentation
    /// order is the caller's business.
    pub fn get_roster(&self, lesson_id: &str) -> Result<Vec<RosterRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.first_name, u.last_name, a.scan_time
                 FROM users u
                 LEFT JOIN attendance a ON a.student_id = u.id AND a.lesson_id = ?1
                 WHERE u.role = 'student'
                   AND EXISTS (
                       SELECT 1 FROM user_groups ug
                       JOIN lesson_groups lg ON lg.group_id = ug.group_id
                       WHERE ug.user_id = u.id AND lg.lesson_id = ?1
                   )
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([lesson_id], |row| {
                    Ok(RosterRow {
                        student_id: row.get(0)?,
                        username: row.get(1)?,
                        first_name: row.get(2)?,
                        last_name: row.get(3)?,
                        scan_time: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn insert_group(conn: &Connection, id: &str, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO academic_groups (id, name) VALUES (?1, ?2)",
        (id, name),
    )?;
    Ok(())
}

pub(crate) fn insert_user(conn: &Connection, user: &UserRow, group_ids: &[String]) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, password, first_name, last_name, role)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            user.id,
            user.username,
            user.password,
            user.first_name,
            user.last_name,
            user.role
        ],
    )?;
    insert_user_groups(conn, &user.id, group_ids)
}

pub(crate) fn insert_lesson(conn: &Connection, lesson: &Lesson) -> Result<()> {
    conn.execute(
        "INSERT INTO lessons (id, course_name, teacher_id, start_time, end_time, token)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            lesson.id.to_string(),
            lesson.course_name,
            lesson.teacher_id.to_string(),
            ts_to_sql(lesson.start_time),
            ts_to_sql(lesson.end_time),
            lesson.token,
        ],
    )?;
    for group_id in &lesson.group_ids {
        conn.execute(
            "INSERT OR IGNORE INTO lesson_groups (lesson_id, group_id) VALUES (?1, ?2)",
            (lesson.id.to_string(), group_id.to_string()),
        )?;
    }
    Ok(())
}

fn insert_user_groups(conn: &Connection, user_id: &str, group_ids: &[String]) -> Result<()> {
    for group_id in group_ids {
        conn.execute(
            "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
            (user_id, group_id),
        )?;
    }
    Ok(())
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        role: row.get(5)?,
    })
}

fn lesson_from_row(row: &Row<'_>) -> rusqlite::Result<LessonRow> {
    Ok(LessonRow {
        id: row.get(0)?,
        course_name: row.get(1)?,
        teacher_id: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        token: row.get(5)?,
    })
}

pub(crate) fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        lesson_id: row.get(2)?,
        scan_time: row.get(3)?,
        device_id: row.get(4)?,
    })
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [id],
        user_from_row,
    )
    .optional()
}

fn query_user_group_ids(conn: &Connection, user_ids: &[String]) -> Result<HashMap<String, Vec<Uuid>>> {
    let sql = format!(
        "SELECT user_id, group_id FROM user_groups WHERE user_id IN ({})",
        placeholders(1, user_ids.len())
    );
    collect_pairs(conn, &sql, user_ids)
}

fn query_lesson_group_ids(conn: &Connection, lesson_ids: &[String]) -> Result<HashMap<String, Vec<Uuid>>> {
    let sql = format!(
        "SELECT lesson_id, group_id FROM lesson_groups WHERE lesson_id IN ({})",
        placeholders(1, lesson_ids.len())
    );
    collect_pairs(conn, &sql, lesson_ids)
}

fn collect_pairs(conn: &Connection, sql: &str, keys: &[String]) -> Result<HashMap<String, Vec<Uuid>>> {
    let mut out: HashMap<String, Vec<Uuid>> = HashMap::new();
    if keys.is_empty() {
        return Ok(out);
    }

    let mut stmt = conn.prepare(sql)?;
    let pairs = stmt
        .query_map(rusqlite::params_from_iter(keys), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (key, group_id) in pairs {
        out.entry(key).or_default().push(id_from_sql(&group_id)?);
    }
    Ok(out)
}

/// Exact, case-sensitive match.
pub(crate) fn query_lesson_by_token(conn: &Connection, token: &str) -> Result<Option<Lesson>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM lessons l WHERE l.token = ?1", LESSON_COLUMNS),
            [token],
            lesson_from_row,
        )
        .optional()?;
    match row {
        Some(row) => Ok(attach_lesson_groups(conn, vec![row])?.pop()),
        None => Ok(None),
    }
}

fn query_lessons(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Lesson>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, lesson_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    attach_lesson_groups(conn, rows)
}

fn attach_lesson_groups(conn: &Connection, rows: Vec<LessonRow>) -> Result<Vec<Lesson>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut groups = query_lesson_group_ids(conn, &ids)?;
    rows.into_iter()
        .map(|row| {
            let group_ids = groups.remove(&row.id).unwrap_or_default();
            row.into_lesson(group_ids)
        })
        .collect()
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
