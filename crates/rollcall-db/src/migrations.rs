use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE academic_groups (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                first_name  TEXT NOT NULL DEFAULT '',
                last_name   TEXT NOT NULL DEFAULT '',
                role        TEXT NOT NULL CHECK (role IN ('student', 'teacher', 'admin')),
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE user_groups (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                group_id    TEXT NOT NULL REFERENCES academic_groups(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, group_id)
            );

            CREATE INDEX idx_user_groups_group ON user_groups(group_id);

            CREATE TABLE lessons (
                id          TEXT PRIMARY KEY,
                course_name TEXT NOT NULL,
                teacher_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                start_time  TEXT NOT NULL,
                end_time    TEXT NOT NULL,
                token       TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_lessons_teacher ON lessons(teacher_id, start_time);

            CREATE TABLE lesson_groups (
                lesson_id   TEXT NOT NULL REFERENCES lessons(id) ON DELETE CASCADE,
                group_id    TEXT NOT NULL REFERENCES academic_groups(id) ON DELETE CASCADE,
                PRIMARY KEY (lesson_id, group_id)
            );

            CREATE INDEX idx_lesson_groups_group ON lesson_groups(group_id);

            -- (lesson_id, device_id) is unique: together with (student_id, lesson_id)
            -- it forbids one device marking two different students.
            CREATE TABLE attendance (
                id          TEXT PRIMARY KEY,
                student_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                lesson_id   TEXT NOT NULL REFERENCES lessons(id) ON DELETE CASCADE,
                scan_time   TEXT NOT NULL,
                device_id   TEXT NOT NULL,
                UNIQUE (student_id, lesson_id),
                UNIQUE (lesson_id, device_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn role_check_constraint_rejects_unknown_roles() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let res = conn.execute(
            "INSERT INTO users (id, username, password, role) VALUES ('u1', 'x', 'h', 'janitor')",
            [],
        );
        assert!(res.is_err());
    }
}
