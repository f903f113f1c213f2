use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use rollcall_core::generate_token;
use rollcall_types::models::{Lesson, Role};

use crate::Database;
use crate::models::UserRow;
use crate::queries::{insert_group, insert_lesson, insert_user};

const GROUP_NAMES: &[&str] = &["CS-101", "CS-102", "IS-201", "IS-202", "AI-301"];

const TEACHERS: &[(&str, &str, &str)] = &[
    ("prof_matrix", "Professor", "Matrix"),
    ("dr_logic", "Doctor", "Logic"),
    ("t_expert", "Tech", "Expert"),
];

const COURSES: &[&str] = &[
    "Algorithms and Data Structures",
    "Systems Architecture",
    "Databases",
    "Machine Learning",
    "Web Technologies",
];

const STUDENTS_PER_GROUP: usize = 5;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub groups: usize,
    pub teachers: usize,
    pub students: usize,
    pub lessons: usize,
}

/// Populate demo data. Does nothing if any group or non-admin user exists.
///
/// Runs in one transaction: a failure part way through leaves the database
/// empty, so a later run can try again.
///
/// Password hashes are supplied by the caller so this crate stays free of
/// the hashing stack.
pub fn seed_demo(
    db: &Database,
    teacher_password_hash: &str,
    student_password_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<SeedSummary>> {
    db.with_tx(|tx| seed_in_tx(tx, teacher_password_hash, student_password_hash, now))
}

fn seed_in_tx(
    tx: &Connection,
    teacher_password_hash: &str,
    student_password_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<SeedSummary>> {
    let populated: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM academic_groups)
             OR EXISTS (SELECT 1 FROM users WHERE role != 'admin')",
        [],
        |r| r.get(0),
    )?;
    if populated {
        info!("Seed skipped: database already has data");
        return Ok(None);
    }

    let mut rng = rand::rng();
    let mut summary = SeedSummary::default();

    let mut groups = Vec::with_capacity(GROUP_NAMES.len());
    for name in GROUP_NAMES {
        let id = Uuid::new_v4();
        insert_group(tx, &id.to_string(), name)?;
        groups.push((id, *name));
        summary.groups += 1;
    }

    let mut teachers = Vec::with_capacity(TEACHERS.len());
    for (username, first, last) in TEACHERS {
        let id = Uuid::new_v4();
        let k = rng.random_range(2..=3);
        let assigned: Vec<String> = groups
            .choose_multiple(&mut rng, k)
            .map(|(g, _)| g.to_string())
            .collect();
        insert_user(
            tx,
            &UserRow {
                id: id.to_string(),
                username: username.to_string(),
                password: teacher_password_hash.to_string(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                role: Role::Teacher.as_str().to_string(),
            },
            &assigned,
        )?;
        teachers.push(id);
        summary.teachers += 1;
    }

    for (group_id, name) in &groups {
        for i in 1..=STUDENTS_PER_GROUP {
            insert_user(
                tx,
                &UserRow {
                    id: Uuid::new_v4().to_string(),
                    username: format!("student_{}_{}", name.to_lowercase(), i),
                    password: student_password_hash.to_string(),
                    first_name: format!("Student_{}", i),
                    last_name: format!("From_{}", name),
                    role: Role::Student.as_str().to_string(),
                },
                &[group_id.to_string()],
            )?;
            summary.students += 1;
        }
    }

    let group_ids: Vec<Uuid> = groups.iter().map(|(id, _)| *id).collect();
    for course in COURSES {
        let teacher_id = *teachers.choose(&mut rng).ok_or_else(|| anyhow::anyhow!("no teachers"))?;

        // One running right now, for scanning.
        let live_group = *group_ids.choose(&mut rng).ok_or_else(|| anyhow::anyhow!("no groups"))?;
        insert_lesson(tx, &Lesson {
            id: Uuid::new_v4(),
            course_name: course.to_string(),
            teacher_id,
            group_ids: vec![live_group],
            start_time: now - Duration::minutes(20),
            end_time: now + Duration::minutes(70),
            token: generate_token(),
        })?;

        // One from yesterday, for history. Lectures are shared by two groups.
        let teacher_id = *teachers.choose(&mut rng).ok_or_else(|| anyhow::anyhow!("no teachers"))?;
        insert_lesson(tx, &Lesson {
            id: Uuid::new_v4(),
            course_name: format!("{} (Lecture)", course),
            teacher_id,
            group_ids: group_ids.choose_multiple(&mut rng, 2).copied().collect(),
            start_time: now - Duration::days(1) - Duration::hours(2),
            end_time: now - Duration::days(1),
            token: generate_token(),
        })?;
        summary.lessons += 2;
    }

    info!(
        "Seeded {} groups, {} teachers, {} students, {} lessons",
        summary.groups, summary.teachers, summary.students, summary.lessons
    );
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_populates_once() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let summary = seed_demo(&db, "t-hash", "s-hash", now).unwrap().unwrap();
        assert_eq!(summary.groups, 5);
        assert_eq!(summary.teachers, 3);
        assert_eq!(summary.students, 25);
        assert_eq!(summary.lessons, 10);

        assert!(seed_demo(&db, "t-hash", "s-hash", now).unwrap().is_none());
    }

    #[test]
    fn failed_seed_leaves_nothing_behind() {
        let db = Database::open_in_memory().unwrap();
        // An admin squatting on a demo teacher's username passes the
        // emptiness check but makes the teacher insert fail after the
        // groups are in.
        db.create_user(
            &UserRow {
                id: Uuid::new_v4().to_string(),
                username: "dr_logic".into(),
                password: "h".into(),
                first_name: String::new(),
                last_name: String::new(),
                role: Role::Admin.as_str().into(),
            },
            &[],
        )
        .unwrap();

        let err = seed_demo(&db, "t", "s", Utc::now()).unwrap_err();
        assert!(crate::is_unique_violation(&err));
        assert!(db.list_groups().unwrap().is_empty());
        assert!(db.get_user_by_username("prof_matrix").unwrap().is_none());
    }

    #[test]
    fn seeded_students_see_their_groups_lessons() {
        let db = Database::open_in_memory().unwrap();
        seed_demo(&db, "t", "s", Utc::now()).unwrap();

        let student = db.get_user_by_username("student_cs-101_1").unwrap().unwrap();
        let lessons = db.get_lessons_for_student(&student.id).unwrap();
        let groups = db.get_user_groups(&student.id).unwrap();
        assert_eq!(groups.len(), 1);
        let group_id: Uuid = groups[0].id.parse().unwrap();
        assert!(lessons.iter().all(|l| l.group_ids.contains(&group_id)));
    }
}
