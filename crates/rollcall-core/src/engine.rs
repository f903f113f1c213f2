use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use rollcall_types::models::{Attendance, Lesson, Role, User};

use crate::activity::is_active;

/// Why a scan was refused. Every variant is an expected outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Only students can mark attendance")]
    NotAStudent,
    #[error("Invalid QR code")]
    InvalidToken,
    #[error("The lesson has already ended or has not started yet")]
    LessonNotActive,
    #[error("You are not enrolled in this lesson")]
    NotEnrolled,
    #[error("You have already marked attendance for this lesson")]
    AlreadyMarked,
    #[error("Another student has already marked attendance from this device")]
    DeviceAlreadyUsed,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotAStudent => "NotAStudent",
            Rejection::InvalidToken => "InvalidToken",
            Rejection::LessonNotActive => "LessonNotActive",
            Rejection::NotEnrolled => "NotEnrolled",
            Rejection::AlreadyMarked => "AlreadyMarked",
            Rejection::DeviceAlreadyUsed => "DeviceAlreadyUsed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MarkError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("attendance store failure: {0}")]
    Store(#[from] anyhow::Error),
}

/// Result of the final insert. Conflicts come from storage constraints, so a
/// racing scan that slipped past the existence checks still lands here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    StudentConflict,
    DeviceConflict,
}

/// Storage seen by the decision engine. Implementations are expected to run
/// the whole `mark_attendance` call inside one transaction.
pub trait AttendanceStore {
    /// Exact, case-sensitive token match.
    fn lesson_by_token(&self, token: &str) -> Result<Option<Lesson>>;

    fn has_attendance(&self, student_id: Uuid, lesson_id: Uuid) -> Result<bool>;

    /// True if some other student already marked this lesson from `device_id`.
    fn device_used_by_other(&self, lesson_id: Uuid, device_id: &str, student_id: Uuid)
    -> Result<bool>;

    fn insert_attendance(&self, record: &Attendance) -> Result<InsertOutcome>;
}

/// Run the scan guards in order; the first failure wins.
///
/// 1. role is student
/// 2. token resolves to a lesson
/// 3. lesson is active at `now`
/// 4. student shares a group with the lesson
/// 5. no prior mark by this student
/// 6. device not used by another student on this lesson
pub fn mark_attendance<S>(
    store: &S,
    user: &User,
    token: &str,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<Attendance, MarkError>
where
    S: AttendanceStore + ?Sized,
{
    match user.role {
        Role::Student => {}
        Role::Teacher | Role::Admin => return Err(Rejection::NotAStudent.into()),
    }

    let lesson = store
        .lesson_by_token(token)?
        .ok_or(Rejection::InvalidToken)?;

    if !is_active(&lesson, now) {
        return Err(Rejection::LessonNotActive.into());
    }

    if !shares_group(user, &lesson) {
        return Err(Rejection::NotEnrolled.into());
    }

    if store.has_attendance(user.id, lesson.id)? {
        return Err(Rejection::AlreadyMarked.into());
    }

    if store.device_used_by_other(lesson.id, device_id, user.id)? {
        return Err(Rejection::DeviceAlreadyUsed.into());
    }

    let record = Attendance {
        id: Uuid::new_v4(),
        student_id: user.id,
        lesson_id: lesson.id,
        scan_time: now,
        device_id: device_id.to_string(),
    };

    match store.insert_attendance(&record)? {
        InsertOutcome::Inserted => Ok(record),
        InsertOutcome::StudentConflict => {
            debug!("Insert lost a race for student {} on lesson {}", user.id, lesson.id);
            Err(Rejection::AlreadyMarked.into())
        }
        InsertOutcome::DeviceConflict => {
            debug!("Insert lost a device race on lesson {}", lesson.id);
            Err(Rejection::DeviceAlreadyUsed.into())
        }
    }
}

fn shares_group(user: &User, lesson: &Lesson) -> bool {
    user.group_ids.iter().any(|g| lesson.group_ids.contains(g))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct MemStore {
        lessons: Vec<Lesson>,
        marks: RefCell<Vec<Attendance>>,
        lookups: Cell<usize>,
        // Simulates a concurrent writer committing between the checks and the insert.
        forced_conflict: Option<InsertOutcome>,
    }

    impl AttendanceStore for MemStore {
        fn lesson_by_token(&self, token: &str) -> Result<Option<Lesson>> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(self.lessons.iter().find(|l| l.token == token).cloned())
        }

        fn has_attendance(&self, student_id: Uuid, lesson_id: Uuid) -> Result<bool> {
            Ok(self
                .marks
                .borrow()
                .iter()
                .any(|a| a.student_id == student_id && a.lesson_id == lesson_id))
        }

        fn device_used_by_other(
            &self,
            lesson_id: Uuid,
            device_id: &str,
            student_id: Uuid,
        ) -> Result<bool> {
            Ok(self.marks.borrow().iter().any(|a| {
                a.lesson_id == lesson_id && a.device_id == device_id && a.student_id != student_id
            }))
        }

        fn insert_attendance(&self, record: &Attendance) -> Result<InsertOutcome> {
            if let Some(outcome) = self.forced_conflict {
                return Ok(outcome);
            }
            self.marks.borrow_mut().push(record.clone());
            Ok(InsertOutcome::Inserted)
        }
    }

    struct FailingStore;

    impl AttendanceStore for FailingStore {
        fn lesson_by_token(&self, _token: &str) -> Result<Option<Lesson>> {
            Err(anyhow::anyhow!("disk I/O error"))
        }
        fn has_attendance(&self, _: Uuid, _: Uuid) -> Result<bool> {
            unreachable!()
        }
        fn device_used_by_other(&self, _: Uuid, _: &str, _: Uuid) -> Result<bool> {
            unreachable!()
        }
        fn insert_attendance(&self, _: &Attendance) -> Result<InsertOutcome> {
            unreachable!()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    fn user(role: Role, groups: &[Uuid]) -> User {
        User {
            id: Uuid::new_v4(),
            username: format!("u-{}", Uuid::new_v4()),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            role,
            group_ids: groups.to_vec(),
        }
    }

    fn fixture() -> (MemStore, Uuid) {
        let group = Uuid::new_v4();
        let lesson = Lesson {
            id: Uuid::new_v4(),
            course_name: "Algorithms".into(),
            teacher_id: Uuid::new_v4(),
            group_ids: vec![group],
            start_time: now() - Duration::minutes(20),
            end_time: now() + Duration::minutes(70),
            token: "tok-live".into(),
        };
        let past = Lesson {
            id: Uuid::new_v4(),
            token: "tok-past".into(),
            start_time: now() - Duration::days(1) - Duration::hours(2),
            end_time: now() - Duration::days(1),
            ..lesson.clone()
        };
        let store = MemStore {
            lessons: vec![lesson, past],
            ..Default::default()
        };
        (store, group)
    }

    fn rejection(res: Result<Attendance, MarkError>) -> Rejection {
        match res {
            Err(MarkError::Rejected(r)) => r,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn enrolled_student_on_live_lesson_is_marked() {
        let (store, group) = fixture();
        let s = user(Role::Student, &[group]);

        let record = mark_attendance(&store, &s, "tok-live", "phone-1", now()).unwrap();
        assert_eq!(record.student_id, s.id);
        assert_eq!(record.scan_time, now());
        assert_eq!(record.device_id, "phone-1");
        assert_eq!(store.marks.borrow().len(), 1);
    }

    #[test]
    fn role_is_checked_before_anything_else() {
        let (store, group) = fixture();
        let teacher = user(Role::Teacher, &[group]);
        let admin = user(Role::Admin, &[]);

        // Past lesson would fail the activity guard, but role wins.
        assert_eq!(
            rejection(mark_attendance(&store, &teacher, "tok-past", "d", now())),
            Rejection::NotAStudent
        );
        assert_eq!(
            rejection(mark_attendance(&store, &admin, "nope", "d", now())),
            Rejection::NotAStudent
        );
        assert_eq!(store.lookups.get(), 0);
    }

    #[test]
    fn unknown_token_is_invalid() {
        let (store, group) = fixture();
        let s = user(Role::Student, &[group]);
        assert_eq!(
            rejection(mark_attendance(&store, &s, "no-such-token", "d", now())),
            Rejection::InvalidToken
        );
    }

    #[test]
    fn token_match_is_case_sensitive() {
        let (store, group) = fixture();
        let s = user(Role::Student, &[group]);
        assert_eq!(
            rejection(mark_attendance(&store, &s, "TOK-LIVE", "d", now())),
            Rejection::InvalidToken
        );
        assert_eq!(
            rejection(mark_attendance(&store, &s, " tok-live", "d", now())),
            Rejection::InvalidToken
        );
    }

    #[test]
    fn inactive_lesson_is_checked_before_membership() {
        let (store, _) = fixture();
        let outsider = user(Role::Student, &[Uuid::new_v4()]);
        assert_eq!(
            rejection(mark_attendance(&store, &outsider, "tok-past", "d", now())),
            Rejection::LessonNotActive
        );
    }

    #[test]
    fn boundary_instants_are_accepted() {
        let (store, group) = fixture();
        let early = user(Role::Student, &[group]);
        let late = user(Role::Student, &[group]);
        let start = now() - Duration::minutes(20);
        let end = now() + Duration::minutes(70);

        assert!(mark_attendance(&store, &early, "tok-live", "a", start).is_ok());
        assert!(mark_attendance(&store, &late, "tok-live", "b", end).is_ok());
        let after = user(Role::Student, &[group]);
        assert_eq!(
            rejection(mark_attendance(
                &store,
                &after,
                "tok-live",
                "c",
                end + Duration::seconds(1)
            )),
            Rejection::LessonNotActive
        );
    }

    #[test]
    fn student_outside_lesson_groups_is_not_enrolled() {
        let (store, _) = fixture();
        let s = user(Role::Student, &[Uuid::new_v4(), Uuid::new_v4()]);
        assert_eq!(
            rejection(mark_attendance(&store, &s, "tok-live", "d", now())),
            Rejection::NotEnrolled
        );

        let groupless = user(Role::Student, &[]);
        assert_eq!(
            rejection(mark_attendance(&store, &groupless, "tok-live", "d", now())),
            Rejection::NotEnrolled
        );
    }

    #[test]
    fn second_scan_by_same_student_is_already_marked() {
        let (store, group) = fixture();
        let s = user(Role::Student, &[group]);
        mark_attendance(&store, &s, "tok-live", "phone-1", now()).unwrap();

        // Same device, different device: both are duplicates, and the duplicate
        // guard runs before the device guard.
        assert_eq!(
            rejection(mark_attendance(&store, &s, "tok-live", "phone-1", now())),
            Rejection::AlreadyMarked
        );
        assert_eq!(
            rejection(mark_attendance(&store, &s, "tok-live", "phone-2", now())),
            Rejection::AlreadyMarked
        );
        assert_eq!(store.marks.borrow().len(), 1);
    }

    #[test]
    fn shared_device_across_students_is_refused() {
        let (store, group) = fixture();
        let a = user(Role::Student, &[group]);
        let b = user(Role::Student, &[group]);
        mark_attendance(&store, &a, "tok-live", "phone-1", now()).unwrap();

        assert_eq!(
            rejection(mark_attendance(&store, &b, "tok-live", "phone-1", now())),
            Rejection::DeviceAlreadyUsed
        );
        assert!(mark_attendance(&store, &b, "tok-live", "phone-2", now()).is_ok());
    }

    #[test]
    fn empty_device_ids_collide() {
        let (store, group) = fixture();
        let a = user(Role::Student, &[group]);
        let b = user(Role::Student, &[group]);
        mark_attendance(&store, &a, "tok-live", "", now()).unwrap();
        assert_eq!(
            rejection(mark_attendance(&store, &b, "tok-live", "", now())),
            Rejection::DeviceAlreadyUsed
        );
    }

    #[test]
    fn insert_conflicts_translate_to_rejections() {
        let (mut store, group) = fixture();
        let s = user(Role::Student, &[group]);

        store.forced_conflict = Some(InsertOutcome::StudentConflict);
        assert_eq!(
            rejection(mark_attendance(&store, &s, "tok-live", "d", now())),
            Rejection::AlreadyMarked
        );

        store.forced_conflict = Some(InsertOutcome::DeviceConflict);
        assert_eq!(
            rejection(mark_attendance(&store, &s, "tok-live", "d", now())),
            Rejection::DeviceAlreadyUsed
        );
    }

    #[test]
    fn store_failures_are_not_rejections() {
        let s = user(Role::Student, &[]);
        let err = mark_attendance(&FailingStore, &s, "tok", "d", now()).unwrap_err();
        assert!(matches!(err, MarkError::Store(_)));
    }

    #[test]
    fn rejection_codes_match_variant_names() {
        assert_eq!(Rejection::AlreadyMarked.code(), "AlreadyMarked");
        assert_eq!(format!("{:?}", Rejection::DeviceAlreadyUsed), Rejection::DeviceAlreadyUsed.code());
    }
}
