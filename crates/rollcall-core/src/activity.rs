use chrono::{DateTime, Utc};

use rollcall_types::models::Lesson;

/// A lesson is live from `start_time` through `end_time`, both inclusive.
pub fn is_active(lesson: &Lesson, now: DateTime<Utc>) -> bool {
    lesson.start_time <= now && now <= lesson.end_time
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("lesson ends ({end}) before it starts ({start})")]
pub struct InvalidWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Creation-time check. A zero-length window is allowed.
pub fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), InvalidWindow> {
    if start > end {
        return Err(InvalidWindow { start, end });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn lesson(start: DateTime<Utc>, end: DateTime<Utc>) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            course_name: "Databases".into(),
            teacher_id: Uuid::new_v4(),
            group_ids: vec![],
            start_time: start,
            end_time: end,
            token: "t".into(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn active_at_both_boundaries() {
        let l = lesson(t0(), t0() + Duration::minutes(90));
        assert!(is_active(&l, t0()));
        assert!(is_active(&l, t0() + Duration::minutes(90)));
        assert!(is_active(&l, t0() + Duration::minutes(45)));
    }

    #[test]
    fn inactive_strictly_outside() {
        let l = lesson(t0(), t0() + Duration::minutes(90));
        assert!(!is_active(&l, t0() - Duration::milliseconds(1)));
        assert!(!is_active(&l, t0() + Duration::minutes(90) + Duration::milliseconds(1)));
    }

    #[test]
    fn zero_length_window_is_active_only_at_its_instant() {
        let l = lesson(t0(), t0());
        assert!(is_active(&l, t0()));
        assert!(!is_active(&l, t0() + Duration::seconds(1)));
    }

    #[test]
    fn inverted_window_is_never_active() {
        let l = lesson(t0(), t0() - Duration::minutes(1));
        assert!(!is_active(&l, t0()));
        assert!(!is_active(&l, t0() - Duration::seconds(30)));
    }

    #[test]
    fn validate_window_rejects_end_before_start() {
        assert!(validate_window(t0(), t0()).is_ok());
        assert!(validate_window(t0(), t0() + Duration::hours(1)).is_ok());
        let err = validate_window(t0(), t0() - Duration::seconds(1)).unwrap_err();
        assert_eq!(err.start, t0());
    }
}
