//! Attendance rules that do not touch storage or the network.
//!
//! The clock is always passed in; nothing here calls `Utc::now()`.

pub mod activity;
pub mod engine;
pub mod token;

pub use activity::{InvalidWindow, is_active, validate_window};
pub use engine::{AttendanceStore, InsertOutcome, MarkError, Rejection, mark_attendance};
pub use token::generate_token;
