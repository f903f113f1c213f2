use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;
use uuid::Uuid;

use rollcall_core::{AttendanceStore, InsertOutcome, MarkError, mark_attendance};
use rollcall_types::models::{Attendance, Lesson, User};

use crate::models::ts_to_sql;
use crate::queries::query_lesson_by_token;
use crate::{Database, sqlite_unique_violation};

/// Decision-engine view over one open transaction.
pub struct TxStore<'a> {
    conn: &'a Connection,
}

impl<'a> TxStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl AttendanceStore for TxStore<'_> {
    fn lesson_by_token(&self, token: &str) -> Result<Option<Lesson>> {
        query_lesson_by_token(self.conn, token)
    }

    fn has_attendance(&self, student_id: Uuid, lesson_id: Uuid) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM attendance WHERE student_id = ?1 AND lesson_id = ?2)",
            [student_id.to_string(), lesson_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn device_used_by_other(
        &self,
        lesson_id: Uuid,
        device_id: &str,
        student_id: Uuid,
    ) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM attendance
                 WHERE lesson_id = ?1 AND device_id = ?2 AND student_id != ?3
             )",
            rusqlite::params![lesson_id.to_string(), device_id, student_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn insert_attendance(&self, record: &Attendance) -> Result<InsertOutcome> {
        let res = self.conn.execute(
            "INSERT INTO attendance (id, student_id, lesson_id, scan_time, device_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                record.id.to_string(),
                record.student_id.to_string(),
                record.lesson_id.to_string(),
                ts_to_sql(record.scan_time),
                record.device_id,
            ],
        );

        match res {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if sqlite_unique_violation(&e) => {
                // Both indexes can fire for one row; the student's own prior
                // mark takes precedence, as it does in the guard order.
                if self.has_attendance(record.student_id, record.lesson_id)? {
                    Ok(InsertOutcome::StudentConflict)
                } else {
                    Ok(InsertOutcome::DeviceConflict)
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Database {
    /// Run every scan guard and the insert inside a single `BEGIN IMMEDIATE`
    /// transaction. Nothing is written unless all guards pass.
    pub fn mark_attendance(
        &self,
        user: &User,
        token: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Attendance, MarkError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(anyhow::Error::from)?;

        let record = mark_attendance(&TxStore::new(&tx), user, token, device_id, now)?;
        tx.commit().map_err(anyhow::Error::from)?;

        info!(
            "Attendance {} recorded: student {} lesson {}",
            record.id, record.student_id, record.lesson_id
        );
        Ok(record)
    }
}
