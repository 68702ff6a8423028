use anyhow::Result;
use rusqlite::params;

use crate::models::AuditEntry;
use crate::{Database, format_ts};

impl Database {
    pub fn insert_ai_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO ai_audit_log (id, subject_key, action, actor, outcome, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id,
                    entry.subject_key,
                    entry.action,
                    entry.actor,
                    entry.outcome,
                    format_ts(&crate::now()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn count_ai_audit(&self, subject_key: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM ai_audit_log WHERE subject_key = ?1",
                [subject_key],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}
