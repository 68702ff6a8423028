use anyhow::Result;
use rusqlite::{Connection, Row, params};

use parley_types::models::{Message, Ticket, TicketMessage, TicketStatus};

use crate::models::NewTicket;
use crate::queries::{OptionalExt, enum_col, ts_col};
use crate::{Database, format_ts};

const TICKET_COLUMNS: &str =
    "id, code, conversation_id, subject, status, priority, user_id, email, created_at, updated_at";

impl Database {
    /// Create a ticket and copy `transcript` into its message history in a
    /// single transaction. Original order, roles, senders and timestamps are
    /// preserved; each copy gets a fresh id.
    ///
    /// Returns `None` when `new.code` is already taken. The unique index is
    /// the collision check, so concurrent writers cannot both claim a code.
    pub fn create_ticket_with_transcript(
        &self,
        new: &NewTicket,
        transcript: &[Message],
    ) -> Result<Option<Ticket>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = crate::now();
            let ts = format_ts(&now);

            let inserted = tx.execute(
                "INSERT INTO tickets
                    (id, code, conversation_id, subject, status, priority, user_id, email,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    new.id,
                    new.code,
                    new.conversation_id,
                    new.subject,
                    TicketStatus::Open.as_str(),
                    new.priority.as_str(),
                    new.user_id,
                    new.email,
                    ts,
                ],
            );
            match inserted {
                Err(e) if is_code_conflict(&e) => return Ok(None),
                other => other?,
            };

            {
                let mut insert = tx.prepare(
                    "INSERT INTO ticket_messages (id, ticket_id, role, sender, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for message in transcript {
                    insert.execute(params![
                        uuid::Uuid::new_v4().to_string(),
                        new.id,
                        message.role.as_str(),
                        message.sender,
                        message.content,
                        format_ts(&message.created_at),
                    ])?;
                }
            }

            tx.commit()?;

            Ok(Some(Ticket {
                id: new.id.clone(),
                code: new.code.clone(),
                conversation_id: new.conversation_id.clone(),
                subject: new.subject.clone(),
                status: TicketStatus::Open,
                priority: new.priority,
                user_id: new.user_id.clone(),
                email: new.email.clone(),
                created_at: now,
                updated_at: now,
            }))
        })
    }

    pub fn get_ticket(&self, id: &str) -> Result<Option<Ticket>> {
        self.with_conn(|conn| query_ticket(conn, id))
    }

    pub fn tickets_for_conversation(&self, conversation_id: &str) -> Result<Vec<Ticket>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE conversation_id = ?1 ORDER BY created_at ASC"
            ))?;
            let rows = stmt
                .query_map([conversation_id], ticket_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn ticket_messages(&self, ticket_id: &str) -> Result<Vec<TicketMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ticket_id, role, sender, content, created_at
                 FROM ticket_messages WHERE ticket_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([ticket_id], |row| {
                    Ok(TicketMessage {
                        id: row.get(0)?,
                        ticket_id: row.get(1)?,
                        role: enum_col(row, 2)?,
                        sender: row.get(3)?,
                        content: row.get(4)?,
                        created_at: ts_col(row, 5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// `SQLITE_CONSTRAINT_UNIQUE` raised by the `tickets.code` index.
fn is_code_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE && msg.contains("tickets.code")
    )
}

fn query_ticket(conn: &Connection, id: &str) -> Result<Option<Ticket>> {
    let mut stmt = conn.prepare(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"))?;
    stmt.query_row([id], ticket_from_row).optional()
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        code: row.get(1)?,
        conversation_id: row.get(2)?,
        subject: row.get(3)?,
        status: enum_col(row, 4)?,
        priority: enum_col(row, 5)?,
        user_id: row.get(6)?,
        email: row.get(7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}
