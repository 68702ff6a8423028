use anyhow::Result;
use rusqlite::{Connection, Row, params};

use parley_types::models::{Conversation, ConversationStatus};

use crate::models::{NewConversation, NewMessage, StatusChange};
use crate::queries::messages::{insert_with_ts, next_message_ts};
use crate::queries::{MAX_PAGE_SIZE, OptionalExt, enum_col, ts_col};
use crate::{Database, format_ts};

const CONVERSATION_COLUMNS: &str = "id, status, user_id, contact_email, contact_name, contact_phone, \
     created_at, last_message_at, updated_at";

impl Database {
    pub fn create_conversation(&self, new: &NewConversation) -> Result<Conversation> {
        self.with_conn_mut(|conn| {
            let now = crate::now();
            let ts = format_ts(&now);
            conn.execute(
                "INSERT INTO conversations
                    (id, status, user_id, contact_email, contact_name, contact_phone,
                     created_at, last_message_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)",
                params![
                    new.id,
                    ConversationStatus::AiOnly.as_str(),
                    new.user_id,
                    new.contact_email,
                    new.contact_name,
                    new.contact_phone,
                    ts,
                ],
            )?;

            Ok(Conversation {
                id: new.id.clone(),
                status: ConversationStatus::AiOnly,
                user_id: new.user_id.clone(),
                contact_email: new.contact_email.clone(),
                contact_name: new.contact_name.clone(),
                contact_phone: new.contact_phone.clone(),
                created_at: now,
                last_message_at: now,
                updated_at: now,
            })
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Most recently active first.
    pub fn list_conversations(
        &self,
        status: Option<ConversationStatus>,
        limit: u32,
    ) -> Result<Vec<Conversation>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY last_message_at DESC
                 LIMIT ?2"
            ))?;

            let rows = stmt
                .query_map(
                    params![status.map(|s| s.as_str()), limit],
                    conversation_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Compare-and-set status write. Moves the conversation to `next` only if
    /// it is still in `expected`, appending `message` in the same transaction.
    /// Returns `None` when the conversation is missing or its status moved.
    pub fn transition_conversation(
        &self,
        id: &str,
        expected: ConversationStatus,
        next: ConversationStatus,
        message: Option<&NewMessage>,
    ) -> Result<Option<StatusChange>> {
        self.with_conn_mut(|conn| write_status(conn, id, Some(expected), next, message))
    }

    /// Unconditional status write used by admin overrides.
    pub fn set_conversation_status(
        &self,
        id: &str,
        status: ConversationStatus,
        message: Option<&NewMessage>,
    ) -> Result<Option<StatusChange>> {
        self.with_conn_mut(|conn| write_status(conn, id, None, status, message))
    }
}

fn write_status(
    conn: &mut Connection,
    id: &str,
    expected: Option<ConversationStatus>,
    next: ConversationStatus,
    message: Option<&NewMessage>,
) -> Result<Option<StatusChange>> {
    let tx = conn.transaction()?;
    let ts = next_message_ts(&tx, id)?;
    let stamp = format_ts(&ts);

    let changed = match expected {
        Some(expected) => tx.execute(
            "UPDATE conversations
             SET status = ?1, last_message_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![next.as_str(), stamp, id, expected.as_str()],
        )?,
        None => tx.execute(
            "UPDATE conversations
             SET status = ?1, last_message_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![next.as_str(), stamp, id],
        )?,
    };
    if changed == 0 {
        return Ok(None);
    }

    let message = message
        .map(|m| insert_with_ts(&tx, m, ts))
        .transpose()?;

    let conversation = query_conversation(&tx, id)?
        .ok_or_else(|| anyhow::anyhow!("conversation {} vanished mid-transaction", id))?;
    tx.commit()?;

    Ok(Some(StatusChange {
        conversation,
        message,
    }))
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"))?;
    stmt.query_row([id], conversation_from_row).optional()
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        status: enum_col(row, 1)?,
        user_id: row.get(2)?,
        contact_email: row.get(3)?,
        contact_name: row.get(4)?,
        contact_phone: row.get(5)?,
        created_at: ts_col(row, 6)?,
        last_message_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}
