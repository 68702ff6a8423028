use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use parley_types::models::{ConversationStatus, Message};

use crate::models::NewMessage;
use crate::queries::{MAX_PAGE_SIZE, OptionalExt, enum_col, json_col, ts_col};
use crate::{Database, format_ts};

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, sender, content, metadata, created_at";

impl Database {
    /// Append a message and bump the conversation's `last_message_at` in one
    /// transaction. Returns `None` when the conversation does not exist.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<Option<Message>> {
        self.with_conn_mut(|conn| append(conn, msg, None))
    }

    /// Like `insert_message`, but only while the conversation is still in
    /// `expected`. Returns `None` when it is missing or its status moved.
    pub fn insert_message_if_status(
        &self,
        msg: &NewMessage,
        expected: ConversationStatus,
    ) -> Result<Option<Message>> {
        self.with_conn_mut(|conn| append(conn, msg, Some(expected)))
    }

    pub fn message_in_conversation(&self, conversation_id: &str, message_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1 AND conversation_id = ?2",
                    params![message_id, conversation_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// One page of history in ascending order. `after` is the id of the last
    /// message the caller already has.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.conversation_id = ?1
                   AND (?2 IS NULL OR (m.created_at, m.rowid) >
                        (SELECT c.created_at, c.rowid FROM messages c WHERE c.id = ?2))
                 ORDER BY m.created_at ASC, m.rowid ASC
                 LIMIT ?3"
            ))?;

            let rows = stmt
                .query_map(params![conversation_id, after, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Full ordered transcript, used when escalating to a ticket.
    pub fn all_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;

            let rows = stmt
                .query_map([conversation_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Timestamp for the next message of a conversation: wall clock, but never
/// earlier than the newest message already stored, so history stays
/// non-decreasing even if the clock steps backwards.
fn append(
    conn: &mut Connection,
    msg: &NewMessage,
    expected: Option<ConversationStatus>,
) -> Result<Option<Message>> {
    let tx = conn.transaction()?;
    let ts = next_message_ts(&tx, &msg.conversation_id)?;
    let stamp = format_ts(&ts);

    let touched = match expected {
        Some(expected) => tx.execute(
            "UPDATE conversations SET last_message_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = ?3",
            params![stamp, msg.conversation_id, expected.as_str()],
        )?,
        None => tx.execute(
            "UPDATE conversations SET last_message_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![stamp, msg.conversation_id],
        )?,
    };
    if touched == 0 {
        return Ok(None);
    }

    let message = insert_with_ts(&tx, msg, ts)?;
    tx.commit()?;
    Ok(Some(message))
}

pub(crate) fn next_message_ts(conn: &Connection, conversation_id: &str) -> Result<DateTime<Utc>> {
    let now = crate::now();
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
        [conversation_id],
        |row| row.get(0),
    )?;

    match latest.as_deref().map(crate::parse_ts).transpose()? {
        Some(latest) if latest > now => Ok(latest),
        _ => Ok(now),
    }
}

pub(crate) fn insert_with_ts(conn: &Connection, msg: &NewMessage, ts: DateTime<Utc>) -> Result<Message> {
    let metadata = msg
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO messages (id, conversation_id, role, sender, content, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            msg.id,
            msg.conversation_id,
            msg.role.as_str(),
            msg.sender,
            msg.content,
            metadata,
            format_ts(&ts),
        ],
    )?;

    Ok(Message {
        id: msg.id.clone(),
        conversation_id: msg.conversation_id.clone(),
        role: msg.role,
        sender: msg.sender.clone(),
        content: msg.content.clone(),
        metadata: msg.metadata.clone(),
        created_at: ts,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: enum_col(row, 2)?,
        sender: row.get(3)?,
        content: row.get(4)?,
        metadata: json_col(row, 5)?,
        created_at: ts_col(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use parley_types::models::{ConversationStatus, MessageRole};

    use crate::Database;
    use crate::models::{NewConversation, NewMessage};

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation(&NewConversation {
            id: "c-1".into(),
            user_id: None,
            contact_email: None,
            contact_name: None,
            contact_phone: None,
        })
        .unwrap();
        db
    }

    fn msg(id: &str, content: &str) -> NewMessage {
        NewMessage {
            id: id.into(),
            conversation_id: "c-1".into(),
            role: MessageRole::User,
            sender: "guest".into(),
            content: content.into(),
            metadata: None,
        }
    }

    #[test]
    fn insert_bumps_last_message_at() {
        let db = setup();
        let before = db.get_conversation("c-1").unwrap().unwrap();

        let m = db.insert_message(&msg("m1", "hello")).unwrap().unwrap();

        let after = db.get_conversation("c-1").unwrap().unwrap();
        assert_eq!(after.last_message_at, m.created_at);
        assert!(after.last_message_at >= before.created_at);
    }

    #[test]
    fn insert_into_missing_conversation_returns_none() {
        let db = setup();
        let mut orphan = msg("m1", "hello");
        orphan.conversation_id = "nope".into();
        assert!(db.insert_message(&orphan).unwrap().is_none());
        assert!(db.all_messages("nope").unwrap().is_empty());
    }

    #[test]
    fn messages_come_back_in_insertion_order_with_non_decreasing_timestamps() {
        let db = setup();
        for i in 0..25 {
            db.insert_message(&msg(&format!("m{i:02}"), &format!("msg {i}"))).unwrap();
        }

        let all = db.all_messages("c-1").unwrap();
        assert_eq!(all.len(), 25);
        for pair in all.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        let ids: Vec<_> = all.iter().map(|m| m.id.as_str()).collect();
        let expected: Vec<String> = (0..25).map(|i| format!("m{i:02}")).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn cursor_pagination_walks_history_without_gaps() {
        let db = setup();
        for i in 0..7 {
            db.insert_message(&msg(&format!("m{i}"), "x")).unwrap();
        }

        let first = db.list_messages("c-1", None, 3).unwrap();
        assert_eq!(first.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["m0", "m1", "m2"]);

        let second = db.list_messages("c-1", Some("m2"), 3).unwrap();
        assert_eq!(second.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["m3", "m4", "m5"]);

        let last = db.list_messages("c-1", Some("m5"), 3).unwrap();
        assert_eq!(last.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["m6"]);

        assert!(db.list_messages("c-1", Some("m6"), 3).unwrap().is_empty());
    }

    #[test]
    fn metadata_round_trips() {
        let db = setup();
        let mut m = msg("m1", "took over");
        m.role = MessageRole::System;
        m.metadata = Some(serde_json::json!({ "event": "admin_takeover", "adminId": "a-1" }));
        db.insert_message(&m).unwrap();

        let stored = db.all_messages("c-1").unwrap().remove(0);
        assert_eq!(stored.role, MessageRole::System);
        assert_eq!(stored.metadata.unwrap()["adminId"], "a-1");
    }

    #[test]
    fn guarded_insert_requires_the_expected_status() {
        let db = setup();
        let mut reply = msg("m1", "assistant answer");
        reply.role = MessageRole::Assistant;
        assert!(
            db.insert_message_if_status(&reply, ConversationStatus::AiOnly)
                .unwrap()
                .is_some()
        );

        db.set_conversation_status("c-1", ConversationStatus::HumanActive, None)
            .unwrap();
        let mut late = msg("m2", "late answer");
        late.role = MessageRole::Assistant;
        assert!(
            db.insert_message_if_status(&late, ConversationStatus::AiOnly)
                .unwrap()
                .is_none()
        );

        let ids: Vec<_> = db.all_messages("c-1").unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["m1"]);
    }

    #[test]
    fn membership_check_is_scoped_to_conversation() {
        let db = setup();
        db.insert_message(&msg("m1", "hi")).unwrap();
        assert!(db.message_in_conversation("c-1", "m1").unwrap());
        assert!(!db.message_in_conversation("c-2", "m1").unwrap());
    }
}
