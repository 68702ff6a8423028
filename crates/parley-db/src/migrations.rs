use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub const LATEST_VERSION: i64 = 2;

pub fn run(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version = current_version(conn)?;

    if version < 1 {
        info!("DB: running migration v1 (conversations, messages, tickets, users)");
        let tx = conn.transaction()?;
        tx.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                email       TEXT,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'USER',
                created_at  TEXT NOT NULL
            );

            CREATE TABLE conversations (
                id               TEXT PRIMARY KEY,
                status           TEXT NOT NULL DEFAULT 'AI_ONLY',
                user_id          TEXT,
                contact_email    TEXT,
                contact_name     TEXT,
                contact_phone    TEXT,
                created_at       TEXT NOT NULL,
                last_message_at  TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_status
                ON conversations(status, last_message_at);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                role             TEXT NOT NULL,
                sender           TEXT NOT NULL,
                content          TEXT NOT NULL,
                metadata         TEXT,
                created_at       TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE tickets (
                id               TEXT PRIMARY KEY,
                code             TEXT NOT NULL UNIQUE,
                conversation_id  TEXT REFERENCES conversations(id),
                subject          TEXT NOT NULL,
                status           TEXT NOT NULL DEFAULT 'OPEN',
                priority         TEXT NOT NULL DEFAULT 'MEDIUM',
                user_id          TEXT,
                email            TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );

            CREATE TABLE ticket_messages (
                id          TEXT PRIMARY KEY,
                ticket_id   TEXT NOT NULL REFERENCES tickets(id),
                role        TEXT NOT NULL,
                sender      TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_ticket_messages_ticket
                ON ticket_messages(ticket_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
        tx.commit()?;
    }

    if version < 2 {
        info!("DB: running migration v2 (leads, ai audit log)");
        let tx = conn.transaction()?;
        tx.execute_batch(
            "
            CREATE TABLE leads (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL,
                company     TEXT,
                phone       TEXT,
                message     TEXT,
                source      TEXT NOT NULL,
                enrichment  TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE ai_audit_log (
                id           TEXT PRIMARY KEY,
                subject_key  TEXT NOT NULL,
                action       TEXT NOT NULL,
                actor        TEXT NOT NULL,
                outcome      TEXT NOT NULL,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX idx_ai_audit_subject
                ON ai_audit_log(subject_key, created_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
        tx.commit()?;
    }

    info!("Database migrations complete");
    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64> {
    let version =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;
    Ok(version)
}
