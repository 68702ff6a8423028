//! Write-side input types and rows that never leave the db layer.
//! Read models come back as `parley_types::models` values.

use parley_types::models::{MessageRole, TicketPriority, UserRole};

pub struct NewConversation {
    pub id: String,
    pub user_id: Option<String>,
    pub contact_email: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub sender: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

pub struct NewTicket {
    pub id: String,
    pub code: String,
    pub conversation_id: Option<String>,
    pub subject: String,
    pub priority: TicketPriority,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

pub struct NewLead {
    pub id: String,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub source: String,
}

pub struct AuditEntry {
    pub id: String,
    pub subject_key: String,
    pub action: String,
    pub actor: String,
    pub outcome: String,
}

/// Includes the password hash, so it stays out of `parley-types`.
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub role: UserRole,
    pub created_at: String,
}

/// Result of a committed status write.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub conversation: parley_types::models::Conversation,
    pub message: Option<parley_types::models::Message>,
}
