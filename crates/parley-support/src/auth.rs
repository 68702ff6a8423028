use parley_types::models::Conversation;

use crate::error::{SupportError, SupportResult};

/// Identity of the caller, resolved by the HTTP layer and trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    Anonymous,
    User { id: String },
    Admin { id: String },
}

impl AuthContext {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User { id } | Self::Admin { id } => Some(id.as_str()),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin { .. })
    }

    /// Returns the admin id, or the error for a caller who is not one.
    pub fn require_admin(&self) -> SupportResult<&str> {
        match self {
            Self::Admin { id } => Ok(id.as_str()),
            Self::User { .. } => Err(SupportError::Forbidden),
            Self::Anonymous => Err(SupportError::Unauthorized),
        }
    }

    /// Admins see everything, guest conversations are open to whoever holds
    /// the id, owned conversations only to their owner.
    pub fn can_access(&self, conversation: &Conversation) -> SupportResult<()> {
        if self.is_admin() || conversation.is_guest() {
            return Ok(());
        }
        match self.user_id() {
            Some(id) if conversation.is_owned_by(id) => Ok(()),
            Some(_) => Err(SupportError::Forbidden),
            None => Err(SupportError::Unauthorized),
        }
    }

    /// Actor tag stored on messages this caller writes.
    pub fn sender_tag(&self) -> String {
        match self {
            Self::Anonymous => "guest".to_string(),
            Self::User { id } => format!("user:{}", id),
            Self::Admin { id } => format!("admin:{}", id),
        }
    }

    /// Rate-limit key: the identity when there is one, otherwise whatever the
    /// transport knows about the peer.
    pub fn rate_key(&self, peer: &str) -> String {
        match self.user_id() {
            Some(id) => format!("user:{}", id),
            None => format!("peer:{}", peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parley_types::models::ConversationStatus;

    use super::*;

    fn conversation(owner: Option<&str>) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: "c-1".into(),
            status: ConversationStatus::AiOnly,
            user_id: owner.map(Into::into),
            contact_email: None,
            contact_name: None,
            contact_phone: None,
            created_at: now,
            last_message_at: now,
            updated_at: now,
        }
    }

    fn user(id: &str) -> AuthContext {
        AuthContext::User { id: id.into() }
    }

    #[test]
    fn guest_conversation_is_open_to_anyone_with_the_id() {
        let guest = conversation(None);
        assert!(AuthContext::Anonymous.can_access(&guest).is_ok());
        assert!(user("u-9").can_access(&guest).is_ok());
    }

    #[test]
    fn owned_conversation_is_owner_or_admin_only() {
        let owned = conversation(Some("u-1"));
        assert!(user("u-1").can_access(&owned).is_ok());
        assert!(AuthContext::Admin { id: "a-1".into() }.can_access(&owned).is_ok());
        assert!(matches!(user("u-2").can_access(&owned), Err(SupportError::Forbidden)));
        assert!(matches!(
            AuthContext::Anonymous.can_access(&owned),
            Err(SupportError::Unauthorized)
        ));
    }

    #[test]
    fn admin_requirement_distinguishes_anonymous_from_users() {
        assert!(matches!(AuthContext::Anonymous.require_admin(), Err(SupportError::Unauthorized)));
        assert!(matches!(user("u-1").require_admin(), Err(SupportError::Forbidden)));
        assert_eq!(AuthContext::Admin { id: "a-1".into() }.require_admin().unwrap(), "a-1");
    }

    #[test]
    fn sender_tags() {
        assert_eq!(AuthContext::Anonymous.sender_tag(), "guest");
        assert_eq!(user("u-1").sender_tag(), "user:u-1");
        assert_eq!(AuthContext::Admin { id: "a-1".into() }.sender_tag(), "admin:a-1");
    }
}
