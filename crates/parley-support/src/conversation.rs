use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::models::{NewConversation, NewMessage, StatusChange};
use parley_types::api::{CreateConversationRequest, MessagePage};
use parley_types::events::GatewayEvent;
use parley_types::models::{Conversation, ConversationStatus, Message, MessageRole, SystemEvent};

use crate::SupportContext;
use crate::auth::AuthContext;
use crate::error::{SupportError, SupportResult};
use crate::llm::Assistant;
use crate::notify::escape_html;
use crate::rate_limit::RateLimiter;
use crate::storage::blocking;
use crate::tasks::spawn_detached;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Compare-and-set retries before a transition gives up on a hot row.
const MAX_TRANSITION_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RequestHuman,
    Takeover,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    Apply {
        next: ConversationStatus,
        event: SystemEvent,
    },
    NoOp,
    Reject,
}

/// Transition table. Pure so it can be checked without a store.
pub(crate) fn plan(action: Action, from: ConversationStatus) -> Plan {
    use ConversationStatus::*;

    match (action, from) {
        (Action::RequestHuman, AiOnly) => Plan::Apply {
            next: RequestedHuman,
            event: SystemEvent::HumanRequested,
        },
        (Action::RequestHuman, RequestedHuman | HumanActive | Escalated) => Plan::NoOp,
        (Action::Takeover, AiOnly | RequestedHuman | HumanActive | Escalated) => Plan::Apply {
            next: HumanActive,
            event: SystemEvent::AdminTakeover,
        },
        (Action::Close, Closed) => Plan::NoOp,
        (Action::Close, _) => Plan::Apply {
            next: Closed,
            event: SystemEvent::Closed,
        },
        (Action::RequestHuman | Action::Takeover, Closed) => Plan::Reject,
    }
}

/// Outcome of a state-machine action.
#[derive(Debug, Clone)]
pub struct Transition {
    pub conversation: Conversation,
    /// False for idempotent no-ops.
    pub changed: bool,
    /// System message recorded with the change, if any.
    pub message: Option<Message>,
}

#[derive(Clone)]
pub struct ConversationService {
    ctx: SupportContext,
    create_limiter: Arc<RateLimiter>,
    assistant: Assistant,
}

impl ConversationService {
    pub fn new(ctx: SupportContext, create_limiter: Arc<RateLimiter>) -> Self {
        let assistant = Assistant::new(ctx.model.clone());
        Self {
            ctx,
            create_limiter,
            assistant,
        }
    }

    pub fn context(&self) -> &SupportContext {
        &self.ctx
    }

    /// Start a conversation in `AI_ONLY`, optionally with the visitor's
    /// opening message. `peer` keys the rate limit for anonymous callers.
    pub async fn create(
        &self,
        auth: &AuthContext,
        peer: &str,
        req: CreateConversationRequest,
    ) -> SupportResult<(Conversation, Vec<Message>)> {
        self.create_limiter.check(&auth.rate_key(peer), 1.0)?;

        let contact_email = clean_optional(req.contact_email);
        if let Some(email) = &contact_email {
            validate_email(email)?;
        }
        let opening = match clean_optional(req.message) {
            Some(text) => Some(validate_content(&text)?),
            None => None,
        };

        let new = NewConversation {
            id: Uuid::new_v4().to_string(),
            user_id: auth.user_id().map(str::to_string),
            contact_email,
            contact_name: clean_optional(req.contact_name),
            contact_phone: clean_optional(req.contact_phone),
        };
        let conversation = blocking(&self.ctx.db, move |db| db.create_conversation(&new)).await?;
        info!(
            conversation = %conversation.id,
            guest = conversation.is_guest(),
            "conversation created"
        );

        let mut messages = Vec::new();
        if let Some(text) = opening {
            let message = self
                .append_message(&conversation.id, MessageRole::User, &auth.sender_tag(), &text, None)
                .await?;
            messages.push(message);
            self.spawn_auto_reply(&conversation.id);
        }

        let conversation = self.load(&conversation.id).await?;
        Ok((conversation, messages))
    }

    pub async fn get(&self, auth: &AuthContext, id: &str) -> SupportResult<Conversation> {
        let conversation = self.load(id).await?;
        auth.can_access(&conversation)?;
        Ok(conversation)
    }

    pub async fn list(
        &self,
        auth: &AuthContext,
        status: Option<ConversationStatus>,
        limit: Option<u32>,
    ) -> SupportResult<Vec<Conversation>> {
        auth.require_admin()?;
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        blocking(&self.ctx.db, move |db| db.list_conversations(status, limit)).await
    }

    /// Persist a message and publish it. Not retried: a failure surfaces to
    /// the caller and nothing is published.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        sender: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> SupportResult<Message> {
        let content = validate_content(content)?;
        let new = NewMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            sender: sender.to_string(),
            content,
            metadata,
        };

        let message = blocking(&self.ctx.db, move |db| db.insert_message(&new))
            .await?
            .ok_or(SupportError::NotFound("conversation"))?;

        debug!(conversation = %conversation_id, message = %message.id, role = %role, "message appended");
        self.ctx.bus.publish(GatewayEvent::message_new(&message));
        Ok(message)
    }

    /// Visitor/user message. While the conversation is AI-only the assistant
    /// answers in the background.
    pub async fn post_user_message(
        &self,
        auth: &AuthContext,
        id: &str,
        content: &str,
    ) -> SupportResult<Message> {
        let conversation = self.get(auth, id).await?;
        if conversation.status.is_terminal() {
            return Err(SupportError::invalid_state("conversation is closed"));
        }

        let message = self
            .append_message(id, MessageRole::User, &auth.sender_tag(), content, None)
            .await?;
        if conversation.status == ConversationStatus::AiOnly {
            self.spawn_auto_reply(id);
        }
        Ok(message)
    }

    pub async fn post_admin_message(
        &self,
        auth: &AuthContext,
        id: &str,
        content: &str,
    ) -> SupportResult<Message> {
        auth.require_admin()?;
        let conversation = self.load(id).await?;
        if conversation.status.is_terminal() {
            return Err(SupportError::invalid_state("conversation is closed"));
        }

        self.append_message(id, MessageRole::Admin, &auth.sender_tag(), content, None)
            .await
    }

    /// Ascending page of history. `cursor` is the id of the last message the
    /// caller already has.
    pub async fn list_messages(
        &self,
        auth: &AuthContext,
        id: &str,
        cursor: Option<String>,
        limit: Option<u32>,
    ) -> SupportResult<MessagePage> {
        self.get(auth, id).await?;

        let limit = limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, parley_db::queries::MAX_PAGE_SIZE);
        let conversation_id = id.to_string();

        let messages = blocking(&self.ctx.db, move |db| {
            if let Some(cursor) = cursor.as_deref() {
                if !db.message_in_conversation(&conversation_id, cursor)? {
                    return Ok(None);
                }
            }
            db.list_messages(&conversation_id, cursor.as_deref(), limit)
                .map(Some)
        })
        .await?
        .ok_or_else(|| SupportError::invalid_input("unknown cursor"))?;

        let next_cursor = if messages.len() as u32 == limit {
            messages.last().map(|m| m.id.clone())
        } else {
            None
        };
        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    /// Hand the conversation to a human. Repeated calls are no-ops.
    pub async fn request_human(&self, auth: &AuthContext, id: &str) -> SupportResult<Transition> {
        self.get(auth, id).await?;

        let transition = self.transition(id, Action::RequestHuman, None).await?;
        if transition.changed {
            self.notify_handoff(&transition.conversation);
        }
        Ok(transition)
    }

    pub async fn takeover(&self, auth: &AuthContext, id: &str) -> SupportResult<Transition> {
        let admin_id = auth.require_admin()?;
        self.transition(id, Action::Takeover, Some(admin_id)).await
    }

    pub async fn close(&self, auth: &AuthContext, id: &str) -> SupportResult<Transition> {
        let admin_id = auth.require_admin()?;
        self.transition(id, Action::Close, Some(admin_id)).await
    }

    /// Force any status, bypassing the transition table. A system message is
    /// recorded only when `note` is given.
    pub async fn override_status(
        &self,
        auth: &AuthContext,
        id: &str,
        status: &str,
        note: Option<String>,
    ) -> SupportResult<Transition> {
        let admin_id = auth.require_admin()?;
        let status: ConversationStatus = status
            .trim()
            .parse()
            .map_err(|e: parley_types::models::ParseEnumError| SupportError::invalid_input(e.to_string()))?;

        let message = match clean_optional(note) {
            Some(text) => Some(system_message(
                id,
                SystemEvent::StatusOverride,
                Some(admin_id),
                validate_content(&text)?,
                json!({ "status": status }),
            )),
            None => None,
        };

        let conversation_id = id.to_string();
        let change = blocking(&self.ctx.db, move |db| {
            db.set_conversation_status(&conversation_id, status, message.as_ref())
        })
        .await?
        .ok_or(SupportError::NotFound("conversation"))?;

        info!(conversation = %id, admin = %admin_id, status = %status, "status overridden");
        Ok(self.publish_change(change))
    }

    async fn transition(
        &self,
        id: &str,
        action: Action,
        admin_id: Option<&str>,
    ) -> SupportResult<Transition> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = self.load(id).await?;

            let (next, event) = match plan(action, current.status) {
                Plan::NoOp => {
                    debug!(conversation = %id, ?action, status = %current.status, "transition is a no-op");
                    return Ok(Transition {
                        conversation: current,
                        changed: false,
                        message: None,
                    });
                }
                Plan::Reject => {
                    return Err(SupportError::InvalidState(format!(
                        "cannot {:?} a {} conversation",
                        action, current.status
                    )));
                }
                Plan::Apply { next, event } => (next, event),
            };

            let message = system_message(id, event, admin_id, describe(event), json!({}));
            let expected = current.status;
            let conversation_id = id.to_string();
            let change = blocking(&self.ctx.db, move |db| {
                db.transition_conversation(&conversation_id, expected, next, Some(&message))
            })
            .await?;

            match change {
                Some(change) => {
                    info!(conversation = %id, from = %expected, to = %next, "conversation transition");
                    return Ok(self.publish_change(change));
                }
                // Someone else moved it first; re-plan from the new status
                None => continue,
            }
        }

        warn!(conversation = %id, ?action, "transition lost every compare-and-set race");
        Err(SupportError::invalid_state("conversation is changing concurrently, retry"))
    }

    fn publish_change(&self, change: StatusChange) -> Transition {
        let StatusChange {
            conversation,
            message,
        } = change;

        self.ctx
            .bus
            .publish(GatewayEvent::status_update(&conversation.id, conversation.status));
        if let Some(message) = &message {
            self.ctx.bus.publish(GatewayEvent::message_new(message));
        }

        Transition {
            conversation,
            changed: true,
            message,
        }
    }

    pub(crate) async fn load(&self, id: &str) -> SupportResult<Conversation> {
        let conversation_id = id.to_string();
        blocking(&self.ctx.db, move |db| db.get_conversation(&conversation_id))
            .await?
            .ok_or(SupportError::NotFound("conversation"))
    }

    fn notify_handoff(&self, conversation: &Conversation) {
        let recipients = self.ctx.admin_emails.to_vec();
        if recipients.is_empty() {
            return;
        }

        let notifier = self.ctx.notifier.clone();
        let contact = contact_label(conversation);
        let subject = format!("Human requested: {}", contact);
        let html = format!(
            "<p>{} asked to talk to a person.</p><p><a href=\"{}/admin/conversations/{}\">Open conversation</a></p>",
            escape_html(&contact),
            self.ctx.public_url.trim_end_matches('/'),
            conversation.id,
        );

        spawn_detached("handoff-email", async move {
            notifier.send_email(&recipients, &subject, &html).await
        });
    }

    fn spawn_auto_reply(&self, id: &str) {
        if !self.ctx.model.is_enabled() {
            return;
        }
        let service = self.clone();
        let conversation_id = id.to_string();
        spawn_detached("assistant-reply", async move {
            service.auto_reply(&conversation_id).await
        });
    }

    async fn auto_reply(&self, id: &str) -> SupportResult<()> {
        let conversation_id = id.to_string();
        let history = blocking(&self.ctx.db, move |db| db.all_messages(&conversation_id)).await?;
        let reply = self.assistant.reply(&history).await?;

        // A human may have joined while the model was thinking; the store
        // only accepts the reply while the conversation is still AI-only.
        let new = NewMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: id.to_string(),
            role: MessageRole::Assistant,
            sender: "assistant".to_string(),
            content: validate_content(&reply)?,
            metadata: None,
        };
        let stored = blocking(&self.ctx.db, move |db| {
            db.insert_message_if_status(&new, ConversationStatus::AiOnly)
        })
        .await?;

        match stored {
            Some(message) => {
                debug!(conversation = %id, message = %message.id, "assistant replied");
                self.ctx.bus.publish(GatewayEvent::message_new(&message));
            }
            None => debug!(conversation = %id, "dropping assistant reply, conversation left AI-only"),
        }
        Ok(())
    }
}

pub(crate) fn system_message(
    conversation_id: &str,
    event: SystemEvent,
    admin_id: Option<&str>,
    content: String,
    extra: serde_json::Value,
) -> NewMessage {
    let mut metadata = json!({
        "event": event,
        "adminId": admin_id,
    });
    if let (Some(target), serde_json::Value::Object(extra)) = (metadata.as_object_mut(), extra) {
        target.extend(extra);
    }

    NewMessage {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        role: MessageRole::System,
        sender: "system".to_string(),
        content,
        metadata: Some(metadata),
    }
}

fn describe(event: SystemEvent) -> String {
    match event {
        SystemEvent::HumanRequested => "The visitor asked to talk to a person.",
        SystemEvent::AdminTakeover => "A support agent joined the conversation.",
        SystemEvent::Closed => "The conversation was closed.",
        SystemEvent::StatusOverride => "Conversation status changed.",
        SystemEvent::TicketLinked => "A ticket was opened for this conversation.",
    }
    .to_string()
}

pub(crate) fn contact_label(conversation: &Conversation) -> String {
    conversation
        .contact_name
        .clone()
        .or_else(|| conversation.contact_email.clone())
        .unwrap_or_else(|| "A visitor".to_string())
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_content(content: &str) -> SupportResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(SupportError::invalid_input("message content is required"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(SupportError::invalid_input(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(content.to_string())
}

pub(crate) fn validate_email(email: &str) -> SupportResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !email.contains(' ') => Ok(()),
        _ => Err(SupportError::invalid_input(format!("invalid email '{}'", email))),
    }
}

#[cfg(test)]
mod tests {
    use parley_types::models::ConversationStatus::*;

    use super::*;

    #[test]
    fn table_applies_listed_transitions() {
        assert_eq!(
            plan(Action::RequestHuman, AiOnly),
            Plan::Apply {
                next: RequestedHuman,
                event: SystemEvent::HumanRequested
            }
        );
        for from in [AiOnly, RequestedHuman, HumanActive, Escalated] {
            assert_eq!(
                plan(Action::Takeover, from),
                Plan::Apply {
                    next: HumanActive,
                    event: SystemEvent::AdminTakeover
                }
            );
            assert_eq!(
                plan(Action::Close, from),
                Plan::Apply {
                    next: Closed,
                    event: SystemEvent::Closed
                }
            );
        }
    }

    #[test]
    fn repeated_request_human_is_a_no_op() {
        for from in [RequestedHuman, HumanActive, Escalated] {
            assert_eq!(plan(Action::RequestHuman, from), Plan::NoOp);
        }
    }

    #[test]
    fn closed_is_terminal_except_for_close() {
        assert_eq!(plan(Action::RequestHuman, Closed), Plan::Reject);
        assert_eq!(plan(Action::Takeover, Closed), Plan::Reject);
        assert_eq!(plan(Action::Close, Closed), Plan::NoOp);
    }

    #[test]
    fn system_metadata_carries_event_and_admin() {
        let msg = system_message(
            "c-1",
            SystemEvent::TicketLinked,
            Some("a-1"),
            "linked".into(),
            json!({ "ticketCode": "123456" }),
        );
        let meta = msg.metadata.unwrap();
        assert_eq!(meta["event"], "ticket_linked");
        assert_eq!(meta["adminId"], "a-1");
        assert_eq!(meta["ticketCode"], "123456");

        let anon = system_message("c-1", SystemEvent::HumanRequested, None, "x".into(), json!({}));
        assert!(anon.metadata.unwrap()["adminId"].is_null());
    }

    #[test]
    fn content_and_email_validation() {
        assert!(validate_content("   ").is_err());
        assert_eq!(validate_content("  hi ").unwrap(), "hi");
        assert!(validate_content(&"x".repeat(MAX_MESSAGE_CHARS + 1)).is_err());

        assert!(validate_email("a@example.com").is_ok());
        assert!(validate_email("nope").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@localhost").is_err());
    }
}
