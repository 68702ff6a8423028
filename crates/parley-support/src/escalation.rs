use std::sync::Arc;

use rand::Rng;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::models::NewTicket;
use parley_types::api::EscalateRequest;
use parley_types::models::{Conversation, Message, MessageRole, SystemEvent, Ticket, TicketPriority};

use crate::auth::AuthContext;
use crate::conversation::{ConversationService, contact_label};
use crate::error::{SupportError, SupportResult};
use crate::llm::{MAX_SUBJECT_CHARS, Summarizer, subject_line};
use crate::notify::escape_html;
use crate::storage::blocking;
use crate::tasks::spawn_detached;

/// Attempts at a free ticket code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 5;

pub type CodeSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Six random digits, never starting with zero.
pub fn random_code() -> String {
    rand::rng().random_range(100_000..=999_999u32).to_string()
}

#[derive(Debug, Clone)]
pub struct Escalation {
    pub ticket: Ticket,
    pub copied_messages: usize,
    /// System message linking the source conversation to the ticket.
    pub link: Message,
}

/// Turns a conversation transcript into a ticket.
pub struct EscalationService {
    conversations: ConversationService,
    summarizer: Summarizer,
    codes: CodeSource,
}

impl EscalationService {
    pub fn new(conversations: ConversationService) -> Self {
        let summarizer = Summarizer::new(conversations.context().model.clone());
        Self {
            conversations,
            summarizer,
            codes: Arc::new(random_code),
        }
    }

    pub fn with_code_source(mut self, codes: CodeSource) -> Self {
        self.codes = codes;
        self
    }

    pub async fn escalate(
        &self,
        auth: &AuthContext,
        conversation_id: &str,
        req: EscalateRequest,
    ) -> SupportResult<Escalation> {
        let admin_id = auth.require_admin()?;
        let conversation = self.conversations.load(conversation_id).await?;
        let db = &self.conversations.context().db;

        let source_id = conversation.id.clone();
        let transcript = blocking(db, move |db| db.all_messages(&source_id)).await?;

        let subject = self.subject(&conversation, &transcript, req.subject).await;
        let priority = req.priority.unwrap_or_default();
        let copied_messages = transcript.len();
        let transcript = Arc::new(transcript);

        let ticket = self.insert_ticket(&conversation, subject, priority, transcript).await?;
        info!(
            conversation = %conversation.id,
            ticket = %ticket.id,
            code = %ticket.code,
            copied_messages,
            "conversation escalated"
        );

        let link = self
            .conversations
            .append_message(
                &conversation.id,
                MessageRole::System,
                "system",
                &format!("Ticket #{} was opened for this conversation.", ticket.code),
                Some(json!({
                    "event": SystemEvent::TicketLinked,
                    "adminId": admin_id,
                    "ticketId": ticket.id,
                    "ticketCode": ticket.code,
                })),
            )
            .await?;

        self.notify(&conversation, &ticket).await;

        Ok(Escalation {
            ticket,
            copied_messages,
            link,
        })
    }

    /// Override, else a model summary, else a label built from the contact.
    /// Never fails.
    async fn subject(
        &self,
        conversation: &Conversation,
        transcript: &[Message],
        requested: Option<String>,
    ) -> String {
        if let Some(subject) = requested.as_deref().and_then(subject_line) {
            return subject;
        }

        if !transcript.is_empty() {
            match self.summarizer.summarize(transcript).await {
                Ok(subject) => return subject,
                Err(e) => warn!(conversation = %conversation.id, "summary failed, using fallback subject: {}", e),
            }
        }

        fallback_subject(conversation)
    }

    /// Draw codes until one inserts. A taken code, whether it was taken
    /// before the draw or by a concurrent escalation, costs one attempt.
    async fn insert_ticket(
        &self,
        conversation: &Conversation,
        subject: String,
        priority: TicketPriority,
        transcript: Arc<Vec<Message>>,
    ) -> SupportResult<Ticket> {
        let db = &self.conversations.context().db;
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let new = NewTicket {
                id: Uuid::new_v4().to_string(),
                code: (self.codes)(),
                conversation_id: Some(conversation.id.clone()),
                subject: subject.clone(),
                priority,
                user_id: conversation.user_id.clone(),
                email: conversation.contact_email.clone(),
            };
            let transcript = transcript.clone();
            let code = new.code.clone();
            match blocking(db, move |db| db.create_ticket_with_transcript(&new, &transcript)).await? {
                Some(ticket) => return Ok(ticket),
                None => debug!(conversation = %conversation.id, %code, attempt, "ticket code taken"),
            }
        }
        Err(SupportError::TicketCodeExhausted)
    }

    async fn notify(&self, conversation: &Conversation, ticket: &Ticket) {
        let ctx = self.conversations.context();
        let notifier = ctx.notifier.clone();
        let admins = ctx.admin_emails.to_vec();

        let visitor = match (&conversation.contact_email, &conversation.user_id) {
            (Some(email), _) => Some(email.clone()),
            (None, Some(user_id)) => {
                let user_id = user_id.clone();
                match blocking(&ctx.db, move |db| db.get_user_by_id(&user_id)).await {
                    Ok(user) => user.and_then(|u| u.email),
                    Err(e) => {
                        warn!("could not look up ticket owner email: {}", e);
                        None
                    }
                }
            }
            (None, None) => None,
        };

        let subject = format!("Ticket #{}: {}", ticket.code, ticket.subject);
        let admin_html = format!(
            "<p>Ticket <strong>#{}</strong> ({}) was opened from a conversation with {}.</p>\
             <p><a href=\"{}/admin/conversations/{}\">Open conversation</a></p>",
            ticket.code,
            ticket.priority,
            escape_html(&contact_label(conversation)),
            ctx.public_url.trim_end_matches('/'),
            conversation.id,
        );
        let visitor_html = format!(
            "<p>Thanks for reaching out. Your request is now ticket <strong>#{}</strong>: {}.</p>\
             <p>Reply to this email or quote the ticket number to follow up.</p>",
            ticket.code,
            escape_html(&ticket.subject),
        );

        if !admins.is_empty() {
            let notifier = notifier.clone();
            let subject = subject.clone();
            spawn_detached("escalation-admin-email", async move {
                notifier.send_email(&admins, &subject, &admin_html).await
            });
        }
        if let Some(email) = visitor {
            spawn_detached("escalation-visitor-email", async move {
                notifier.send_email(&[email], &subject, &visitor_html).await
            });
        }
    }
}

pub fn fallback_subject(conversation: &Conversation) -> String {
    let subject = match conversation
        .contact_name
        .as_deref()
        .or(conversation.contact_email.as_deref())
    {
        Some(contact) => format!("Support request from {}", contact),
        None => "Support request from chat".to_string(),
    };
    subject.chars().take(MAX_SUBJECT_CHARS).collect()
}
