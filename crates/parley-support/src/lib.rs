//! Support conversation core: routing a chat between the AI assistant and
//! human admins, escalating transcripts into tickets, and the lead pipeline.

pub mod auth;
pub mod conversation;
pub mod error;
pub mod escalation;
pub mod leads;
pub mod llm;
pub mod notify;
pub mod rate_limit;
pub mod tasks;

mod storage;

use std::sync::Arc;

use parley_db::Database;
use parley_gateway::EventBus;

pub use auth::AuthContext;
pub use conversation::{ConversationService, Transition};
pub use error::{SupportError, SupportResult};
pub use escalation::{Escalation, EscalationService};
pub use leads::LeadService;
pub use llm::LanguageModel;
pub use notify::Notifier;
pub use rate_limit::{BucketConfig, RateLimiter};

/// Collaborators shared by every service. Built once at startup; cloning is
/// cheap.
#[derive(Clone)]
pub struct SupportContext {
    pub db: Arc<Database>,
    pub bus: EventBus,
    pub notifier: Arc<dyn Notifier>,
    pub model: Arc<dyn LanguageModel>,
    /// Distribution list for handoff and escalation notices.
    pub admin_emails: Arc<[String]>,
    /// Base URL used to build links in emails.
    pub public_url: String,
}
