#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use parley_db::Database;
use parley_gateway::EventBus;
use parley_support::llm::CompletionRequest;
use parley_support::{
    AuthContext, BucketConfig, ConversationService, EscalationService, LanguageModel, LeadService,
    Notifier, RateLimiter, SupportContext, SupportError, SupportResult,
};

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SentEmail>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, to: &[String], subject: &str, html: &str) -> SupportResult<()> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_vec(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

/// Answers every prompt with the same text, or fails when there is none.
/// A gated model holds each answer until the gate is opened.
pub struct ScriptedModel {
    reply: Option<String>,
    gate: Option<Arc<Notify>>,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn answering(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn gated(reply: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::answering(reply)
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _request: CompletionRequest) -> SupportResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.reply
            .clone()
            .ok_or_else(|| SupportError::Upstream("model unavailable".into()))
    }
}

pub struct Harness {
    pub db: Arc<Database>,
    pub bus: EventBus,
    pub notifier: Arc<RecordingNotifier>,
    pub model: Arc<ScriptedModel>,
    pub conversations: ConversationService,
    pub escalations: EscalationService,
    pub leads: LeadService,
}

pub const ADMIN_EMAIL: &str = "support@example.com";

pub fn harness(model: ScriptedModel) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let bus = EventBus::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let model = Arc::new(model);

    let ctx = SupportContext {
        db: db.clone(),
        bus: bus.clone(),
        notifier: notifier.clone(),
        model: model.clone(),
        admin_emails: Arc::from(vec![ADMIN_EMAIL.to_string()]),
        public_url: "https://support.example.com".into(),
    };

    let create_limiter = Arc::new(RateLimiter::new(BucketConfig::conversation_create()));
    let conversations = ConversationService::new(ctx.clone(), create_limiter.clone());
    let escalations = EscalationService::new(conversations.clone());
    let leads = LeadService::new(
        ctx,
        create_limiter,
        Arc::new(RateLimiter::new(BucketConfig::ai_enrichment())),
    );

    Harness {
        db,
        bus,
        notifier,
        model,
        conversations,
        escalations,
        leads,
    }
}

pub fn admin() -> AuthContext {
    AuthContext::Admin { id: "admin-1".into() }
}

pub fn user(id: &str) -> AuthContext {
    AuthContext::User { id: id.into() }
}

/// Poll until `check` holds; detached tasks finish on their own schedule.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Fresh escalation service over the harness's conversations.
pub fn harness_escalations(h: &Harness) -> EscalationService {
    EscalationService::new(h.conversations.clone())
}
