use std::sync::Arc;

use parley_support::rate_limit::BucketConfig;
use parley_support::{
    ConversationService, EscalationService, LeadService, RateLimiter, SupportContext,
};

pub type AppState = Arc<AppStateInner>;

/// Process-wide rate limiters, kept here so the server can prune them.
pub struct Limiters {
    pub conversation_create: Arc<RateLimiter>,
    pub lead_capture: Arc<RateLimiter>,
    pub ai_enrichment: Arc<RateLimiter>,
}

impl Limiters {
    pub fn new(create: BucketConfig, capture: BucketConfig, enrichment: BucketConfig) -> Self {
        Self {
            conversation_create: Arc::new(RateLimiter::new(create)),
            lead_capture: Arc::new(RateLimiter::new(capture)),
            ai_enrichment: Arc::new(RateLimiter::new(enrichment)),
        }
    }

    pub fn all(&self) -> [&Arc<RateLimiter>; 3] {
        [&self.conversation_create, &self.lead_capture, &self.ai_enrichment]
    }
}

impl Default for Limiters {
    fn default() -> Self {
        Self::new(
            BucketConfig::conversation_create(),
            BucketConfig::conversation_create(),
            BucketConfig::ai_enrichment(),
        )
    }
}

pub struct AppStateInner {
    pub ctx: SupportContext,
    pub jwt_secret: String,
    /// Registering with this username yields an admin account.
    pub bootstrap_admin: Option<String>,
    pub limiters: Limiters,
    pub conversations: ConversationService,
    pub escalations: EscalationService,
    pub leads: LeadService,
}

impl AppStateInner {
    pub fn new(
        ctx: SupportContext,
        limiters: Limiters,
        jwt_secret: String,
        bootstrap_admin: Option<String>,
    ) -> Self {
        let conversations =
            ConversationService::new(ctx.clone(), limiters.conversation_create.clone());
        let escalations = EscalationService::new(conversations.clone());
        let leads = LeadService::new(
            ctx.clone(),
            limiters.lead_capture.clone(),
            limiters.ai_enrichment.clone(),
        );

        Self {
            ctx,
            jwt_secret,
            bootstrap_admin,
            limiters,
            conversations,
            escalations,
            leads,
        }
    }
}
