use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use parley_db::models::{AuditEntry, NewLead};
use parley_types::api::CreateLeadRequest;
use parley_types::models::Lead;

use crate::SupportContext;
use crate::auth::AuthContext;
use crate::conversation::validate_email;
use crate::error::{SupportError, SupportResult};
use crate::llm::{ChatTurn, CompletionRequest};
use crate::rate_limit::RateLimiter;
use crate::storage::blocking;
use crate::tasks::spawn_detached;

const DEFAULT_SOURCE: &str = "website";

/// One exported row. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: String,
    pub created_at: String,
    pub name: String,
    pub email: String,
    pub company: String,
    pub phone: String,
    pub source: String,
    pub message: String,
    pub enrichment: String,
}

impl From<&Lead> for LeadRecord {
    fn from(lead: &Lead) -> Self {
        Self {
            id: lead.id.clone(),
            created_at: lead.created_at.to_rfc3339(),
            name: lead.name.clone(),
            email: lead.email.clone(),
            company: lead.company.clone().unwrap_or_default(),
            phone: lead.phone.clone().unwrap_or_default(),
            source: lead.source.clone(),
            message: lead.message.clone().unwrap_or_default(),
            enrichment: lead.enrichment.clone().unwrap_or_default(),
        }
    }
}

pub fn write_csv(records: &[LeadRecord]) -> SupportResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| SupportError::Storage(e.into()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SupportError::Storage(anyhow::anyhow!("csv flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| SupportError::Storage(e.into()))
}

pub fn read_csv(data: &str) -> SupportResult<Vec<LeadRecord>> {
    csv::Reader::from_reader(data.as_bytes())
        .deserialize()
        .collect::<Result<Vec<LeadRecord>, _>>()
        .map_err(|e| SupportError::invalid_input(format!("bad csv: {}", e)))
}

pub struct LeadService {
    ctx: SupportContext,
    capture_limiter: Arc<RateLimiter>,
    enrich_limiter: Arc<RateLimiter>,
}

impl LeadService {
    pub fn new(
        ctx: SupportContext,
        capture_limiter: Arc<RateLimiter>,
        enrich_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            ctx,
            capture_limiter,
            enrich_limiter,
        }
    }

    pub async fn capture(
        &self,
        auth: &AuthContext,
        peer: &str,
        req: CreateLeadRequest,
    ) -> SupportResult<Lead> {
        self.capture_limiter.check(&auth.rate_key(peer), 1.0)?;

        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(SupportError::invalid_input("name is required"));
        }
        let email = req.email.trim().to_lowercase();
        validate_email(&email)?;

        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let new = NewLead {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            company: non_empty(req.company),
            phone: non_empty(req.phone),
            message: non_empty(req.message),
            source: non_empty(req.source).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        };

        let lead = blocking(&self.ctx.db, move |db| db.insert_lead(&new)).await?;
        info!(lead = %lead.id, source = %lead.source, "lead captured");
        Ok(lead)
    }

    pub async fn export_csv(&self, auth: &AuthContext) -> SupportResult<String> {
        auth.require_admin()?;
        let leads = blocking(&self.ctx.db, |db| db.list_leads()).await?;
        let records: Vec<LeadRecord> = leads.iter().map(LeadRecord::from).collect();
        write_csv(&records)
    }

    /// Ask the model for a short company profile and store it on the lead.
    /// Limited per lead email; every attempt is audited on a best-effort
    /// basis.
    pub async fn enrich(&self, auth: &AuthContext, lead_id: &str) -> SupportResult<Lead> {
        let admin_id = auth.require_admin()?.to_string();

        let id = lead_id.to_string();
        let lead = blocking(&self.ctx.db, move |db| db.get_lead(&id))
            .await?
            .ok_or(SupportError::NotFound("lead"))?;
        let subject_key = format!("lead:{}", lead.email);

        if let Err(e) = self.enrich_limiter.check(&subject_key, 1.0) {
            self.audit(&subject_key, &admin_id, "rate_limited");
            return Err(e);
        }

        let profile = match self.ctx.model.complete(enrichment_prompt(&lead)).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                self.audit(&subject_key, &admin_id, "empty");
                return Err(SupportError::Upstream("model returned an empty profile".into()));
            }
            Err(e) => {
                self.audit(&subject_key, &admin_id, "failed");
                return Err(e);
            }
        };

        let id = lead.id.clone();
        let stored = profile.clone();
        blocking(&self.ctx.db, move |db| db.set_lead_enrichment(&id, &stored)).await?;
        self.audit(&subject_key, &admin_id, "ok");

        info!(lead = %lead.id, "lead enriched");
        Ok(Lead {
            enrichment: Some(profile),
            ..lead
        })
    }

    fn audit(&self, subject_key: &str, actor: &str, outcome: &str) {
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            subject_key: subject_key.to_string(),
            action: "lead_enrichment".to_string(),
            actor: actor.to_string(),
            outcome: outcome.to_string(),
        };
        let db = self.ctx.db.clone();
        spawn_detached("ai-audit", async move {
            blocking(&db, move |db| db.insert_ai_audit(&entry)).await
        });
    }
}

fn enrichment_prompt(lead: &Lead) -> CompletionRequest {
    let mut facts = format!("Name: {}\nEmail: {}", lead.name, lead.email);
    if let Some(company) = &lead.company {
        facts.push_str(&format!("\nCompany: {}", company));
    }
    if let Some(message) = &lead.message {
        facts.push_str(&format!("\nMessage: {}", message));
    }

    CompletionRequest {
        turns: vec![
            ChatTurn::system(
                "You qualify inbound sales leads. In at most three sentences, describe \
                 the likely company, its size and what the lead probably needs. Say so \
                 if you are unsure.",
            ),
            ChatTurn::user(facts),
        ],
        max_tokens: 200,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize, message: &str) -> LeadRecord {
        LeadRecord {
            id: format!("l-{i}"),
            created_at: "2026-03-01T10:00:00.000Z".into(),
            name: format!("Lead {i}"),
            email: format!("lead{i}@example.com"),
            company: "Acme, Inc.".into(),
            phone: String::new(),
            source: "contact-form".into(),
            message: message.into(),
            enrichment: String::new(),
        }
    }

    #[test]
    fn csv_round_trips_awkward_fields() {
        let records = vec![
            record(0, "plain"),
            record(1, "commas, everywhere, here"),
            record(2, r#"she said "hello" twice"#),
            record(3, "line one\nline two\r\nline three"),
            record(4, ""),
        ];

        let csv = write_csv(&records).unwrap();
        assert!(csv.starts_with("id,created_at,name,email,company,phone,source,message,enrichment\n"));
        assert_eq!(read_csv(&csv).unwrap(), records);
    }

    #[test]
    fn empty_export_is_just_nothing() {
        assert_eq!(write_csv(&[]).unwrap(), "");
        assert!(read_csv("").unwrap().is_empty());
    }
}
