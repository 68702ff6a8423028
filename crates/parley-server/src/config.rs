use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use parley_support::llm::LlmSettings;
use parley_support::notify::SmtpSettings;
use parley_support::rate_limit::BucketConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub public_url: String,
    pub admin_emails: Vec<String>,
    pub bootstrap_admin: Option<String>,
    pub smtp: Option<SmtpSettings>,
    pub llm: Option<LlmSettings>,
    pub conversation_limit: BucketConfig,
    pub lead_limit: BucketConfig,
    pub enrichment_limit: BucketConfig,
    /// How often idle rate-limit buckets are swept.
    pub prune_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let host = var("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&var, "PARLEY_PORT", 3000u16)?;
        let db_path = var("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into();
        let public_url =
            var("PARLEY_PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{}", port));

        let admin_emails = var("PARLEY_ADMIN_EMAILS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let smtp = match var("PARLEY_SMTP_HOST") {
            Some(host) => Some(SmtpSettings {
                host,
                port: parse_or(&var, "PARLEY_SMTP_PORT", 587u16)?,
                username: var("PARLEY_SMTP_USERNAME"),
                password: var("PARLEY_SMTP_PASSWORD"),
                from: var("PARLEY_SMTP_FROM")
                    .context("PARLEY_SMTP_FROM is required when PARLEY_SMTP_HOST is set")?,
            }),
            None => None,
        };

        let llm = match var("PARLEY_LLM_API_KEY") {
            Some(api_key) => Some(LlmSettings {
                base_url: var("PARLEY_LLM_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".into()),
                api_key,
                model: var("PARLEY_LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
                timeout: Duration::from_secs(parse_or(&var, "PARLEY_LLM_TIMEOUT_SECS", 30u64)?),
            }),
            None => None,
        };

        let conversation_limit = BucketConfig::per_window(
            parse_or(&var, "PARLEY_CONVERSATIONS_PER_MINUTE", 10.0f64)?,
            Duration::from_secs(60),
        );
        let lead_limit = BucketConfig::per_window(
            parse_or(&var, "PARLEY_LEADS_PER_MINUTE", 10.0f64)?,
            Duration::from_secs(60),
        );
        let enrichment_limit = BucketConfig::per_window(
            parse_or(&var, "PARLEY_ENRICHMENTS_PER_HOUR", 5.0f64)?,
            Duration::from_secs(3600),
        );
        for (key, config) in [
            ("PARLEY_CONVERSATIONS_PER_MINUTE", &conversation_limit),
            ("PARLEY_LEADS_PER_MINUTE", &lead_limit),
            ("PARLEY_ENRICHMENTS_PER_HOUR", &enrichment_limit),
        ] {
            if config.capacity <= 0.0 {
                bail!("{} must be positive", key);
            }
        }

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            public_url,
            admin_emails,
            bootstrap_admin: var("PARLEY_BOOTSTRAP_ADMIN"),
            smtp,
            llm,
            conversation_limit,
            lead_limit,
            enrichment_limit,
            prune_interval: Duration::from_secs(parse_or(&var, "PARLEY_PRUNE_INTERVAL_SECS", 300u64)?),
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
