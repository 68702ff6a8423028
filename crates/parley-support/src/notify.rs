use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::error::{SupportError, SupportResult};

/// Outbound email. Callers treat every send as best effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &[String], subject: &str, html: &str) -> SupportResult<()>;
}

/// Writes would-be emails to the log. Used when SMTP is not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, to: &[String], subject: &str, _html: &str) -> SupportResult<()> {
        info!(recipients = to.len(), "email (not sent, SMTP disabled): {}", subject);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> SupportResult<Self> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| SupportError::invalid_input(format!("bad sender address: {}", e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(SupportError::upstream)?
            .port(settings.port);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_email(&self, to: &[String], subject: &str, html: &str) -> SupportResult<()> {
        if to.is_empty() {
            return Ok(());
        }

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for recipient in to {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|e| SupportError::invalid_input(format!("bad recipient {}: {}", recipient, e)))?;
            builder = builder.to(mailbox);
        }

        let email = builder
            .body(html.to_string())
            .map_err(SupportError::upstream)?;
        self.transport.send(email).await.map_err(SupportError::upstream)?;

        info!(recipients = to.len(), "email sent: {}", subject);
        Ok(())
    }
}

/// Minimal escaping for user-supplied text placed in email bodies.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"Tom & Jerry's"</b>"#),
            "&lt;b&gt;&quot;Tom &amp; Jerry&#39;s&quot;&lt;/b&gt;"
        );
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let sent = LogNotifier
            .send_email(&["ops@example.com".into()], "hello", "<p>hi</p>")
            .await;
        assert!(sent.is_ok());
    }

    #[test]
    fn smtp_rejects_bad_sender() {
        let settings = SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: None,
            password: None,
            from: "not an address".into(),
        };
        assert!(matches!(SmtpNotifier::new(&settings), Err(SupportError::InvalidInput(_))));
    }
}
