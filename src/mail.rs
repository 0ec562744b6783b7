//! Outbound mail transports. Credentials come from the environment and are
//! checked when a message is sent, so a daemon without them still runs with
//! `send_emails = false`.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tracing::debug;

use crate::config::MailAddress;
use crate::error::MailError;

pub const DEFAULT_SMTP_PORT: u16 = 587;

/// A rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: MailAddress,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;

    /// Short label for logs and metrics.
    fn name(&self) -> &'static str;
}

// ── SMTP ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SmtpSettings {
    /// `SMTP_HOST`, `SMTP_PORT` (default 587), `SMTP_USERNAME`, `SMTP_PASSWORD`.
    pub fn from_env() -> Self {
        let var = |name| std::env::var(name).ok().filter(|v: &String| !v.trim().is_empty());
        Self {
            host: var("SMTP_HOST"),
            port: var("SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            username: var("SMTP_USERNAME"),
            password: var("SMTP_PASSWORD"),
        }
    }

    fn require(&self) -> Result<(&str, &str, &str), MailError> {
        let password = self
            .password
            .as_deref()
            .ok_or(MailError::MissingCredential("SMTP_PASSWORD"))?;
        let username = self
            .username
            .as_deref()
            .ok_or(MailError::MissingCredential("SMTP_USERNAME"))?;
        let host = self
            .host
            .as_deref()
            .ok_or(MailError::MissingCredential("SMTP_HOST"))?;
        Ok((host, username, password))
    }
}

/// STARTTLS submission with plain authentication.
pub struct SmtpMailer {
    /// Fixed settings; `None` reads the environment on every send.
    settings: Option<SmtpSettings>,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn from_env(timeout: Duration) -> Self {
        Self {
            settings: None,
            timeout,
        }
    }

    pub fn with_settings(settings: SmtpSettings, timeout: Duration) -> Self {
        Self {
            settings: Some(settings),
            timeout,
        }
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let settings = self.settings.clone().unwrap_or_else(SmtpSettings::from_env);
        let (host, username, password) = settings.require()?;

        let message = build_message(mail)?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(settings.port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .timeout(Some(self.timeout))
            .build();

        debug!("submitting to {host}:{}", settings.port);
        transport.send(message).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

fn build_message(mail: &OutgoingMail) -> Result<Message, MailError> {
    let from = mailbox(&mail.from.address, &mail.from.name)?;
    let to = mailbox(&mail.to, "")?;
    Ok(Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(mail.html.clone())?)
}

fn mailbox(address: &str, name: &str) -> Result<Mailbox, MailError> {
    let parsed: Address = address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    let name = Some(name.trim()).filter(|n| !n.is_empty()).map(str::to_string);
    Ok(Mailbox::new(name, parsed))
}

// ── HTTP API ─────────────────────────────────────────────

/// JSON mail API with bearer auth (MailerSend-compatible body).
pub struct ApiMailer {
    http: reqwest::Client,
    endpoint: String,
    /// Fixed token; `None` reads `MAIL_API_TOKEN` on every send.
    token: Option<String>,
}

impl ApiMailer {
    pub fn new(endpoint: String, token: Option<String>, timeout: Duration) -> Result<Self, MailError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    fn token(&self) -> Result<String, MailError> {
        self.token
            .clone()
            .or_else(|| std::env::var("MAIL_API_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
            .ok_or(MailError::MissingCredential("MAIL_API_TOKEN"))
    }
}

#[async_trait]
impl MailTransport for ApiMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let token = self.token()?;
        // Same address validation as SMTP so both transports fail alike.
        mailbox(&mail.from.address, &mail.from.name)?;
        mailbox(&mail.to, "")?;

        let body = json!({
            "from": { "email": mail.from.address, "name": mail.from.name },
            "to": [{ "email": mail.to }],
            "subject": mail.subject,
            "html": mail.html,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mail() -> OutgoingMail {
        OutgoingMail {
            from: MailAddress {
                address: "noreply@example.org".into(),
                name: "Roomwatch".into(),
            },
            to: "team@example.org".into(),
            subject: "Overlap".into(),
            html: "<p>RoomA</p>".into(),
        }
    }

    #[test]
    fn message_builds_with_html_body() {
        let message = build_message(&mail()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Overlap"));
        assert!(raw.contains("To: team@example.org"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("<p>RoomA</p>"));
    }

    #[test]
    fn mails_compare_by_sender_too() {
        let mut other = mail();
        assert_eq!(other, mail());
        other.from.name = "Someone else".into();
        assert_ne!(other, mail());
    }

    #[test]
    fn bad_recipient_is_rejected() {
        let mut m = mail();
        m.to = "not an address".into();
        let err = build_message(&m).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn smtp_without_password_is_a_config_error() {
        let settings = SmtpSettings {
            host: Some("smtp.example.org".into()),
            port: DEFAULT_SMTP_PORT,
            username: Some("user".into()),
            password: None,
        };
        let mailer = SmtpMailer::with_settings(settings, Duration::from_secs(1));
        let err = mailer.send(&mail()).await.unwrap_err();
        assert!(matches!(err, MailError::MissingCredential("SMTP_PASSWORD")));
    }

    #[tokio::test]
    async fn smtp_without_host_is_a_config_error() {
        let settings = SmtpSettings {
            host: None,
            port: DEFAULT_SMTP_PORT,
            username: Some("user".into()),
            password: Some("secret".into()),
        };
        let mailer = SmtpMailer::with_settings(settings, Duration::from_secs(1));
        let err = mailer.send(&mail()).await.unwrap_err();
        assert!(matches!(err, MailError::MissingCredential("SMTP_HOST")));
    }

    #[tokio::test]
    async fn api_posts_json_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/email"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_json(json!({
                "from": { "email": "noreply@example.org", "name": "Roomwatch" },
                "to": [{ "email": "team@example.org" }],
                "subject": "Overlap",
                "html": "<p>RoomA</p>",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = ApiMailer::new(
            format!("{}/v1/email", server.uri()),
            Some("secret".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        mailer.send(&mail()).await.unwrap();
    }

    #[tokio::test]
    async fn api_rejection_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid from"))
            .mount(&server)
            .await;

        let mailer = ApiMailer::new(server.uri(), Some("secret".into()), Duration::from_secs(5)).unwrap();
        let err = mailer.send(&mail()).await.unwrap_err();
        match err {
            MailError::Api { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "invalid from");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }
}
