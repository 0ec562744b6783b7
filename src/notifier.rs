//! Turns a detected overlap into at most one e-mail per calendar event UID.

use std::sync::Arc;

use chrono::SecondsFormat;
use chrono_tz::Tz;
use minijinja::{AutoEscape, Environment, UndefinedBehavior, context};
use tracing::{info, warn};

use crate::config::MailSettings;
use crate::dedup::NotifiedLog;
use crate::error::NotifyError;
use crate::mail::{MailTransport, OutgoingMail};
use crate::model::{Instant, Overlap};
use crate::observability::NOTIFICATIONS_TOTAL;

/// Appended to the subject when no mapping matched the event summary.
pub const FALLBACK_SUBJECT_SUFFIX: &str = "-Fallback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The UID is in the notified log; nothing was sent.
    AlreadyNotified,
    /// Sending is disabled; the UID was recorded anyway.
    Suppressed { recipient: String, fallback: bool },
    Sent { recipient: String, fallback: bool },
}

impl NotifyOutcome {
    fn label(&self) -> &'static str {
        match self {
            NotifyOutcome::AlreadyNotified => "already_notified",
            NotifyOutcome::Suppressed { .. } => "suppressed",
            NotifyOutcome::Sent { fallback: true, .. } => "fallback",
            NotifyOutcome::Sent { .. } => "sent",
        }
    }
}

/// Who receives a message and which template to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub fallback: bool,
}

pub struct Notifier {
    settings: MailSettings,
    tz: Tz,
    log: Arc<dyn NotifiedLog>,
    transport: Arc<dyn MailTransport>,
    templates: Environment<'static>,
}

impl Notifier {
    pub fn new(
        settings: MailSettings,
        tz: Tz,
        log: Arc<dyn NotifiedLog>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let mut templates = Environment::new();
        templates.set_undefined_behavior(UndefinedBehavior::Strict);
        templates.set_auto_escape_callback(|_| AutoEscape::Html);
        Self {
            settings,
            tz,
            log,
            transport,
            templates,
        }
    }

    /// Notify about `overlap` unless its event UID was handled before.
    ///
    /// The UID is recorded after a successful send, or immediately when
    /// sending is disabled. Failures leave it unrecorded for the next pass.
    pub async fn notify(&self, overlap: &Overlap) -> Result<NotifyOutcome, NotifyError> {
        let result = self.deliver(overlap).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(NotifyError::Config(_)) => "config_error",
            Err(NotifyError::Send(_)) => "send_error",
        };
        metrics::counter!(NOTIFICATIONS_TOTAL, "outcome" => label).increment(1);
        result
    }

    /// Log lookups touch the disk, so they run on the blocking pool.
    async fn seen(&self, uid: &str) -> bool {
        let log = self.log.clone();
        let owned = uid.to_string();
        tokio::task::spawn_blocking(move || log.has_notified(&owned))
            .await
            .unwrap_or_else(|e| {
                warn!("notified-log lookup for {uid} did not finish: {e}");
                true
            })
    }

    async fn record(&self, uid: &str) {
        let log = self.log.clone();
        let owned = uid.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || log.mark_notified(&owned)).await {
            warn!("recording {uid} did not finish: {e}");
        }
    }

    async fn deliver(&self, overlap: &Overlap) -> Result<NotifyOutcome, NotifyError> {
        info!(
            "overlap: booking {} in calendar {} with {:?}",
            overlap.booking_number, overlap.calendar, overlap.event_summary
        );
        let recipient = self.resolve_recipient(&overlap.event_summary);
        if recipient.fallback {
            warn!(
                "no recipient mapped for {:?}, using fallback {}",
                overlap.event_summary, recipient.address
            );
        }

        if self.seen(&overlap.event_uid).await {
            info!("already notified about {}, skipping", overlap.event_uid);
            return Ok(NotifyOutcome::AlreadyNotified);
        }

        let mail = OutgoingMail {
            from: self.settings.from.clone(),
            to: recipient.address.clone(),
            subject: self.subject(&recipient),
            html: self.render(overlap, &recipient)?,
        };

        if !self.settings.send_emails {
            info!(
                "sending disabled, would have sent {:?} to {}",
                mail.subject, mail.to
            );
            self.record(&overlap.event_uid).await;
            return Ok(NotifyOutcome::Suppressed {
                recipient: recipient.address,
                fallback: recipient.fallback,
            });
        }

        info!(
            "sending to {} from {} via {}",
            mail.to,
            mail.from.address,
            self.transport.name()
        );
        self.transport.send(&mail).await?;
        self.record(&overlap.event_uid).await;
        info!("notified {} about {}", mail.to, overlap.event_uid);
        Ok(NotifyOutcome::Sent {
            recipient: recipient.address,
            fallback: recipient.fallback,
        })
    }

    /// First mapping whose summary equals `summary` once both are lowercased
    /// and stripped of whitespace; otherwise the fallback address.
    pub fn resolve_recipient(&self, summary: &str) -> Recipient {
        let wanted = normalize_summary(summary);
        self.settings
            .mappings
            .iter()
            .find(|m| normalize_summary(&m.summary) == wanted)
            .map(|m| Recipient {
                address: m.address.clone(),
                fallback: false,
            })
            .unwrap_or_else(|| Recipient {
                address: self.settings.fallback.address.clone(),
                fallback: true,
            })
    }

    fn subject(&self, recipient: &Recipient) -> String {
        if recipient.fallback {
            format!("{}{FALLBACK_SUBJECT_SUFFIX}", self.settings.subject)
        } else {
            self.settings.subject.clone()
        }
    }

    /// HTML body from the primary or fallback template.
    pub fn render(&self, overlap: &Overlap, recipient: &Recipient) -> Result<String, NotifyError> {
        let source = if recipient.fallback {
            &self.settings.content_fallback
        } else {
            &self.settings.content
        };
        let ctx = context! {
            Summary => &overlap.event_summary,
            Resource => &overlap.resource,
            Start => self.timestamp(overlap.event_start),
            End => self.timestamp(overlap.event_end),
            BookingURL => &overlap.booking_url,
            HumanNumber => &overlap.booking_number,
        };
        self.templates
            .render_str(source, ctx)
            .map_err(|e| NotifyError::Config(format!("mail template: {e}")))
    }

    fn timestamp(&self, at: Instant) -> String {
        at.with_timezone(&self.tz)
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

fn normalize_summary(summary: &str) -> String {
    summary
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
