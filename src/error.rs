use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain the booking set for a window. Never partial.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("booking platform unreachable: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("booking platform rejected the token (status {0})")]
    Unauthorized(u16),
    #[error("booking platform returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("booking query failed: {0}")]
    Query(String),
}

/// Failure to read one calendar feed. Isolated to that calendar.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar {calendar} unreachable: {source}")]
    Fetch {
        calendar: String,
        source: reqwest::Error,
    },
    #[error("calendar {calendar} returned status {status}")]
    Status { calendar: String, status: u16 },
    #[error("calendar {calendar} returned content type {content_type:?}; feed URL is probably wrong or expired")]
    ContentType {
        calendar: String,
        content_type: String,
    },
    #[error("calendar {calendar} could not be parsed: {reason}")]
    Parse { calendar: String, reason: String },
}

/// Outbound transport failures.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("{0} is not set")]
    MissingCredential(&'static str),
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("message could not be built: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("mail API unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail API returned status {status}: {body}")]
    Api { status: u16, body: String },
}

impl MailError {
    /// Errors that no retry will fix without an operator changing settings.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            MailError::MissingCredential(_) | MailError::InvalidAddress { .. }
        )
    }
}

/// Why one notification could not be delivered. The UID stays unmarked.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification misconfigured: {0}")]
    Config(String),
    #[error("notification not sent: {0}")]
    Send(MailError),
}

impl From<MailError> for NotifyError {
    fn from(err: MailError) -> Self {
        if err.is_config() {
            NotifyError::Config(err.to_string())
        } else {
            NotifyError::Send(err)
        }
    }
}

/// The notified log could not be scanned.
#[derive(Debug, Error)]
#[error("notified log {path} unreadable: {source}")]
pub struct DedupReadError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Startup configuration problems. The only process-fatal errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("environment variable {0} not set or empty")]
    MissingEnv(&'static str),
}
