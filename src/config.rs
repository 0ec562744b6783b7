//! Daemon configuration: a TOML file for everything an operator tunes, plus
//! environment variables for endpoints and secrets.
//!
//! Environment:
//! - `ROOMWATCH_CONFIG`: config file path (default `config.toml`)
//! - `ROOMWATCH_INTERVAL_SECS`: poll interval, overrides the file
//! - `BOOKING_API_URL`, `BOOKING_API_TOKEN`: booking platform (required)
//! - `TZ`: timezone when the file does not name one

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::MonitoredResource;

pub const DEFAULT_INTERVAL_SECS: u64 = 1800;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_NOTIFIED_LOG: &str = "data/notified.txt";
pub const DEFAULT_BOOKINGS_PATH: &str = "/administration/bookings/";
pub const DEFAULT_MAIL_API_ENDPOINT: &str = "https://api.mailersend.com/v1/email";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub notified_log: Option<PathBuf>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub booking: BookingSettings,
    pub calendars: Vec<CalendarConfig>,
    #[serde(default)]
    pub resource_map: Vec<ResourceMapping>,
    pub email: MailSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingSettings {
    /// GraphQL document replacing the built-in bookings query.
    pub query_file: Option<PathBuf>,
    /// Path under the platform URL where a booking is viewed by id.
    pub bookings_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    pub name: String,
    pub url: String,
    /// Booking-platform resource this calendar mirrors.
    #[serde(default)]
    pub resource: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceMapping {
    pub calendar: String,
    pub resource: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    pub send_emails: bool,
    pub subject: String,
    pub content: String,
    pub content_fallback: String,
    #[serde(default)]
    pub mappings: Vec<MailMapping>,
    pub fallback: MailAddress,
    pub from: MailAddress,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub api_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailMapping {
    /// Calendar event summary; compared without case or whitespace.
    pub summary: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MailAddress {
    pub address: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Smtp,
    Api,
}

impl Config {
    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calendars.is_empty() {
            return Err(ConfigError::Invalid("no calendars configured".into()));
        }
        if self.email.fallback.address.trim().is_empty() {
            return Err(ConfigError::Invalid("email.fallback.address is not set".into()));
        }
        if self.email.from.address.trim().is_empty() {
            return Err(ConfigError::Invalid("email.from.address is not set".into()));
        }
        if let Some(0) = self.interval_secs {
            return Err(ConfigError::Invalid("interval_secs must be positive".into()));
        }
        self.timezone()?;
        Ok(())
    }

    /// Configured timezone, then `TZ`, then UTC.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        let name = self
            .timezone
            .clone()
            .or_else(|| std::env::var("TZ").ok().filter(|s| !s.is_empty()));
        match name {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| ConfigError::Invalid(format!("unknown timezone {name:?}: {e}"))),
            None => Ok(Tz::UTC),
        }
    }

    pub fn interval(&self) -> Duration {
        let secs = std::env::var("ROOMWATCH_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .or(self.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS))
    }

    pub fn notified_log(&self) -> PathBuf {
        self.notified_log
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_NOTIFIED_LOG))
    }

    /// Every calendar ↔ resource link: one per calendar that names a
    /// resource, followed by the explicit `resource_map` entries.
    pub fn monitored_resources(&self) -> Vec<MonitoredResource> {
        let mut monitored: Vec<MonitoredResource> = self
            .calendars
            .iter()
            .filter_map(|cal| {
                cal.resource.as_ref().map(|resource| MonitoredResource {
                    calendar: cal.name.clone(),
                    resource: resource.clone(),
                })
            })
            .collect();
        for mapping in &self.resource_map {
            let entry = MonitoredResource {
                calendar: mapping.calendar.clone(),
                resource: mapping.resource.clone(),
            };
            if !monitored.contains(&entry) {
                monitored.push(entry);
            }
        }
        monitored
    }
}

/// Booking platform endpoint and credentials.
#[derive(Debug, Clone)]
pub struct BookingApi {
    pub base_url: String,
    pub token: String,
}

impl BookingApi {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = required_env("BOOKING_API_URL")?;
        let token = required_env("BOOKING_API_TOKEN")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

pub fn required_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingEnv(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
timezone = "Europe/Stockholm"
interval_secs = 600

[[calendars]]
name = "RoomA"
url = "https://cal.example.org/rooma.ics"
resource = "RoomA"

[[calendars]]
name = "RoomB"
url = "https://cal.example.org/roomb.ics"

[[resource_map]]
calendar = "RoomB"
resource = "Room B (large)"

[[resource_map]]
calendar = "RoomA"
resource = "RoomA"

[email]
send_emails = false
subject = "Overlap"
content = "<p>{{ Summary }}</p>"
content_fallback = "<p>fallback {{ Summary }}</p>"
from = { address = "noreply@example.org", name = "Roomwatch" }
fallback = { address = "admin@example.org" }
transport = "api"

[[email.mappings]]
summary = "Team Meeting"
address = "team@example.org"
"#;

    fn parse(src: &str) -> Config {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn sample_parses_and_validates() {
        let cfg = parse(SAMPLE);
        cfg.validate().unwrap();
        assert_eq!(cfg.calendars.len(), 2);
        assert_eq!(cfg.email.transport, TransportKind::Api);
        assert_eq!(cfg.email.mappings[0].address, "team@example.org");
        assert_eq!(cfg.email.fallback.name, "");
        assert_eq!(cfg.timezone().unwrap(), chrono_tz::Europe::Stockholm);
    }

    #[test]
    fn monitored_resources_merge_without_duplicates() {
        let cfg = parse(SAMPLE);
        let monitored = cfg.monitored_resources();
        assert_eq!(
            monitored,
            vec![
                MonitoredResource {
                    calendar: "RoomA".into(),
                    resource: "RoomA".into()
                },
                MonitoredResource {
                    calendar: "RoomB".into(),
                    resource: "Room B (large)".into()
                },
            ]
        );
    }

    #[test]
    fn rejects_missing_calendars() {
        let mut cfg = parse(SAMPLE);
        cfg.calendars.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_empty_fallback_address() {
        let mut cfg = parse(SAMPLE);
        cfg.email.fallback.address = "  ".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("fallback"));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut cfg = parse(SAMPLE);
        cfg.timezone = Some("Mars/Olympus".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn defaults_apply() {
        let mut cfg = parse(SAMPLE);
        cfg.http_timeout_secs = None;
        cfg.notified_log = None;
        assert_eq!(cfg.http_timeout(), Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
        assert_eq!(cfg.notified_log(), PathBuf::from(DEFAULT_NOTIFIED_LOG));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.calendars[0].name, "RoomA");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/roomwatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
