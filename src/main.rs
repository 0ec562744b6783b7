use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomwatch::booking::{BookingClient, DEFAULT_QUERY};
use roomwatch::calendar::IcsFeedClient;
use roomwatch::config::{BookingApi, Config, DEFAULT_BOOKINGS_PATH, DEFAULT_MAIL_API_ENDPOINT, TransportKind};
use roomwatch::dedup::FileNotifiedLog;
use roomwatch::mail::{ApiMailer, MailTransport, SmtpMailer};
use roomwatch::notifier::Notifier;
use roomwatch::reconcile::Reconciler;
use roomwatch::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomwatch=info")),
        )
        .init();

    let metrics_port: Option<u16> = std::env::var("ROOMWATCH_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    roomwatch::observability::init(metrics_port);

    let config_path = PathBuf::from(
        std::env::var("ROOMWATCH_CONFIG").unwrap_or_else(|_| "config.toml".into()),
    );
    let config = Config::load(&config_path)?;
    let api = BookingApi::from_env()?;
    let tz = config.timezone()?;
    let timeout = config.http_timeout();
    let interval = config.interval();

    let query = match &config.booking.query_file {
        Some(path) => std::fs::read_to_string(path)?,
        None => DEFAULT_QUERY.to_string(),
    };
    let bookings_path = config
        .booking
        .bookings_path
        .clone()
        .unwrap_or_else(|| DEFAULT_BOOKINGS_PATH.to_string());
    let booking_link = format!("{}{bookings_path}", api.base_url);

    let log_path = config.notified_log();
    let log = Arc::new(FileNotifiedLog::open(&log_path)?);

    let transport: Arc<dyn MailTransport> = match config.email.transport {
        TransportKind::Smtp => Arc::new(SmtpMailer::from_env(timeout)),
        TransportKind::Api => {
            let endpoint = config
                .email
                .api_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_MAIL_API_ENDPOINT.to_string());
            Arc::new(ApiMailer::new(endpoint, None, timeout)?)
        }
    };

    let monitored = config.monitored_resources();
    info!("roomwatch starting");
    info!("  config: {}", config_path.display());
    info!("  booking platform: {}", api.base_url);
    info!("  timezone: {}", tz.name());
    info!("  interval: {}s", interval.as_secs());
    info!("  calendars: {}, monitored resources: {}", config.calendars.len(), monitored.len());
    info!("  notified log: {}", log_path.display());
    info!(
        "  mail: {} ({})",
        transport.name(),
        if config.email.send_emails { "sending" } else { "dry run" }
    );
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let notifier = Notifier::new(config.email.clone(), tz, log, transport);
    let reconciler = Reconciler::new(
        Arc::new(BookingClient::new(&api, query, timeout)?),
        Arc::new(IcsFeedClient::new(tz, timeout)?),
        notifier,
        config.calendars.clone(),
        monitored,
        booking_link,
    );
    let scheduler = Scheduler::new(Arc::new(reconciler), interval, tz);

    let cancel = CancellationToken::new();
    let runner = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    shutdown_signal().await?;
    info!("shutdown signal received, finishing current pass");
    cancel.cancel();
    runner.await?;

    info!("roomwatch stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
