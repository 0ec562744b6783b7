use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};
use ulid::Ulid;

use crate::model::Window;
use crate::reconcile::{PassReport, Reconciler};

/// Drives reconciliation passes: one immediately, then one per interval.
///
/// Passes never overlap. A pass that outlasts the interval swallows the
/// ticks it missed instead of queueing them.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    tz: Tz,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration, tz: Tz) -> Self {
        Self {
            reconciler,
            interval,
            tz,
        }
    }

    /// Loop until `cancel` fires. A running pass is allowed to finish.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("scheduler: every {}s", self.interval.as_secs());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.tick().await;
            info!("scheduler: idle");
        }
        info!("scheduler: stopped");
    }

    /// Exactly one pass over the current month window.
    pub async fn tick(&self) -> Option<PassReport> {
        let now = Utc::now().with_timezone(&self.tz);
        let window = Window::month_from(&now);
        let span = info_span!("pass", pass_id = %Ulid::new());

        async {
            info!("scheduler: running, window {} to {}", window.start, window.end);
            match self.reconciler.run_pass(&window).await {
                Ok(report) => {
                    info!(
                        "pass done: {} bookings ({} watched), {} events, {} overlaps, {} sent, {} suppressed, {} failed",
                        report.bookings_fetched,
                        report.bookings_kept,
                        report.events,
                        report.overlaps,
                        report.sent,
                        report.suppressed,
                        report.failed
                    );
                    Some(report)
                }
                Err(e) => {
                    error!("pass aborted: {e}");
                    None
                }
            }
        }
        .instrument(span)
        .await
    }
}
