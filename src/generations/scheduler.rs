use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};

use crate::config;

use super::reconciler::StatusReconciler;

/// Knobs for the background reconciler, read from `RECONCILER_*` and
/// `ORPHAN_RESERVATION_GRACE_SECS`.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub scan_interval: TokioDuration,
    pub poll_min_age: Duration,
    pub batch_size: i64,
    pub orphan_grace: Duration,
}

impl ReconcilerSettings {
    pub fn from_env() -> Self {
        Self {
            scan_interval: TokioDuration::from_secs(*config::RECONCILER_SCAN_INTERVAL_SECS),
            poll_min_age: Duration::seconds(*config::RECONCILER_POLL_MIN_AGE_SECS),
            batch_size: *config::RECONCILER_BATCH_SIZE,
            orphan_grace: clamp_orphan_grace(
                Duration::seconds(*config::ORPHAN_RESERVATION_GRACE_SECS),
                Duration::seconds(*config::PROVIDER_TIMEOUT_SECS as i64),
            ),
        }
    }
}

/// Headroom kept between an in-flight provider call and the orphan sweep.
const ORPHAN_GRACE_MARGIN_SECS: i64 = 30;

// key: reconciler-scheduler -> a reservation still awaiting its submit call is not an orphan
fn clamp_orphan_grace(requested: Duration, provider_timeout: Duration) -> Duration {
    let floor = provider_timeout + Duration::seconds(ORPHAN_GRACE_MARGIN_SECS);
    if requested >= floor {
        return requested;
    }
    warn!(
        requested_secs = requested.num_seconds(),
        provider_timeout_secs = provider_timeout.num_seconds(),
        clamped_secs = floor.num_seconds(),
        "orphan reservation grace shorter than provider timeout, raising it"
    );
    floor
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub polled: usize,
    pub orphans_refunded: usize,
    pub refunds_retried: usize,
}

/// key: reconciler-scheduler -> background sweep
pub fn spawn(reconciler: StatusReconciler, settings: ReconcilerSettings) {
    tokio::spawn(async move {
        let mut ticker = time::interval(settings.scan_interval);
        loop {
            ticker.tick().await;
            match process_tick(&reconciler, Utc::now(), &settings).await {
                Ok(report) if report != TickReport::default() => {
                    info!(?report, "reconciler tick completed");
                }
                Ok(_) => debug!("reconciler tick found nothing to do"),
                Err(err) => warn!(?err, "reconciler tick failed"),
            }
        }
    });
}

/// key: reconciler-scheduler -> tick handler
pub async fn process_tick(
    reconciler: &StatusReconciler,
    now: DateTime<Utc>,
    settings: &ReconcilerSettings,
) -> Result<TickReport> {
    let polled = reconciler
        .poll_in_flight(now - settings.poll_min_age, settings.batch_size)
        .await?;
    let orphans_refunded = reconciler
        .refund_orphans(now - settings.orphan_grace, settings.batch_size)
        .await?;
    let refunds_retried = reconciler.retry_refunds(settings.batch_size).await?;

    Ok(TickReport {
        polled,
        orphans_refunded,
        refunds_retried,
    })
}
