//! Grace cleanup worker
//!
//! Retires grace slots whose window elapsed. Runs as the scheduler actor:
//! no credential and no permission gate, audited with `actor: scheduler`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use crate::deploy::orchestrator::Orchestrator;
use crate::models::slot::SlotState;

const MAX_PARALLEL_CLEANUPS: usize = 4;

/// Grace cleanup worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub cleaned: usize,
    pub failed: usize,
}

/// One pass over every stored pair
pub async fn sweep(orchestrator: &Orchestrator) -> SweepReport {
    let mut report = SweepReport::default();

    let all = match orchestrator.registry().list_all().await {
        Ok(all) => all,
        Err(e) => {
            error!("Grace cleanup could not list slots: {}", e);
            return report;
        }
    };

    let now = orchestrator.clock().now();
    let due: Vec<_> = all
        .into_iter()
        .filter(|pair| {
            [&pair.blue, &pair.green].into_iter().any(|slot| {
                slot.state == SlotState::Grace
                    && slot.grace_expires_at.map(|t| t <= now).unwrap_or(false)
            })
        })
        .collect();

    // Pairs are independent; the per-pair lock serializes against user calls
    let mut results = stream::iter(due)
        .map(|pair| async move {
            let outcome = orchestrator
                .cleanup_as_scheduler(&pair.project_name, &pair.environment)
                .await;
            (pair.key(), outcome)
        })
        .buffer_unordered(MAX_PARALLEL_CLEANUPS);

    while let Some((key, outcome)) = results.next().await {
        match outcome {
            Ok(result) => report.cleaned += result.cleaned.len(),
            Err(e) => {
                error!("Grace cleanup of {} failed: {}", key, e);
                report.failed += 1;
            }
        }
    }

    if report.cleaned > 0 || report.failed > 0 {
        info!(
            "Grace cleanup retired {} slot(s), {} failure(s)",
            report.cleaned, report.failed
        );
    }
    report
}

/// Run the grace cleanup worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &Orchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Grace cleanup worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Grace cleanup worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        debug!("Sweeping for expired grace slots...");
        sweep(orchestrator).await;
    }
}
