use super::{RefreshHint, RefreshQueue};
use crate::collections::CollectionStore;
use crate::config::EngineConfig;
use crate::metrics;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodic safety net for the event-driven path.
///
/// Any collection whose membership was last materialized before the
/// staleness threshold gets requeued, including collections parked in
/// stale-error state. Collections already pending or tracked by the queue
/// are left alone.
pub struct StalenessSweeper {
    collections: Arc<dyn CollectionStore>,
    queue: RefreshQueue,
    threshold: ChronoDuration,
    interval: Duration,
    shutdown: CancellationToken,
    in_flight: AtomicBool,
}

impl StalenessSweeper {
    pub fn new(
        collections: Arc<dyn CollectionStore>,
        queue: RefreshQueue,
        config: &EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            collections,
            queue,
            threshold: ChronoDuration::hours(config.staleness_threshold_hours as i64),
            interval: Duration::from_secs(config.sweep_interval_secs),
            shutdown,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Main sweep loop - call from a spawned task.
    pub async fn run(self) {
        info!(
            "Staleness sweeper starting (interval={}s, threshold={}h)",
            self.interval.as_secs(),
            self.threshold.num_hours()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup isn't a sweep.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep() {
                        warn!("Sweep failed: {}", e);
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Staleness sweeper shutting down");
                    break;
                }
            }
        }

        info!("Staleness sweeper stopped");
    }

    /// Run one sweep, returning how many collections were enqueued.
    ///
    /// Overlapping calls are suppressed: if a sweep is already in progress
    /// this returns immediately with zero.
    pub fn sweep(&self) -> Result<usize> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Sweep already in progress, skipping");
            return Ok(0);
        }
        let result = self.sweep_inner();
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn sweep_inner(&self) -> Result<usize> {
        let cutoff = Utc::now() - self.threshold;
        let stale = self.collections.list_stale(cutoff)?;

        let mut enqueued = 0;
        for collection in stale {
            if collection.pending || self.queue.is_tracked(&collection.id) {
                continue;
            }
            if let Err(e) = self
                .queue
                .request_refresh(&collection.id, RefreshHint::Full)
            {
                warn!("Failed to enqueue stale collection {}: {}", collection.id, e);
                continue;
            }
            metrics::SWEEPER_ENQUEUED_TOTAL.inc();
            enqueued += 1;
        }

        if enqueued > 0 {
            info!("Sweeper enqueued {} stale collections", enqueued);
        }
        Ok(enqueued)
    }
}
