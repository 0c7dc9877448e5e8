use super::{RefreshContext, RefreshHint, RefreshQueue, RetryPolicy};
use crate::collections::{CollectionId, MembershipDelta};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics;
use crate::rules::{compile, parse_rule_tree, SongContext};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker pool that drains the refresh queue.
///
/// Each wakeup claims a semaphore permit, moves the collection to running
/// and evaluates its rules on the blocking thread pool under a wall-clock
/// timeout. Failures go through the retry policy; a collection that
/// exhausts its budget is parked in stale-error state for the sweeper.
pub struct RefreshScheduler {
    ctx: RefreshContext,
    queue: RefreshQueue,
    rx: mpsc::UnboundedReceiver<CollectionId>,
    workers: Arc<Semaphore>,
    refresh_timeout: Duration,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl RefreshScheduler {
    pub fn new(
        ctx: RefreshContext,
        config: &EngineConfig,
        shutdown: CancellationToken,
    ) -> (Self, RefreshQueue) {
        metrics::init_metrics();
        let (queue, rx) = RefreshQueue::new(ctx.collections.clone());
        let scheduler = Self {
            ctx,
            queue: queue.clone(),
            rx,
            workers: Arc::new(Semaphore::new(config.workers)),
            refresh_timeout: Duration::from_secs(config.refresh_timeout_secs),
            retry: RetryPolicy::new(&config.retry),
            shutdown,
        };
        (scheduler, queue)
    }

    /// Main scheduling loop - call from a spawned task.
    pub async fn run(mut self) {
        info!(
            "Refresh scheduler starting (workers={}, timeout={}s)",
            self.workers.available_permits(),
            self.refresh_timeout.as_secs()
        );

        loop {
            let id = tokio::select! {
                maybe_id = self.rx.recv() => match maybe_id {
                    Some(id) => id,
                    None => break,
                },
                _ = self.shutdown.cancelled() => {
                    info!("Refresh scheduler shutting down");
                    break;
                }
            };

            let permit = tokio::select! {
                permit = self.workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.shutdown.cancelled() => {
                    info!("Refresh scheduler shutting down");
                    break;
                }
            };

            let worker = Worker {
                ctx: self.ctx.clone(),
                queue: self.queue.clone(),
                retry: self.retry.clone(),
                refresh_timeout: self.refresh_timeout,
                shutdown: self.shutdown.clone(),
            };
            tokio::spawn(async move {
                worker.execute(id).await;
                drop(permit);
            });
        }

        info!("Refresh scheduler stopped");
    }
}

struct Worker {
    ctx: RefreshContext,
    queue: RefreshQueue,
    retry: RetryPolicy,
    refresh_timeout: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    async fn execute(&self, id: CollectionId) {
        // A stale wakeup (the entry was coalesced away) is a no-op.
        let Some(hint) = self.queue.take(&id) else {
            return;
        };

        let started = Instant::now();
        let eval_ctx = self.ctx.clone();
        let eval_id = id.clone();
        let eval = task::spawn_blocking(move || evaluate(&eval_ctx, &eval_id, &hint));

        let outcome = match tokio::time::timeout(self.refresh_timeout, eval).await {
            Err(_) => Err(EngineError::TransientEvaluation(format!(
                "refresh timed out after {}s",
                self.refresh_timeout.as_secs()
            ))),
            Ok(Err(join_err)) => Err(EngineError::TransientEvaluation(format!(
                "refresh task failed: {join_err}"
            ))),
            Ok(Ok(result)) => result,
        };

        match outcome {
            Ok(None) => {
                debug!("Collection {} disappeared, dropping refresh", id);
                self.queue.discard(&id);
            }
            Ok(Some((delta, refreshed_at))) => {
                let persisted = self.queue.complete(&id, |clear_pending| {
                    self.ctx
                        .collections
                        .apply_refresh(&id, &delta, refreshed_at, clear_pending)
                });
                match persisted {
                    Ok(()) => {
                        info!(
                            "Refreshed collection {} (+{} -{}) in {:?}",
                            id,
                            delta.added.len(),
                            delta.removed.len(),
                            started.elapsed()
                        );
                        metrics::record_refresh("success", started.elapsed());
                    }
                    Err(e) => {
                        let err = EngineError::TransientEvaluation(format!(
                            "failed to persist refresh: {e}"
                        ));
                        self.handle_failure(&id, err, started).await;
                    }
                }
            }
            Err(err) => self.handle_failure(&id, err, started).await,
        }
    }

    async fn handle_failure(&self, id: &CollectionId, err: EngineError, started: Instant) {
        warn!("Refresh of collection {} failed: {}", id, err);
        metrics::record_refresh("failure", started.elapsed());

        let dirty_requeued = self.queue.fail(id);
        let retry_count = match self.ctx.collections.record_failure(id) {
            Ok(count) => count,
            Err(e) => {
                error!("Failed to record refresh failure for {}: {}", id, e);
                return;
            }
        };

        if dirty_requeued {
            // A newer invalidation already put the collection back in the
            // queue, no backoff needed.
            return;
        }

        if self.retry.should_retry(&err, retry_count) {
            let delay = self.retry.backoff(retry_count.saturating_sub(1));
            debug!(
                "Retrying collection {} in {:?} (failure {})",
                id, delay, retry_count
            );
            let queue = self.queue.clone();
            let shutdown = self.shutdown.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        if let Err(e) = queue.request_refresh(&id, RefreshHint::Full) {
                            warn!("Failed to requeue collection {}: {}", id, e);
                        }
                    }
                    _ = shutdown.cancelled() => {}
                }
            });
        } else {
            let parked = EngineError::PersistentEvaluation {
                collection_id: id.clone(),
                retries: retry_count,
            };
            error!("{}, parking collection in stale-error state", parked);
            if let Err(e) = self.ctx.collections.mark_stale_error(id) {
                error!("Failed to mark collection {} stale: {}", id, e);
            }
            metrics::STALE_ERROR_COLLECTIONS.inc();
        }
    }
}

/// Compute the membership delta for one refresh. Runs on the blocking pool.
///
/// Returns `None` when the collection no longer exists. Store and catalog
/// failures map to `TransientEvaluation`; unparseable rules surface as
/// `Validation` and are not retried.
fn evaluate(
    ctx: &RefreshContext,
    id: &CollectionId,
    hint: &RefreshHint,
) -> Result<Option<(MembershipDelta, DateTime<Utc>)>, EngineError> {
    let collection = ctx.collections.get_collection(id).map_err(transient)?;
    let Some(collection) = collection else {
        return Ok(None);
    };
    let current = ctx.collections.get_membership(id).map_err(transient)?;
    let now = Utc::now();

    let target = match hint {
        RefreshHint::Removal(song_id) => {
            let mut target = current.clone();
            target.remove(song_id);
            target
        }
        RefreshHint::Full => {
            let rules = parse_rule_tree(&collection.rules)?;
            let tags = ctx.tags.read().expect("tags lock poisoned");
            let predicate = compile(&rules, &tags)?;
            let songs = ctx.catalog.list_songs().map_err(transient)?;

            let mut target = HashSet::new();
            for song in songs {
                let favorite = ctx
                    .user_state
                    .is_favorite(&collection.owner, &song.id)
                    .map_err(transient)?;
                let interaction = ctx
                    .user_state
                    .get_interaction(&collection.owner, &song.id)
                    .map_err(transient)?;
                let song_ctx = SongContext::build(song, &tags, favorite, interaction, now);
                if predicate.matches(&song_ctx) {
                    target.insert(song_ctx.song.id);
                }
            }
            target
        }
    };

    Ok(Some((MembershipDelta::between(&current, &target), now)))
}

fn transient(e: anyhow::Error) -> EngineError {
    EngineError::TransientEvaluation(e.to_string())
}
