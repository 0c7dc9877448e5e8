use crate::collections::{CollectionId, CollectionStore};
use crate::metrics;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use super::RefreshHint;

#[derive(Default)]
struct QueueState {
    /// Collections waiting for a worker, with their coalesced hint.
    queued: HashMap<CollectionId, RefreshHint>,
    /// Collections a worker is refreshing right now, keyed to the hint the
    /// refresh was taken with so a failed run's scope is not lost.
    running: HashMap<CollectionId, RefreshHint>,
    /// Invalidations that arrived while a refresh was running. The refresh
    /// in flight may miss them, so the collection is requeued when it ends.
    dirty: HashMap<CollectionId, RefreshHint>,
}

/// Handle for enqueueing refreshes. Cloneable; all clones share one queue.
///
/// At most one refresh per collection is queued or running at any time.
/// Requests for an already-tracked collection coalesce into the existing
/// entry instead of producing duplicate work.
#[derive(Clone)]
pub struct RefreshQueue {
    state: Arc<Mutex<QueueState>>,
    tx: mpsc::UnboundedSender<CollectionId>,
    store: Arc<dyn CollectionStore>,
}

impl RefreshQueue {
    pub(super) fn new(
        store: Arc<dyn CollectionStore>,
    ) -> (Self, mpsc::UnboundedReceiver<CollectionId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            tx,
            store,
        };
        (queue, rx)
    }

    /// Request a refresh for a collection.
    ///
    /// Marks the collection pending in the store before it becomes visible
    /// to workers. If a refresh is already queued the hints merge; if one is
    /// already running the request is parked as dirty and replayed when the
    /// running refresh ends.
    pub fn request_refresh(&self, id: &CollectionId, hint: RefreshHint) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.running.contains_key(id) {
            self.store.set_pending(id, true)?;
            let merged = match state.dirty.remove(id) {
                Some(existing) => existing.merge(hint),
                None => hint,
            };
            debug!("Collection {} dirty while refreshing", id);
            state.dirty.insert(id.clone(), merged);
            return Ok(());
        }

        if let Some(existing) = state.queued.remove(id) {
            state.queued.insert(id.clone(), existing.merge(hint));
            return Ok(());
        }

        self.store.set_pending(id, true)?;
        state.queued.insert(id.clone(), hint);
        // Receiver only drops at shutdown; a lost wakeup is fine then.
        let _ = self.tx.send(id.clone());
        update_depth(&state);
        Ok(())
    }

    /// Whether the collection is queued or running.
    pub fn is_tracked(&self, id: &CollectionId) -> bool {
        let state = self.state.lock().unwrap();
        state.queued.contains_key(id) || state.running.contains_key(id)
    }

    /// Move a queued collection to running and hand its hint to the worker.
    pub(super) fn take(&self, id: &CollectionId) -> Option<RefreshHint> {
        let mut state = self.state.lock().unwrap();
        let hint = state.queued.remove(id)?;
        state.running.insert(id.clone(), hint.clone());
        Some(hint)
    }

    /// Finish a successful refresh.
    ///
    /// `persist` receives whether the pending flag should be cleared: it is
    /// kept set when a dirty request arrived during the refresh, because the
    /// collection goes straight back into the queue. The queue lock is held
    /// across `persist`, so a request landing concurrently is ordered either
    /// before the decision (and seen as dirty) or after the requeue.
    pub(super) fn complete<F>(&self, id: &CollectionId, persist: F) -> Result<()>
    where
        F: FnOnce(bool) -> Result<()>,
    {
        let mut state = self.state.lock().unwrap();
        let dirty = state.dirty.remove(id);
        match persist(dirty.is_none()) {
            Ok(()) => {}
            Err(e) => {
                // Leave the running and dirty entries for the failure path.
                if let Some(hint) = dirty {
                    state.dirty.insert(id.clone(), hint);
                }
                return Err(e);
            }
        }
        state.running.remove(id);
        if let Some(hint) = dirty {
            state.queued.insert(id.clone(), hint);
            let _ = self.tx.send(id.clone());
        }
        update_depth(&state);
        Ok(())
    }

    /// Finish a failed refresh. Returns true when a dirty request was
    /// waiting; in that case the collection is already requeued and the
    /// caller must not schedule a backoff retry on top.
    pub(super) fn fail(&self, id: &CollectionId) -> bool {
        let mut state = self.state.lock().unwrap();
        let in_flight = state.running.remove(id);
        let requeued = match state.dirty.remove(id) {
            Some(dirty) => {
                // The failed refresh's own scope must not be lost: requeue
                // with the in-flight hint widened by whatever arrived since.
                let hint = match in_flight {
                    Some(taken) => taken.merge(dirty),
                    None => dirty,
                };
                state.queued.insert(id.clone(), hint);
                let _ = self.tx.send(id.clone());
                true
            }
            None => false,
        };
        update_depth(&state);
        requeued
    }

    /// Drop all queue state for a collection that no longer exists.
    pub(super) fn discard(&self, id: &CollectionId) {
        let mut state = self.state.lock().unwrap();
        state.queued.remove(id);
        state.running.remove(id);
        state.dirty.remove(id);
        update_depth(&state);
    }
}

fn update_depth(state: &QueueState) {
    metrics::REFRESH_QUEUE_DEPTH.set((state.queued.len() + state.running.len()) as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::SqliteCollectionStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn make_queue(
        dir: &TempDir,
    ) -> (
        RefreshQueue,
        mpsc::UnboundedReceiver<CollectionId>,
        Arc<dyn CollectionStore>,
    ) {
        let store: Arc<dyn CollectionStore> =
            Arc::new(SqliteCollectionStore::new(dir.path().join("db")).unwrap());
        let (queue, rx) = RefreshQueue::new(store.clone());
        (queue, rx, store)
    }

    fn make_collection(store: &Arc<dyn CollectionStore>) -> CollectionId {
        store
            .create_collection(
                &"alice".to_string(),
                &json!({"field": "title", "operator": "is", "value": "x"}),
            )
            .unwrap()
            .id
    }

    #[test]
    fn test_request_marks_pending_and_wakes_worker() {
        let dir = TempDir::new().unwrap();
        let (queue, mut rx, store) = make_queue(&dir);
        let id = make_collection(&store);

        queue.request_refresh(&id, RefreshHint::Full).unwrap();

        assert!(queue.is_tracked(&id));
        assert!(store.get_collection(&id).unwrap().unwrap().pending);
        assert_eq!(rx.try_recv().unwrap(), id);
    }

    #[test]
    fn test_duplicate_requests_coalesce() {
        let dir = TempDir::new().unwrap();
        let (queue, mut rx, store) = make_queue(&dir);
        let id = make_collection(&store);

        queue.request_refresh(&id, RefreshHint::Full).unwrap();
        queue.request_refresh(&id, RefreshHint::Full).unwrap();
        queue.request_refresh(&id, RefreshHint::Full).unwrap();

        assert_eq!(rx.try_recv().unwrap(), id);
        assert!(rx.try_recv().is_err(), "only one wakeup for three requests");
    }

    #[test]
    fn test_removal_hints_merge() {
        assert_eq!(
            RefreshHint::Removal("a".to_string()).merge(RefreshHint::Removal("a".to_string())),
            RefreshHint::Removal("a".to_string())
        );
        assert_eq!(
            RefreshHint::Removal("a".to_string()).merge(RefreshHint::Removal("b".to_string())),
            RefreshHint::Full
        );
        assert_eq!(
            RefreshHint::Removal("a".to_string()).merge(RefreshHint::Full),
            RefreshHint::Full
        );
        assert_eq!(
            RefreshHint::Full.merge(RefreshHint::Removal("a".to_string())),
            RefreshHint::Full
        );
    }

    #[test]
    fn test_request_while_running_is_parked_as_dirty() {
        let dir = TempDir::new().unwrap();
        let (queue, mut rx, store) = make_queue(&dir);
        let id = make_collection(&store);

        queue.request_refresh(&id, RefreshHint::Full).unwrap();
        assert_eq!(rx.try_recv().unwrap(), id);
        queue.take(&id).unwrap();

        // Arrives mid-refresh: no second wakeup yet.
        queue.request_refresh(&id, RefreshHint::Full).unwrap();
        assert!(rx.try_recv().is_err());

        // Completing with a dirty entry keeps pending set and requeues.
        let mut clear_pending_seen = None;
        queue
            .complete(&id, |clear| {
                clear_pending_seen = Some(clear);
                Ok(())
            })
            .unwrap();
        assert_eq!(clear_pending_seen, Some(false));
        assert_eq!(rx.try_recv().unwrap(), id);
        assert!(queue.is_tracked(&id));
    }

    #[test]
    fn test_complete_without_dirty_clears_pending() {
        let dir = TempDir::new().unwrap();
        let (queue, mut rx, store) = make_queue(&dir);
        let id = make_collection(&store);

        queue.request_refresh(&id, RefreshHint::Full).unwrap();
        rx.try_recv().unwrap();
        queue.take(&id).unwrap();

        let mut clear_pending_seen = None;
        queue
            .complete(&id, |clear| {
                clear_pending_seen = Some(clear);
                Ok(())
            })
            .unwrap();
        assert_eq!(clear_pending_seen, Some(true));
        assert!(!queue.is_tracked(&id));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failed_persist_keeps_state_for_failure_path() {
        let dir = TempDir::new().unwrap();
        let (queue, mut rx, store) = make_queue(&dir);
        let id = make_collection(&store);

        queue.request_refresh(&id, RefreshHint::Full).unwrap();
        rx.try_recv().unwrap();
        queue.take(&id).unwrap();
        queue.request_refresh(&id, RefreshHint::Full).unwrap();

        let result = queue.complete(&id, |_| anyhow::bail!("disk full"));
        assert!(result.is_err());

        // The dirty entry survived, so fail() requeues immediately.
        assert!(queue.fail(&id));
        assert_eq!(rx.try_recv().unwrap(), id);
    }

    #[test]
    fn test_failed_refresh_scope_survives_dirty_requeue() {
        let dir = TempDir::new().unwrap();
        let (queue, mut rx, store) = make_queue(&dir);
        let id = make_collection(&store);

        // A full refresh is running when a narrower removal arrives.
        queue.request_refresh(&id, RefreshHint::Full).unwrap();
        rx.try_recv().unwrap();
        assert_eq!(queue.take(&id), Some(RefreshHint::Full));
        queue
            .request_refresh(&id, RefreshHint::Removal("s1".to_string()))
            .unwrap();

        // The full refresh fails. The requeued hint must still cover the
        // failed run's scope, not just the parked removal.
        assert!(queue.fail(&id));
        assert_eq!(rx.try_recv().unwrap(), id);
        assert_eq!(queue.take(&id), Some(RefreshHint::Full));
    }

    #[test]
    fn test_fail_without_dirty_leaves_queue_empty() {
        let dir = TempDir::new().unwrap();
        let (queue, mut rx, store) = make_queue(&dir);
        let id = make_collection(&store);

        queue.request_refresh(&id, RefreshHint::Full).unwrap();
        rx.try_recv().unwrap();
        queue.take(&id).unwrap();

        assert!(!queue.fail(&id));
        assert!(!queue.is_tracked(&id));
        assert!(rx.try_recv().is_err());
    }
}
