//! Refresh pipeline: invalidation dispatch, queueing, worker execution and
//! staleness sweeping.
//!
//! Catalog events flow into the [`InvalidationDispatcher`], which decides
//! which collections they can affect and enqueues them on the
//! [`RefreshQueue`]. The [`RefreshScheduler`] drains the queue with a worker
//! pool and materializes memberships; the [`StalenessSweeper`] periodically
//! requeues anything the event path missed.

mod dispatcher;
mod queue;
mod retry;
mod scheduler;
mod sweeper;

pub use dispatcher::InvalidationDispatcher;
pub use queue::RefreshQueue;
pub use retry::RetryPolicy;
pub use scheduler::RefreshScheduler;
pub use sweeper::StalenessSweeper;

use crate::catalog::{CatalogReader, SongId, UserStateReader};
use crate::collections::CollectionStore;
use crate::tags::TagHierarchy;
use std::sync::{Arc, RwLock};

/// What a queued refresh is allowed to assume about the pending change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshHint {
    /// Re-evaluate the rules over the whole catalog.
    Full,
    /// A song left the catalog; dropping it from the membership is enough,
    /// no rule evaluation needed.
    Removal(SongId),
}

impl RefreshHint {
    /// Coalesce two hints for the same collection. Anything merged with a
    /// removal of a different song widens to a full refresh.
    pub fn merge(self, other: RefreshHint) -> RefreshHint {
        match (self, other) {
            (RefreshHint::Removal(a), RefreshHint::Removal(b)) if a == b => RefreshHint::Removal(a),
            _ => RefreshHint::Full,
        }
    }
}

/// Shared resources handed to refresh workers.
#[derive(Clone)]
pub struct RefreshContext {
    pub collections: Arc<dyn CollectionStore>,
    pub catalog: Arc<dyn CatalogReader>,
    pub user_state: Arc<dyn UserStateReader>,
    pub tags: Arc<RwLock<TagHierarchy>>,
}
