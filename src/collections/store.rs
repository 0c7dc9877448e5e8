use super::{CollectionId, MembershipDelta, SmartCollection};
use crate::catalog::{SongId, UserId};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Persistence for smart collections and their materialized membership.
///
/// Implementations must apply `apply_refresh` atomically: the membership
/// delta, the refresh timestamp and the bookkeeping columns all land in one
/// transaction or not at all.
pub trait CollectionStore: Send + Sync {
    fn create_collection(&self, owner: &UserId, rules: &JsonValue) -> Result<SmartCollection>;

    fn get_collection(&self, id: &CollectionId) -> Result<Option<SmartCollection>>;

    fn list_collections(&self) -> Result<Vec<SmartCollection>>;

    /// Replace the rule tree. Callers validate the tree before storing it.
    fn set_rules(&self, id: &CollectionId, rules: &JsonValue) -> Result<()>;

    fn get_membership(&self, id: &CollectionId) -> Result<HashSet<SongId>>;

    fn set_pending(&self, id: &CollectionId, pending: bool) -> Result<()>;

    /// Commit a successful refresh: apply the delta, stamp the refresh time,
    /// reset the retry count, mark the collection healthy and clear the
    /// pending flag when `clear_pending` is set.
    fn apply_refresh(
        &self,
        id: &CollectionId,
        delta: &MembershipDelta,
        refreshed_at: DateTime<Utc>,
        clear_pending: bool,
    ) -> Result<()>;

    /// Bump the retry count after a failed refresh; returns the new count.
    fn record_failure(&self, id: &CollectionId) -> Result<u32>;

    /// Park a collection that exhausted its retries. Membership stays at the
    /// last successful snapshot and the pending flag is cleared so the
    /// staleness sweeper can pick it up again later.
    fn mark_stale_error(&self, id: &CollectionId) -> Result<()>;

    /// Collections never refreshed or last refreshed before `older_than`.
    fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<SmartCollection>>;
}
