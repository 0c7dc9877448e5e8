use crate::catalog::{SongId, UserId};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Health of a smart collection's materialized membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Healthy,
    /// Refreshes kept failing past the retry budget; membership is the last
    /// successful snapshot until the staleness sweeper tries again.
    StaleError,
}

impl CollectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionStatus::Healthy => "healthy",
            CollectionStatus::StaleError => "stale_error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "healthy" => Some(CollectionStatus::Healthy),
            "stale_error" => Some(CollectionStatus::StaleError),
            _ => None,
        }
    }
}

/// A rule-defined collection owned by one user.
#[derive(Debug, Clone)]
pub struct SmartCollection {
    pub id: super::CollectionId,
    pub owner: UserId,
    /// The rule tree in its external JSON shape, stored verbatim.
    pub rules: JsonValue,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// A refresh is queued or running for this collection.
    pub pending: bool,
    pub retry_count: u32,
    pub status: CollectionStatus,
}

/// The membership change produced by one refresh.
#[derive(Debug, Clone, Default)]
pub struct MembershipDelta {
    pub added: HashSet<SongId>,
    pub removed: HashSet<SongId>,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Delta turning `current` into `target`.
    pub fn between(current: &HashSet<SongId>, target: &HashSet<SongId>) -> Self {
        Self {
            added: target.difference(current).cloned().collect(),
            removed: current.difference(target).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_between_sets() {
        let current: HashSet<SongId> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let target: HashSet<SongId> = ["b", "c"].iter().map(|s| s.to_string()).collect();
        let delta = MembershipDelta::between(&current, &target);
        assert_eq!(delta.added, ["c".to_string()].into_iter().collect());
        assert_eq!(delta.removed, ["a".to_string()].into_iter().collect());
        assert!(!delta.is_empty());
        assert!(MembershipDelta::between(&target, &target).is_empty());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [CollectionStatus::Healthy, CollectionStatus::StaleError] {
            assert_eq!(CollectionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CollectionStatus::parse("on_fire"), None);
    }
}
