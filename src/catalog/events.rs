use super::{SongId, UserId};
use crate::collections::CollectionId;

/// Scalar song attributes that can appear in an update event's changed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SongField {
    Title,
    Artist,
    Album,
    Genre,
    Year,
    Duration,
    Format,
    AddedAt,
    Tags,
}

/// Interaction attributes that can appear in an update event's changed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionField {
    PlayCount,
    LastPlayedAt,
}

/// Domain events published by the catalog-owning collaborators.
///
/// The dispatcher subscribes to these over an mpsc channel; publishers never
/// block on refresh execution.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    SongCreated {
        song_id: SongId,
    },
    SongUpdated {
        song_id: SongId,
        changed_fields: Vec<SongField>,
    },
    /// Soft and force deletes both map here; the engine only needs to drop
    /// the id from materialized memberships.
    SongDeleted {
        song_id: SongId,
    },
    SongRestored {
        song_id: SongId,
    },
    FavoriteAdded {
        user: UserId,
        song_id: SongId,
    },
    FavoriteRemoved {
        user: UserId,
        song_id: SongId,
    },
    InteractionCreated {
        user: UserId,
        song_id: SongId,
    },
    InteractionUpdated {
        user: UserId,
        song_id: SongId,
        changed_fields: Vec<InteractionField>,
    },
    CollectionMarkedSmart {
        collection_id: CollectionId,
    },
    CollectionRulesUpdated {
        collection_id: CollectionId,
    },
}

impl std::fmt::Display for CatalogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CatalogEvent::SongCreated { .. } => "SongCreated",
            CatalogEvent::SongUpdated { .. } => "SongUpdated",
            CatalogEvent::SongDeleted { .. } => "SongDeleted",
            CatalogEvent::SongRestored { .. } => "SongRestored",
            CatalogEvent::FavoriteAdded { .. } => "FavoriteAdded",
            CatalogEvent::FavoriteRemoved { .. } => "FavoriteRemoved",
            CatalogEvent::InteractionCreated { .. } => "InteractionCreated",
            CatalogEvent::InteractionUpdated { .. } => "InteractionUpdated",
            CatalogEvent::CollectionMarkedSmart { .. } => "CollectionMarkedSmart",
            CatalogEvent::CollectionRulesUpdated { .. } => "CollectionRulesUpdated",
        };
        write!(f, "{name}")
    }
}
