use super::SongId;
use crate::tags::TagId;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// A catalog item. Owned by the catalog, read-only from the engine's
/// perspective.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: Option<i32>,
    pub duration_secs: u32,
    pub genre: Option<String>,
    pub format: String,
    pub added_at: DateTime<Utc>,
    /// Directly-assigned tags. Ancestor expansion happens at evaluation
    /// time, not here.
    pub tags: HashSet<TagId>,
}

/// Per-user listening state for a song.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interaction {
    pub play_count: u32,
    pub last_played_at: Option<DateTime<Utc>>,
}
