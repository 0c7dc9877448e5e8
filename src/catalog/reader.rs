use super::{Interaction, Song, SongId, UserId};
use anyhow::Result;

/// Read access to the song catalog.
///
/// Implementations must be safe to call from blocking refresh workers; a
/// returned error is treated as a transient evaluation failure and retried.
pub trait CatalogReader: Send + Sync {
    /// Get a song by id.
    /// Returns Ok(None) if the song does not exist (or is soft-deleted).
    fn get_song(&self, id: &SongId) -> Result<Option<Song>>;

    /// Snapshot of every live song in the catalog.
    fn list_songs(&self) -> Result<Vec<Song>>;
}

/// Read access to user-scoped favorite and interaction state.
pub trait UserStateReader: Send + Sync {
    /// Whether the user has favorited the song.
    fn is_favorite(&self, user: &UserId, song: &SongId) -> Result<bool>;

    /// The user's interaction record for the song, if any.
    fn get_interaction(&self, user: &UserId, song: &SongId) -> Result<Option<Interaction>>;
}
