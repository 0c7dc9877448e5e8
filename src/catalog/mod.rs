//! Catalog collaborator interfaces.
//!
//! The engine never owns songs, favorites or interactions; it reads
//! snapshots through the traits defined here and consumes typed domain
//! events published by whatever owns the catalog. `InMemoryCatalog` is a
//! complete in-process implementation used by tests and embedders.

mod events;
mod memory;
mod models;
mod reader;

pub use events::{CatalogEvent, InteractionField, SongField};
pub use memory::InMemoryCatalog;
pub use models::{Interaction, Song};
pub use reader::{CatalogReader, UserStateReader};

/// Identifier of a song in the catalog.
pub type SongId = String;

/// Identifier of a user. Favorite and interaction data is user-scoped.
pub type UserId = String;
