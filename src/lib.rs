//! Smartlist Engine Library
//!
//! Rule evaluation and invalidation engine for smart collections: playlists
//! whose membership is derived from a declarative rule tree evaluated over a
//! mutable catalog of songs, tags, favorites and listening interactions.

pub mod catalog;
pub mod collections;
pub mod config;
pub mod error;
pub mod metrics;
pub mod refresh;
pub mod rules;
pub mod tags;

// Re-export commonly used types for convenience
pub use catalog::{CatalogEvent, CatalogReader, InMemoryCatalog, Song, UserStateReader};
pub use collections::{CollectionStore, SmartCollection, SqliteCollectionStore};
pub use config::EngineConfig;
pub use error::EngineError;
pub use refresh::{InvalidationDispatcher, RefreshQueue, RefreshScheduler, StalenessSweeper};
pub use rules::{RuleNode, SongContext};
pub use tags::TagHierarchy;
