//! Smart collection persistence: definitions, materialized membership and
//! the refresh bookkeeping (pending flag, retry count, staleness status).

mod models;
mod sqlite_store;
mod store;

pub use models::{CollectionStatus, MembershipDelta, SmartCollection};
pub use sqlite_store::SqliteCollectionStore;
pub use store::CollectionStore;

pub type CollectionId = String;
