use super::{RefreshHint, RefreshQueue};
use crate::catalog::{CatalogEvent, InteractionField, SongField, UserId};
use crate::collections::{CollectionStore, SmartCollection};
use crate::metrics;
use crate::rules::{field_dependencies, parse_rule_tree, RuleField};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Routes catalog events to refreshes.
///
/// Each event is matched against the stored rule trees: only collections
/// whose rules actually read a changed attribute are enqueued, and only for
/// the owner when the change is user-scoped (favorites and interactions).
/// Deletions skip evaluation entirely via a removal hint.
pub struct InvalidationDispatcher {
    collections: Arc<dyn CollectionStore>,
    queue: RefreshQueue,
    events: mpsc::UnboundedReceiver<CatalogEvent>,
    shutdown: CancellationToken,
}

impl InvalidationDispatcher {
    pub fn new(
        collections: Arc<dyn CollectionStore>,
        queue: RefreshQueue,
        events: mpsc::UnboundedReceiver<CatalogEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            collections,
            queue,
            events,
            shutdown,
        }
    }

    /// Main event loop - call from a spawned task.
    pub async fn run(mut self) {
        info!("Invalidation dispatcher starting");
        loop {
            tokio::select! {
                maybe_event = self.events.recv() => match maybe_event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = self.shutdown.cancelled() => {
                    info!("Invalidation dispatcher shutting down");
                    break;
                }
            }
        }
        info!("Invalidation dispatcher stopped");
    }

    fn handle_event(&self, event: CatalogEvent) {
        metrics::record_dispatcher_event(&event.to_string());
        debug!("Dispatching {}", event);

        match event {
            // A new or resurfacing song can enter any collection.
            CatalogEvent::SongCreated { .. } | CatalogEvent::SongRestored { .. } => {
                self.enqueue_matching(None, None);
            }
            CatalogEvent::SongUpdated { changed_fields, .. } => {
                let relevant: HashSet<RuleField> = changed_fields
                    .into_iter()
                    .map(song_field_to_rule_field)
                    .collect();
                if !relevant.is_empty() {
                    self.enqueue_matching(Some(&relevant), None);
                }
            }
            CatalogEvent::SongDeleted { song_id } => {
                self.enqueue_removal(&song_id);
            }
            CatalogEvent::FavoriteAdded { user, .. } | CatalogEvent::FavoriteRemoved { user, .. } => {
                let relevant: HashSet<RuleField> = [RuleField::IsFavorite].into_iter().collect();
                self.enqueue_matching(Some(&relevant), Some(&user));
            }
            CatalogEvent::InteractionCreated { user, .. } => {
                let relevant: HashSet<RuleField> =
                    [RuleField::PlayCount, RuleField::LastPlayed].into_iter().collect();
                self.enqueue_matching(Some(&relevant), Some(&user));
            }
            CatalogEvent::InteractionUpdated {
                user,
                changed_fields,
                ..
            } => {
                let relevant: HashSet<RuleField> = changed_fields
                    .into_iter()
                    .map(|field| match field {
                        InteractionField::PlayCount => RuleField::PlayCount,
                        InteractionField::LastPlayedAt => RuleField::LastPlayed,
                    })
                    .collect();
                if !relevant.is_empty() {
                    self.enqueue_matching(Some(&relevant), Some(&user));
                }
            }
            CatalogEvent::CollectionMarkedSmart { collection_id }
            | CatalogEvent::CollectionRulesUpdated { collection_id } => {
                if let Err(e) = self.queue.request_refresh(&collection_id, RefreshHint::Full) {
                    warn!("Failed to enqueue collection {}: {}", collection_id, e);
                }
            }
        }
    }

    /// Enqueue a full refresh for every collection whose rules read one of
    /// the `relevant` fields (`None` means all collections), restricted to
    /// `owner` when the change is user-scoped.
    fn enqueue_matching(&self, relevant: Option<&HashSet<RuleField>>, owner: Option<&UserId>) {
        for collection in self.load_collections() {
            if let Some(owner) = owner {
                if &collection.owner != owner {
                    continue;
                }
            }
            if let Some(relevant) = relevant {
                if !rules_read_any(&collection, relevant) {
                    continue;
                }
            }
            if let Err(e) = self.queue.request_refresh(&collection.id, RefreshHint::Full) {
                warn!("Failed to enqueue collection {}: {}", collection.id, e);
            }
        }
    }

    fn enqueue_removal(&self, song_id: &str) {
        for collection in self.load_collections() {
            let hint = RefreshHint::Removal(song_id.to_string());
            if let Err(e) = self.queue.request_refresh(&collection.id, hint) {
                warn!("Failed to enqueue collection {}: {}", collection.id, e);
            }
        }
    }

    fn load_collections(&self) -> Vec<SmartCollection> {
        match self.collections.list_collections() {
            Ok(collections) => collections,
            Err(e) => {
                // The sweeper will catch anything missed here.
                warn!("Failed to list collections, dropping event: {}", e);
                Vec::new()
            }
        }
    }
}

/// Whether a collection's rules read any of the given fields. A rule tree
/// that no longer parses is treated as affected by everything, so the
/// failure surfaces during refresh rather than silently going stale.
fn rules_read_any(collection: &SmartCollection, relevant: &HashSet<RuleField>) -> bool {
    match parse_rule_tree(&collection.rules) {
        Ok(tree) => !field_dependencies(&tree).is_disjoint(relevant),
        Err(e) => {
            warn!(
                "Collection {} has unparseable rules ({}), refreshing anyway",
                collection.id, e
            );
            true
        }
    }
}

fn song_field_to_rule_field(field: SongField) -> RuleField {
    match field {
        SongField::Title => RuleField::Title,
        SongField::Artist => RuleField::ArtistName,
        SongField::Album => RuleField::AlbumName,
        SongField::Genre => RuleField::Genre,
        SongField::Year => RuleField::Year,
        SongField::Duration => RuleField::Length,
        SongField::Format => RuleField::AudioFormat,
        SongField::AddedAt => RuleField::DateAdded,
        SongField::Tags => RuleField::Tag,
    }
}
