use super::{CatalogEvent, CatalogReader, Interaction, Song, SongField, SongId, UserId};
use super::{InteractionField, UserStateReader};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

/// In-process catalog backing the engine in tests and embedded setups.
///
/// Mutations publish the corresponding `CatalogEvent` when an event sender
/// is attached. Reads can be made to fail on demand to exercise the
/// transient-failure paths.
#[derive(Default)]
pub struct InMemoryCatalog {
    songs: RwLock<HashMap<SongId, Song>>,
    deleted: RwLock<HashMap<SongId, Song>>,
    favorites: RwLock<HashSet<(UserId, SongId)>>,
    interactions: RwLock<HashMap<(UserId, SongId), Interaction>>,
    events: RwLock<Option<mpsc::UnboundedSender<CatalogEvent>>>,
    fail_reads: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the event channel consumed by the invalidation dispatcher.
    pub fn set_event_sender(&self, sender: mpsc::UnboundedSender<CatalogEvent>) {
        *self.events.write().expect("events lock poisoned") = Some(sender);
    }

    /// Make all reads fail until cleared, to simulate catalog outages.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn publish(&self, event: CatalogEvent) {
        if let Some(sender) = self.events.read().expect("events lock poisoned").as_ref() {
            if sender.send(event).is_err() {
                warn!("Catalog event receiver dropped, event discarded");
            }
        }
    }

    fn check_readable(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("catalog unavailable");
        }
        Ok(())
    }

    pub fn add_song(&self, song: Song) {
        let song_id = song.id.clone();
        self.songs
            .write()
            .expect("songs lock poisoned")
            .insert(song_id.clone(), song);
        self.publish(CatalogEvent::SongCreated { song_id });
    }

    /// Replace a song and report which fields changed.
    pub fn update_song(&self, song: Song, changed_fields: Vec<SongField>) {
        let song_id = song.id.clone();
        self.songs
            .write()
            .expect("songs lock poisoned")
            .insert(song_id.clone(), song);
        self.publish(CatalogEvent::SongUpdated {
            song_id,
            changed_fields,
        });
    }

    /// Soft-delete: the song disappears from reads but can be restored.
    pub fn delete_song(&self, id: &SongId) {
        let removed = self.songs.write().expect("songs lock poisoned").remove(id);
        if let Some(song) = removed {
            self.deleted
                .write()
                .expect("deleted lock poisoned")
                .insert(id.clone(), song);
            self.publish(CatalogEvent::SongDeleted {
                song_id: id.clone(),
            });
        }
    }

    pub fn restore_song(&self, id: &SongId) {
        let restored = self
            .deleted
            .write()
            .expect("deleted lock poisoned")
            .remove(id);
        if let Some(song) = restored {
            self.songs
                .write()
                .expect("songs lock poisoned")
                .insert(id.clone(), song);
            self.publish(CatalogEvent::SongRestored {
                song_id: id.clone(),
            });
        }
    }

    pub fn set_favorite(&self, user: &UserId, song: &SongId, favorite: bool) {
        let key = (user.clone(), song.clone());
        let changed = {
            let mut favorites = self.favorites.write().expect("favorites lock poisoned");
            if favorite {
                favorites.insert(key)
            } else {
                favorites.remove(&key)
            }
        };
        if changed {
            let event = if favorite {
                CatalogEvent::FavoriteAdded {
                    user: user.clone(),
                    song_id: song.clone(),
                }
            } else {
                CatalogEvent::FavoriteRemoved {
                    user: user.clone(),
                    song_id: song.clone(),
                }
            };
            self.publish(event);
        }
    }

    /// Bump the user's play count for a song, stamping `last_played_at`.
    pub fn record_play(&self, user: &UserId, song: &SongId) {
        let key = (user.clone(), song.clone());
        let created = {
            let mut interactions = self
                .interactions
                .write()
                .expect("interactions lock poisoned");
            let entry = interactions.entry(key).or_default();
            let created = entry.play_count == 0 && entry.last_played_at.is_none();
            entry.play_count += 1;
            entry.last_played_at = Some(chrono::Utc::now());
            created
        };
        let event = if created {
            CatalogEvent::InteractionCreated {
                user: user.clone(),
                song_id: song.clone(),
            }
        } else {
            CatalogEvent::InteractionUpdated {
                user: user.clone(),
                song_id: song.clone(),
                changed_fields: vec![InteractionField::PlayCount, InteractionField::LastPlayedAt],
            }
        };
        self.publish(event);
    }
}

impl CatalogReader for InMemoryCatalog {
    fn get_song(&self, id: &SongId) -> Result<Option<Song>> {
        self.check_readable()?;
        Ok(self
            .songs
            .read()
            .expect("songs lock poisoned")
            .get(id)
            .cloned())
    }

    fn list_songs(&self) -> Result<Vec<Song>> {
        self.check_readable()?;
        Ok(self
            .songs
            .read()
            .expect("songs lock poisoned")
            .values()
            .cloned()
            .collect())
    }
}

impl UserStateReader for InMemoryCatalog {
    fn is_favorite(&self, user: &UserId, song: &SongId) -> Result<bool> {
        self.check_readable()?;
        Ok(self
            .favorites
            .read()
            .expect("favorites lock poisoned")
            .contains(&(user.clone(), song.clone())))
    }

    fn get_interaction(&self, user: &UserId, song: &SongId) -> Result<Option<Interaction>> {
        self.check_readable()?;
        Ok(self
            .interactions
            .read()
            .expect("interactions lock poisoned")
            .get(&(user.clone(), song.clone()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_song(id: &str) -> Song {
        Song {
            id: id.to_string(),
            title: format!("Song {id}"),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            year: Some(1991),
            duration_secs: 240,
            genre: None,
            format: "flac".to_string(),
            added_at: Utc::now(),
            tags: HashSet::new(),
        }
    }

    #[test]
    fn test_delete_and_restore_round_trip() {
        let catalog = InMemoryCatalog::new();
        let id = "s1".to_string();
        catalog.add_song(make_song(&id));

        catalog.delete_song(&id);
        assert!(catalog.get_song(&id).unwrap().is_none());

        catalog.restore_song(&id);
        assert!(catalog.get_song(&id).unwrap().is_some());
    }

    #[test]
    fn test_mutations_publish_events() {
        let catalog = InMemoryCatalog::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        catalog.set_event_sender(tx);

        let id = "s1".to_string();
        let user = "alice".to_string();
        catalog.add_song(make_song(&id));
        catalog.set_favorite(&user, &id, true);
        catalog.record_play(&user, &id);
        catalog.record_play(&user, &id);

        assert!(matches!(
            rx.try_recv().unwrap(),
            CatalogEvent::SongCreated { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            CatalogEvent::FavoriteAdded { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            CatalogEvent::InteractionCreated { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            CatalogEvent::InteractionUpdated { .. }
        ));
    }

    #[test]
    fn test_favorite_toggle_is_idempotent() {
        let catalog = InMemoryCatalog::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        catalog.set_event_sender(tx);

        let id = "s1".to_string();
        let user = "alice".to_string();
        catalog.set_favorite(&user, &id, true);
        catalog.set_favorite(&user, &id, true);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "duplicate toggle publishes nothing");
    }

    #[test]
    fn test_fail_reads() {
        let catalog = InMemoryCatalog::new();
        catalog.add_song(make_song("s1"));
        catalog.set_fail_reads(true);
        assert!(catalog.list_songs().is_err());
        catalog.set_fail_reads(false);
        assert_eq!(catalog.list_songs().unwrap().len(), 1);
    }
}
