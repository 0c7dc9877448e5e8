use super::RuleField;
use crate::catalog::{Interaction, Song};
use crate::tags::{TagHierarchy, TagId};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Everything a predicate needs to evaluate one song for one owner.
///
/// The tag set is pre-expanded with ancestors so hierarchical conditions
/// reduce to plain set membership, and `now` is captured once per refresh so
/// age comparisons are deterministic across the whole scan.
#[derive(Debug, Clone)]
pub struct SongContext {
    pub song: Song,
    pub direct_tags: HashSet<TagId>,
    pub expanded_tags: HashSet<TagId>,
    pub favorite: bool,
    pub play_count: u32,
    pub last_played_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

impl SongContext {
    pub fn build(
        song: Song,
        tags: &TagHierarchy,
        favorite: bool,
        interaction: Option<Interaction>,
        now: DateTime<Utc>,
    ) -> Self {
        let direct_tags = song.tags.clone();
        let expanded_tags = tags.expand_with_ancestors(&direct_tags);
        let interaction = interaction.unwrap_or_default();
        Self {
            song,
            direct_tags,
            expanded_tags,
            favorite,
            play_count: interaction.play_count,
            last_played_at: interaction.last_played_at,
            now,
        }
    }

    /// Text value of a field. `None` for absent optional attributes.
    pub(super) fn text_field(&self, field: RuleField) -> Option<&str> {
        match field {
            RuleField::Title => Some(&self.song.title),
            RuleField::ArtistName => Some(&self.song.artist),
            RuleField::AlbumName => Some(&self.song.album),
            RuleField::Genre => self.song.genre.as_deref(),
            RuleField::AudioFormat => Some(&self.song.format),
            _ => None,
        }
    }

    /// Numeric value of a field. `None` when the attribute is absent, which
    /// makes range conditions never match rather than error.
    pub(super) fn number_field(&self, field: RuleField) -> Option<f64> {
        match field {
            RuleField::Year => self.song.year.map(|y| y as f64),
            RuleField::Length => Some(self.song.duration_secs as f64),
            RuleField::PlayCount => Some(self.play_count as f64),
            _ => None,
        }
    }

    pub(super) fn date_field(&self, field: RuleField) -> Option<DateTime<Utc>> {
        match field {
            RuleField::LastPlayed => self.last_played_at,
            RuleField::DateAdded => Some(self.song.added_at),
            _ => None,
        }
    }
}
