//! Hierarchical tag taxonomy.
//!
//! Tags form a forest: each tag has an optional parent and a cached depth
//! (root = 1). The hierarchy is stored as a flat arena keyed by id with an
//! explicit children index, so traversal and cycle checks are plain index
//! lookups with no ownership cycles.

mod hierarchy;

pub use hierarchy::{Tag, TagHierarchy};

/// Identifier of a tag in the hierarchy.
pub type TagId = String;

/// Extract tag names from a storage path like `Rock/Album/track.flac`.
///
/// The top-level folder becomes a tag. For configured special folders
/// (seasonal collections and the like) the first subfolder is also turned
/// into a combined `parent - child` tag, both lowercased.
pub fn extract_tag_names_from_path(path: &str, special_folders: &[String]) -> Vec<String> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() < 2 {
        return Vec::new();
    }

    let top_level = parts[0];
    let is_special = special_folders
        .iter()
        .any(|f| f.eq_ignore_ascii_case(top_level));

    if is_special && parts.len() >= 3 {
        return vec![
            top_level.to_lowercase(),
            format!("{} - {}", top_level.to_lowercase(), parts[1].to_lowercase()),
        ];
    }
    if is_special {
        return vec![top_level.to_lowercase()];
    }
    vec![top_level.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folders() -> Vec<String> {
        vec!["Xmas".to_string(), "Seasonal".to_string()]
    }

    #[test]
    fn test_extract_plain_folder() {
        let names = extract_tag_names_from_path("Rock/Nevermind/01.flac", &folders());
        assert_eq!(names, vec!["Rock".to_string()]);
    }

    #[test]
    fn test_extract_special_folder_with_subfolder() {
        let names = extract_tag_names_from_path("Xmas/Crooners/track.mp3", &folders());
        assert_eq!(
            names,
            vec!["xmas".to_string(), "xmas - crooners".to_string()]
        );
    }

    #[test]
    fn test_extract_special_folder_without_subfolder() {
        let names = extract_tag_names_from_path("XMAS/track.mp3", &folders());
        assert_eq!(names, vec!["xmas".to_string()]);
    }

    #[test]
    fn test_extract_needs_at_least_folder_and_file() {
        assert!(extract_tag_names_from_path("track.mp3", &folders()).is_empty());
        assert!(extract_tag_names_from_path("", &folders()).is_empty());
    }
}
