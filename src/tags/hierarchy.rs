use super::TagId;
use crate::error::EngineError;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};

/// A tag in the taxonomy forest.
#[derive(Debug, Clone)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    /// Unique, url-safe identifier derived from the name.
    pub slug: String,
    pub color: Option<String>,
    pub parent: Option<TagId>,
    /// Root tags have depth 1, children `parent.depth + 1`.
    pub depth: u32,
    /// When set, songs whose storage path matches this pattern get the tag
    /// assigned automatically during catalog scans.
    pub auto_assign_pattern: Option<Regex>,
}

/// Arena of tags with parent/child links and cached depth.
///
/// All mutations go through `&mut self`, so callers wrap the hierarchy in a
/// lock when sharing it; every operation either fully applies or leaves the
/// arena untouched.
#[derive(Debug, Default)]
pub struct TagHierarchy {
    tags: HashMap<TagId, Tag>,
    children: HashMap<TagId, Vec<TagId>>,
}

impl TagHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tag under an optional parent.
    ///
    /// Fails with `NotFound` if the parent id does not exist. The new tag's
    /// depth is `parent.depth + 1`, or 1 for a root tag.
    pub fn create(&mut self, name: &str, parent: Option<&TagId>) -> Result<TagId, EngineError> {
        let depth = match parent {
            Some(parent_id) => {
                let parent_tag = self
                    .tags
                    .get(parent_id)
                    .ok_or_else(|| EngineError::NotFound(format!("parent tag {parent_id}")))?;
                parent_tag.depth + 1
            }
            None => 1,
        };

        let id = uuid::Uuid::new_v4().to_string();
        let tag = Tag {
            id: id.clone(),
            name: name.to_string(),
            slug: self.generate_unique_slug(name),
            color: Some(default_color(name)),
            parent: parent.cloned(),
            depth,
            auto_assign_pattern: None,
        };

        if let Some(parent_id) = parent {
            self.children
                .entry(parent_id.clone())
                .or_default()
                .push(id.clone());
        }
        self.tags.insert(id.clone(), tag);
        Ok(id)
    }

    /// Return an existing tag by case-insensitive name, or create it.
    pub fn find_or_create(
        &mut self,
        name: &str,
        parent: Option<&TagId>,
    ) -> Result<TagId, EngineError> {
        if let Some(tag) = self.by_name(name) {
            return Ok(tag.id.clone());
        }
        self.create(name, parent)
    }

    /// Move a tag under a new parent (or make it a root).
    ///
    /// Fails with `CircularReference` if the new parent is the tag itself or
    /// one of its descendants, and with `NotFound` if either id is missing.
    /// On success the tag's parent and depth are updated and depths cascade
    /// breadth-first through all descendants. All checks run before any
    /// mutation, so a failed reparent leaves no partial state.
    pub fn reparent(&mut self, id: &TagId, new_parent: Option<&TagId>) -> Result<(), EngineError> {
        if !self.tags.contains_key(id) {
            return Err(EngineError::NotFound(format!("tag {id}")));
        }

        let new_depth = match new_parent {
            Some(parent_id) => {
                if parent_id == id {
                    return Err(EngineError::CircularReference(format!(
                        "tag {id} cannot be its own parent"
                    )));
                }
                let parent_tag = self
                    .tags
                    .get(parent_id)
                    .ok_or_else(|| EngineError::NotFound(format!("parent tag {parent_id}")))?;
                if self.is_descendant_of(parent_id, id) {
                    return Err(EngineError::CircularReference(format!(
                        "tag {parent_id} is a descendant of {id}"
                    )));
                }
                parent_tag.depth + 1
            }
            None => 1,
        };

        // Checks passed, apply: unlink from old parent, relink, then cascade.
        let old_parent = self.tags.get(id).and_then(|t| t.parent.clone());
        if let Some(old_parent_id) = old_parent {
            if let Some(siblings) = self.children.get_mut(&old_parent_id) {
                siblings.retain(|child| child != id);
            }
        }
        if let Some(parent_id) = new_parent {
            self.children
                .entry(parent_id.clone())
                .or_default()
                .push(id.clone());
        }
        if let Some(tag) = self.tags.get_mut(id) {
            tag.parent = new_parent.cloned();
            tag.depth = new_depth;
        }

        // Breadth-first depth cascade: each descendant's depth becomes its
        // parent's new depth + 1.
        let mut queue: VecDeque<TagId> = self.children_of(id).into();
        while let Some(child_id) = queue.pop_front() {
            let parent_depth = self
                .tags
                .get(&child_id)
                .and_then(|t| t.parent.as_ref())
                .and_then(|p| self.tags.get(p))
                .map(|p| p.depth)
                .unwrap_or(0);
            if let Some(child) = self.tags.get_mut(&child_id) {
                child.depth = parent_depth + 1;
            }
            queue.extend(self.children_of(&child_id));
        }
        Ok(())
    }

    /// Merge `source` into `target`: the source's children are reparented
    /// under the target and the source tag is removed.
    pub fn merge(&mut self, source: &TagId, target: &TagId) -> Result<(), EngineError> {
        if !self.tags.contains_key(source) {
            return Err(EngineError::NotFound(format!("tag {source}")));
        }
        if !self.tags.contains_key(target) {
            return Err(EngineError::NotFound(format!("tag {target}")));
        }
        if source == target || self.is_descendant_of(target, source) {
            return Err(EngineError::CircularReference(format!(
                "cannot merge {source} into its own subtree"
            )));
        }

        for child in self.children_of(source) {
            self.reparent(&child, Some(target))?;
        }
        if let Some(parent_id) = self.tags.get(source).and_then(|t| t.parent.clone()) {
            if let Some(siblings) = self.children.get_mut(&parent_id) {
                siblings.retain(|child| child != source);
            }
        }
        self.children.remove(source);
        self.tags.remove(source);
        Ok(())
    }

    /// Assign tags for a song's storage path during a catalog scan.
    ///
    /// Folder-derived names (see `extract_tag_names_from_path`, with the
    /// special folders taken from `EngineConfig::special_folders`) are
    /// created on demand; a combined `parent - child` tag nests under its
    /// top-level folder tag. Tags with a matching auto-assign pattern are
    /// appended. Returns the deduplicated set to attach to the song.
    pub fn assign_from_path(
        &mut self,
        path: &str,
        special_folders: &[String],
    ) -> Result<Vec<TagId>, EngineError> {
        let names = super::extract_tag_names_from_path(path, special_folders);
        let mut assigned = Vec::new();
        let mut parent: Option<TagId> = None;
        for name in &names {
            let id = self.find_or_create(name, parent.as_ref())?;
            if parent.is_none() {
                parent = Some(id.clone());
            }
            assigned.push(id);
        }
        for id in self.auto_assign_for_path(path) {
            if !assigned.contains(&id) {
                assigned.push(id);
            }
        }
        Ok(assigned)
    }

    /// Set (or clear) the auto-assign pattern for a tag. The pattern is
    /// validated here so a bad regex surfaces as a `Validation` error to the
    /// caller instead of failing silently during scans.
    pub fn set_auto_assign_pattern(
        &mut self,
        id: &TagId,
        pattern: Option<&str>,
    ) -> Result<(), EngineError> {
        let compiled = match pattern {
            Some(p) => Some(
                Regex::new(p)
                    .map_err(|e| EngineError::Validation(format!("bad tag pattern: {e}")))?,
            ),
            None => None,
        };
        let tag = self
            .tags
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("tag {id}")))?;
        tag.auto_assign_pattern = compiled;
        Ok(())
    }

    /// Tags whose auto-assign pattern matches the given storage path.
    pub fn auto_assign_for_path(&self, path: &str) -> Vec<TagId> {
        let mut matched: Vec<TagId> = self
            .tags
            .values()
            .filter(|t| {
                t.auto_assign_pattern
                    .as_ref()
                    .is_some_and(|re| re.is_match(path))
            })
            .map(|t| t.id.clone())
            .collect();
        matched.sort();
        matched
    }

    pub fn get(&self, id: &TagId) -> Option<&Tag> {
        self.tags.get(id)
    }

    /// Case-insensitive lookup by name.
    pub fn by_name(&self, name: &str) -> Option<&Tag> {
        self.tags
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    fn children_of(&self, id: &TagId) -> Vec<TagId> {
        self.children.get(id).cloned().unwrap_or_default()
    }

    /// All descendants of a tag, breadth-first.
    pub fn descendants(&self, id: &TagId) -> Vec<TagId> {
        let mut result = Vec::new();
        let mut queue: VecDeque<TagId> = self.children_of(id).into();
        while let Some(child) = queue.pop_front() {
            queue.extend(self.children_of(&child));
            result.push(child);
        }
        result
    }

    /// Whether `a` is a descendant of `b` (walks `a`'s parent chain).
    pub fn is_descendant_of(&self, a: &TagId, b: &TagId) -> bool {
        let mut current = self.tags.get(a).and_then(|t| t.parent.clone());
        while let Some(parent_id) = current {
            if &parent_id == b {
                return true;
            }
            current = self.tags.get(&parent_id).and_then(|t| t.parent.clone());
        }
        false
    }

    /// The parent chain of a tag, nearest first.
    pub fn ancestors_of(&self, id: &TagId) -> Vec<TagId> {
        let mut result = Vec::new();
        let mut current = self.tags.get(id).and_then(|t| t.parent.clone());
        while let Some(parent_id) = current {
            current = self.tags.get(&parent_id).and_then(|t| t.parent.clone());
            result.push(parent_id);
        }
        result
    }

    /// A direct tag set expanded with every ancestor, used to build song
    /// contexts for hierarchical rule matching.
    pub fn expand_with_ancestors(&self, direct: &HashSet<TagId>) -> HashSet<TagId> {
        let mut expanded = direct.clone();
        for id in direct {
            expanded.extend(self.ancestors_of(id));
        }
        expanded
    }

    fn generate_unique_slug(&self, name: &str) -> String {
        let base: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");

        let taken: HashSet<&str> = self.tags.values().map(|t| t.slug.as_str()).collect();
        if !taken.contains(base.as_str()) {
            return base;
        }
        let mut counter = 1;
        loop {
            let candidate = format!("{base}-{counter}");
            if !taken.contains(candidate.as_str()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Stable default color derived from the tag name (hue from a name hash,
/// fixed saturation/lightness).
fn default_color(name: &str) -> String {
    let mut hash: u32 = 0;
    for byte in name.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }
    let (r, g, b) = hsl_to_rgb((hash % 360) as f64, 0.65, 0.5);
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let h = h / 360.0;
    if s == 0.0 {
        let v = (l * 255.0).round() as u8;
        return (v, v, v);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let to_channel = |t: f64| -> u8 {
        let mut t = t;
        if t < 0.0 {
            t += 1.0;
        }
        if t > 1.0 {
            t -= 1.0;
        }
        let v = if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 1.0 / 2.0 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        };
        (v * 255.0).round() as u8
    };
    (
        to_channel(h + 1.0 / 3.0),
        to_channel(h),
        to_channel(h - 1.0 / 3.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depths_consistent(hierarchy: &TagHierarchy) -> bool {
        hierarchy.tags.values().all(|tag| match &tag.parent {
            None => tag.depth == 1,
            Some(parent_id) => {
                hierarchy
                    .get(parent_id)
                    .map(|p| p.depth + 1)
                    .unwrap_or(0)
                    == tag.depth
            }
        })
    }

    #[test]
    fn test_create_root_has_depth_one() {
        let mut hierarchy = TagHierarchy::new();
        let rock = hierarchy.create("Rock", None).unwrap();
        assert_eq!(hierarchy.get(&rock).unwrap().depth, 1);
        assert!(hierarchy.get(&rock).unwrap().parent.is_none());
    }

    #[test]
    fn test_create_child_depth_follows_parent() {
        let mut hierarchy = TagHierarchy::new();
        let rock = hierarchy.create("Rock", None).unwrap();
        let classic = hierarchy.create("ClassicRock", Some(&rock)).unwrap();
        assert_eq!(hierarchy.get(&classic).unwrap().depth, 2);
        assert!(depths_consistent(&hierarchy));
    }

    #[test]
    fn test_create_with_missing_parent_fails() {
        let mut hierarchy = TagHierarchy::new();
        let missing = "nope".to_string();
        let err = hierarchy.create("Rock", Some(&missing)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_reparent_cascades_depths() {
        // Scenario: Rock (1) <- ClassicRock (2); reparent Rock under a new
        // root Genres and both depths shift down one level.
        let mut hierarchy = TagHierarchy::new();
        let rock = hierarchy.create("Rock", None).unwrap();
        let classic = hierarchy.create("ClassicRock", Some(&rock)).unwrap();
        let genres = hierarchy.create("Genres", None).unwrap();

        hierarchy.reparent(&rock, Some(&genres)).unwrap();

        assert_eq!(hierarchy.get(&rock).unwrap().depth, 2);
        assert_eq!(hierarchy.get(&classic).unwrap().depth, 3);
        assert!(depths_consistent(&hierarchy));
    }

    #[test]
    fn test_reparent_to_root_cascades() {
        let mut hierarchy = TagHierarchy::new();
        let genres = hierarchy.create("Genres", None).unwrap();
        let rock = hierarchy.create("Rock", Some(&genres)).unwrap();
        let classic = hierarchy.create("ClassicRock", Some(&rock)).unwrap();

        hierarchy.reparent(&rock, None).unwrap();

        assert_eq!(hierarchy.get(&rock).unwrap().depth, 1);
        assert_eq!(hierarchy.get(&classic).unwrap().depth, 2);
    }

    #[test]
    fn test_reparent_onto_descendant_fails_without_changes() {
        let mut hierarchy = TagHierarchy::new();
        let rock = hierarchy.create("Rock", None).unwrap();
        let classic = hierarchy.create("ClassicRock", Some(&rock)).unwrap();

        let err = hierarchy.reparent(&rock, Some(&classic)).unwrap_err();
        assert!(matches!(err, EngineError::CircularReference(_)));

        // No depth changes occurred.
        assert_eq!(hierarchy.get(&rock).unwrap().depth, 1);
        assert_eq!(hierarchy.get(&classic).unwrap().depth, 2);
        assert!(hierarchy.get(&rock).unwrap().parent.is_none());
    }

    #[test]
    fn test_reparent_onto_self_fails() {
        let mut hierarchy = TagHierarchy::new();
        let rock = hierarchy.create("Rock", None).unwrap();
        let err = hierarchy.reparent(&rock, Some(&rock)).unwrap_err();
        assert!(matches!(err, EngineError::CircularReference(_)));
    }

    #[test]
    fn test_never_own_descendant_after_reparents() {
        let mut hierarchy = TagHierarchy::new();
        let a = hierarchy.create("a", None).unwrap();
        let b = hierarchy.create("b", Some(&a)).unwrap();
        let c = hierarchy.create("c", Some(&b)).unwrap();
        let d = hierarchy.create("d", None).unwrap();

        hierarchy.reparent(&b, Some(&d)).unwrap();
        hierarchy.reparent(&d, Some(&a)).unwrap();

        for id in [&a, &b, &c, &d] {
            assert!(!hierarchy.descendants(id).contains(id));
            assert!(!hierarchy.is_descendant_of(id, id));
        }
        assert!(depths_consistent(&hierarchy));
    }

    #[test]
    fn test_descendants_breadth_first() {
        let mut hierarchy = TagHierarchy::new();
        let root = hierarchy.create("root", None).unwrap();
        let child_a = hierarchy.create("a", Some(&root)).unwrap();
        let child_b = hierarchy.create("b", Some(&root)).unwrap();
        let grandchild = hierarchy.create("aa", Some(&child_a)).unwrap();

        let descendants = hierarchy.descendants(&root);
        assert_eq!(descendants.len(), 3);
        assert!(descendants.contains(&child_a));
        assert!(descendants.contains(&child_b));
        assert!(descendants.contains(&grandchild));
        // Grandchildren come after children.
        assert_eq!(descendants.last().unwrap(), &grandchild);
    }

    #[test]
    fn test_expand_with_ancestors() {
        let mut hierarchy = TagHierarchy::new();
        let genres = hierarchy.create("Genres", None).unwrap();
        let rock = hierarchy.create("Rock", Some(&genres)).unwrap();
        let classic = hierarchy.create("ClassicRock", Some(&rock)).unwrap();

        let direct: HashSet<TagId> = [classic.clone()].into_iter().collect();
        let expanded = hierarchy.expand_with_ancestors(&direct);

        assert_eq!(expanded.len(), 3);
        assert!(expanded.contains(&classic));
        assert!(expanded.contains(&rock));
        assert!(expanded.contains(&genres));
    }

    #[test]
    fn test_find_or_create_is_case_insensitive() {
        let mut hierarchy = TagHierarchy::new();
        let first = hierarchy.find_or_create("Rock", None).unwrap();
        let second = hierarchy.find_or_create("rock", None).unwrap();
        assert_eq!(first, second);
        assert_eq!(hierarchy.len(), 1);
    }

    #[test]
    fn test_slugs_are_unique() {
        let mut hierarchy = TagHierarchy::new();
        let a = hierarchy.create("Classic Rock", None).unwrap();
        let b = hierarchy.create("Classic rock!", None).unwrap();
        assert_eq!(hierarchy.get(&a).unwrap().slug, "classic-rock");
        assert_eq!(hierarchy.get(&b).unwrap().slug, "classic-rock-1");
    }

    #[test]
    fn test_merge_moves_children_and_removes_source() {
        let mut hierarchy = TagHierarchy::new();
        let rock = hierarchy.create("Rock", None).unwrap();
        let classic = hierarchy.create("ClassicRock", Some(&rock)).unwrap();
        let guitar = hierarchy.create("Guitar Music", None).unwrap();

        hierarchy.merge(&rock, &guitar).unwrap();

        assert!(hierarchy.get(&rock).is_none());
        assert_eq!(
            hierarchy.get(&classic).unwrap().parent.as_ref(),
            Some(&guitar)
        );
        assert_eq!(hierarchy.get(&classic).unwrap().depth, 2);
    }

    #[test]
    fn test_merge_into_own_subtree_fails() {
        let mut hierarchy = TagHierarchy::new();
        let rock = hierarchy.create("Rock", None).unwrap();
        let classic = hierarchy.create("ClassicRock", Some(&rock)).unwrap();
        let err = hierarchy.merge(&rock, &classic).unwrap_err();
        assert!(matches!(err, EngineError::CircularReference(_)));
    }

    #[test]
    fn test_auto_assign_pattern() {
        let mut hierarchy = TagHierarchy::new();
        let live = hierarchy.create("Live", None).unwrap();
        hierarchy
            .set_auto_assign_pattern(&live, Some(r"(?i)\blive\b"))
            .unwrap();

        assert_eq!(
            hierarchy.auto_assign_for_path("Rock/Live at Wembley/01.flac"),
            vec![live.clone()]
        );
        assert!(hierarchy
            .auto_assign_for_path("Rock/Studio/01.flac")
            .is_empty());

        let err = hierarchy
            .set_auto_assign_pattern(&live, Some("(unclosed"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_assign_from_path_uses_configured_special_folders() {
        use crate::config::EngineConfig;

        let mut hierarchy = TagHierarchy::new();
        let folders = EngineConfig::default().special_folders;

        let assigned = hierarchy
            .assign_from_path("Xmas/Crooners/track.mp3", &folders)
            .unwrap();
        assert_eq!(assigned.len(), 2);

        let xmas = hierarchy.by_name("xmas").unwrap();
        let combined = hierarchy.by_name("xmas - crooners").unwrap();
        assert_eq!(combined.parent.as_ref(), Some(&xmas.id));
        assert_eq!(combined.depth, 2);

        // A second scan of the same folder reuses the existing tags.
        let again = hierarchy
            .assign_from_path("Xmas/Crooners/other.mp3", &folders)
            .unwrap();
        assert_eq!(again, assigned);
        assert_eq!(hierarchy.len(), 2);
    }

    #[test]
    fn test_assign_from_path_appends_pattern_matches() {
        let mut hierarchy = TagHierarchy::new();
        let live = hierarchy.create("Live", None).unwrap();
        hierarchy
            .set_auto_assign_pattern(&live, Some(r"(?i)\blive\b"))
            .unwrap();

        let assigned = hierarchy
            .assign_from_path("Rock/Live at Wembley/01.flac", &[])
            .unwrap();
        let rock = hierarchy.by_name("Rock").unwrap().id.clone();
        assert_eq!(assigned, vec![rock, live]);
    }

    #[test]
    fn test_default_color_is_stable() {
        let mut hierarchy = TagHierarchy::new();
        let a = hierarchy.create("Rock", None).unwrap();
        let color = hierarchy.get(&a).unwrap().color.clone().unwrap();
        assert!(color.starts_with('#'));
        assert_eq!(color.len(), 7);
        assert_eq!(color, default_color("Rock"));
    }
}
