use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

/// Boolean operator of a rule group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperator {
    And,
    Or,
}

/// Fields a condition can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Title,
    ArtistName,
    AlbumName,
    Genre,
    AudioFormat,
    Year,
    Length,
    PlayCount,
    LastPlayed,
    DateAdded,
    IsFavorite,
    Tag,
}

/// Comparison operators. Which operators a field accepts depends on its
/// kind; mismatches are rejected at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Is,
    IsNot,
    Contains,
    NotContains,
    BeginsWith,
    EndsWith,
    IsGreaterThan,
    IsLessThan,
    IsBetween,
    InLast,
    NotInLast,
    OneOf,
}

/// Value families a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Boolean,
    Tag,
}

impl RuleField {
    pub fn kind(self) -> FieldKind {
        match self {
            RuleField::Title
            | RuleField::ArtistName
            | RuleField::AlbumName
            | RuleField::Genre
            | RuleField::AudioFormat => FieldKind::Text,
            RuleField::Year | RuleField::Length | RuleField::PlayCount => FieldKind::Number,
            RuleField::LastPlayed | RuleField::DateAdded => FieldKind::Date,
            RuleField::IsFavorite => FieldKind::Boolean,
            RuleField::Tag => FieldKind::Tag,
        }
    }

    pub fn allowed_operators(self) -> &'static [RuleOperator] {
        match self.kind() {
            FieldKind::Text => &[
                RuleOperator::Is,
                RuleOperator::IsNot,
                RuleOperator::Contains,
                RuleOperator::NotContains,
                RuleOperator::BeginsWith,
                RuleOperator::EndsWith,
            ],
            FieldKind::Number => &[
                RuleOperator::Is,
                RuleOperator::IsNot,
                RuleOperator::IsGreaterThan,
                RuleOperator::IsLessThan,
                RuleOperator::IsBetween,
            ],
            FieldKind::Date => &[
                RuleOperator::InLast,
                RuleOperator::NotInLast,
                RuleOperator::IsBetween,
            ],
            FieldKind::Boolean => &[RuleOperator::Is, RuleOperator::IsNot],
            FieldKind::Tag => &[RuleOperator::Is, RuleOperator::IsNot, RuleOperator::OneOf],
        }
    }
}

/// A node in a rule tree: either a boolean group over children or a leaf
/// condition. Trees are acyclic by construction.
///
/// External JSON shape:
/// `{"operator": "and"|"or", "children": [...]}` or
/// `{"field": ..., "operator": ..., "value": ..., "expandHierarchy": bool}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleNode {
    Group {
        operator: GroupOperator,
        children: Vec<RuleNode>,
    },
    Condition {
        field: RuleField,
        operator: RuleOperator,
        value: JsonValue,
        #[serde(default, rename = "expandHierarchy")]
        expand_hierarchy: bool,
    },
}

/// Parse an external rule tree, mapping any shape problem to a
/// `Validation` error.
pub fn parse_rule_tree(value: &JsonValue) -> Result<RuleNode, EngineError> {
    serde_json::from_value(value.clone()).map_err(|e| EngineError::Validation(e.to_string()))
}

/// The set of fields a rule tree reads, for invalidation targeting.
pub fn field_dependencies(node: &RuleNode) -> HashSet<RuleField> {
    let mut fields = HashSet::new();
    collect_fields(node, &mut fields);
    fields
}

fn collect_fields(node: &RuleNode, fields: &mut HashSet<RuleField>) {
    match node {
        RuleNode::Group { children, .. } => {
            for child in children {
                collect_fields(child, fields);
            }
        }
        RuleNode::Condition { field, .. } => {
            fields.insert(*field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trips_through_external_shape() {
        let tree = json!({
            "operator": "and",
            "children": [
                {"field": "tag", "operator": "is", "value": "Rock", "expandHierarchy": true},
                {"operator": "or", "children": [
                    {"field": "year", "operator": "is_between", "value": [1960, 1979], "expandHierarchy": false},
                    {"field": "is_favorite", "operator": "is", "value": true, "expandHierarchy": false}
                ]}
            ]
        });

        let parsed = parse_rule_tree(&tree).unwrap();
        let serialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(serialized, tree);
    }

    #[test]
    fn test_expand_hierarchy_defaults_to_false() {
        let tree = json!({"field": "title", "operator": "contains", "value": "love"});
        let parsed = parse_rule_tree(&tree).unwrap();
        assert_eq!(
            parsed,
            RuleNode::Condition {
                field: RuleField::Title,
                operator: RuleOperator::Contains,
                value: json!("love"),
                expand_hierarchy: false,
            }
        );
    }

    #[test]
    fn test_unknown_field_is_validation_error() {
        let tree = json!({"field": "mood", "operator": "is", "value": "happy"});
        assert!(matches!(
            parse_rule_tree(&tree),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_operator_is_validation_error() {
        let tree = json!({"field": "title", "operator": "sounds_like", "value": "love"});
        assert!(matches!(
            parse_rule_tree(&tree),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_malformed_group_is_validation_error() {
        let tree = json!({"operator": "and"});
        assert!(matches!(
            parse_rule_tree(&tree),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_field_dependencies_walks_nested_groups() {
        let tree = json!({
            "operator": "or",
            "children": [
                {"field": "artist_name", "operator": "is", "value": "Queen"},
                {"operator": "and", "children": [
                    {"field": "play_count", "operator": "is_greater_than", "value": 10},
                    {"field": "last_played", "operator": "in_last", "value": 30}
                ]}
            ]
        });
        let parsed = parse_rule_tree(&tree).unwrap();
        let deps = field_dependencies(&parsed);
        assert_eq!(
            deps,
            [
                RuleField::ArtistName,
                RuleField::PlayCount,
                RuleField::LastPlayed
            ]
            .into_iter()
            .collect()
        );
    }
}
