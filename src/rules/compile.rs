use super::context::SongContext;
use super::model::{FieldKind, GroupOperator, RuleField, RuleNode, RuleOperator};
use crate::error::EngineError;
use crate::tags::{TagHierarchy, TagId};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;

type Matcher = Box<dyn Fn(&SongContext) -> bool + Send + Sync>;

/// A compiled rule tree: a pure predicate over a song context.
pub struct Predicate {
    matcher: Matcher,
}

impl Predicate {
    /// Evaluate the predicate. No side effects, no I/O; absent optional
    /// attributes never match range conditions instead of erroring.
    pub fn matches(&self, ctx: &SongContext) -> bool {
        (self.matcher)(ctx)
    }
}

// The matcher is an opaque closure, so there is nothing useful to render.
impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predicate").finish_non_exhaustive()
    }
}

/// Lower a rule tree into a predicate.
///
/// Groups become AND/OR combinators over compiled children; conditions
/// become field-specific comparators. All structural problems (operator not
/// valid for the field, literal of the wrong shape, empty group, unresolved
/// tag names aside) are rejected here so evaluation is total.
///
/// Tag names in conditions are resolved against the hierarchy at compile
/// time; a name that no longer exists matches no song rather than failing
/// the whole tree.
pub fn compile(node: &RuleNode, tags: &TagHierarchy) -> Result<Predicate, EngineError> {
    Ok(Predicate {
        matcher: compile_node(node, tags)?,
    })
}

fn compile_node(node: &RuleNode, tags: &TagHierarchy) -> Result<Matcher, EngineError> {
    match node {
        RuleNode::Group { operator, children } => {
            if children.is_empty() {
                return Err(EngineError::Validation(
                    "rule group must have at least one child".to_string(),
                ));
            }
            let compiled: Vec<Matcher> = children
                .iter()
                .map(|child| compile_node(child, tags))
                .collect::<Result<_, _>>()?;
            Ok(match operator {
                GroupOperator::And => {
                    Box::new(move |ctx| compiled.iter().all(|matcher| matcher(ctx)))
                }
                GroupOperator::Or => {
                    Box::new(move |ctx| compiled.iter().any(|matcher| matcher(ctx)))
                }
            })
        }
        RuleNode::Condition {
            field,
            operator,
            value,
            expand_hierarchy,
        } => compile_condition(*field, *operator, value, *expand_hierarchy, tags),
    }
}

fn compile_condition(
    field: RuleField,
    operator: RuleOperator,
    value: &JsonValue,
    expand_hierarchy: bool,
    tags: &TagHierarchy,
) -> Result<Matcher, EngineError> {
    if !field.allowed_operators().contains(&operator) {
        return Err(EngineError::Validation(format!(
            "operator {operator:?} is not valid for field {field:?}"
        )));
    }

    match field.kind() {
        FieldKind::Text => compile_text(field, operator, value),
        FieldKind::Number => compile_number(field, operator, value),
        FieldKind::Date => compile_date(field, operator, value),
        FieldKind::Boolean => compile_boolean(operator, value),
        FieldKind::Tag => compile_tag(operator, value, expand_hierarchy, tags),
    }
}

fn compile_text(
    field: RuleField,
    operator: RuleOperator,
    value: &JsonValue,
) -> Result<Matcher, EngineError> {
    let needle = expect_string(field, value)?.to_lowercase();
    // All text comparisons are case-insensitive. An absent optional
    // attribute (e.g. no genre) matches nothing.
    let apply = move |haystack: Option<&str>| -> Option<bool> {
        let haystack = haystack?.to_lowercase();
        Some(match operator {
            RuleOperator::Is => haystack == needle,
            RuleOperator::IsNot => haystack != needle,
            RuleOperator::Contains => haystack.contains(&needle),
            RuleOperator::NotContains => !haystack.contains(&needle),
            RuleOperator::BeginsWith => haystack.starts_with(&needle),
            RuleOperator::EndsWith => haystack.ends_with(&needle),
            _ => unreachable!("operator validated against field kind"),
        })
    };
    Ok(Box::new(move |ctx| {
        apply(ctx.text_field(field)).unwrap_or(false)
    }))
}

fn compile_number(
    field: RuleField,
    operator: RuleOperator,
    value: &JsonValue,
) -> Result<Matcher, EngineError> {
    match operator {
        RuleOperator::IsBetween => {
            let (low, high) = expect_number_range(field, value)?;
            Ok(Box::new(move |ctx| {
                ctx.number_field(field)
                    .map(|n| n >= low && n <= high)
                    .unwrap_or(false)
            }))
        }
        _ => {
            let target = expect_number(field, value)?;
            Ok(Box::new(move |ctx| {
                ctx.number_field(field)
                    .map(|n| match operator {
                        RuleOperator::Is => n == target,
                        RuleOperator::IsNot => n != target,
                        RuleOperator::IsGreaterThan => n > target,
                        RuleOperator::IsLessThan => n < target,
                        _ => unreachable!("operator validated against field kind"),
                    })
                    .unwrap_or(false)
            }))
        }
    }
}

fn compile_date(
    field: RuleField,
    operator: RuleOperator,
    value: &JsonValue,
) -> Result<Matcher, EngineError> {
    match operator {
        RuleOperator::InLast => {
            let days = expect_days(field, value)?;
            Ok(Box::new(move |ctx| {
                let threshold = ctx.now - Duration::days(days);
                ctx.date_field(field).map(|d| d >= threshold).unwrap_or(false)
            }))
        }
        RuleOperator::NotInLast => {
            // A song never played at all has not been played in the last N
            // days, so an absent date matches here.
            let days = expect_days(field, value)?;
            Ok(Box::new(move |ctx| {
                let threshold = ctx.now - Duration::days(days);
                ctx.date_field(field).map(|d| d < threshold).unwrap_or(true)
            }))
        }
        RuleOperator::IsBetween => {
            let (start, end) = expect_date_range(field, value)?;
            Ok(Box::new(move |ctx| {
                ctx.date_field(field)
                    .map(|d| d >= start && d <= end)
                    .unwrap_or(false)
            }))
        }
        _ => unreachable!("operator validated against field kind"),
    }
}

fn compile_boolean(operator: RuleOperator, value: &JsonValue) -> Result<Matcher, EngineError> {
    let target = value.as_bool().ok_or_else(|| {
        EngineError::Validation(format!("is_favorite expects a boolean, got {value}"))
    })?;
    Ok(Box::new(move |ctx| match operator {
        RuleOperator::Is => ctx.favorite == target,
        RuleOperator::IsNot => ctx.favorite != target,
        _ => unreachable!("operator validated against field kind"),
    }))
}

fn compile_tag(
    operator: RuleOperator,
    value: &JsonValue,
    expand_hierarchy: bool,
    tags: &TagHierarchy,
) -> Result<Matcher, EngineError> {
    let names: Vec<String> = match (operator, value) {
        (RuleOperator::OneOf, JsonValue::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    EngineError::Validation(format!("tag one_of expects strings, got {item}"))
                })
            })
            .collect::<Result<_, _>>()?,
        (RuleOperator::OneOf, other) => {
            return Err(EngineError::Validation(format!(
                "tag one_of expects an array, got {other}"
            )))
        }
        (_, JsonValue::String(name)) => vec![name.clone()],
        (_, other) => {
            return Err(EngineError::Validation(format!(
                "tag condition expects a string, got {other}"
            )))
        }
    };

    // Names are resolved now, against the hierarchy as it stands for this
    // compilation. A name that doesn't resolve matches no song.
    let resolved: Vec<TagId> = names
        .iter()
        .filter_map(|name| tags.by_name(name).map(|t| t.id.clone()))
        .collect();

    Ok(Box::new(move |ctx| {
        let song_tags = if expand_hierarchy {
            &ctx.expanded_tags
        } else {
            &ctx.direct_tags
        };
        let present = resolved.iter().any(|id| song_tags.contains(id));
        match operator {
            RuleOperator::Is | RuleOperator::OneOf => present,
            RuleOperator::IsNot => !present,
            _ => unreachable!("operator validated against field kind"),
        }
    }))
}

fn expect_string(field: RuleField, value: &JsonValue) -> Result<String, EngineError> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        EngineError::Validation(format!("field {field:?} expects a string, got {value}"))
    })
}

fn expect_number(field: RuleField, value: &JsonValue) -> Result<f64, EngineError> {
    value.as_f64().ok_or_else(|| {
        EngineError::Validation(format!("field {field:?} expects a number, got {value}"))
    })
}

fn expect_days(field: RuleField, value: &JsonValue) -> Result<i64, EngineError> {
    value.as_i64().filter(|d| *d >= 0).ok_or_else(|| {
        EngineError::Validation(format!(
            "field {field:?} expects a non-negative day count, got {value}"
        ))
    })
}

fn expect_number_range(field: RuleField, value: &JsonValue) -> Result<(f64, f64), EngineError> {
    match value.as_array().map(|a| a.as_slice()) {
        Some([low, high]) => {
            let low = expect_number(field, low)?;
            let high = expect_number(field, high)?;
            Ok((low, high))
        }
        _ => Err(EngineError::Validation(format!(
            "field {field:?} is_between expects [low, high], got {value}"
        ))),
    }
}

fn expect_date_range(
    field: RuleField,
    value: &JsonValue,
) -> Result<(DateTime<Utc>, DateTime<Utc>), EngineError> {
    let parse = |v: &JsonValue| -> Result<DateTime<Utc>, EngineError> {
        let raw = v.as_str().ok_or_else(|| {
            EngineError::Validation(format!("field {field:?} expects RFC3339 dates, got {v}"))
        })?;
        DateTime::parse_from_rfc3339(raw)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| EngineError::Validation(format!("field {field:?}: bad date {raw}: {e}")))
    };
    match value.as_array().map(|a| a.as_slice()) {
        Some([start, end]) => Ok((parse(start)?, parse(end)?)),
        _ => Err(EngineError::Validation(format!(
            "field {field:?} is_between expects [start, end], got {value}"
        ))),
    }
}
