//! Rule trees and their compilation into song predicates.
//!
//! A rule tree is a boolean-combinator tree: groups (and/or) over conditions
//! on catalog attributes, the tag taxonomy and per-user listening state. The
//! external JSON shape is shared with the rule-authoring surface and must
//! round-trip losslessly; compilation validates the whole tree up front so a
//! malformed rule is rejected when it is saved, never during a refresh.

mod compile;
mod context;
mod model;

pub use compile::{compile, Predicate};
pub use context::SongContext;
pub use model::{
    field_dependencies, parse_rule_tree, FieldKind, GroupOperator, RuleField, RuleNode,
    RuleOperator,
};
