//! The list-form search compiler.
//!
//! A filter expression is a recursive list:
//!
//! ```text
//! expr := [model, attr, rel, value]
//!       | [model, attr, attr', rel, value]
//!       | ["and", [expr, ...]]
//!       | ["or",  [expr, ...]]
//!       | ["not", expr]
//! ```
//!
//! Searches arrive as JSON, are parsed into a [`Filter`] AST, validated
//! against the static [`schema`], and compiled to SQL text plus a
//! parameter list. Joins are inferred: a simple filter naming a model
//! other than the target generates an aliased outer join, so multiple
//! conditions against the same collection can coexist (e.g. "form has
//! tag 1 AND tag 2"). Validation failures accumulate into a per-key
//! error map and surface together as a
//! [`SearchParseError`](crate::core::SearchParseError).
//!
//! # Examples
//!
//! ```rust
//! use oldb::query::QueryCompiler;
//! use serde_json::json;
//!
//! let compiled = QueryCompiler::for_forms()
//!     .compile(&json!({
//!         "filter": ["and", [
//!             ["Form", "transcription", "like", "%chien%"],
//!             ["Tag", "name", "=", "restricted"]
//!         ]]
//!     }))
//!     .unwrap();
//! assert!(compiled.sql.contains("LEFT OUTER JOIN"));
//! ```

pub mod compiler;
pub mod schema;

pub use compiler::{CompiledQuery, QueryCompiler, Rdbms};

use std::collections::BTreeMap;

use serde_json::Value;

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Conjunction of child filters.
    And(Vec<Filter>),
    /// Disjunction of child filters.
    Or(Vec<Filter>),
    /// Negation of a child filter.
    Not(Box<Filter>),
    /// `[model, attr, rel, value]`
    Simple {
        /// Model name, e.g. `Form`.
        model: String,
        /// Attribute name, e.g. `transcription`.
        attr: String,
        /// Relation name, e.g. `like`.
        relation: String,
        /// Comparison value.
        value: Value,
    },
    /// `[model, attr, attr', rel, value]` — a relational search through
    /// a foreign attribute.
    Cross {
        /// Model name.
        model: String,
        /// Foreign attribute of `model`, e.g. `enterer` or `tags`.
        attr: String,
        /// Attribute of the foreign model, e.g. `first_name`.
        foreign_attr: String,
        /// Relation name.
        relation: String,
        /// Comparison value.
        value: Value,
    },
}

/// The key under which structurally malformed input is reported.
pub(crate) const MALFORMED_KEY: &str = "Malformed OLD query error";
pub(crate) const MALFORMED_MSG: &str = "The submitted query was malformed";

impl Filter {
    /// Parse the JSON list-form into an AST.
    ///
    /// Structural problems (non-lists, wrong arities, non-string heads)
    /// are reported into `errors` under [`MALFORMED_KEY`]; the returned
    /// filter is then partial and the caller fails before executing it.
    pub fn from_json(value: &Value, errors: &mut BTreeMap<String, String>) -> Option<Filter> {
        let items = match value.as_array() {
            Some(items) if !items.is_empty() => items,
            _ => {
                errors.insert(MALFORMED_KEY.to_string(), MALFORMED_MSG.to_string());
                return None;
            }
        };
        let head = match items[0].as_str() {
            Some(head) => head,
            None => {
                errors.insert(MALFORMED_KEY.to_string(), MALFORMED_MSG.to_string());
                return None;
            }
        };
        match head {
            "and" | "or" => {
                let children = match items.get(1).and_then(Value::as_array) {
                    Some(children) => children,
                    None => {
                        errors.insert(MALFORMED_KEY.to_string(), MALFORMED_MSG.to_string());
                        return None;
                    }
                };
                let parsed: Vec<Filter> = children
                    .iter()
                    .filter_map(|c| Filter::from_json(c, errors))
                    .collect();
                Some(if head == "and" {
                    Filter::And(parsed)
                } else {
                    Filter::Or(parsed)
                })
            }
            "not" => match items.get(1) {
                Some(child) => {
                    Filter::from_json(child, errors).map(|f| Filter::Not(Box::new(f)))
                }
                None => {
                    errors.insert(MALFORMED_KEY.to_string(), MALFORMED_MSG.to_string());
                    None
                }
            },
            _ => Filter::simple_from_items(items, errors),
        }
    }

    fn simple_from_items(
        items: &[Value],
        errors: &mut BTreeMap<String, String>,
    ) -> Option<Filter> {
        let as_str = |v: &Value| v.as_str().map(|s| s.to_string());
        match items.len() {
            4 => {
                let (model, attr, relation) =
                    match (as_str(&items[0]), as_str(&items[1]), as_str(&items[2])) {
                        (Some(m), Some(a), Some(r)) => (m, a, r),
                        _ => {
                            errors.insert(
                                MALFORMED_KEY.to_string(),
                                MALFORMED_MSG.to_string(),
                            );
                            return None;
                        }
                    };
                Some(Filter::Simple { model, attr, relation, value: items[3].clone() })
            }
            5 => {
                let parts = (
                    as_str(&items[0]),
                    as_str(&items[1]),
                    as_str(&items[2]),
                    as_str(&items[3]),
                );
                match parts {
                    (Some(model), Some(attr), Some(foreign_attr), Some(relation)) => {
                        Some(Filter::Cross {
                            model,
                            attr,
                            foreign_attr,
                            relation,
                            value: items[4].clone(),
                        })
                    }
                    _ => {
                        errors
                            .insert(MALFORMED_KEY.to_string(), MALFORMED_MSG.to_string());
                        None
                    }
                }
            }
            _ => {
                errors.insert(MALFORMED_KEY.to_string(), MALFORMED_MSG.to_string());
                None
            }
        }
    }
}
