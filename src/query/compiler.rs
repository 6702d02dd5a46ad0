//! Translation of parsed filter expressions into SQL.
//!
//! The compiler walks a [`Filter`] tree and emits predicate SQL plus a
//! positional parameter list, inferring outer joins for cross-model
//! conditions and wrapping string comparisons in RDBMS-appropriate
//! collations: `utf8_bin` on MySQL so pattern matches are
//! case-sensitive, `NOCASE` ordering on SQLite so ordering is not.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use rusqlite::types::Value as SqlValue;
use serde_json::Value as Json;
use tracing::debug;

use super::schema::{attr_info, join_attr, table_name, AttrInfo, AttrKind, Link};
use super::{Filter, MALFORMED_KEY, MALFORMED_MSG};
use crate::core::error::SearchParseError;
use crate::core::types::normalize;

/// The backing RDBMS, as far as SQL dialect differences matter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rdbms {
    /// SQLite: case-insensitive ordering needs `COLLATE NOCASE`.
    Sqlite,
    /// MySQL: case-sensitive matching needs `COLLATE utf8_bin`; InnoDB
    /// additionally rounds datetimes to the nearest second.
    Mysql {
        /// Whether tables use the InnoDB engine.
        innodb: bool,
    },
}

/// A compiled search: SQL text plus positional parameters.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    /// Full `SELECT` statement.
    pub sql: String,
    /// Parameters, in placeholder order.
    pub params: Vec<SqlValue>,
}

/// The canonical relations, after alias resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Eq,
    Ne,
    Like,
    Regexp,
    Lt,
    Gt,
    Le,
    Ge,
    In,
}

impl Relation {
    /// Resolve a relation name or its operator-method alias.
    fn resolve(name: &str) -> Option<Relation> {
        Some(match name {
            "=" | "__eq__" => Relation::Eq,
            "!=" | "__ne__" => Relation::Ne,
            "like" => Relation::Like,
            "regex" | "regexp" => Relation::Regexp,
            "<" | "__lt__" => Relation::Lt,
            ">" | "__gt__" => Relation::Gt,
            "<=" | "__le__" => Relation::Le,
            ">=" | "__ge__" => Relation::Ge,
            "in" | "in_" => Relation::In,
            _ => return None,
        })
    }

    fn is_equality(&self) -> bool {
        matches!(self, Relation::Eq | Relation::Ne)
    }

    fn operator(&self) -> &'static str {
        match self {
            Relation::Eq => "=",
            Relation::Ne => "!=",
            Relation::Like => "LIKE",
            Relation::Regexp => "REGEXP",
            Relation::Lt => "<",
            Relation::Gt => ">",
            Relation::Le => "<=",
            Relation::Ge => ">=",
            Relation::In => "IN",
        }
    }
}

/// Compiles list-form searches against one target model.
///
/// An instance is reusable; errors and join state are per-compilation.
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    target: &'static str,
    target_table: &'static str,
    rdbms: Rdbms,
}

/// Per-compilation mutable state.
#[derive(Debug, Default)]
struct Compilation {
    errors: BTreeMap<String, String>,
    joins: Vec<String>,
    params: Vec<SqlValue>,
    alias_seq: usize,
}

impl QueryCompiler {
    /// A compiler targeting `model` on SQLite.
    pub fn new(model: &'static str) -> Option<Self> {
        Some(Self {
            target: model,
            target_table: table_name(model)?,
            rdbms: Rdbms::Sqlite,
        })
    }

    /// A compiler targeting the Form model.
    pub fn for_forms() -> Self {
        Self::new("Form").expect("Form is always searchable")
    }

    /// Override the RDBMS dialect.
    pub fn with_rdbms(mut self, rdbms: Rdbms) -> Self {
        self.rdbms = rdbms;
        self
    }

    /// The target model name.
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Compile `{"filter": ..., "order_by": ...}` into a full SELECT.
    pub fn compile(&self, input: &Json) -> Result<CompiledQuery, SearchParseError> {
        self.compile_scoped(input, None)
    }

    /// Compile with an additional conjunct restricting the universe,
    /// e.g. corpus-scoped form search. `scope` is a predicate over the
    /// target table plus its parameters.
    pub fn compile_scoped(
        &self,
        input: &Json,
        scope: Option<(&str, Vec<SqlValue>)>,
    ) -> Result<CompiledQuery, SearchParseError> {
        let mut state = Compilation::default();

        let filter_sql = match input.get("filter") {
            Some(filter_json) => {
                match Filter::from_json(filter_json, &mut state.errors) {
                    Some(filter) => self.predicate(&filter, &mut state),
                    None => None,
                }
            }
            None => {
                state
                    .errors
                    .insert(MALFORMED_KEY.to_string(), MALFORMED_MSG.to_string());
                None
            }
        };

        let order_sql = self.order_by(input.get("order_by"), &mut state);

        if !state.errors.is_empty() {
            debug!(errors = ?state.errors, "search failed to compile");
            return Err(SearchParseError::new(state.errors));
        }

        let mut sql = String::from("SELECT ");
        if !state.joins.is_empty() {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&format!("{t}.* FROM {t}", t = self.target_table));
        for join in &state.joins {
            sql.push('\n');
            sql.push_str(join);
        }
        let filter_sql = filter_sql.unwrap_or_else(|| "1".to_string());
        match scope {
            Some((scope_sql, scope_params)) => {
                sql.push_str(&format!("\nWHERE ({}) AND ({})", filter_sql, scope_sql));
                state.params.extend(scope_params);
            }
            None => sql.push_str(&format!("\nWHERE {}", filter_sql)),
        }
        sql.push_str(&format!("\nORDER BY {}", order_sql));

        debug!(target = self.target, sql = %sql, "compiled search");
        Ok(CompiledQuery { sql, params: state.params })
    }

    /// Compile only the filter into a predicate; used by validation
    /// paths that never execute (saved form searches).
    pub fn validate_filter(&self, filter_json: &Json) -> Result<(), SearchParseError> {
        let mut state = Compilation::default();
        if let Some(filter) = Filter::from_json(filter_json, &mut state.errors) {
            self.predicate(&filter, &mut state);
        }
        if state.errors.is_empty() {
            Ok(())
        } else {
            Err(SearchParseError::new(state.errors))
        }
    }

    fn predicate(&self, filter: &Filter, state: &mut Compilation) -> Option<String> {
        match filter {
            Filter::And(children) => self.combined("AND", children, state),
            Filter::Or(children) => self.combined("OR", children, state),
            Filter::Not(child) => {
                self.predicate(child, state).map(|p| format!("NOT ({})", p))
            }
            Filter::Simple { model, attr, relation, value } => {
                self.simple(model, attr, relation, value, state)
            }
            Filter::Cross { model, attr, foreign_attr, relation, value } => {
                self.cross(model, attr, foreign_attr, relation, value, state)
            }
        }
    }

    fn combined(
        &self,
        op: &str,
        children: &[Filter],
        state: &mut Compilation,
    ) -> Option<String> {
        let parts: Vec<String> = children
            .iter()
            .filter_map(|c| self.predicate(c, state))
            .collect();
        if parts.is_empty() {
            None
        } else if parts.len() == 1 {
            Some(parts.into_iter().next().unwrap())
        } else {
            Some(format!("({})", parts.join(&format!(") {} (", op))))
        }
    }

    /// Resolve the table (or join alias) that predicates on `model`
    /// should reference. Non-target models must be joinable and get a
    /// fresh alias per condition so multiple conditions against the same
    /// collection can coexist.
    fn model_table(&self, model: &str, state: &mut Compilation) -> Option<String> {
        if table_name(model).is_none() {
            state.errors.insert(
                model.to_string(),
                format!("Searching on the {} model is not permitted", model),
            );
            return None;
        }
        if model == self.target {
            return Some(self.target_table.to_string());
        }
        let attr = match join_attr(self.target, model) {
            Some(attr) => attr,
            None => {
                state.errors.insert(
                    model.to_string(),
                    format!(
                        "Searching the {} model by joining on the {} model is not possible",
                        self.target, model
                    ),
                );
                return None;
            }
        };
        let info = attr_info(self.target, attr)
            .expect("join table lists only real attributes");
        let (foreign_model, link) = match info.kind {
            AttrKind::CollectionRef(m, link) => (m, link),
            _ => unreachable!("join attributes are collections"),
        };
        let foreign_table = table_name(foreign_model).expect("foreign model is searchable");
        state.alias_seq += 1;
        let alias = format!("{}_{}", foreign_table, state.alias_seq);
        match link {
            Link::Table { table, self_col, other_col } => {
                let link_alias = format!("{}_{}", table, state.alias_seq);
                state.joins.push(format!(
                    "LEFT OUTER JOIN {table} {link_alias} ON {link_alias}.{self_col} = {target}.id",
                    target = self.target_table,
                ));
                state.joins.push(format!(
                    "LEFT OUTER JOIN {foreign_table} {alias} ON {alias}.id = {link_alias}.{other_col}",
                ));
            }
            Link::Direct { fk_col } => {
                state.joins.push(format!(
                    "LEFT OUTER JOIN {foreign_table} {alias} ON {alias}.{fk_col} = {target}.id",
                    target = self.target_table,
                ));
            }
        }
        Some(alias)
    }

    fn simple(
        &self,
        model: &str,
        attr: &str,
        relation: &str,
        value: &Json,
        state: &mut Compilation,
    ) -> Option<String> {
        let table = self.model_table(model, state)?;
        let info = match attr_info(model, attr) {
            Some(info) => info,
            None => {
                state.errors.insert(
                    format!("{}.{}", model, attr),
                    format!("Searching on {}.{} is not permitted", model, attr),
                );
                return None;
            }
        };
        let rel = self.relation(model, attr, relation, &info, state)?;
        match &info.kind {
            AttrKind::ScalarRef(_) => {
                self.ref_predicate(&table, &info, rel, value, model, attr, relation, state)
            }
            AttrKind::CollectionRef(foreign_model, link) => self.collection_presence(
                &table,
                foreign_model,
                link,
                rel,
                value,
                model,
                attr,
                relation,
                state,
            ),
            _ => {
                let column = self.collated(&table, &info);
                self.column_predicate(column, &info, rel, value, model, attr, relation, state)
            }
        }
    }

    /// Validate a relation name against an attribute: foreign-key
    /// attributes admit only equality relations.
    fn relation(
        &self,
        model: &str,
        attr: &str,
        relation: &str,
        info: &AttrInfo,
        state: &mut Compilation,
    ) -> Option<Relation> {
        let rel = match Relation::resolve(relation) {
            Some(rel) => rel,
            None => {
                state.errors.insert(
                    format!("{}.{}.{}", model, attr, relation),
                    format!(
                        "There is no relation '{}' of '{}.{}'",
                        relation, model, attr
                    ),
                );
                return None;
            }
        };
        let foreign = matches!(
            info.kind,
            AttrKind::ScalarRef(_) | AttrKind::CollectionRef(_, _)
        );
        if foreign && !rel.is_equality() {
            state.errors.insert(
                format!("{}.{}.{}", model, attr, relation),
                format!(
                    "The relation {} is not permitted for {}.{}",
                    relation, model, attr
                ),
            );
            return None;
        }
        Some(rel)
    }

    /// `[M, fk_attr, =, v]`: id equality or NULL presence test.
    #[allow(clippy::too_many_arguments)]
    fn ref_predicate(
        &self,
        table: &str,
        info: &AttrInfo,
        rel: Relation,
        value: &Json,
        model: &str,
        attr: &str,
        relation: &str,
        state: &mut Compilation,
    ) -> Option<String> {
        let column = format!("{}.{}", table, info.column);
        match value {
            Json::Null => Some(match rel {
                Relation::Eq => format!("{} IS NULL", column),
                _ => format!("{} IS NOT NULL", column),
            }),
            Json::Number(n) => {
                state.params.push(match n.as_i64() {
                    Some(i) => SqlValue::Integer(i),
                    None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
                });
                Some(format!("{} {} ?", column, rel.operator()))
            }
            _ => {
                self.invalid_expression(model, attr, relation, value, state);
                None
            }
        }
    }

    /// `[M, collection_attr, =, None]`: membership emptiness test, or
    /// `= <id>` membership test.
    #[allow(clippy::too_many_arguments)]
    fn collection_presence(
        &self,
        table: &str,
        foreign_model: &str,
        link: &Link,
        rel: Relation,
        value: &Json,
        model: &str,
        attr: &str,
        relation: &str,
        state: &mut Compilation,
    ) -> Option<String> {
        let exists = |inner: Option<SqlValue>, state: &mut Compilation| {
            let foreign_table =
                table_name(foreign_model).expect("foreign model is searchable");
            let condition = match inner {
                Some(param) => {
                    state.params.push(param);
                    " AND member.id = ?"
                }
                None => "",
            };
            match link {
                Link::Table { table: assoc, self_col, other_col } => format!(
                    "EXISTS (SELECT 1 FROM {assoc} link JOIN {foreign_table} member \
                     ON member.id = link.{other_col} \
                     WHERE link.{self_col} = {table}.id{condition})",
                ),
                Link::Direct { fk_col } => format!(
                    "EXISTS (SELECT 1 FROM {foreign_table} member \
                     WHERE member.{fk_col} = {table}.id{condition})",
                ),
            }
        };
        match (rel, value) {
            (Relation::Eq, Json::Null) => Some(format!("NOT {}", exists(None, state))),
            (Relation::Ne, Json::Null) => Some(exists(None, state)),
            (Relation::Eq, Json::Number(n)) if n.is_i64() => {
                Some(exists(Some(SqlValue::Integer(n.as_i64().unwrap())), state))
            }
            _ => {
                self.invalid_expression(model, attr, relation, value, state);
                None
            }
        }
    }

    /// Predicate on an ordinary column: operator, placeholder(s), value
    /// conversion.
    #[allow(clippy::too_many_arguments)]
    fn column_predicate(
        &self,
        column: String,
        info: &AttrInfo,
        rel: Relation,
        value: &Json,
        model: &str,
        attr: &str,
        relation: &str,
        state: &mut Compilation,
    ) -> Option<String> {
        if rel == Relation::In {
            let items = match value.as_array() {
                Some(items) => items,
                None => {
                    self.invalid_expression(model, attr, relation, value, state);
                    return None;
                }
            };
            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                let converted = self.convert_value(item, info, state)?;
                state.params.push(converted);
                placeholders.push("?");
            }
            return Some(format!("{} IN ({})", column, placeholders.join(", ")));
        }
        match value {
            Json::Null => match rel {
                Relation::Eq => Some(format!("{} IS NULL", column)),
                Relation::Ne => Some(format!("{} IS NOT NULL", column)),
                _ => {
                    self.invalid_expression(model, attr, relation, value, state);
                    None
                }
            },
            _ => {
                let converted = self.convert_value(value, info, state)?;
                state.params.push(converted);
                Some(format!("{} {} ?", column, rel.operator()))
            }
        }
    }

    fn cross(
        &self,
        model: &str,
        attr: &str,
        foreign_attr: &str,
        relation: &str,
        value: &Json,
        state: &mut Compilation,
    ) -> Option<String> {
        let table = self.model_table(model, state)?;
        let info = match attr_info(model, attr) {
            Some(info) => info,
            None => {
                state.errors.insert(
                    format!("{}.{}", model, attr),
                    format!("Searching on {}.{} is not permitted", model, attr),
                );
                return None;
            }
        };
        let foreign_model = match &info.kind {
            AttrKind::ScalarRef(m) => *m,
            AttrKind::CollectionRef(m, _) => *m,
            _ => {
                state.errors.insert(
                    format!("{}.{}", model, attr),
                    format!(
                        "The {} attribute of the {} model does not represent a many-to-one relation.",
                        attr, model
                    ),
                );
                return None;
            }
        };
        let foreign_info = match attr_info(foreign_model, foreign_attr) {
            Some(fi) => fi,
            None => {
                state.errors.insert(
                    format!("{}.{}", foreign_model, foreign_attr),
                    format!(
                        "Searching on {}.{} is not permitted",
                        foreign_model, foreign_attr
                    ),
                );
                return None;
            }
        };
        let rel =
            self.relation(foreign_model, foreign_attr, relation, &foreign_info, state)?;
        let foreign_table = table_name(foreign_model).expect("foreign model is searchable");
        state.alias_seq += 1;
        let member = format!("member_{}", state.alias_seq);
        let member_col = self.collated(&member, &foreign_info);
        let inner = self.column_predicate(
            member_col,
            &foreign_info,
            rel,
            value,
            foreign_model,
            foreign_attr,
            relation,
            state,
        )?;
        Some(match &info.kind {
            // scalar ref: attribute.has(Foreign.attr rel value)
            AttrKind::ScalarRef(_) => format!(
                "EXISTS (SELECT 1 FROM {foreign_table} {member} \
                 WHERE {member}.id = {table}.{fk} AND {inner})",
                fk = info.column,
            ),
            // collection ref: attribute.any(Foreign.attr rel value)
            AttrKind::CollectionRef(_, Link::Table { table: assoc, self_col, other_col }) => {
                format!(
                    "EXISTS (SELECT 1 FROM {assoc} link_{seq} \
                     JOIN {foreign_table} {member} ON {member}.id = link_{seq}.{other_col} \
                     WHERE link_{seq}.{self_col} = {table}.id AND {inner})",
                    seq = state.alias_seq,
                )
            }
            AttrKind::CollectionRef(_, Link::Direct { fk_col }) => format!(
                "EXISTS (SELECT 1 FROM {foreign_table} {member} \
                 WHERE {member}.{fk_col} = {table}.id AND {inner})",
            ),
            _ => unreachable!(),
        })
    }

    /// Wrap a string-typed column for case-sensitive matching on MySQL.
    fn collated(&self, table: &str, info: &AttrInfo) -> String {
        let column = format!("{}.{}", table, info.column);
        match self.rdbms {
            Rdbms::Mysql { .. } if info.string => format!("{} COLLATE utf8_bin", column),
            _ => column,
        }
    }

    /// Convert a JSON value into a SQL parameter, applying the
    /// attribute's value converter when it has one.
    fn convert_value(
        &self,
        value: &Json,
        info: &AttrInfo,
        state: &mut Compilation,
    ) -> Option<SqlValue> {
        match &info.kind {
            AttrKind::Date => {
                let raw = value.as_str().unwrap_or_default();
                match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                    Ok(date) => Some(SqlValue::Text(date.format("%Y-%m-%d").to_string())),
                    Err(_) => {
                        state.errors.insert(
                            format!("date {}", raw),
                            "Date search parameters must be valid ISO 8601 date strings."
                                .to_string(),
                        );
                        None
                    }
                }
            }
            AttrKind::Datetime => {
                let raw = value.as_str().unwrap_or_default();
                match parse_iso_datetime(raw) {
                    Some(datetime) => {
                        let datetime = match self.rdbms {
                            Rdbms::Mysql { innodb: true } => round_datetime(datetime),
                            _ => datetime,
                        };
                        Some(SqlValue::Text(
                            datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
                        ))
                    }
                    None => {
                        state.errors.insert(
                            format!("datetime {}", raw),
                            "Datetime search parameters must be valid ISO 8601 datetime strings."
                                .to_string(),
                        );
                        None
                    }
                }
            }
            _ => Some(match value {
                Json::String(s) => SqlValue::Text(normalize(s)),
                Json::Number(n) => match n.as_i64() {
                    Some(i) => SqlValue::Integer(i),
                    None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
                },
                Json::Bool(b) => SqlValue::Integer(*b as i64),
                Json::Null => SqlValue::Null,
                _ => SqlValue::Text(value.to_string()),
            }),
        }
    }

    fn invalid_expression(
        &self,
        model: &str,
        attr: &str,
        relation: &str,
        value: &Json,
        state: &mut Compilation,
    ) {
        state.errors.insert(
            format!("{}.{}.{}", model, attr, relation),
            format!(
                "Invalid filter expression: {}.{}.{}({})",
                model, attr, relation, value
            ),
        );
    }

    /// `order_by := [model, attr, direction]`; default is ascending by
    /// the target's primary key. On SQLite, string columns order
    /// case-insensitively.
    fn order_by(&self, order_by: Option<&Json>, state: &mut Compilation) -> String {
        let default = format!("{}.id ASC", self.target_table);
        let items = match order_by {
            None | Some(Json::Null) => return default,
            Some(value) => match value.as_array() {
                Some(items) if items.len() >= 2 => items.to_vec(),
                _ => {
                    state.errors.insert(
                        "OrderByError".to_string(),
                        "The provided order by expression was invalid.".to_string(),
                    );
                    return default;
                }
            },
        };
        let model = items[0].as_str().unwrap_or_default();
        let attr = items[1].as_str().unwrap_or_default();
        let info = match (model == self.target, attr_info(model, attr)) {
            (true, Some(info))
                if !matches!(info.kind, AttrKind::CollectionRef(_, _)) =>
            {
                info
            }
            _ => {
                state.errors.insert(
                    "OrderByError".to_string(),
                    "The provided order by expression was invalid.".to_string(),
                );
                return default;
            }
        };
        let mut column = format!("{}.{}", self.target_table, info.column);
        if self.rdbms == Rdbms::Sqlite && info.string {
            column.push_str(" COLLATE NOCASE");
        }
        let direction = match items.get(2).and_then(Json::as_str) {
            Some("desc") => "DESC",
            _ => "ASC",
        };
        format!("{} {}", column, direction)
    }
}

fn parse_iso_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Round a datetime to the nearest second, the way MySQL InnoDB stores
/// it.
fn round_datetime(datetime: NaiveDateTime) -> NaiveDateTime {
    let nanos = datetime.nanosecond();
    let truncated = datetime.with_nanosecond(0).unwrap_or(datetime);
    if nanos >= 500_000_000 {
        truncated + Duration::seconds(1)
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(input: Json) -> CompiledQuery {
        QueryCompiler::for_forms().compile(&input).unwrap()
    }

    fn compile_err(input: Json) -> BTreeMap<String, String> {
        QueryCompiler::for_forms().compile(&input).unwrap_err().errors
    }

    #[test]
    fn test_simple_scalar() {
        let q = compile(json!({"filter": ["Form", "transcription", "like", "%a%"]}));
        assert_eq!(
            q.sql,
            "SELECT form.* FROM form\nWHERE form.transcription LIKE ?\nORDER BY form.id ASC"
        );
        assert_eq!(q.params, vec![SqlValue::Text("%a%".into())]);
    }

    #[test]
    fn test_scalar_relation_has() {
        let q = compile(json!({
            "filter": ["Form", "enterer", "first_name", "regex", "^[JS]"]
        }));
        assert!(q.sql.contains("EXISTS (SELECT 1 FROM user member_1"));
        assert!(q.sql.contains("member_1.id = form.enterer_id"));
        assert!(q.sql.contains("REGEXP ?"));
    }

    #[test]
    fn test_scalar_relation_presence() {
        let q = compile(json!({"filter": ["Form", "enterer", "=", null]}));
        assert!(q.sql.contains("form.enterer_id IS NULL"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_collection_any() {
        let q = compile(json!({"filter": ["Form", "files", "id", "in", [1, 2, 33, 5]]}));
        assert!(q.sql.contains("EXISTS (SELECT 1 FROM form_file link_1"));
        assert!(q.sql.contains("member_1.id IN (?, ?, ?, ?)"));
        assert_eq!(q.params.len(), 4);
    }

    #[test]
    fn test_collection_absence() {
        let q = compile(json!({"filter": ["Form", "files", "=", null]}));
        assert!(q.sql.starts_with("SELECT form.*"));
        assert!(q.sql.contains("NOT EXISTS"));
    }

    #[test]
    fn test_cross_model_join_aliases() {
        // Two conditions against the same collection must use distinct
        // aliases so both can hold at once.
        let q = compile(json!({"filter": ["and", [
            ["Tag", "id", "=", 1],
            ["Tag", "id", "=", 2],
        ]]}));
        assert!(q.sql.contains("DISTINCT"));
        assert!(q.sql.contains("LEFT OUTER JOIN form_tag form_tag_1"));
        assert!(q.sql.contains("LEFT OUTER JOIN tag tag_1"));
        assert!(q.sql.contains("LEFT OUTER JOIN form_tag form_tag_2"));
        assert!(q.sql.contains("LEFT OUTER JOIN tag tag_2"));
        assert!(q.sql.contains("(tag_1.id = ?) AND (tag_2.id = ?)"));
    }

    #[test]
    fn test_not_and_or_nesting() {
        let q = compile(json!({"filter": ["or", [
            ["not", ["Form", "morpheme_break", "regex", "[28][5-7]"]],
            ["and", [
                ["Form", "datetime_modified", "<", "2012-03-01T00:00:00"],
                ["Form", "datetime_modified", ">", "2012-01-01T00:00:00"],
            ]],
        ]]}));
        assert!(q.sql.contains("NOT (form.morpheme_break REGEXP ?)"));
        assert!(q.sql.contains("form.datetime_modified < ?"));
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn test_operator_method_aliases() {
        let q = compile(json!({"filter": ["Form", "id", "__lt__", 10]}));
        assert!(q.sql.contains("form.id < ?"));
        let q = compile(json!({"filter": ["Form", "transcription", "__eq__", "x"]}));
        assert!(q.sql.contains("form.transcription = ?"));
    }

    #[test]
    fn test_date_conversion_and_error() {
        let q = compile(json!({"filter": ["Form", "date_elicited", "<", "2012-01-01"]}));
        assert_eq!(q.params, vec![SqlValue::Text("2012-01-01".into())]);

        let errors =
            compile_err(json!({"filter": ["Form", "date_elicited", "<", "January"]}));
        assert_eq!(
            errors.get("date January").map(String::as_str),
            Some("Date search parameters must be valid ISO 8601 date strings.")
        );
    }

    #[test]
    fn test_datetime_rounding_mysql_innodb() {
        let compiler = QueryCompiler::for_forms()
            .with_rdbms(Rdbms::Mysql { innodb: true });
        let q = compiler
            .compile(&json!({
                "filter": ["Form", "datetime_modified", "<", "2012-01-01T00:00:00.600000"]
            }))
            .unwrap();
        assert_eq!(q.params, vec![SqlValue::Text("2012-01-01T00:00:01".into())]);
    }

    #[test]
    fn test_mysql_collation() {
        let compiler =
            QueryCompiler::for_forms().with_rdbms(Rdbms::Mysql { innodb: true });
        let q = compiler
            .compile(&json!({"filter": ["Form", "transcription", "like", "a%"]}))
            .unwrap();
        assert!(q.sql.contains("form.transcription COLLATE utf8_bin LIKE ?"));
    }

    #[test]
    fn test_sqlite_order_collation() {
        let q = compile(json!({
            "filter": ["Form", "id", ">", 0],
            "order_by": ["Form", "transcription", "desc"]
        }));
        assert!(q.sql.ends_with("ORDER BY form.transcription COLLATE NOCASE DESC"));
    }

    #[test]
    fn test_unknown_model_and_attribute() {
        let errors = compile_err(json!({"filter": ["Source", "author", "like", "%x%"]}));
        assert_eq!(
            errors.get("Source").map(String::as_str),
            Some("Searching on the Source model is not permitted")
        );

        let errors = compile_err(json!({"filter": ["Form", "colour", "=", "red"]}));
        assert_eq!(
            errors.get("Form.colour").map(String::as_str),
            Some("Searching on Form.colour is not permitted")
        );
    }

    #[test]
    fn test_foreign_key_relations_are_equality_only() {
        let errors = compile_err(json!({"filter": ["Form", "enterer", "like", "J%"]}));
        assert_eq!(
            errors.get("Form.enterer.like").map(String::as_str),
            Some("The relation like is not permitted for Form.enterer")
        );
    }

    #[test]
    fn test_unjoinable_cross_model() {
        let errors = compile_err(json!({"filter": ["Phonology", "name", "like", "%p%"]}));
        assert_eq!(
            errors.get("Phonology").map(String::as_str),
            Some("Searching the Form model by joining on the Phonology model is not possible")
        );
    }

    #[test]
    fn test_unknown_relation() {
        let errors =
            compile_err(json!({"filter": ["Form", "transcription", "matches", "x"]}));
        assert!(errors
            .get("Form.transcription.matches")
            .unwrap()
            .contains("There is no relation 'matches'"));
    }

    #[test]
    fn test_five_element_on_plain_attribute() {
        let errors = compile_err(json!({
            "filter": ["Form", "transcription", "name", "=", "x"]
        }));
        assert!(errors
            .get("Form.transcription")
            .unwrap()
            .contains("does not represent a many-to-one relation"));
    }

    #[test]
    fn test_idempotent_wrapping() {
        // ["and", [E]] and ["or", [E]] compile to the same predicate as E.
        let plain = compile(json!({"filter": ["Form", "transcription", "like", "%a%"]}));
        let anded =
            compile(json!({"filter": ["and", [["Form", "transcription", "like", "%a%"]]]}));
        let ored =
            compile(json!({"filter": ["or", [["Form", "transcription", "like", "%a%"]]]}));
        assert_eq!(plain.sql, anded.sql);
        assert_eq!(plain.sql, ored.sql);
    }

    #[test]
    fn test_scoped_compile() {
        let compiler = QueryCompiler::for_forms();
        let q = compiler
            .compile_scoped(
                &json!({"filter": ["Form", "transcription", "like", "%a%"]}),
                Some((
                    "form.id IN (SELECT form_id FROM corpus_form WHERE corpus_id = ?)",
                    vec![SqlValue::Integer(7)],
                )),
            )
            .unwrap();
        assert!(q.sql.contains("WHERE (form.transcription LIKE ?) AND (form.id IN"));
        assert_eq!(q.params.len(), 2);
        assert_eq!(q.params[1], SqlValue::Integer(7));
    }

    #[test]
    fn test_value_normalization() {
        // Search patterns are NFD-normalized like stored text.
        let q = compile(json!({"filter": ["Form", "transcription", "=", "\u{00e9}"]}));
        assert_eq!(q.params, vec![SqlValue::Text("e\u{0301}".into())]);
    }

    #[test]
    fn test_missing_filter_is_malformed() {
        let errors = compile_err(json!({}));
        assert!(errors.contains_key(MALFORMED_KEY));
    }
}
