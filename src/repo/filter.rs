//! Filter DSL for [`Repository::search`](super::Repository::search).
//!
//! Filters map a field name to a `(value, operator)` pair. They are checked
//! against the entity's static column table before anything reaches a store,
//! so every [`Clause`] refers to a column that exists and carries a value of
//! the column's kind.

use std::{collections::BTreeMap, fmt, str::FromStr};

use time::OffsetDateTime;

use super::Entity;
use crate::error::{AppError, AppResult};

/// A column value as seen by filters and changesets.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(OffsetDateTime),
    List(Vec<Value>),
}

impl Value {
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Value::Bool(_) => Some(Kind::Bool),
            Value::Int(_) => Some(Kind::Int),
            Value::Text(_) => Some(Kind::Text),
            Value::Timestamp(_) => Some(Kind::Timestamp),
            Value::Null | Value::List(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[cfg(test)]
    fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(v: OffsetDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Int,
    Text,
    Timestamp,
}

impl Kind {
    /// Pattern matching needs text; every other operator works on any kind.
    fn supports(self, op: Operator) -> bool {
        match op {
            Operator::Like | Operator::ILike => self == Kind::Text,
            _ => true,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Bool => "boolean",
            Kind::Int => "integer",
            Kind::Text => "text",
            Kind::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// One row of an entity's column table.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: Kind,
}

impl ColumnDef {
    pub const fn new(name: &'static str, kind: Kind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// With [`Value::Null`] this is `IS NULL`.
    Eq,
    /// With [`Value::Null`] this is `IS NOT NULL`.
    Ne,
    Gt,
    Lt,
    Like,
    ILike,
    In,
    /// `true` selects NULL, `false` selects NOT NULL.
    IsNull,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::In => "in",
            Operator::IsNull => "is_null",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            "like" => Ok(Operator::Like),
            "ilike" => Ok(Operator::ILike),
            "in" => Ok(Operator::In),
            "is_null" => Ok(Operator::IsNull),
            other => Err(AppError::validation(format!("Unsupported filter type {other}"))),
        }
    }
}

/// How clauses are joined. Mixed and/or grouping is not expressible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Combine {
    #[default]
    And,
    Or,
}

impl Combine {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Combine::And => " AND ",
            Combine::Or => " OR ",
        }
    }
}

impl FromStr for Combine {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "and" => Ok(Combine::And),
            "or" => Ok(Combine::Or),
            other => Err(AppError::validation(format!("Unsupported combinator {other}"))),
        }
    }
}

/// Field name to `(value, operator)` mapping.
#[derive(Debug, Clone, Default)]
pub struct Filters(BTreeMap<String, (Value, Operator)>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), (value.into(), op));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Operator::Eq, value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value, Operator)> {
        self.0.iter().map(|(k, (v, op))| (k.as_str(), v, *op))
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub skip: i64,
    pub limit: i64,
    pub single_result: bool,
    pub combine_with: Combine,
    pub relations: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
            single_result: false,
            combine_with: Combine::And,
            relations: Vec::new(),
        }
    }
}

/// A validated filter: the column name always comes from an entity's table.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: &'static str,
    pub op: Operator,
    pub value: Value,
}

impl Clause {
    /// Evaluates the clause against an in-memory row, mirroring SQL semantics
    /// (comparisons against NULL never match).
    #[cfg(test)]
    pub fn matches<E: Entity>(&self, row: &E) -> bool {
        let actual = row.value(self.column).unwrap_or(Value::Null);
        match self.op {
            Operator::IsNull => actual.is_null() == (self.value == Value::Bool(true)),
            Operator::Eq if self.value.is_null() => actual.is_null(),
            Operator::Ne if self.value.is_null() => !actual.is_null(),
            _ if actual.is_null() => false,
            Operator::Eq => actual == self.value,
            Operator::Ne => actual != self.value,
            Operator::Gt => actual.compare(&self.value) == Some(std::cmp::Ordering::Greater),
            Operator::Lt => actual.compare(&self.value) == Some(std::cmp::Ordering::Less),
            Operator::Like => match (&actual, &self.value) {
                (Value::Text(hay), Value::Text(needle)) => hay.contains(needle.as_str()),
                _ => false,
            },
            Operator::ILike => match (&actual, &self.value) {
                (Value::Text(hay), Value::Text(needle)) => {
                    hay.to_lowercase().contains(&needle.to_lowercase())
                }
                _ => false,
            },
            Operator::In => match &self.value {
                Value::List(items) => items.contains(&actual),
                _ => false,
            },
        }
    }
}

/// Everything a store needs to run a select.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub clauses: Vec<Clause>,
    pub combine: Combine,
    pub include_deleted: bool,
    pub skip: i64,
    pub limit: Option<i64>,
}

impl Query {
    #[cfg(test)]
    pub fn matches<E: Entity>(&self, row: &E) -> bool {
        if !self.include_deleted && row.is_deleted() {
            return false;
        }
        if self.clauses.is_empty() {
            return true;
        }
        match self.combine {
            Combine::And => self.clauses.iter().all(|c| c.matches(row)),
            Combine::Or => self.clauses.iter().any(|c| c.matches(row)),
        }
    }
}

/// Checks every filter against `E`'s column table.
pub fn compile<E: Entity>(filters: &Filters) -> AppResult<Vec<Clause>> {
    filters
        .iter()
        .map(|(field, value, op)| {
            let column = E::column(field).ok_or_else(|| {
                AppError::validation(format!("Field {field} does not exist in the model."))
            })?;
            check(column, op, value)?;
            Ok(Clause {
                column: column.name,
                op,
                value: value.clone(),
            })
        })
        .collect()
}

fn check(column: &ColumnDef, op: Operator, value: &Value) -> AppResult<()> {
    if !column.kind.supports(op) {
        return Err(AppError::validation(format!(
            "Filter type '{op}' is not supported for field {}",
            column.name
        )));
    }
    let mismatch = || {
        AppError::validation(format!(
            "Field {} expects a {} value for filter type '{op}'",
            column.name, column.kind
        ))
    };
    match (op, value) {
        (Operator::In, Value::List(items)) => {
            if items.iter().all(|v| v.kind() == Some(column.kind)) {
                Ok(())
            } else {
                Err(mismatch())
            }
        }
        (Operator::In, _) => Err(AppError::validation(
            "Filter type 'in' requires a list of values.",
        )),
        (Operator::IsNull, Value::Bool(_)) => Ok(()),
        (Operator::IsNull, _) => Err(AppError::validation(
            "Filter type 'is_null' requires a boolean value.",
        )),
        (Operator::Eq | Operator::Ne, Value::Null) => Ok(()),
        (_, v) if v.kind() == Some(column.kind) => Ok(()),
        _ => Err(mismatch()),
    }
}
