//! Query parameters.
//!
//! Parameters are either named (`:name` placeholders, rewritten to the
//! backend's positional syntax) or positional (passed through untouched,
//! written in the backend's own syntax).

use std::collections::HashMap;

use serde_json::{Map, Value};
use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

use crate::backend::Placeholder;
use crate::error::{DatabaseError, Failure};

/// Parameters for one statement execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// No parameters.
    #[default]
    None,
    /// Values for `:name` placeholders.
    Named(Map<String, Value>),
    /// Values for the backend's positional placeholders, in order.
    Positional(Vec<Value>),
}

impl Params {
    /// Whether no values are supplied.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Named(map) => map.is_empty(),
            Self::Positional(values) => values.is_empty(),
        }
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::None,
            Value::Object(map) => Self::Named(map),
            Value::Array(values) => Self::Positional(values),
            scalar => Self::Positional(vec![scalar]),
        }
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self::Named(map)
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl<T: Into<Params>> From<Option<T>> for Params {
    fn from(params: Option<T>) -> Self {
        params.map_or(Self::None, Into::into)
    }
}

/// SQL text with its positional values, ready to bind.
#[derive(Debug, Clone)]
pub(crate) struct Statement {
    sql: String,
    values: Vec<Value>,
}

impl Statement {
    /// Resolve `params` against `query` for the given placeholder syntax.
    ///
    /// # Errors
    /// Returns `DatabaseError::Generic` when a named placeholder has no value
    /// or an integer does not fit a signed 64-bit column.
    pub(crate) fn prepare(
        query: &str,
        params: Params,
        placeholder: Placeholder,
    ) -> Result<Self, DatabaseError> {
        let statement = match params {
            Params::None => Self {
                sql: query.to_string(),
                values: Vec::new(),
            },
            Params::Positional(values) => Self {
                sql: query.to_string(),
                values,
            },
            Params::Named(map) => bind_named(query, &map, placeholder)?,
        };
        statement.check_integers()?;
        Ok(statement)
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.values
    }

    /// Whether any value is sent without a server-side type of its own:
    /// nulls, strings, and JSON arrays or objects sent as text.
    pub(crate) fn has_untyped_values(&self) -> bool {
        self.values.iter().any(is_untyped)
    }

    /// SQL with `CAST($n AS <type>)` around each `$n` whose value is untyped
    /// and whose server-inferred type (`types[n - 1]`) is not textual.
    pub(crate) fn with_casts(&self, types: &[String]) -> String {
        let rewritten = rewrite_markers(&self.sql, false, |marker, sql| {
            let Marker::Numbered(index, text) = marker else {
                return Ok(());
            };
            let target = index
                .checked_sub(1)
                .and_then(|i| Some((self.values.get(i)?, types.get(i)?)))
                .filter(|(value, ty)| is_untyped(value) && !is_text_type(ty));
            match target {
                Some((_, ty)) => {
                    sql.push_str("CAST(");
                    sql.push_str(text);
                    sql.push_str(" AS ");
                    sql.push_str(ty);
                    sql.push(')');
                }
                None => sql.push_str(text),
            }
            Ok(())
        });
        rewritten.unwrap_or_else(|_| self.sql.clone())
    }

    fn check_integers(&self) -> Result<(), DatabaseError> {
        let oversized = self.values.iter().find_map(|value| match value {
            Value::Number(n) if n.as_i64().is_none() => n.as_u64(),
            _ => None,
        });
        match oversized {
            Some(n) => Err(DatabaseError::Generic(Failure::new(format!(
                "integer parameter {n} is out of range for a signed 64-bit value"
            )))),
            None => Ok(()),
        }
    }
}

/// Bind `values` onto `sql` in order.
pub(crate) fn bind_query<'q>(sql: &'q str, values: &'q [Value]) -> Query<'q, Any, AnyArguments<'q>> {
    values.iter().fold(sqlx::query::<Any>(sql), bind_value)
}

fn bind_value<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    value: &Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        // Arrays and objects are sent as JSON text.
        other => query.bind(other.to_string()),
    }
}

fn is_untyped(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::String(_) | Value::Array(_) | Value::Object(_)
    )
}

/// PostgreSQL type names a text parameter binds to without a cast.
const TEXT_TYPES: &[&str] = &[
    "text",
    "character varying",
    "character",
    "bpchar",
    "name",
    "\"char\"",
    "unknown",
];

fn is_text_type(name: &str) -> bool {
    TEXT_TYPES.contains(&name)
}

/// A bind marker found outside literals and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker<'q> {
    /// `:name`, without the colon.
    Named(&'q str),
    /// `$n` with its number and its text as written.
    Numbered(usize, &'q str),
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Copy `query`, handing every bind marker to `emit` instead of copying it.
///
/// Quoted identifiers, string literals (including `E'...'` escapes and
/// `$tag$...$tag$` bodies) and comments are copied verbatim. With `named`
/// set, `:name` is a marker, `::` is a cast and `\:` is a literal colon.
/// Markers are ASCII, so every span cut here lies on a char boundary.
fn rewrite_markers<F>(query: &str, named: bool, mut emit: F) -> Result<String, DatabaseError>
where
    F: FnMut(Marker<'_>, &mut String) -> Result<(), DatabaseError>,
{
    let bytes = query.as_bytes();
    let mut out = String::with_capacity(query.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        match bytes[i] {
            b'\'' => {
                let escapes = i > 0
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && (i < 2 || !is_ident_byte(bytes[i - 2]));
                i = skip_quoted(bytes, i, b'\'', escapes);
            }
            b'"' => i = skip_quoted(bytes, i, b'"', false),
            b'-' if next == Some(b'-') => {
                i = query[i..].find('\n').map_or(bytes.len(), |end| i + end + 1);
            }
            b'/' if next == Some(b'*') => {
                i = query[i + 2..].find("*/").map_or(bytes.len(), |end| i + 2 + end + 2);
            }
            b'$' if i > 0 && is_ident_byte(bytes[i - 1]) => i += 1,
            b'$' if next.is_some_and(|b| b.is_ascii_digit()) => {
                let end = bytes[i + 1..]
                    .iter()
                    .position(|b| !b.is_ascii_digit())
                    .map_or(bytes.len(), |len| i + 1 + len);
                if let Ok(index) = query[i + 1..end].parse::<usize>() {
                    out.push_str(&query[copied..i]);
                    emit(Marker::Numbered(index, &query[i..end]), &mut out)?;
                    copied = end;
                }
                i = end;
            }
            b'$' => i = skip_dollar_quoted(query, i).unwrap_or(i + 1),
            b'\\' if named && next == Some(b':') => {
                out.push_str(&query[copied..i]);
                out.push(':');
                i += 2;
                copied = i;
            }
            b':' if named && next == Some(b':') => i += 2,
            b':' if named && next.is_some_and(is_ident_start) => {
                let start = i + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|&b| !(b.is_ascii_alphanumeric() || b == b'_'))
                    .map_or(bytes.len(), |len| start + len);
                out.push_str(&query[copied..i]);
                emit(Marker::Named(&query[start..end]), &mut out)?;
                copied = end;
                i = end;
            }
            _ => i += 1,
        }
    }

    out.push_str(&query[copied..]);
    Ok(out)
}

/// Index just past the literal opening at `start`; doubled quotes and, when
/// `escapes` is set, backslash escapes stay inside it.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if escapes && bytes[i] == b'\\' {
            i += 2;
        } else if bytes[i] == quote {
            return i + 1;
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Index just past a `$tag$...$tag$` body opening at `start`, if one does.
fn skip_dollar_quoted(query: &str, start: usize) -> Option<usize> {
    let bytes = query.as_bytes();
    let mut end = start + 1;
    if bytes.get(end).copied().is_some_and(is_ident_start) {
        while bytes
            .get(end)
            .is_some_and(|&b| b.is_ascii_alphanumeric() || b == b'_')
        {
            end += 1;
        }
    }
    if bytes.get(end) != Some(&b'$') {
        return None;
    }
    let delimiter = &query[start..=end];
    let body = end + 1;
    Some(
        query[body..]
            .find(delimiter)
            .map_or(bytes.len(), |close| body + close + delimiter.len()),
    )
}

/// Rewrite `:name` placeholders to the backend's positional syntax.
fn bind_named(
    query: &str,
    params: &Map<String, Value>,
    placeholder: Placeholder,
) -> Result<Statement, DatabaseError> {
    let mut values = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    let sql = rewrite_markers(query, true, |marker, sql| {
        let name = match marker {
            Marker::Named(name) => name,
            Marker::Numbered(_, text) => {
                sql.push_str(text);
                return Ok(());
            }
        };
        let value = params.get(name).ok_or_else(|| {
            DatabaseError::Generic(Failure::new(format!(
                "a value is required for bind parameter '{name}'"
            )))
        })?;

        match placeholder {
            Placeholder::Dollar => {
                let index = *positions.entry(name.to_string()).or_insert_with(|| {
                    values.push(value.clone());
                    values.len()
                });
                sql.push('$');
                sql.push_str(&index.to_string());
            }
            Placeholder::Question => {
                values.push(value.clone());
                sql.push('?');
            }
            Placeholder::Colon => {
                values.push(value.clone());
                sql.push(':');
                sql.push_str(&values.len().to_string());
            }
        }
        Ok(())
    })?;

    Ok(Statement { sql, values })
}
