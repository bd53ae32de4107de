//! Result rows as field mappings.

use serde_json::{Map, Number, Value};
use sqlx::any::AnyRow;
use sqlx::{Column, Row as _};

/// One result row: column name to value.
pub type Row = Map<String, Value>;

/// Decode every column of `row`.
///
/// Integers, floats, booleans, text and blobs are supported; blobs become
/// arrays of byte values. Non-finite floats become `null`.
pub(crate) fn decode_row(row: &AnyRow) -> Result<Row, sqlx::Error> {
    let mut fields = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        fields.insert(column.name().to_string(), decode_value(row, index)?);
    }
    Ok(fields)
}

fn decode_value(row: &AnyRow, index: usize) -> Result<Value, sqlx::Error> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value.map_or(Value::Null, Value::from));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return Ok(value
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number));
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return Ok(value.map_or(Value::Null, Value::Bool));
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return Ok(value.map_or(Value::Null, Value::String));
    }
    let bytes = row.try_get::<Option<Vec<u8>>, _>(index)?;
    Ok(bytes.map_or(Value::Null, |bytes| {
        Value::Array(bytes.into_iter().map(Value::from).collect())
    }))
}
