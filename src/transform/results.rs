use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array, AsArray};
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{RawPayload, RawResultRow};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const JSON_WRAPPERS: &[&str] = &["data", "results", "items"];

/// Parse a downloaded results body into rows. JSON is recognised by content
/// type or by its leading bracket; everything else is read as CSV.
pub fn parse_rows(payload: &RawPayload) -> Result<Vec<RawResultRow>> {
    let body = payload.body.strip_prefix(UTF8_BOM).unwrap_or(&payload.body[..]);
    let leading = body.iter().find(|b| !b.is_ascii_whitespace());

    match leading {
        None => Ok(Vec::new()),
        Some(b'[') | Some(b'{') => parse_json(body),
        Some(_) if payload.is_json() => parse_json(body),
        Some(_) => parse_csv(body),
    }
}

fn parse_json(body: &[u8]) -> Result<Vec<RawResultRow>> {
    let value: Value = serde_json::from_slice(body)?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => JSON_WRAPPERS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| {
                Error::InvalidResponse("JSON results carry no data, results or items list".to_string())
            })?,
        other => {
            return Err(Error::InvalidResponse(format!(
                "unexpected JSON results document: {other}"
            )));
        }
    };

    let total = items.len();
    let rows: Vec<RawResultRow> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(RawResultRow::from(map)),
            _ => None,
        })
        .collect();

    if rows.len() != total {
        debug!(skipped = total - rows.len(), "Ignored non-object entries in JSON results");
    }
    Ok(rows)
}

fn parse_csv(body: &[u8]) -> Result<Vec<RawResultRow>> {
    let (inferred, _) = Format::default()
        .with_header(true)
        .with_truncated_rows(true)
        .infer_schema(Cursor::new(body), Some(0))?;

    // Every column is read as text; coercion happens during normalization.
    let names: Vec<String> = inferred
        .fields()
        .iter()
        .map(|f| f.name().trim().to_string())
        .collect();
    let schema = Arc::new(Schema::new(
        names
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));

    // Short rows read their missing trailing cells as null.
    let reader = ReaderBuilder::new(schema)
        .with_header(true)
        .with_truncated_rows(true)
        .build(Cursor::new(body))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let columns: Vec<_> = batch.columns().iter().map(|c| c.as_string::<i32>()).collect();
        for i in 0..batch.num_rows() {
            let mut row = RawResultRow::new();
            for (name, column) in names.iter().zip(&columns) {
                let value = if column.is_null(i) {
                    Value::Null
                } else {
                    Value::String(column.value(i).to_string())
                };
                row.insert(name.clone(), value);
            }
            rows.push(row);
        }
    }
    Ok(rows)
}
