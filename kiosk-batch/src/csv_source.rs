use std::io;

use kiosk_common::record::{fields, RawRecord};
use serde_json::Value;

/// Join CSV documents that share a header into one, keeping only the first header row.
/// Blank parts are skipped.
pub fn combine_csv_parts<S: AsRef<str>>(parts: &[S]) -> String {
    let mut combined = String::new();
    let mut header_written = false;

    for part in parts.iter().map(AsRef::as_ref) {
        if part.trim().is_empty() {
            continue;
        }

        let body = if header_written {
            match part.split_once('\n') {
                Some((_, rows)) => rows,
                None => "",
            }
        } else {
            header_written = true;
            part
        };

        if body.is_empty() {
            continue;
        }
        combined.push_str(body);
        if !body.ends_with('\n') {
            combined.push('\n');
        }
    }

    combined
}

/// Decode a headed CSV document into raw records, one per row, in file order.
///
/// Cells are kept as strings except `val` and `type`, which become integers when they
/// hold one (`1.0` included, as spreadsheet exports write them). Empty cells are left out
/// of the record entirely, so they read as missing fields. Short rows are read the same
/// way and cells beyond the header are ignored, leaving bad rows for validation to reject.
pub fn read_records<R: io::Read>(reader: R) -> Result<Vec<RawRecord>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    csv_reader
        .records()
        .map(|row| {
            let row = row?;
            let mut record = RawRecord::new();
            for (field, cell) in headers.iter().zip(row.iter()) {
                if let Some(value) = coerce(field, cell) {
                    record.insert(field, value);
                }
            }
            Ok(record)
        })
        .collect()
}

fn coerce(field: &str, cell: &str) -> Option<Value> {
    if cell.is_empty() {
        return None;
    }

    let numeric = field == fields::VAL || field == fields::TYPE;
    match parse_integer(cell) {
        Some(n) if numeric => Some(Value::from(n)),
        _ => Some(Value::from(cell)),
    }
}

fn parse_integer(cell: &str) -> Option<i64> {
    if let Ok(n) = cell.parse::<i64>() {
        return Some(n);
    }

    let float = cell.parse::<f64>().ok()?;
    let in_range = float >= i64::MIN as f64 && float <= i64::MAX as f64;
    (float.is_finite() && float.fract() == 0.0 && in_range).then_some(float as i64)
}
