use chrono::NaiveDate;
use serde_json::Value;

use crate::types::{Direction, MissingRatioPolicy};

/// Metric name encoded in a flag column, or `None` when the column is not a flag.
pub fn metric_from_flag_column<'a>(column: &'a str, prefix: &str) -> Option<&'a str> {
    column
        .strip_prefix(prefix)
        .filter(|metric| !metric.is_empty())
}

pub fn ratio_column_for(metric: &str, suffix: &str) -> String {
    format!("{}{}", metric, suffix)
}

/// Direction of a flagged metric.
///
/// Returns `None` when the ratio is unknown and the policy drops such flags.
pub fn classify_direction(ratio: Option<f64>, policy: MissingRatioPolicy) -> Option<Direction> {
    match (ratio, policy) {
        (Some(r), _) if r > 1.0 => Some(Direction::Up),
        (Some(_), _) => Some(Direction::Down),
        (None, MissingRatioPolicy::Down) => Some(Direction::Down),
        (None, MissingRatioPolicy::Omit) => None,
    }
}

/// Warehouse cells arrive either typed or as strings (BigQuery REST encodes
/// every scalar as a string).
pub fn parse_bool_cell(cell: &Value) -> Option<bool> {
    match cell {
        Value::Null => Some(false),
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim() {
            "true" | "TRUE" | "True" | "1" => Some(true),
            "false" | "FALSE" | "False" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Outer `None` means the cell is not numeric; inner `None` means SQL NULL.
pub fn parse_ratio_cell(cell: &Value) -> Option<Option<f64>> {
    match cell {
        Value::Null => Some(None),
        Value::Number(n) => n.as_f64().map(Some),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Some(None);
            }
            s.parse::<f64>().ok().filter(|v| v.is_finite()).map(Some)
        }
        _ => None,
    }
}

pub fn parse_date_cell(cell: &Value) -> Option<NaiveDate> {
    let raw = cell.as_str()?.trim();
    // DATETIME / TIMESTAMP columns carry a time part after the date
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

pub fn parse_text_cell(cell: &Value) -> Option<String> {
    match cell {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

pub fn format_ratio(ratio: Option<f64>) -> String {
    ratio
        .map(|r| format!("{:.3}", r))
        .unwrap_or_else(|| "n/a".to_string())
}

/// View identifiers are interpolated into SQL, so only plain
/// `project.dataset.table` style names are accepted.
/// Column names are interpolated into SQL, so only plain identifiers pass.
pub fn is_valid_column_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn is_valid_view_identifier(view: &str) -> bool {
    !view.is_empty()
        && view
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
