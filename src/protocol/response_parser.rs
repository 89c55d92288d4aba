//! Parses the flat XML Tally sends back for an export request.
//!
//! The response is a repeating `<F01>..</F01><F02>..</F02>...` sequence,
//! one group per record; every `<F01>` opens a new row. Field values are
//! coerced per the mapping's declared kind. Tally data is frequently
//! inconsistent, so malformed numerics degrade the row instead of
//! rejecting it.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::constants::NULL_MARKER;
use crate::mapping::{TableMapping, ValueKind};

lazy_static! {
    static ref NON_NUMERIC: Regex = Regex::new(r"[^0-9.\-]").unwrap();
}

/// A single typed field value parsed out of a response row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Null,
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(n) => Value::from(*n),
            FieldValue::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(d.to_string())),
            FieldValue::Boolean(b) => Value::from(i64::from(*b)),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Null => Value::Null,
        }
    }
}

/// One parsed record: mapped column values in declaration order, plus a
/// flag marking that at least one numeric field was malformed and coerced
/// to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub values: Vec<(String, FieldValue)>,
    pub degraded: bool,
}

impl ParsedRow {
    pub fn from_pairs(values: Vec<(String, FieldValue)>) -> Self {
        Self {
            values,
            degraded: false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_integer)
    }

    /// Full-row JSON object, used for audit snapshots.
    pub fn to_json(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect()
    }
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Raw tag content, normalized: trimmed, with Tally's null marker and the
/// empty string both collapsed to `None`.
fn normalize(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() || trimmed == NULL_MARKER.to_string() {
        return None;
    }
    Some(xml_unescape(trimmed))
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(text, "%Y%m%d").ok();
    }
    for format in ["%Y-%m-%d", "%d-%b-%Y", "%d-%b-%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    None
}

/// Coerce one raw value per the declared kind. The second element reports
/// whether the value was malformed (numeric kinds only).
fn coerce(kind: ValueKind, raw: Option<&str>) -> (FieldValue, bool) {
    let value = normalize(raw);
    match kind {
        ValueKind::Text => (
            FieldValue::Text(value.unwrap_or_default()),
            false,
        ),
        ValueKind::Logical => {
            let truthy = value
                .map(|v| matches!(v.to_ascii_uppercase().as_str(), "YES" | "TRUE" | "1"))
                .unwrap_or(false);
            (FieldValue::Boolean(truthy), false)
        }
        ValueKind::Number => match value {
            None => (FieldValue::Integer(0), false),
            Some(v) => {
                let cleaned = NON_NUMERIC.replace_all(&v, "");
                match cleaned.parse::<i64>() {
                    Ok(n) => (FieldValue::Integer(n), false),
                    Err(_) => (FieldValue::Integer(0), true),
                }
            }
        },
        ValueKind::Amount | ValueKind::Quantity | ValueKind::Rate => match value {
            None => (FieldValue::Decimal(Decimal::ZERO), false),
            Some(v) => {
                let cleaned = NON_NUMERIC.replace_all(&v, "");
                match cleaned.parse::<Decimal>() {
                    Ok(d) => (FieldValue::Decimal(d), false),
                    Err(_) => (FieldValue::Decimal(Decimal::ZERO), true),
                }
            }
        },
        ValueKind::Date => match value.as_deref().and_then(parse_date) {
            Some(date) => (FieldValue::Date(date), false),
            None => (FieldValue::Null, false),
        },
    }
}

fn extract_tag<'a>(slice: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = slice.find(&open)? + open.len();
    let end = start + slice[start..].find(&close)?;
    Some(&slice[start..end])
}

/// Lazy iterator over the rows of a response. One pass per invocation;
/// call [`parse_rows`] again to restart from the top.
pub struct RowIter<'a> {
    mapping: &'a TableMapping,
    response: &'a str,
    starts: Vec<usize>,
    next: usize,
}

impl<'a> Iterator for RowIter<'a> {
    type Item = ParsedRow;

    fn next(&mut self) -> Option<Self::Item> {
        let start = *self.starts.get(self.next)?;
        let end = self
            .starts
            .get(self.next + 1)
            .copied()
            .unwrap_or(self.response.len());
        self.next += 1;

        let slice = &self.response[start..end];
        let mut values = Vec::with_capacity(self.mapping.fields.len());
        let mut degraded = false;
        for (i, field) in self.mapping.fields.iter().enumerate() {
            let tag = format!("F{:02}", i + 1);
            let raw = extract_tag(slice, &tag);
            let (value, bad) = coerce(field.kind, raw);
            degraded |= bad;
            values.push((field.name.clone(), value));
        }
        Some(ParsedRow { values, degraded })
    }
}

/// Walk a response once, yielding one [`ParsedRow`] per `<F01>` group.
pub fn parse_rows<'a>(mapping: &'a TableMapping, response: &'a str) -> RowIter<'a> {
    let response = response.strip_prefix('\u{feff}').unwrap_or(response);
    let starts: Vec<usize> = response.match_indices("<F01>").map(|(i, _)| i).collect();
    RowIter {
        mapping,
        response,
        starts,
        next: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingSet;

    fn mapping() -> TableMapping {
        let doc = r#"{"master": [{
            "name": "mst_ledger", "collection": "Ledger", "nature": "Primary",
            "fields": [
                {"name": "guid", "field": "Guid"},
                {"name": "alterid", "field": "AlterId", "type": "number"},
                {"name": "name", "field": "Name"},
                {"name": "opening_balance", "field": "OpeningBalance", "type": "amount"},
                {"name": "is_billwise", "field": "IsBillWiseOn", "type": "logical"},
                {"name": "created", "field": "CreationDate", "type": "date"}
            ]
        }]}"#;
        MappingSet::from_json(doc).unwrap().master[0].clone()
    }

    const RESPONSE: &str = "\u{feff}<ENVELOPE>\
        <F01>g-1</F01><F02>10</F02><F03>Cash &amp; Bank</F03><F04>1,234.50</F04><F05>Yes</F05><F06>20240401</F06>\
        <F01>g-2</F01><F02>11</F02><F03>Sales</F03><F04>abc</F04><F05>No</F05><F06>\u{f1}</F06>\
        </ENVELOPE>";

    #[test]
    fn parses_typed_rows() {
        let m = mapping();
        let rows: Vec<ParsedRow> = parse_rows(&m, RESPONSE).collect();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert!(!first.degraded);
        assert_eq!(first.text("guid"), Some("g-1"));
        assert_eq!(first.integer("alterid"), Some(10));
        assert_eq!(first.text("name"), Some("Cash & Bank"));
        assert_eq!(
            first.get("opening_balance"),
            Some(&FieldValue::Decimal("1234.50".parse().unwrap()))
        );
        assert_eq!(first.get("is_billwise"), Some(&FieldValue::Boolean(true)));
        assert_eq!(
            first.get("created"),
            Some(&FieldValue::Date(
                NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
            ))
        );
    }

    #[test]
    fn malformed_amount_degrades_row_instead_of_dropping_it() {
        let m = mapping();
        let rows: Vec<ParsedRow> = parse_rows(&m, RESPONSE).collect();
        let second = &rows[1];
        assert!(second.degraded);
        assert_eq!(
            second.get("opening_balance"),
            Some(&FieldValue::Decimal(Decimal::ZERO))
        );
        // Null-marker date parses to null, not an error.
        assert_eq!(second.get("created"), Some(&FieldValue::Null));
    }

    #[test]
    fn reparse_restarts_from_the_top() {
        let m = mapping();
        let first_pass = parse_rows(&m, RESPONSE).count();
        let second_pass = parse_rows(&m, RESPONSE).count();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn empty_response_yields_no_rows() {
        let m = mapping();
        assert_eq!(parse_rows(&m, "<ENVELOPE></ENVELOPE>").count(), 0);
    }

    #[test]
    fn missing_fields_default_by_kind() {
        let m = mapping();
        let rows: Vec<ParsedRow> = parse_rows(&m, "<F01>g-3</F01>").collect();
        let row = &rows[0];
        assert_eq!(row.text("name"), Some(""));
        assert_eq!(row.integer("alterid"), Some(0));
        assert_eq!(row.get("is_billwise"), Some(&FieldValue::Boolean(false)));
        assert!(!row.degraded);
    }

    #[test]
    fn date_formats() {
        assert_eq!(
            parse_date("20240115"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(
            parse_date("15-Jan-2024"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_date("not-a-date"), None);
    }
}
