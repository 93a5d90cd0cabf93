use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::RustDwError;

/// A schemaless JSON object as stored in staging and warehouse collections.
pub type Document = Map<String, Value>;

/// Source entity types fed through the staging pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[value(name = "users")]
    Users,
    #[value(name = "products")]
    Products,
    #[value(name = "orders")]
    Orders,
    #[value(name = "warehouse_imports")]
    WarehouseImports,
}

impl EntityKind {
    /// Fixed extraction order used by the orchestrator.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Users,
        EntityKind::Products,
        EntityKind::Orders,
        EntityKind::WarehouseImports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Products => "products",
            EntityKind::Orders => "orders",
            EntityKind::WarehouseImports => "warehouse_imports",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = RustDwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RustDwError::UnknownEntity(s.to_string()))
    }
}

/// Extraction mode for producers and orchestrator runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Full,
    Incremental,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected or unmatched input kept for later reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Where the record was rejected, e.g. `consumer:products` or `transform:dim_menu_item`
    pub stage: String,
    pub entity: Option<String>,
    pub reason: String,
    /// Offending identifier, when one could be extracted
    pub identifier: Option<String>,
    /// Original payload (raw text when it was not valid JSON)
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
    /// Stable error-store key; a rerun replaces the row instead of adding one
    #[serde(skip)]
    pub key: Option<String>,
}

impl ErrorRecord {
    pub fn new(stage: impl Into<String>, reason: impl Into<String>, payload: Value) -> Self {
        Self {
            stage: stage.into(),
            entity: None,
            reason: reason.into(),
            identifier: None,
            payload,
            recorded_at: Utc::now(),
            key: None,
        }
    }

    pub fn with_entity(mut self, entity: EntityKind) -> Self {
        self.entity = Some(entity.as_str().to_string());
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn to_document(&self) -> crate::Result<Document> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(RustDwError::Storage(format!(
                "error record serialized to non-object: {other}"
            ))),
        }
    }
}

/// Render an identifier value as a key string.
///
/// Strings are trimmed, numbers are rendered in decimal and `{"$oid": ..}`
/// wrappers from document-database exports are unwrapped. Empty strings,
/// nulls and other shapes yield `None`.
pub fn value_to_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(value_to_key),
        _ => None,
    }
}

/// Read a field of a document as a key string.
pub fn field_key(doc: &Document, field: &str) -> Option<String> {
    doc.get(field).and_then(value_to_key)
}

/// Read a numeric field, accepting numeric strings. `NaN` and infinities
/// count as absent.
pub fn field_number(doc: &Document, field: &str) -> Option<f64> {
    let number = match doc.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Parse the timestamp shapes found in source exports.
///
/// Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM:SS[.f]`, plain dates,
/// `{"$date": ..}` wrappers and epoch seconds or milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            let millis = if raw.unsigned_abs() >= 100_000_000_000 {
                raw
            } else {
                raw.checked_mul(1000)?
            };
            let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
            DateTime::<Utc>::from_timestamp(millis.div_euclid(1000), nanos).map(|dt| dt.naive_utc())
        }
        Value::Object(map) => map.get("$date").and_then(parse_timestamp),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Order two cursor values: as timestamps when both parse, as text otherwise.
pub fn compare_cursor_values(a: &Value, b: &Value) -> Ordering {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => cursor_text(a).cmp(&cursor_text(b)),
    }
}

fn cursor_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
