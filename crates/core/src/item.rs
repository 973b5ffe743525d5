// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronized entities.
//!
//! An [`Item`] is an opaque JSON object (for example a transaction) with a
//! stable id field and a timestamp field. Which fields play those roles is
//! configurable through [`Fields`]; everything else is carried verbatim.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Default name of the id field.
pub const DEFAULT_ID_FIELD: &str = "id";
/// Default name of the timestamp field.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "updatedAt";

/// Names of the fields that identify and version an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fields {
    /// Field holding the stable entity id.
    #[serde(default = "default_id_field")]
    pub id: String,
    /// Field holding the last-modified timestamp.
    #[serde(default = "default_timestamp_field")]
    pub timestamp: String,
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

fn default_timestamp_field() -> String {
    DEFAULT_TIMESTAMP_FIELD.to_string()
}

impl Default for Fields {
    fn default() -> Self {
        Fields {
            id: default_id_field(),
            timestamp: default_timestamp_field(),
        }
    }
}

impl Fields {
    /// Creates a field mapping with custom names.
    pub fn new(id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Fields {
            id: id.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// A synchronized entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Map<String, Value>);

impl Item {
    /// Creates an item from a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Item(fields)
    }

    /// Creates an item from any JSON value, rejecting non-objects.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Item(map)),
            other => Err(Error::InvalidItem(other.to_string())),
        }
    }

    /// Returns the raw value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Returns the entity id as a string.
    ///
    /// Numeric ids are rendered in decimal so `1` and `"1"` name the same entity.
    pub fn id(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Returns the timestamp field in milliseconds since Unix epoch.
    pub fn timestamp_ms(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(parse_timestamp)
    }

    /// Returns the underlying JSON object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the item, returning it as a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Item {
    fn from(map: Map<String, Value>) -> Self {
        Item(map)
    }
}

impl TryFrom<Value> for Item {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Item::from_value(value)
    }
}

/// Parses a timestamp value into milliseconds since Unix epoch.
///
/// Accepts epoch milliseconds (number or numeric string), RFC 3339 strings,
/// zone-less ISO-8601 date-times (read as UTC), and bare dates.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

#[cfg(test)]
#[path = "item_tests.rs"]
mod tests;
