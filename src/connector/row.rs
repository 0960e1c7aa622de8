// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Typed values and rows built from decoded objects
//!
//! Conversion never fails: a missing field, or a JSON value whose type does
//! not fit the column, becomes [`Value::Null`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::columns::ColumnDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    String,
    Timestamp,
    /// Canonical JSON text of an array, map or depth-bounded object
    StructuredText,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Timestamp => "timestamp",
            ColumnType::StructuredText => "structured_text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    StructuredText(String),
}

impl Value {
    /// Convert a JSON value to the given column type
    pub fn from_json(json: &serde_json::Value, column_type: ColumnType) -> Value {
        use serde_json::Value as Json;

        match (column_type, json) {
            (_, Json::Null) => Value::Null,
            (ColumnType::Boolean, Json::Bool(b)) => Value::Boolean(*b),
            (ColumnType::Integer, Json::Number(n)) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Null,
            },
            (ColumnType::Float, Json::Number(n)) => match n.as_f64() {
                Some(f) => Value::Float(f),
                None => Value::Null,
            },
            // Int-or-string fields land in string columns
            (ColumnType::String, Json::String(s)) => Value::String(s.clone()),
            (ColumnType::String, Json::Number(n)) => Value::String(n.to_string()),
            (ColumnType::String, Json::Bool(b)) => Value::String(b.to_string()),
            // Kubernetes uses RFC 3339: "2024-01-15T10:30:00Z"
            (ColumnType::Timestamp, Json::String(s)) => match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => Value::Timestamp(dt.with_timezone(&Utc)),
                Err(_) => Value::Null,
            },
            (ColumnType::StructuredText, other) => Value::StructuredText(canonical_json(other)),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// One decoded object, projected onto the requested columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Build a row by resolving each column against the object
    pub fn from_object(object: &serde_json::Value, columns: &[ColumnDescriptor]) -> Self {
        Self {
            values: columns.iter().map(|col| col.extract(object)).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Follow a field path through nested objects
///
/// Returns None when a segment is absent or an intermediate value is not an
/// object. Arrays are never indexed into.
pub fn resolve_path<'a, S: AsRef<str>>(
    object: &'a serde_json::Value,
    path: &[S],
) -> Option<&'a serde_json::Value> {
    let mut current = object;
    for part in path {
        current = current.as_object()?.get(part.as_ref())?;
    }
    Some(current)
}

/// Serialize with object keys sorted recursively
pub fn canonical_json(value: &serde_json::Value) -> String {
    serde_json::to_string(&sorted(value)).unwrap_or_default()
}

fn sorted(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sorted).collect())
        }
        other => other.clone(),
    }
}
