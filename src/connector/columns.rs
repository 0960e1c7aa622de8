// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Column typing: a flat, ordered, typed column set per resource kind
//!
//! Columns are derived from the kind's schema document by walking it
//! depth-first in document order. Nested objects flatten into dotted paths
//! (`spec.replicas`) up to the configured depth. Arrays, maps and anything
//! past the depth bound become a single StructuredText column.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::row::{ColumnType, Value, resolve_path};
use crate::error::{Error, Result};
use crate::kubernetes::ResourceSource;
use crate::kubernetes::discovery::ResourceKind;
use crate::kubernetes::openapi::{self, FieldType, SchemaNode};

/// One derived column: its dotted name, type and the path it reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub path: Vec<String>,
}

impl ColumnDescriptor {
    pub fn new(path: Vec<String>, column_type: ColumnType) -> Self {
        Self {
            name: path.join("."),
            column_type,
            path,
        }
    }

    /// Resolve this column against a decoded object
    pub fn extract(&self, object: &serde_json::Value) -> Value {
        match resolve_path(object, &self.path) {
            Some(json) => Value::from_json(json, self.column_type),
            None => Value::Null,
        }
    }
}

/// Engine-visible reference to a column by position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnHandle {
    pub index: usize,
    pub name: String,
    pub column_type: ColumnType,
}

/// Flatten a parsed schema into columns
///
/// The node tree is expected to be truncated at the flattening depth
/// (see [`SchemaNode::parse`]).
pub fn flatten(root: &SchemaNode) -> Vec<ColumnDescriptor> {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    let mut prefix = Vec::new();
    walk(root, &mut prefix, &mut columns, &mut seen);
    columns
}

fn walk(
    node: &SchemaNode,
    prefix: &mut Vec<String>,
    columns: &mut Vec<ColumnDescriptor>,
    seen: &mut HashSet<String>,
) {
    let SchemaNode::Object(properties) = node else {
        return;
    };

    for (name, child) in properties {
        prefix.push(name.clone());
        let column_type = match child {
            SchemaNode::Object(_) => {
                walk(child, prefix, columns, seen);
                None
            }
            SchemaNode::Scalar(field_type) => Some(column_type(*field_type)),
            SchemaNode::Dynamic | SchemaNode::Array | SchemaNode::Truncated => {
                Some(ColumnType::StructuredText)
            }
        };
        if let Some(column_type) = column_type {
            let column = ColumnDescriptor::new(prefix.clone(), column_type);
            // Property names containing '.' could collide with a nested path
            if seen.insert(column.name.clone()) {
                columns.push(column);
            }
        }
        prefix.pop();
    }
}

fn column_type(field_type: FieldType) -> ColumnType {
    match field_type {
        FieldType::Boolean => ColumnType::Boolean,
        FieldType::Integer => ColumnType::Integer,
        FieldType::Number => ColumnType::Float,
        FieldType::DateTime => ColumnType::Timestamp,
        FieldType::String | FieldType::IntOrString => ColumnType::String,
    }
}

/// Derives and caches the column set of each resource kind
pub struct ColumnTyper {
    source: Arc<dyn ResourceSource>,
    max_depth: usize,
    cache: RwLock<HashMap<ResourceKind, Arc<[ColumnDescriptor]>>>,
}

impl ColumnTyper {
    pub fn new(source: Arc<dyn ResourceSource>, max_depth: usize) -> Self {
        Self {
            source,
            max_depth: max_depth.max(1),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Ordered columns of a kind
    ///
    /// The first derivation fetches the kind's schema document; later calls
    /// return the same columns in the same order.
    pub async fn derive_columns(&self, kind: &ResourceKind) -> Result<Arc<[ColumnDescriptor]>> {
        if let Some(columns) = self.cache.read().await.get(kind) {
            return Ok(Arc::clone(columns));
        }

        let document = match self.source.schema_document(kind).await? {
            Some(document) => document,
            None => {
                debug!(
                    table = %kind.table_identity(),
                    "No schema document published, using fallback columns"
                );
                openapi::fallback_document()
            }
        };

        let root = SchemaNode::parse(&document, self.max_depth);
        let columns: Arc<[ColumnDescriptor]> = flatten(&root).into();

        debug!(
            table = %kind.table_identity(),
            columns = columns.len(),
            max_depth = self.max_depth,
            "Derived columns"
        );

        // A concurrent derivation may have won; keep the first for stability
        let mut cache = self.cache.write().await;
        let entry = cache.entry(kind.clone()).or_insert(columns);
        Ok(Arc::clone(entry))
    }

    pub async fn column_handles(&self, kind: &ResourceKind) -> Result<Vec<ColumnHandle>> {
        let columns = self.derive_columns(kind).await?;
        Ok(columns
            .iter()
            .enumerate()
            .map(|(index, col)| ColumnHandle {
                index,
                name: col.name.clone(),
                column_type: col.column_type,
            })
            .collect())
    }

    /// Map handles back to column descriptors, in handle order
    pub async fn resolve_handles(
        &self,
        kind: &ResourceKind,
        handles: &[ColumnHandle],
    ) -> Result<Vec<ColumnDescriptor>> {
        let columns = self.derive_columns(kind).await?;
        handles
            .iter()
            .map(|handle| match columns.get(handle.index) {
                Some(col) if col.name == handle.name && col.column_type == handle.column_type => {
                    Ok(col.clone())
                }
                _ => Err(Error::InvalidColumnHandle {
                    table: kind.table_identity().to_string(),
                    index: handle.index,
                    name: handle.name.clone(),
                }),
            })
            .collect()
    }

    /// Forget the cached columns of one kind
    pub async fn invalidate(&self, kind: &ResourceKind) {
        self.cache.write().await.remove(kind);
    }

    /// Forget every cached column set
    pub async fn invalidate_all(&self) {
        let mut cache = self.cache.write().await;
        debug!(kinds = cache.len(), "Dropping cached columns");
        cache.clear();
    }
}
