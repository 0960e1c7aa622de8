// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Structural view of OpenAPI v3 schema documents
//!
//! Built-in kinds publish their schemas through the `/openapi/v3` endpoint,
//! where nested types are `$ref`s into `components.schemas`. CRDs carry a
//! self-contained `openAPIV3Schema`. Both are reduced to a [`SchemaNode`]
//! tree here, bounded by a nesting limit so recursive definitions
//! (e.g. `JSONSchemaProps`) terminate.

use serde_json::{Value, json};
use tracing::trace;

use super::source::SchemaDocument;

/// Maximum `$ref` hops followed for a single node
const MAX_REF_HOPS: usize = 16;

/// Declared type of a scalar field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Boolean,
    Integer,
    Number,
    String,
    /// `type: string, format: date-time`
    DateTime,
    /// `x-kubernetes-int-or-string`
    IntOrString,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// Object with declared properties, in document order
    Object(Vec<(String, SchemaNode)>),
    /// Object whose keys are not declared (maps, preserved unknown fields)
    Dynamic,
    Array,
    Scalar(FieldType),
    /// Object below the nesting limit, not descended into
    Truncated,
}

impl SchemaNode {
    /// Parse a schema document, descending into objects up to `depth_limit`
    /// path segments below the root
    pub fn parse(document: &SchemaDocument, depth_limit: usize) -> SchemaNode {
        let parser = Parser {
            definitions: &document.definitions,
            depth_limit,
        };
        parser.parse_root(&document.root)
    }
}

struct Parser<'a> {
    definitions: &'a serde_json::Map<String, Value>,
    depth_limit: usize,
}

impl<'a> Parser<'a> {
    fn parse_root(&self, root: &'a Value) -> SchemaNode {
        let root = self.resolve(root);
        let mut properties = match self.parse_node(root, 0) {
            SchemaNode::Object(properties) => properties,
            _ => Vec::new(),
        };

        // CRD schemas declare metadata as a bare object; use the ObjectMeta shape
        let meta_index = properties.iter().position(|(name, _)| name == "metadata");
        let needs_meta = match meta_index {
            Some(i) => !matches!(properties[i].1, SchemaNode::Object(_)),
            None => true,
        };
        if needs_meta && self.depth_limit > 1 {
            let object_meta = object_meta_schema();
            let node = self.parse_node(&object_meta, 1);
            match meta_index {
                Some(i) => properties[i].1 = node,
                None => properties.push(("metadata".to_string(), node)),
            }
        }

        // apiVersion and kind are always present on listed objects
        for field in ["kind", "apiVersion"] {
            if !properties.iter().any(|(name, _)| name == field) {
                properties.insert(0, (field.to_string(), SchemaNode::Scalar(FieldType::String)));
            }
        }

        SchemaNode::Object(properties)
    }

    /// Follow `$ref` and single-element `allOf` wrappers
    fn resolve(&self, mut schema: &'a Value) -> &'a Value {
        for _ in 0..MAX_REF_HOPS {
            if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
                let name = reference.rsplit('/').next().unwrap_or(reference);
                match self.definitions.get(name) {
                    Some(target) => {
                        schema = target;
                        continue;
                    }
                    None => {
                        trace!(reference = %reference, "Unresolvable $ref");
                        return &Value::Null;
                    }
                }
            }
            if schema.get("type").is_none()
                && schema.get("properties").is_none()
                && let Some(all_of) = schema.get("allOf").and_then(Value::as_array)
                && all_of.len() == 1
            {
                schema = &all_of[0];
                continue;
            }
            break;
        }
        schema
    }

    fn parse_node(&self, schema: &'a Value, depth: usize) -> SchemaNode {
        let schema = self.resolve(schema);

        if flag(schema, "x-kubernetes-int-or-string") {
            return SchemaNode::Scalar(FieldType::IntOrString);
        }

        let ty = schema.get("type").and_then(Value::as_str);
        match ty {
            Some("array") => SchemaNode::Array,
            Some("boolean") => SchemaNode::Scalar(FieldType::Boolean),
            Some("integer") => SchemaNode::Scalar(FieldType::Integer),
            Some("number") => SchemaNode::Scalar(FieldType::Number),
            Some("string") => match schema.get("format").and_then(Value::as_str) {
                Some("date-time") => SchemaNode::Scalar(FieldType::DateTime),
                _ => SchemaNode::Scalar(FieldType::String),
            },
            Some("object") | None => self.parse_object(schema, depth),
            Some(other) => {
                trace!(schema_type = %other, "Unknown schema type, treating as dynamic");
                SchemaNode::Dynamic
            }
        }
    }

    fn parse_object(&self, schema: &'a Value, depth: usize) -> SchemaNode {
        let properties = match schema.get("properties").and_then(Value::as_object) {
            Some(props) if !props.is_empty() => props,
            // Maps (additionalProperties), preserved unknown fields and bare objects
            _ => return SchemaNode::Dynamic,
        };

        if depth >= self.depth_limit {
            return SchemaNode::Truncated;
        }

        SchemaNode::Object(
            properties
                .iter()
                .map(|(name, prop)| (name.clone(), self.parse_node(prop, depth + 1)))
                .collect(),
        )
    }
}

fn flag(schema: &Value, name: &str) -> bool {
    schema.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Standard ObjectMeta fields, as published by the API server
pub fn object_meta_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "annotations": { "type": "object", "additionalProperties": { "type": "string" } },
            "creationTimestamp": { "type": "string", "format": "date-time" },
            "deletionGracePeriodSeconds": { "type": "integer", "format": "int64" },
            "deletionTimestamp": { "type": "string", "format": "date-time" },
            "finalizers": { "type": "array", "items": { "type": "string" } },
            "generateName": { "type": "string" },
            "generation": { "type": "integer", "format": "int64" },
            "labels": { "type": "object", "additionalProperties": { "type": "string" } },
            "managedFields": { "type": "array", "items": { "type": "object" } },
            "name": { "type": "string" },
            "namespace": { "type": "string" },
            "ownerReferences": { "type": "array", "items": { "type": "object" } },
            "resourceVersion": { "type": "string" },
            "selfLink": { "type": "string" },
            "uid": { "type": "string" }
        }
    })
}

/// Document used when the server publishes no schema for a kind
pub fn fallback_document() -> SchemaDocument {
    SchemaDocument::new(json!({
        "type": "object",
        "properties": {
            "apiVersion": { "type": "string" },
            "kind": { "type": "string" },
            "metadata": { "type": "object" },
            "spec": { "type": "object", "x-kubernetes-preserve-unknown-fields": true },
            "status": { "type": "object", "x-kubernetes-preserve-unknown-fields": true }
        }
    }))
}

/// Find the component schema describing a group/version/kind in an
/// OpenAPI v3 document and return it together with all component schemas
pub fn extract_kind_schema(
    openapi: &Value,
    group: &str,
    version: &str,
    kind: &str,
) -> Option<SchemaDocument> {
    let schemas = openapi
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)?;

    let root = schemas.values().find(|schema| {
        schema
            .get("x-kubernetes-group-version-kind")
            .and_then(Value::as_array)
            .is_some_and(|gvks| {
                gvks.iter().any(|gvk| {
                    gvk.get("group").and_then(Value::as_str).unwrap_or("") == group
                        && gvk.get("version").and_then(Value::as_str) == Some(version)
                        && gvk.get("kind").and_then(Value::as_str) == Some(kind)
                })
            })
    })?;

    Some(SchemaDocument::new(root.clone()).with_definitions(schemas.clone()))
}
