// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory resource source for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::discovery::ResourceKind;
use super::source::{ListRequest, Page, ResourceSource, SchemaDocument};
use crate::error::SourceError;

/// Objects are stored per (group, plural) and served in insertion order.
/// Continuation tokens are stringified offsets.
#[derive(Default)]
pub struct MemorySource {
    kinds: Mutex<Vec<ResourceKind>>,
    schemas: Mutex<HashMap<(String, String), SchemaDocument>>,
    objects: Mutex<HashMap<(String, String), Vec<serde_json::Value>>>,
    fail_discovery: bool,
    /// Page index from which continuation tokens are reported expired
    expire_from_page: Option<usize>,
    /// Page index from which list responses cannot be decoded
    malformed_from_page: Option<usize>,
    discovery_calls: AtomicUsize,
    schema_calls: AtomicUsize,
    list_calls: Mutex<Vec<ListRequest>>,
}

fn key(kind: &ResourceKind) -> (String, String) {
    (kind.group.clone(), kind.plural.clone())
}

impl MemorySource {
    /// A source that serves the core Namespace kind
    pub fn new() -> Self {
        let source = Self::default();
        source.add_kind(ResourceKind::namespaces());
        source
    }

    pub fn with_kind(self, kind: ResourceKind) -> Self {
        self.add_kind(kind);
        self
    }

    pub fn add_kind(&self, kind: ResourceKind) {
        let mut kinds = self.kinds.lock().unwrap();
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }

    pub fn remove_kind(&self, kind: &ResourceKind) {
        self.kinds.lock().unwrap().retain(|k| k != kind);
    }

    pub fn with_schema(self, kind: &ResourceKind, document: SchemaDocument) -> Self {
        self.set_schema(kind, document);
        self
    }

    /// Publish or replace a kind's schema document
    pub fn set_schema(&self, kind: &ResourceKind, document: SchemaDocument) {
        self.schemas.lock().unwrap().insert(key(kind), document);
    }

    /// Add an object; its namespace is created on first use
    pub fn with_object(self, kind: &ResourceKind, object: serde_json::Value) -> Self {
        if let Some(ns) = object
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|n| n.as_str())
        {
            self.ensure_namespace(ns);
        }
        self.objects
            .lock()
            .unwrap()
            .entry(key(kind))
            .or_default()
            .push(object);
        self
    }

    fn ensure_namespace(&self, name: &str) {
        let mut objects = self.objects.lock().unwrap();
        let namespaces = objects.entry(key(&ResourceKind::namespaces())).or_default();
        let exists = namespaces
            .iter()
            .any(|ns| ns["metadata"]["name"].as_str() == Some(name));
        if !exists {
            namespaces.push(serde_json::json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": name }
            }));
        }
    }

    pub fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    /// Report continuation tokens as expired from the given page index on
    pub fn expire_tokens_from_page(mut self, page: usize) -> Self {
        self.expire_from_page = Some(page);
        self
    }

    /// Answer list calls with an undecodable response from the given page index on
    pub fn malformed_from_page(mut self, page: usize) -> Self {
        self.malformed_from_page = Some(page);
        self
    }

    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> Vec<ListRequest> {
        self.list_calls.lock().unwrap().clone()
    }

    fn matches(request: &ListRequest, object: &serde_json::Value) -> bool {
        if let Some(ns) = &request.namespace
            && object["metadata"]["namespace"].as_str() != Some(ns.as_str())
        {
            return false;
        }
        if let Some(selector) = &request.filters.label_selector {
            for requirement in selector.split(',') {
                let Some((k, v)) = requirement.split_once('=') else {
                    continue;
                };
                if object["metadata"]["labels"][k].as_str() != Some(v) {
                    return false;
                }
            }
        }
        if let Some(selector) = &request.filters.field_selector {
            for requirement in selector.split(',') {
                let Some((path, v)) = requirement.split_once('=') else {
                    continue;
                };
                let mut current = object;
                for part in path.split('.') {
                    current = &current[part];
                }
                let rendered = match current {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                if rendered != v {
                    return false;
                }
            }
        }
        true
    }
}

#[async_trait]
impl ResourceSource for MemorySource {
    async fn list_resource_kinds(&self) -> Result<Vec<ResourceKind>, SourceError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_discovery {
            return Err(SourceError::Unavailable("connection refused".to_string()));
        }
        Ok(self.kinds.lock().unwrap().clone())
    }

    async fn schema_document(
        &self,
        kind: &ResourceKind,
    ) -> Result<Option<SchemaDocument>, SourceError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.schemas.lock().unwrap().get(&key(kind)).cloned())
    }

    async fn list(&self, request: &ListRequest) -> Result<Page, SourceError> {
        self.list_calls.lock().unwrap().push(request.clone());

        if !self.kinds.lock().unwrap().contains(&request.kind) {
            return Err(SourceError::NotFound(request.kind.plural.clone()));
        }

        let matching: Vec<serde_json::Value> = self
            .objects
            .lock()
            .unwrap()
            .get(&key(&request.kind))
            .map(|objects| {
                objects
                    .iter()
                    .filter(|o| Self::matches(request, o))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let limit = request.limit.map(|l| l as usize).unwrap_or(usize::MAX).max(1);
        let offset = match &request.continue_token {
            None => 0,
            Some(token) => {
                let offset: usize = token
                    .parse()
                    .map_err(|_| SourceError::Expired(token.clone()))?;
                if let Some(from) = self.expire_from_page
                    && offset / limit >= from
                {
                    return Err(SourceError::Expired(token.clone()));
                }
                offset
            }
        };

        if let Some(from) = self.malformed_from_page
            && offset / limit >= from
        {
            return Err(SourceError::Malformed(
                "invalid type: string, expected a list response".to_string(),
            ));
        }

        let items: Vec<_> = matching.iter().skip(offset).take(limit).cloned().collect();
        let next = offset + items.len();
        let continue_token = (next < matching.len()).then(|| next.to_string());

        Ok(Page {
            items,
            continue_token,
        })
    }
}
