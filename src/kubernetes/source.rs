// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! The upstream seam: a paginated listing service over semi-structured objects
//!
//! [`KubeSource`](super::KubeSource) talks to a real API server. Tests use an
//! in-memory implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ApiFilters;
use super::discovery::ResourceKind;
use crate::error::SourceError;

/// Structural description of a resource kind
///
/// `root` is an OpenAPI v3 schema object. `definitions` holds the component
/// schemas that `$ref`s inside `root` point to (empty for CRD schemas, which
/// are self-contained).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDocument {
    pub root: serde_json::Value,
    pub definitions: serde_json::Map<String, serde_json::Value>,
}

impl SchemaDocument {
    pub fn new(root: serde_json::Value) -> Self {
        Self {
            root,
            definitions: serde_json::Map::new(),
        }
    }

    pub fn with_definitions(mut self, definitions: serde_json::Map<String, serde_json::Value>) -> Self {
        self.definitions = definitions;
        self
    }
}

/// One list call: kind, scope, selectors and paging position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    pub kind: ResourceKind,
    /// None lists across all namespaces (or the cluster-scoped collection)
    pub namespace: Option<String>,
    pub filters: ApiFilters,
    pub continue_token: Option<String>,
    pub limit: Option<u32>,
}

impl ListRequest {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespace: None,
            filters: ApiFilters::default(),
            continue_token: None,
            limit: None,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<serde_json::Value>,
    /// Present when more pages follow
    pub continue_token: Option<String>,
}

#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// All listable resource kinds the server reports (preferred versions first)
    async fn list_resource_kinds(&self) -> Result<Vec<ResourceKind>, SourceError>;

    /// Schema document for a kind, or None when the server publishes none
    async fn schema_document(
        &self,
        kind: &ResourceKind,
    ) -> Result<Option<SchemaDocument>, SourceError>;

    /// Fetch a single page
    async fn list(&self, request: &ListRequest) -> Result<Page, SourceError>;

    /// Names of all namespaces, in listing order
    async fn list_namespaces(&self) -> Result<Vec<String>, SourceError> {
        let mut request = ListRequest::new(ResourceKind::namespaces());
        let mut names = Vec::new();

        loop {
            let page = self.list(&request).await?;
            names.extend(page.items.iter().filter_map(|item| {
                item.get("metadata")
                    .and_then(|m| m.get("name"))
                    .and_then(|n| n.as_str())
                    .map(String::from)
            }));
            match page.continue_token {
                Some(token) if !token.is_empty() => request.continue_token = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }
}
