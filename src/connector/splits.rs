// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Split planning: partition one table listing into independent fetch units
//!
//! Namespaced kinds are split per namespace. Pushed-down label and field
//! equality filters become API selectors on every split. Filters the planner
//! cannot use are ignored; the engine re-applies every filter, so narrowing
//! less than possible is always safe.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::kubernetes::discovery::{ResourceKind, TableIdentity};
use crate::kubernetes::field_selectors::{
    FIELD_SELECTOR_REGISTRY, is_label_key, is_label_value, selector_string,
};
use crate::kubernetes::{ApiFilters, ListRequest, ResourceSource};

/// Predicates the engine may hand to the planner (conjunctive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushdownFilter {
    NamespaceEquals(String),
    NamespaceIn(Vec<String>),
    LabelEquals { key: String, value: String },
    FieldEquals { path: String, value: String },
}

/// One independently fetchable slice of a table listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub table: TableIdentity,
    pub kind: ResourceKind,
    /// None lists all namespaces (or a cluster-scoped collection)
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Listing resumes from this token instead of the beginning
    pub continue_token: Option<String>,
}

impl Split {
    fn new(kind: &ResourceKind, namespace: Option<String>, filters: &ApiFilters) -> Self {
        Self {
            table: kind.table_identity(),
            kind: kind.clone(),
            namespace,
            label_selector: filters.label_selector.clone(),
            field_selector: filters.field_selector.clone(),
            continue_token: None,
        }
    }

    pub fn filters(&self) -> ApiFilters {
        ApiFilters {
            label_selector: self.label_selector.clone(),
            field_selector: self.field_selector.clone(),
        }
    }

    /// The list request for the first page of this split
    pub fn list_request(&self, page_size: u32) -> ListRequest {
        ListRequest {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            filters: self.filters(),
            continue_token: self.continue_token.clone(),
            limit: Some(page_size),
        }
    }
}

pub struct SplitPlanner {
    source: Arc<dyn ResourceSource>,
    split_by_namespace: bool,
}

impl SplitPlanner {
    pub fn new(source: Arc<dyn ResourceSource>, split_by_namespace: bool) -> Self {
        Self {
            source,
            split_by_namespace,
        }
    }

    pub fn split_by_namespace(&self) -> bool {
        self.split_by_namespace
    }

    pub async fn plan(&self, kind: &ResourceKind, filters: &[PushdownFilter]) -> Result<Vec<Split>> {
        let api_filters = api_filters(kind, filters);

        let splits = if !kind.namespaced {
            vec![Split::new(kind, None, &api_filters)]
        } else {
            match namespace_constraint(filters) {
                // Contradictory namespace filters match nothing
                Some(namespaces) if namespaces.is_empty() => Vec::new(),
                Some(namespaces) if namespaces.len() == 1 || self.split_by_namespace => namespaces
                    .into_iter()
                    .map(|ns| Split::new(kind, Some(ns), &api_filters))
                    .collect(),
                Some(_) => vec![Split::new(kind, None, &api_filters)],
                None if self.split_by_namespace => {
                    let namespaces: BTreeSet<String> =
                        self.source.list_namespaces().await?.into_iter().collect();
                    namespaces
                        .into_iter()
                        .map(|ns| Split::new(kind, Some(ns), &api_filters))
                        .collect()
                }
                None => vec![Split::new(kind, None, &api_filters)],
            }
        };

        debug!(
            table = %kind.table_identity(),
            splits = splits.len(),
            label_selector = ?api_filters.label_selector,
            field_selector = ?api_filters.field_selector,
            "Planned splits"
        );

        Ok(splits)
    }
}

/// Intersection of all namespace filters, or None when unconstrained
fn namespace_constraint(filters: &[PushdownFilter]) -> Option<BTreeSet<String>> {
    let mut constraint: Option<BTreeSet<String>> = None;
    for filter in filters {
        let allowed: BTreeSet<String> = match filter {
            PushdownFilter::NamespaceEquals(ns) => BTreeSet::from([ns.clone()]),
            PushdownFilter::NamespaceIn(list) => list.iter().cloned().collect(),
            _ => continue,
        };
        constraint = Some(match constraint {
            Some(current) => current.intersection(&allowed).cloned().collect(),
            None => allowed,
        });
    }
    constraint
}

fn api_filters(kind: &ResourceKind, filters: &[PushdownFilter]) -> ApiFilters {
    let mut labels: Vec<(&str, &str)> = Vec::new();
    let mut fields: Vec<(&str, &str)> = Vec::new();

    for filter in filters {
        match filter {
            PushdownFilter::LabelEquals { key, value }
                if is_label_key(key) && is_label_value(value) =>
            {
                let requirement = (key.as_str(), value.as_str());
                if !labels.contains(&requirement) {
                    labels.push(requirement);
                }
            }
            PushdownFilter::FieldEquals { path, value }
                if FIELD_SELECTOR_REGISTRY.is_supported(kind, path) =>
            {
                let requirement = (path.as_str(), value.as_str());
                if !fields.contains(&requirement) {
                    fields.push(requirement);
                }
            }
            _ => {}
        }
    }

    ApiFilters {
        label_selector: selector_string(labels),
        field_selector: selector_string(fields),
    }
}
