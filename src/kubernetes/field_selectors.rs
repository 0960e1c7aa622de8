// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Which field selectors the API server accepts, per resource kind
//!
//! Kubernetes does not expose this through discovery, so the table below
//! follows the documented field selector support:
//! https://kubernetes.io/docs/concepts/overview/working-with-objects/field-selectors/#supported-fields
//!
//! `metadata.name` works for every kind, including custom resources.
//! `metadata.namespace` is omitted since namespaces are handled by scoping
//! the list call instead.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::discovery::ResourceKind;

/// Field path accepted for every kind
pub const UNIVERSAL_FIELD: &str = "metadata.name";

pub static FIELD_SELECTOR_REGISTRY: LazyLock<FieldSelectorRegistry> =
    LazyLock::new(FieldSelectorRegistry::new);

/// Label name segment and label value: at most 63 characters, alphanumeric
/// at both ends, `-`, `_` and `.` inside
static LABEL_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?$").unwrap()
});

/// Optional label key prefix (DNS subdomain)
static LABEL_PREFIX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").unwrap());

/// Whether `key` is a valid label key, e.g. `app` or `app.kubernetes.io/name`
pub fn is_label_key(key: &str) -> bool {
    match key.split_once('/') {
        Some((prefix, name)) => {
            prefix.len() <= 253
                && LABEL_PREFIX_PATTERN.is_match(prefix)
                && LABEL_NAME_PATTERN.is_match(name)
        }
        None => LABEL_NAME_PATTERN.is_match(key),
    }
}

/// Whether `value` can appear in an equality label selector unescaped
///
/// Empty values are valid labels but are not pushed down.
pub fn is_label_value(value: &str) -> bool {
    LABEL_NAME_PATTERN.is_match(value)
}

/// Supported field selector paths keyed by (API group, plural)
pub struct FieldSelectorRegistry {
    registry: HashMap<(&'static str, &'static str), Vec<&'static str>>,
}

impl FieldSelectorRegistry {
    /// Kind-specific paths, not including [`UNIVERSAL_FIELD`]
    pub fn kind_fields(&self, kind: &ResourceKind) -> &[&'static str] {
        self.registry
            .iter()
            .find(|((group, plural), _)| *group == kind.group && *plural == kind.plural)
            .map(|(_, fields)| fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_supported(&self, kind: &ResourceKind, field_path: &str) -> bool {
        field_path == UNIVERSAL_FIELD || self.kind_fields(kind).contains(&field_path)
    }

    fn new() -> Self {
        let mut registry = HashMap::new();

        registry.insert(
            ("", "pods"),
            vec![
                "spec.nodeName",
                "spec.restartPolicy",
                "spec.schedulerName",
                "spec.serviceAccountName",
                "spec.hostNetwork",
                "status.phase",
                "status.podIP",
                "status.nominatedNodeName",
            ],
        );

        registry.insert(
            ("", "events"),
            vec![
                "involvedObject.kind",
                "involvedObject.namespace",
                "involvedObject.name",
                "involvedObject.uid",
                "involvedObject.apiVersion",
                "involvedObject.resourceVersion",
                "involvedObject.fieldPath",
                "reason",
                "reportingComponent",
                "source",
                "type",
            ],
        );

        registry.insert(("", "secrets"), vec!["type"]);
        registry.insert(("", "namespaces"), vec!["status.phase"]);
        registry.insert(("", "replicationcontrollers"), vec!["status.replicas"]);
        registry.insert(("", "nodes"), vec!["spec.unschedulable"]);
        registry.insert(("apps", "replicasets"), vec!["status.replicas"]);
        registry.insert(("batch", "jobs"), vec!["status.successful"]);
        registry.insert(
            ("certificates.k8s.io", "certificatesigningrequests"),
            vec!["spec.signerName"],
        );

        Self { registry }
    }
}

/// Render `path=value` requirements as a field selector string
pub fn selector_string<'a>(requirements: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<String> {
    let parts: Vec<String> = requirements
        .into_iter()
        .map(|(path, value)| format!("{}={}", path, value))
        .collect();
    (!parts.is_empty()).then(|| parts.join(","))
}
