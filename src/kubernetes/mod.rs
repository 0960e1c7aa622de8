mod client;
pub mod discovery;
pub mod field_selectors;
#[cfg(test)]
pub(crate) mod memory;
pub mod openapi;
pub mod source;

use serde::{Deserialize, Serialize};

pub use client::KubeSource;
pub use discovery::{ResourceKind, ResourceRegistry, SchemaCatalog, TableIdentity};
pub use source::{ListRequest, Page, ResourceSource, SchemaDocument};

/// Parameters to push down to the Kubernetes API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFilters {
    /// Label selector string (e.g., "app=nginx,version=v1")
    pub label_selector: Option<String>,
    /// Field selector string (e.g., "status.phase=Running")
    pub field_selector: Option<String>,
}
