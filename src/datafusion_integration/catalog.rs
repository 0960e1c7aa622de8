// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Catalog and schema providers backed by the discovered resource registry
//!
//! One DataFusion schema per API group (`core` for the legacy group). Names
//! and schemas come from a registry snapshot taken when the provider is built.
//! Table lookups inside a known schema go through the live catalog, so a kind
//! installed later in an existing group resolves. A new API group appears only
//! after `KubeSessionContext::refresh_tables` rebuilds the provider.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::catalog::{CatalogProvider, SchemaProvider};
use datafusion::datasource::TableProvider;
use datafusion::error::Result;
use tracing::debug;

use crate::connector::Connector;
use crate::error::Error;
use crate::kubernetes::ResourceRegistry;

use super::provider::KubeTableProvider;

/// Catalog whose schemas are API groups
pub struct KubeCatalogProvider {
    connector: Arc<Connector>,
    registry: Arc<ResourceRegistry>,
}

impl KubeCatalogProvider {
    /// Build over the current registry (discovering it if needed)
    pub async fn try_new(connector: Arc<Connector>) -> crate::error::Result<Self> {
        let registry = connector.catalog().registry().await?;
        Ok(Self {
            connector,
            registry,
        })
    }
}

impl fmt::Debug for KubeCatalogProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCatalogProvider")
            .field("tables", &self.registry.len())
            .finish()
    }
}

impl CatalogProvider for KubeCatalogProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema_names(&self) -> Vec<String> {
        self.registry.schemas().into_iter().collect()
    }

    fn schema(&self, name: &str) -> Option<Arc<dyn SchemaProvider>> {
        let name = name.to_lowercase();
        if !self.registry.schemas().contains(&name) {
            return None;
        }
        Some(Arc::new(KubeSchemaProvider {
            schema: name,
            connector: self.connector.clone(),
            registry: self.registry.clone(),
        }))
    }
}

/// Tables of one API group
pub struct KubeSchemaProvider {
    schema: String,
    connector: Arc<Connector>,
    registry: Arc<ResourceRegistry>,
}

impl fmt::Debug for KubeSchemaProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeSchemaProvider")
            .field("schema", &self.schema)
            .finish()
    }
}

#[async_trait]
impl SchemaProvider for KubeSchemaProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn table_names(&self) -> Vec<String> {
        self.registry
            .tables(&self.schema)
            .into_iter()
            .map(|id| id.table)
            .collect()
    }

    async fn table(&self, name: &str) -> Result<Option<Arc<dyn TableProvider>>> {
        let kind = match self.connector.catalog().get_table(&self.schema, name).await {
            Ok(kind) => kind,
            Err(Error::SchemaNotFound { .. }) => {
                debug!(schema = %self.schema, table = %name, "Table not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let provider = KubeTableProvider::try_new(kind, self.connector.clone()).await?;
        Ok(Some(Arc::new(provider)))
    }

    fn table_exist(&self, name: &str) -> bool {
        self.registry.get(&self.schema, name).is_some()
    }
}
