// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! DataFusion SessionContext setup for kubesql

use std::sync::Arc;

use datafusion::arrow::array::RecordBatch;
use datafusion::error::Result as DFResult;
use datafusion::execution::context::{SQLOptions, SessionContext};
use datafusion::prelude::SessionConfig;
use tracing::info;

use crate::config::ConnectorConfig;
use crate::connector::Connector;
use crate::kubernetes::KubeSource;

use super::catalog::KubeCatalogProvider;

/// Catalog name every API group schema lives under
pub const CATALOG_NAME: &str = "kubernetes";
/// Schema searched for unqualified table names
pub const DEFAULT_SCHEMA: &str = "core";

/// A wrapper around DataFusion's SessionContext configured for K8s queries
#[derive(Clone)]
pub struct KubeSessionContext {
    ctx: SessionContext,
    connector: Arc<Connector>,
}

impl KubeSessionContext {
    /// Create a session over an already wired connector
    pub async fn new(connector: Arc<Connector>) -> anyhow::Result<Self> {
        let ctx = Self::create_session_context(&connector).await?;
        Ok(Self { ctx, connector })
    }

    /// Connect to the cluster named by the config's kube context
    pub async fn connect(config: &ConnectorConfig) -> anyhow::Result<Self> {
        let source = KubeSource::connect(config).await?;
        let connector = Arc::new(Connector::new(Arc::new(source), config));
        Self::new(connector).await
    }

    async fn create_session_context(connector: &Arc<Connector>) -> anyhow::Result<SessionContext> {
        let config = SessionConfig::new()
            .with_information_schema(true)
            .with_default_catalog_and_schema(CATALOG_NAME, DEFAULT_SCHEMA);
        let mut ctx = SessionContext::new_with_config(config);

        // json_get_* functions for structured text columns
        datafusion_functions_json::register_all(&mut ctx)?;

        let catalog = KubeCatalogProvider::try_new(Arc::clone(connector)).await?;
        ctx.register_catalog(CATALOG_NAME, Arc::new(catalog));

        Ok(ctx)
    }

    /// Execute a read-only SQL query and collect the results
    pub async fn execute_sql(&self, sql: &str) -> DFResult<Vec<RecordBatch>> {
        let options = SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false);
        let df = self.ctx.sql_with_options(sql, options).await?;
        df.collect().await
    }

    /// Rediscover resource kinds, rederive columns and rebuild the catalog
    pub async fn refresh_tables(&mut self) -> anyhow::Result<()> {
        let registry = self.connector.refresh().await?;
        info!(tables = registry.len(), "Refreshed tables");
        self.ctx = Self::create_session_context(&self.connector).await?;
        Ok(())
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    pub fn session_context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Consume this wrapper and return the underlying DataFusion SessionContext
    pub fn into_session_context(self) -> SessionContext {
        self.ctx
    }
}
