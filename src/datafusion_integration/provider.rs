// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! DataFusion TableProvider over one resource kind

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::catalog::Session;
use datafusion::datasource::{TableProvider, TableType};
use datafusion::error::Result;
use datafusion::logical_expr::TableProviderFilterPushDown;
use datafusion::physical_plan::ExecutionPlan;
use datafusion::prelude::Expr;
use tracing::{debug, info};

use crate::connector::{ColumnDescriptor, Connector};
use crate::kubernetes::ResourceKind;

use super::convert::to_arrow_schema;
use super::execution::KubeExecutionPlan;
use super::filter_extraction::{classify, extract_pushdown_filters};

/// A DataFusion TableProvider that lists one resource kind
pub struct KubeTableProvider {
    kind: ResourceKind,
    connector: Arc<Connector>,
    columns: Arc<[ColumnDescriptor]>,
    schema: SchemaRef,
}

impl KubeTableProvider {
    /// Derive the table's columns and build its provider
    pub async fn try_new(kind: ResourceKind, connector: Arc<Connector>) -> crate::error::Result<Self> {
        let columns = connector.typer().derive_columns(&kind).await?;
        let schema = to_arrow_schema(&columns);

        Ok(Self {
            kind,
            connector,
            columns,
            schema,
        })
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }
}

impl std::fmt::Debug for KubeTableProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTableProvider")
            .field("table", &self.kind.table_identity().to_string())
            .field("columns", &self.columns.len())
            .finish()
    }
}

#[async_trait]
impl TableProvider for KubeTableProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn table_type(&self) -> TableType {
        TableType::Base
    }

    fn supports_filters_pushdown(
        &self,
        filters: &[&Expr],
    ) -> Result<Vec<TableProviderFilterPushDown>> {
        let split_by_namespace = self.connector.planner().split_by_namespace();
        Ok(filters
            .iter()
            .map(|f| classify(&self.kind, f, split_by_namespace))
            .collect())
    }

    async fn scan(
        &self,
        _state: &dyn Session,
        projection: Option<&Vec<usize>>,
        filters: &[Expr],
        _limit: Option<usize>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        let table = self.kind.table_identity();
        let pushdown = extract_pushdown_filters(&self.kind, filters);

        if !pushdown.is_empty() {
            debug!(table = %table, filters = ?pushdown, "Pushing down filters to K8s API");
        }

        let splits = self.connector.plan(&self.kind, &pushdown).await?;

        let columns: Vec<ColumnDescriptor> = match projection {
            Some(indices) => indices
                .iter()
                .filter_map(|&i| self.columns.get(i).cloned())
                .collect(),
            None => self.columns.to_vec(),
        };
        let schema = match projection {
            Some(indices) => Arc::new(self.schema.project(indices)?),
            None => self.schema.clone(),
        };

        info!(
            table = %table,
            splits = splits.len(),
            columns = columns.len(),
            "Planning K8s scan"
        );

        Ok(Arc::new(KubeExecutionPlan::new(
            table,
            splits,
            columns,
            schema,
            self.connector.clone(),
        )))
    }
}
