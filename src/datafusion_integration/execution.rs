// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! ExecutionPlan that streams one record stream per split
//!
//! Each partition is one split. Pages are converted to RecordBatches as they
//! arrive, so nothing is listed until DataFusion polls a partition.
//!
//! # LIMIT Pushdown
//!
//! LIMIT pushdown is **disabled**. DataFusion's `with_fetch()` receives
//! `skip + fetch` when there's an OFFSET clause, so the plan can't tell
//! `LIMIT 10` from `LIMIT 10 OFFSET 10`. DataFusion's LimitExec handles both.

use std::any::Any;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::try_stream;
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::error::{DataFusionError, Result};
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::physical_expr::{EquivalenceProperties, Partitioning};
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::metrics::{
    Count, ExecutionPlanMetricsSet, MetricBuilder, MetricsSet, Time,
};
use datafusion::physical_plan::stream::RecordBatchStreamAdapter;
use datafusion::physical_plan::{DisplayAs, DisplayFormatType, ExecutionPlan, PlanProperties};
use futures::Stream;
use tracing::debug;

use crate::connector::{ColumnDescriptor, Connector, RecordStream, Split};
use crate::kubernetes::TableIdentity;

use super::convert::rows_to_record_batch;

/// Leaf plan over the splits of one table scan
pub struct KubeExecutionPlan {
    table: TableIdentity,
    /// One partition per split
    splits: Vec<Split>,
    /// Projected columns, in output order
    columns: Arc<Vec<ColumnDescriptor>>,
    schema: SchemaRef,
    connector: Arc<Connector>,
    plan_properties: PlanProperties,
    metrics: ExecutionPlanMetricsSet,
}

impl KubeExecutionPlan {
    pub fn new(
        table: TableIdentity,
        splits: Vec<Split>,
        columns: Vec<ColumnDescriptor>,
        schema: SchemaRef,
        connector: Arc<Connector>,
    ) -> Self {
        let partitioning = Partitioning::UnknownPartitioning(splits.len().max(1));
        let plan_properties = PlanProperties::new(
            EquivalenceProperties::new(schema.clone()),
            partitioning,
            EmissionType::Incremental,
            Boundedness::Bounded,
        );

        Self {
            table,
            splits,
            columns: Arc::new(columns),
            schema,
            connector,
            plan_properties,
            metrics: ExecutionPlanMetricsSet::new(),
        }
    }

    pub fn splits(&self) -> &[Split] {
        &self.splits
    }
}

impl fmt::Debug for KubeExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeExecutionPlan")
            .field("table", &self.table.to_string())
            .field("partitions", &self.splits.len())
            .finish()
    }
}

impl DisplayAs for KubeExecutionPlan {
    fn fmt_as(&self, t: DisplayFormatType, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match t {
            DisplayFormatType::Default
            | DisplayFormatType::Verbose
            | DisplayFormatType::TreeRender => {
                write!(
                    f,
                    "KubeExec: table={}, partitions={}",
                    self.table,
                    self.splits.len()
                )?;
                if let Some(selector) = self.splits.first().and_then(|s| s.label_selector.as_ref()) {
                    write!(f, ", labels={}", selector)?;
                }
                if let Some(selector) = self.splits.first().and_then(|s| s.field_selector.as_ref()) {
                    write!(f, ", fields={}", selector)?;
                }
                Ok(())
            }
        }
    }
}

impl ExecutionPlan for KubeExecutionPlan {
    fn name(&self) -> &str {
        "KubeExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn properties(&self) -> &PlanProperties {
        &self.plan_properties
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![]
    }

    fn with_new_children(
        self: Arc<Self>,
        children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        if children.is_empty() {
            Ok(self)
        } else {
            Err(DataFusionError::Internal(
                "KubeExecutionPlan has no children".to_string(),
            ))
        }
    }

    fn metrics(&self) -> Option<MetricsSet> {
        Some(self.metrics.clone_inner())
    }

    fn supports_limit_pushdown(&self) -> bool {
        // LIMIT N OFFSET M arrives as fetch=N+M
        false
    }

    fn with_fetch(&self, _fetch: Option<usize>) -> Option<Arc<dyn ExecutionPlan>> {
        None
    }

    fn execute(
        &self,
        partition: usize,
        _context: Arc<TaskContext>,
    ) -> Result<SendableRecordBatchStream> {
        // No splits (e.g. contradictory namespace filters): empty result
        if self.splits.is_empty() {
            return Ok(Box::pin(RecordBatchStreamAdapter::new(
                self.schema.clone(),
                futures::stream::empty(),
            )));
        }

        let split = self.splits.get(partition).cloned().ok_or_else(|| {
            DataFusionError::Internal(format!(
                "Partition {} out of range (max {})",
                partition,
                self.splits.len()
            ))
        })?;

        let metrics = PartitionMetrics {
            rows_fetched: MetricBuilder::new(&self.metrics).counter("rows_fetched", partition),
            pages_fetched: MetricBuilder::new(&self.metrics).counter("pages_fetched", partition),
            objects_skipped: MetricBuilder::new(&self.metrics)
                .counter("objects_skipped", partition),
            pages_skipped: MetricBuilder::new(&self.metrics).counter("pages_skipped", partition),
            fetch_time: MetricBuilder::new(&self.metrics).subset_time("fetch_time", partition),
        };

        debug!(
            table = %self.table,
            partition = partition,
            namespace = ?split.namespace,
            "Executing K8s partition"
        );

        let records = self
            .connector
            .open_columns(split, self.columns.as_ref().clone());
        let stream = stream_batches(records, self.schema.clone(), metrics);

        Ok(Box::pin(RecordBatchStreamAdapter::new(
            self.schema.clone(),
            stream,
        )))
    }
}

struct PartitionMetrics {
    rows_fetched: Count,
    pages_fetched: Count,
    objects_skipped: Count,
    pages_skipped: Count,
    fetch_time: Time,
}

/// Drive a record stream, yielding one RecordBatch per non-empty page
fn stream_batches(
    mut records: RecordStream,
    schema: SchemaRef,
    metrics: PartitionMetrics,
) -> Pin<Box<dyn Stream<Item = Result<RecordBatch>> + Send>> {
    let stream = try_stream! {
        let start = Instant::now();
        let mut seen = records.stats();

        loop {
            let page = records.next_page().await.map_err(DataFusionError::from)?;

            let stats = records.stats();
            metrics.pages_fetched.add(stats.pages_fetched - seen.pages_fetched);
            metrics.objects_skipped.add(stats.objects_skipped - seen.objects_skipped);
            metrics.pages_skipped.add(stats.pages_skipped - seen.pages_skipped);
            seen = stats;

            let Some(rows) = page else { break };
            metrics.rows_fetched.add(rows.len());

            debug!(
                table = %records.split().table,
                namespace = ?records.split().namespace,
                page_rows = rows.len(),
                total_rows = stats.rows_emitted,
                "Streaming page from K8s"
            );

            yield rows_to_record_batch(schema.clone(), &rows)?;
        }

        metrics.fetch_time.add_duration(start.elapsed());

        debug!(
            table = %records.split().table,
            namespace = ?records.split().namespace,
            total_rows = seen.rows_emitted,
            elapsed_ms = start.elapsed().as_millis(),
            "Completed streaming split"
        );
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::connector::ColumnType;
    use crate::kubernetes::ResourceKind;
    use crate::kubernetes::memory::MemorySource;
    use datafusion::arrow::array::{Array, StringArray};
    use datafusion::prelude::SessionContext;
    use futures::TryStreamExt;
    use serde_json::json;

    use super::super::convert::to_arrow_schema;

    fn pods() -> ResourceKind {
        ResourceKind::new("", "v1", "Pod", "pods", true)
    }

    fn connector(source: MemorySource) -> Arc<Connector> {
        let config = ConnectorConfig {
            page_size: 2,
            ..ConnectorConfig::default()
        };
        Arc::new(Connector::new(Arc::new(source), &config))
    }

    fn name_column() -> Vec<ColumnDescriptor> {
        vec![ColumnDescriptor::new(
            vec!["metadata".into(), "name".into()],
            ColumnType::String,
        )]
    }

    fn pod(name: &str, namespace: &str) -> serde_json::Value {
        json!({ "metadata": { "name": name, "namespace": namespace } })
    }

    async fn plan(connector: Arc<Connector>) -> KubeExecutionPlan {
        let splits = connector.plan(&pods(), &[]).await.unwrap();
        let columns = name_column();
        let schema = to_arrow_schema(&columns);
        KubeExecutionPlan::new(pods().table_identity(), splits, columns, schema, connector)
    }

    fn names(batches: &[RecordBatch]) -> Vec<String> {
        batches
            .iter()
            .flat_map(|b| {
                let array = b.column(0).as_any().downcast_ref::<StringArray>().unwrap();
                (0..array.len())
                    .map(|i| array.value(i).to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_one_partition_per_split() {
        let source = MemorySource::new()
            .with_kind(pods())
            .with_object(&pods(), pod("a1", "a"))
            .with_object(&pods(), pod("b1", "b"))
            .with_object(&pods(), pod("b2", "b"))
            .with_object(&pods(), pod("b3", "b"));
        let plan = plan(connector(source)).await;
        assert_eq!(plan.properties().output_partitioning().partition_count(), 2);

        let task = SessionContext::new().task_ctx();
        let first: Vec<RecordBatch> = plan.execute(0, task.clone()).unwrap().try_collect().await.unwrap();
        assert_eq!(names(&first), vec!["a1"]);

        // Page size 2: two batches for namespace b
        let second: Vec<RecordBatch> = plan.execute(1, task).unwrap().try_collect().await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(names(&second), vec!["b1", "b2", "b3"]);

        let metrics = plan.metrics().unwrap();
        assert_eq!(metrics.sum_by_name("rows_fetched").map(|m| m.as_usize()), Some(4));
    }

    #[tokio::test]
    async fn test_empty_splits_yield_empty_stream() {
        let connector = connector(MemorySource::new().with_kind(pods()));
        let columns = name_column();
        let schema = to_arrow_schema(&columns);
        let plan = KubeExecutionPlan::new(
            pods().table_identity(),
            vec![],
            columns,
            schema,
            connector,
        );
        assert_eq!(plan.properties().output_partitioning().partition_count(), 1);

        let batches: Vec<RecordBatch> = plan
            .execute(0, SessionContext::new().task_ctx())
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn test_partition_out_of_range() {
        let source = MemorySource::new()
            .with_kind(pods())
            .with_object(&pods(), pod("a1", "a"));
        let plan = plan(connector(source)).await;
        assert!(plan.execute(5, SessionContext::new().task_ctx()).is_err());
    }

    #[tokio::test]
    async fn test_expired_token_fails_partition() {
        let source = MemorySource::new()
            .with_kind(pods())
            .with_object(&pods(), pod("a1", "a"))
            .with_object(&pods(), pod("a2", "a"))
            .with_object(&pods(), pod("a3", "a"))
            .expire_tokens_from_page(1);
        let plan = plan(connector(source)).await;

        let result: Result<Vec<RecordBatch>> = plan
            .execute(0, SessionContext::new().task_ctx())
            .unwrap()
            .try_collect()
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalidated mid-stream after 2 rows"), "{}", err);
    }

    #[tokio::test]
    async fn test_display() {
        let source = MemorySource::new()
            .with_kind(pods())
            .with_object(&pods(), pod("a1", "a"));
        let plan = plan(connector(source)).await;
        let display = datafusion::physical_plan::displayable(&plan).one_line().to_string();
        assert!(display.starts_with("KubeExec: table=core.pods, partitions=1"), "{}", display);
    }
}
