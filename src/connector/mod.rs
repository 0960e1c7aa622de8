//! Resource-to-table translation pipeline
//!
//! Schema catalog → column typing → split planning → record streams.

pub mod columns;
pub mod records;
pub mod row;
pub mod splits;

use std::sync::Arc;

pub use columns::{ColumnDescriptor, ColumnHandle, ColumnTyper};
pub use records::{RecordStream, StreamOptions, StreamStats};
pub use row::{ColumnType, Row, Value};
pub use splits::{PushdownFilter, Split, SplitPlanner};

use crate::config::ConnectorConfig;
use crate::error::Result;
use crate::kubernetes::{ResourceKind, ResourceRegistry, ResourceSource, SchemaCatalog};

/// The pipeline components wired to one resource source
pub struct Connector {
    source: Arc<dyn ResourceSource>,
    catalog: Arc<SchemaCatalog>,
    typer: Arc<ColumnTyper>,
    planner: SplitPlanner,
    options: StreamOptions,
}

impl Connector {
    pub fn new(source: Arc<dyn ResourceSource>, config: &ConnectorConfig) -> Self {
        Self {
            catalog: Arc::new(SchemaCatalog::new(source.clone(), config.catalog_ttl())),
            typer: Arc::new(ColumnTyper::new(source.clone(), config.max_flatten_depth)),
            planner: SplitPlanner::new(source.clone(), config.split_by_namespace),
            options: StreamOptions {
                page_size: config.page_size,
            },
            source,
        }
    }

    pub fn source(&self) -> &Arc<dyn ResourceSource> {
        &self.source
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn typer(&self) -> &Arc<ColumnTyper> {
        &self.typer
    }

    pub fn planner(&self) -> &SplitPlanner {
        &self.planner
    }

    pub fn stream_options(&self) -> StreamOptions {
        self.options
    }

    /// Rediscover resource kinds and drop every cached column set
    pub async fn refresh(&self) -> Result<Arc<ResourceRegistry>> {
        let registry = self.catalog.refresh().await?;
        self.typer.invalidate_all().await;
        Ok(registry)
    }

    /// Drop the cached registry and columns; the next lookup rediscovers
    pub async fn invalidate(&self) {
        self.catalog.invalidate().await;
        self.typer.invalidate_all().await;
    }

    /// Plan the splits of one table
    pub async fn plan(&self, kind: &ResourceKind, filters: &[PushdownFilter]) -> Result<Vec<Split>> {
        self.planner.plan(kind, filters).await
    }

    /// Open a record stream over a split, projecting the given columns
    pub async fn open(&self, split: Split, handles: &[ColumnHandle]) -> Result<RecordStream> {
        let columns = self.typer.resolve_handles(&split.kind, handles).await?;
        Ok(self.open_columns(split, columns))
    }

    /// Open a record stream with already resolved columns
    pub fn open_columns(&self, split: Split, columns: Vec<ColumnDescriptor>) -> RecordStream {
        RecordStream::open(self.source.clone(), split, columns, self.options)
            .with_catalog(self.catalog.clone())
            .with_typer(self.typer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::SchemaDocument;
    use crate::kubernetes::memory::MemorySource;
    use serde_json::json;

    fn deployments() -> ResourceKind {
        ResourceKind::new("apps", "v1", "Deployment", "deployments", true)
    }

    #[tokio::test]
    async fn test_end_to_end_through_handles() {
        let source = Arc::new(
            MemorySource::new()
                .with_kind(deployments())
                .with_schema(
                    &deployments(),
                    SchemaDocument::new(json!({
                        "type": "object",
                        "properties": {
                            "spec": { "type": "object", "properties": { "replicas": { "type": "integer" } } },
                            "metadata": { "type": "object" }
                        }
                    })),
                )
                .with_object(
                    &deployments(),
                    json!({ "metadata": { "name": "web", "namespace": "a", "labels": { "tier": "fe", "app": "web" } }, "spec": { "replicas": 3 } }),
                ),
        );
        let connector = Connector::new(source, &ConnectorConfig::default());

        let kind = connector.catalog().get_table("apps", "deployments").await.unwrap();
        let handles = connector.typer().column_handles(&kind).await.unwrap();
        let wanted: Vec<ColumnHandle> = handles
            .into_iter()
            .filter(|h| h.name == "spec.replicas" || h.name == "metadata.labels")
            .collect();
        assert_eq!(wanted[0].name, "spec.replicas");
        assert_eq!(wanted[1].name, "metadata.labels");

        let splits = connector.plan(&kind, &[]).await.unwrap();
        assert_eq!(splits.len(), 1);

        let mut stream = connector.open(splits[0].clone(), &wanted).await.unwrap();
        let row = stream.next().await.unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Integer(3)));
        assert_eq!(
            row.get(1),
            Some(&Value::StructuredText(r#"{"app":"web","tier":"fe"}"#.to_string()))
        );
        assert!(stream.next().await.unwrap().is_none());
    }
}
