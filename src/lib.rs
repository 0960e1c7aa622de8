// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! kubesql: live Kubernetes resources as SQL tables
//!
//! Every listable resource kind the API server advertises becomes a table.
//! The API group is the schema (`core` for the legacy group), the lowercase
//! plural is the table name and the lowercase kind name is an alias. Columns
//! are derived from the kind's OpenAPI schema by flattening nested objects
//! into dotted names (`spec.replicas`, `metadata.labels`) up to a depth bound;
//! maps, arrays and anything deeper are exposed as canonical JSON text.
//!
//! The pipeline has four stages, each usable on its own:
//!
//! - [`kubernetes::SchemaCatalog`] discovers kinds and resolves table names
//! - [`connector::ColumnTyper`] derives ordered, typed columns per kind
//! - [`connector::SplitPlanner`] partitions a listing (one split per
//!   namespace) and turns equality filters into API selectors
//! - [`connector::RecordStream`] pages through one split lazily
//!
//! [`datafusion_integration::KubeSessionContext`] wires them into DataFusion.
//!
//! # Consistency
//!
//! Results are rows-at-scan-time: each split is listed page by page from a
//! live API server, so a query observes an eventually consistent,
//! non-transactional view. Objects created or deleted while a query runs may
//! or may not appear, and different splits are not listed at the same
//! instant. When the server invalidates a continuation token mid-listing the
//! split fails with [`Error::SplitExhaustedInconsistently`] instead of
//! silently restarting.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use kubesql::{ConnectorConfig, KubeSessionContext};
//!
//! let ctx = KubeSessionContext::connect(&ConnectorConfig::load()?).await?;
//! let batches = ctx
//!     .execute_sql(r#"SELECT "metadata.name" FROM core.pods WHERE "metadata.namespace" = 'default'"#)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod datafusion_integration;
pub mod error;
pub mod kubernetes;

pub use config::ConnectorConfig;
pub use connector::{
    ColumnDescriptor, ColumnHandle, ColumnType, Connector, PushdownFilter, RecordStream, Row,
    Split, Value,
};
pub use datafusion_integration::KubeSessionContext;
pub use error::{Error, Result, SourceError};
