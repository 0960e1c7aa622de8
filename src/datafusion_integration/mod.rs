// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! DataFusion integration for kubesql
//!
//! Binds the connector pipeline to DataFusion: API groups become schemas,
//! resource kinds become tables, splits become partitions. Full SQL support
//! (JOINs, aggregations, subqueries) comes from the engine, which re-applies
//! every filter the connector could not narrow the listing with.

mod catalog;
mod context;
mod convert;
mod execution;
mod filter_extraction;
mod provider;

pub use catalog::{KubeCatalogProvider, KubeSchemaProvider};
pub use context::{CATALOG_NAME, DEFAULT_SCHEMA, KubeSessionContext};
pub use convert::{arrow_data_type, rows_to_record_batch, to_arrow_schema};
pub use execution::KubeExecutionPlan;
pub use filter_extraction::{classify, extract_pushdown_filters};
pub use provider::KubeTableProvider;
