// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Record stream: lazily page through one split and yield typed rows
//!
//! Pages are fetched only when the consumer has drained the previous one.
//! The stream is finite and not restartable: once it has ended, failed or
//! been closed, every further pull returns `None`.

use futures::Stream;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::columns::{ColumnDescriptor, ColumnTyper};
use super::row::Row;
use super::splits::Split;
use crate::error::{Error, Result, SourceError};
use crate::kubernetes::{ListRequest, ResourceSource, SchemaCatalog};

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub page_size: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { page_size: 500 }
    }
}

/// Counters for one record stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub pages_fetched: usize,
    pub rows_emitted: usize,
    /// Malformed objects dropped while decoding
    pub objects_skipped: usize,
    /// Undecodable list responses; the split ends early after one
    pub pages_skipped: usize,
}

pub struct RecordStream {
    source: Arc<dyn ResourceSource>,
    catalog: Option<Arc<SchemaCatalog>>,
    typer: Option<Arc<ColumnTyper>>,
    split: Split,
    columns: Vec<ColumnDescriptor>,
    page_size: u32,
    buffer: VecDeque<Row>,
    /// Token for the next page; starts at the split's own token
    next_token: Option<String>,
    finished: bool,
    stats: StreamStats,
}

impl RecordStream {
    /// Open a stream over a split. No request is made until the first pull.
    pub fn open(
        source: Arc<dyn ResourceSource>,
        split: Split,
        columns: Vec<ColumnDescriptor>,
        options: StreamOptions,
    ) -> Self {
        Self {
            source,
            catalog: None,
            typer: None,
            next_token: split.continue_token.clone(),
            split,
            columns,
            page_size: options.page_size.max(1),
            buffer: VecDeque::new(),
            finished: false,
            stats: StreamStats::default(),
        }
    }

    /// Catalog to invalidate when the kind disappears mid-listing
    pub fn with_catalog(mut self, catalog: Arc<SchemaCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Column cache to drop the kind from when it disappears mid-listing
    pub fn with_typer(mut self, typer: Arc<ColumnTyper>) -> Self {
        self.typer = Some(typer);
        self
    }

    pub fn split(&self) -> &Split {
        &self.split
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Next row, fetching another page when the buffered one is drained
    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                self.stats.rows_emitted += 1;
                return Ok(Some(row));
            }
            if self.finished {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// All rows of the next non-empty page
    pub async fn next_page(&mut self) -> Result<Option<Vec<Row>>> {
        loop {
            if !self.buffer.is_empty() {
                let rows: Vec<Row> = self.buffer.drain(..).collect();
                self.stats.rows_emitted += rows.len();
                return Ok(Some(rows));
            }
            if self.finished {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Stop the stream and drop buffered rows. Idempotent.
    pub fn close(&mut self) {
        if !self.finished || !self.buffer.is_empty() {
            trace!(table = %self.split.table, namespace = ?self.split.namespace, "Closing record stream");
        }
        self.finished = true;
        self.buffer.clear();
        self.buffer.shrink_to_fit();
    }

    /// Adapt to a stream of pages
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Vec<Row>>> + Send {
        async_stream::try_stream! {
            while let Some(page) = self.next_page().await? {
                yield page;
            }
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let request = ListRequest {
            kind: self.split.kind.clone(),
            namespace: self.split.namespace.clone(),
            filters: self.split.filters(),
            continue_token: self.next_token.clone(),
            limit: Some(self.page_size),
        };

        let page = match self.source.list(&request).await {
            Ok(page) => page,
            Err(SourceError::Expired(reason)) => {
                self.finished = true;
                warn!(
                    table = %self.split.table,
                    namespace = ?self.split.namespace,
                    rows_delivered = self.stats.rows_emitted,
                    reason = %reason,
                    "Continuation token expired mid-listing"
                );
                return Err(Error::SplitExhaustedInconsistently {
                    table: self.split.table.to_string(),
                    namespace: self.split.namespace.clone(),
                    rows_delivered: self.stats.rows_emitted,
                });
            }
            Err(SourceError::NotFound(reason)) => {
                self.finished = true;
                debug!(
                    table = %self.split.table,
                    namespace = ?self.split.namespace,
                    reason = %reason,
                    "Resource kind no longer served, ending stream"
                );
                if let Some(catalog) = &self.catalog {
                    catalog.invalidate().await;
                }
                if let Some(typer) = &self.typer {
                    typer.invalidate(&self.split.kind).await;
                }
                return Ok(());
            }
            Err(SourceError::Malformed(reason)) => {
                // No continuation token to resume from, so the rest is lost
                self.finished = true;
                self.stats.pages_skipped += 1;
                warn!(
                    table = %self.split.table,
                    namespace = ?self.split.namespace,
                    rows_delivered = self.stats.rows_emitted,
                    reason = %reason,
                    "Skipping undecodable list response, ending split early"
                );
                return Ok(());
            }
            Err(e) => {
                self.finished = true;
                return Err(e.into());
            }
        };

        self.stats.pages_fetched += 1;

        for item in &page.items {
            match decode(item, &self.columns) {
                Ok(row) => self.buffer.push_back(row),
                Err(e) => {
                    self.stats.objects_skipped += 1;
                    warn!(
                        table = %self.split.table,
                        namespace = ?self.split.namespace,
                        error = %e,
                        "Skipping malformed object"
                    );
                }
            }
        }

        trace!(
            table = %self.split.table,
            namespace = ?self.split.namespace,
            page = self.stats.pages_fetched,
            rows = self.buffer.len(),
            "Fetched page"
        );

        match page.continue_token {
            Some(token) if !token.is_empty() => self.next_token = Some(token),
            _ => {
                self.next_token = None;
                self.finished = true;
                debug!(
                    table = %self.split.table,
                    namespace = ?self.split.namespace,
                    pages = self.stats.pages_fetched,
                    skipped = self.stats.objects_skipped,
                    "Split exhausted"
                );
            }
        }

        Ok(())
    }
}

fn decode(item: &serde_json::Value, columns: &[ColumnDescriptor]) -> Result<Row> {
    let object = item
        .as_object()
        .ok_or_else(|| Error::Decode(format!("expected an object, got {}", json_kind(item))))?;
    if let Some(metadata) = object.get("metadata")
        && !metadata.is_object()
    {
        return Err(Error::Decode(format!(
            "metadata must be an object, got {}",
            json_kind(metadata)
        )));
    }
    Ok(Row::from_object(item, columns))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
