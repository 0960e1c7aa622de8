// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error taxonomy for the translation pipeline
//!
//! Everything except [`Error::Decode`] aborts the current operation and is
//! surfaced to the engine. Decode errors are recovered per object inside the
//! record stream.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Discovery or listing endpoint unreachable, or authentication failed
    #[error("resource source unavailable: {0}")]
    SourceUnavailable(String),

    /// The requested table does not exist (or no longer exists)
    #[error("table '{schema}.{table}' not found")]
    SchemaNotFound { schema: String, table: String },

    /// A continuation token was invalidated between two pages of one split
    #[error(
        "listing of '{table}'{} was invalidated mid-stream after {rows_delivered} rows; re-plan the query",
        namespace.as_ref().map(|ns| format!(" in namespace '{}'", ns)).unwrap_or_default()
    )]
    SplitExhaustedInconsistently {
        table: String,
        namespace: Option<String>,
        rows_delivered: usize,
    },

    /// Malformed object returned by the source
    #[error("malformed object: {0}")]
    Decode(String),

    /// A column handle that does not belong to the table it was used with
    #[error("invalid column handle {index} ('{name}') for table '{table}'")]
    InvalidColumnHandle {
        table: String,
        index: usize,
        name: String,
    },
}

/// Errors reported by a [`ResourceSource`](crate::kubernetes::ResourceSource)
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure, auth failure or retries exhausted
    #[error("{0}")]
    Unavailable(String),

    /// The continuation token is no longer valid (HTTP 410 Gone)
    #[error("continuation token expired: {0}")]
    Expired(String),

    /// The resource kind is not served anymore (HTTP 404)
    #[error("not found: {0}")]
    NotFound(String),

    /// The source answered with something that cannot be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Malformed(msg) => Error::Decode(msg),
            other => Error::SourceUnavailable(other.to_string()),
        }
    }
}

impl From<Error> for datafusion::error::DataFusionError {
    fn from(err: Error) -> Self {
        match err {
            Error::SchemaNotFound { .. } | Error::InvalidColumnHandle { .. } => {
                datafusion::error::DataFusionError::Plan(err.to_string())
            }
            other => datafusion::error::DataFusionError::External(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_exhausted_message_with_namespace() {
        let err = Error::SplitExhaustedInconsistently {
            table: "pods".to_string(),
            namespace: Some("kube-system".to_string()),
            rows_delivered: 500,
        };
        let msg = err.to_string();
        assert!(msg.contains("'pods'"));
        assert!(msg.contains("namespace 'kube-system'"));
        assert!(msg.contains("500 rows"));
    }

    #[test]
    fn test_split_exhausted_message_cluster_scoped() {
        let err = Error::SplitExhaustedInconsistently {
            table: "nodes".to_string(),
            namespace: None,
            rows_delivered: 0,
        };
        assert!(!err.to_string().contains("namespace"));
    }

    #[test]
    fn test_source_error_conversion() {
        let err: Error = SourceError::Unavailable("connection refused".to_string()).into();
        assert!(matches!(err, Error::SourceUnavailable(_)));

        let err: Error = SourceError::Malformed("not json".to_string()).into();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_schema_not_found_is_plan_error() {
        let err: datafusion::error::DataFusionError = Error::SchemaNotFound {
            schema: "apps".to_string(),
            table: "widgets".to_string(),
        }
        .into();
        assert!(matches!(err, datafusion::error::DataFusionError::Plan(_)));
    }
}
