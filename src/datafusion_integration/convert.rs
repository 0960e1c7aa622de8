// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Conversion of typed rows to Arrow RecordBatches
//!
//! - Timestamps are Arrow `Timestamp(Millisecond)` (Kubernetes times are UTC)
//! - Integers are Int64, floats Float64, booleans Boolean
//! - Strings and structured text are Utf8; use `json_get_*` functions on
//!   structured columns, e.g. `json_get_str("metadata.labels", 'app')`

use std::sync::Arc;

use datafusion::arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, RecordBatchOptions,
    StringBuilder, TimestampMillisecondBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use datafusion::error::Result;

use crate::connector::{ColumnDescriptor, ColumnType, Row, Value};

/// Map a column type to its Arrow DataType
pub fn arrow_data_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Boolean => DataType::Boolean,
        ColumnType::Integer => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Millisecond, None),
        ColumnType::String | ColumnType::StructuredText => DataType::Utf8,
    }
}

/// Arrow schema for a column set; every column is nullable
pub fn to_arrow_schema(columns: &[ColumnDescriptor]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|col| Field::new(&col.name, arrow_data_type(col.column_type), true))
        .collect();

    Arc::new(Schema::new(fields))
}

/// Convert rows built for `schema`'s columns into a RecordBatch
///
/// Column `i` of the schema is read from position `i` of every row.
pub fn rows_to_record_batch(schema: SchemaRef, rows: &[Row]) -> Result<RecordBatch> {
    // Projections like COUNT(*) carry no columns, only a row count
    if schema.fields().is_empty() {
        let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
        return Ok(RecordBatch::try_new_with_options(schema, vec![], &options)?);
    }

    let arrays: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| {
            ColumnBuilder {
                index,
                data_type: field.data_type(),
                rows,
            }
            .build()
        })
        .collect();

    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Builds one Arrow array from one row position
struct ColumnBuilder<'a> {
    index: usize,
    data_type: &'a DataType,
    rows: &'a [Row],
}

impl<'a> ColumnBuilder<'a> {
    fn build(self) -> ArrayRef {
        match self.data_type {
            DataType::Boolean => self.build_boolean_array(),
            DataType::Int64 => self.build_integer_array(),
            DataType::Float64 => self.build_float_array(),
            DataType::Timestamp(_, _) => self.build_timestamp_array(),
            _ => self.build_string_array(),
        }
    }

    fn values(&self) -> impl Iterator<Item = &'a Value> + 'a {
        let index = self.index;
        self.rows
            .iter()
            .map(move |row| row.get(index).unwrap_or(&Value::Null))
    }

    fn build_boolean_array(&self) -> ArrayRef {
        let mut builder = BooleanBuilder::with_capacity(self.rows.len());
        for value in self.values() {
            match value {
                Value::Boolean(b) => builder.append_value(*b),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }

    fn build_integer_array(&self) -> ArrayRef {
        let mut builder = Int64Builder::with_capacity(self.rows.len());
        for value in self.values() {
            match value {
                Value::Integer(i) => builder.append_value(*i),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }

    fn build_float_array(&self) -> ArrayRef {
        let mut builder = Float64Builder::with_capacity(self.rows.len());
        for value in self.values() {
            match value {
                Value::Float(f) => builder.append_value(*f),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }

    fn build_timestamp_array(&self) -> ArrayRef {
        let mut builder = TimestampMillisecondBuilder::with_capacity(self.rows.len());
        for value in self.values() {
            match value {
                Value::Timestamp(ts) => builder.append_value(ts.timestamp_millis()),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }

    fn build_string_array(&self) -> ArrayRef {
        // Estimate capacity from a small sample
        let sample_size = self.rows.len().min(10);
        let sample_len: usize = self
            .values()
            .take(sample_size)
            .map(|v| match v {
                Value::String(s) | Value::StructuredText(s) => s.len(),
                _ => 0,
            })
            .sum();
        let avg_len = if sample_size > 0 {
            sample_len / sample_size
        } else {
            32
        };

        let mut builder = StringBuilder::with_capacity(self.rows.len(), avg_len * self.rows.len());
        for value in self.values() {
            match value {
                Value::String(s) | Value::StructuredText(s) => builder.append_value(s),
                _ => builder.append_null(),
            }
        }
        Arc::new(builder.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use datafusion::arrow::array::{
        Array, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMillisecondArray,
    };

    fn column(name: &str, column_type: ColumnType) -> ColumnDescriptor {
        ColumnDescriptor::new(name.split('.').map(String::from).collect(), column_type)
    }

    #[test]
    fn test_to_arrow_schema() {
        let columns = vec![
            column("metadata.name", ColumnType::String),
            column("spec.replicas", ColumnType::Integer),
            column("metadata.creationTimestamp", ColumnType::Timestamp),
            column("metadata.labels", ColumnType::StructuredText),
        ];

        let schema = to_arrow_schema(&columns);
        assert_eq!(schema.fields().len(), 4);
        assert_eq!(schema.field(0).name(), "metadata.name");
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);
        assert_eq!(
            schema.field(2).data_type(),
            &DataType::Timestamp(TimeUnit::Millisecond, None)
        );
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);
        assert!(schema.fields().iter().all(|f| f.is_nullable()));
    }

    #[test]
    fn test_rows_to_record_batch() {
        let columns = vec![
            column("metadata.name", ColumnType::String),
            column("spec.replicas", ColumnType::Integer),
            column("spec.paused", ColumnType::Boolean),
            column("status.ratio", ColumnType::Float),
            column("metadata.creationTimestamp", ColumnType::Timestamp),
        ];
        let created = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let rows = vec![
            Row::new(vec![
                Value::String("web".into()),
                Value::Integer(3),
                Value::Boolean(false),
                Value::Float(0.5),
                Value::Timestamp(created),
            ]),
            Row::new(vec![Value::Null, Value::Null, Value::Null, Value::Null, Value::Null]),
        ];

        let batch = rows_to_record_batch(to_arrow_schema(&columns), &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let names = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "web");
        assert!(names.is_null(1));

        let replicas = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(replicas.value(0), 3);
        assert!(replicas.is_null(1));

        let paused = batch.column(2).as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(!paused.value(0));

        let ratio = batch.column(3).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(ratio.value(0), 0.5);

        let ts = batch
            .column(4)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        assert_eq!(ts.value(0), created.timestamp_millis());
        assert!(ts.is_null(1));
    }

    #[test]
    fn test_empty_projection_keeps_row_count() {
        let rows = vec![Row::new(vec![]), Row::new(vec![])];
        let batch = rows_to_record_batch(to_arrow_schema(&[]), &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 0);
    }
}
