//! Forward-only cursor over a materialized Parquet query result

use std::fs::File;
use std::path::Path;

use arrow::array::{Array, ArrayRef, AsArray, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::error::ArrowError;
use featline_core::{ErrorKind, ExportPage, Record, RemoteError, ResultCursor, Value};
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

pub struct ParquetResultCursor {
    columns: Vec<String>,
    reader: ParquetRecordBatchReader,
}

impl ParquetResultCursor {
    /// Open `path`, yielding pages of at most `page_size` rows.
    pub fn open(path: &Path, page_size: usize) -> Result<Self, RemoteError> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(result_error)?;
        let columns = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let reader = builder
            .with_batch_size(page_size.max(1))
            .build()
            .map_err(result_error)?;
        Ok(Self { columns, reader })
    }
}

impl ResultCursor for ParquetResultCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_page(&mut self) -> Result<Option<ExportPage>, RemoteError> {
        match self.reader.next() {
            None => Ok(None),
            Some(batch) => {
                let batch = batch.map_err(result_error)?;
                let rows = batch_to_records(&batch).map_err(result_error)?;
                Ok(Some(ExportPage { rows }))
            }
        }
    }
}

fn result_error(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::new(ErrorKind::QueryFailed, format!("reading query result: {e}"))
}

/// Convert a batch into records, one per row, columns in schema order.
///
/// Integers widen to `Int`, floats to `Float`; anything else but booleans is
/// rendered through Arrow's string cast.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<Record>, ArrowError> {
    let schema = batch.schema();
    let columns: Vec<Vec<Value>> = batch
        .columns()
        .iter()
        .map(column_values)
        .collect::<Result<_, _>>()?;

    let mut rows: Vec<Record> = (0..batch.num_rows())
        .map(|_| Record::with_capacity(columns.len()))
        .collect();
    for (field, values) in schema.fields().iter().zip(columns) {
        for (row, value) in rows.iter_mut().zip(values) {
            row.insert(field.name().as_str(), value);
        }
    }
    Ok(rows)
}

fn column_values(array: &ArrayRef) -> Result<Vec<Value>, ArrowError> {
    let data_type = array.data_type();
    let values = if data_type.is_integer() {
        let wide = cast(array, &DataType::Int64)?;
        wide.as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Int))
            .collect()
    } else if data_type.is_floating() {
        let wide = cast(array, &DataType::Float64)?;
        wide.as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Float))
            .collect()
    } else if *data_type == DataType::Boolean {
        array
            .as_boolean()
            .iter()
            .map(|v| v.map_or(Value::Null, Value::Bool))
            .collect()
    } else if *data_type == DataType::Null {
        vec![Value::Null; array.len()]
    } else {
        let text = cast(array, &DataType::Utf8)?;
        text.as_string::<i32>()
            .iter()
            .map(|v| v.map_or(Value::Null, |s| Value::String(s.to_string())))
            .collect()
    };
    Ok(values)
}
