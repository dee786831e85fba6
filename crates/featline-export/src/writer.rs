//! Chunk writers for CSV, JSON-lines and Parquet output with atomic commit

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use featline_core::codec::header_union;
use featline_core::{AtomicFile, ErrorKind, Record, Value};
use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use rustc_hash::FxHashSet;

use crate::error::ExportError;
use crate::job::ExportFormat;
use crate::transform::RowRejection;

/// ZSTD level for compressed Parquet output
const PARQUET_ZSTD_LEVEL: i32 = 3;

/// Byte sink under the tmp file, optionally gzip-compressed.
enum Output {
    Plain(AtomicFile),
    Gzip(GzEncoder<AtomicFile>),
}

impl Output {
    fn open(path: &Path, gzip: bool) -> io::Result<Self> {
        let file = AtomicFile::create(path)?;
        Ok(if gzip {
            Self::Gzip(GzEncoder::new(file, GzLevel::default()))
        } else {
            Self::Plain(file)
        })
    }

    /// Finish compression and hand back the tmp file.
    fn into_file(self) -> io::Result<AtomicFile> {
        match self {
            Self::Plain(f) => Ok(f),
            Self::Gzip(enc) => enc.finish(),
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(f) => f.write(buf),
            Self::Gzip(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(f) => f.flush(),
            Self::Gzip(enc) => enc.flush(),
        }
    }
}

/// Parquet schema guessed from the first chunk.
#[derive(Debug)]
pub struct InferredSchema {
    pub schema: SchemaRef,
    /// Columns that were null throughout the first chunk. They are typed Utf8
    /// and take later values of any type in string form.
    pub untyped: FxHashSet<String>,
}

struct OpenParquet {
    writer: ArrowWriter<AtomicFile>,
    inferred: InferredSchema,
}

/// Parquet output; the schema is not known until the first non-empty chunk.
struct ParquetOutput {
    pending: Option<AtomicFile>,
    open: Option<OpenParquet>,
    props: WriterProperties,
}

impl ParquetOutput {
    fn open(&mut self, inferred: InferredSchema) -> Result<(), ExportError> {
        if let Some(file) = self.pending.take() {
            let writer =
                ArrowWriter::try_new(file, inferred.schema.clone(), Some(self.props.clone()))?;
            self.open = Some(OpenParquet { writer, inferred });
        }
        Ok(())
    }

    fn into_file(mut self, columns: &[String]) -> Result<AtomicFile, ExportError> {
        if self.open.is_none() {
            let fields: Vec<Field> = columns
                .iter()
                .map(|c| Field::new(c, DataType::Utf8, true))
                .collect();
            self.open(InferredSchema {
                schema: Arc::new(Schema::new(fields)),
                untyped: columns.iter().cloned().collect(),
            })?;
        }
        match self.open {
            Some(open) => Ok(open.writer.into_inner()?),
            None => Err(ExportError::Io(io::Error::other("parquet output already closed"))),
        }
    }
}

enum Encoder {
    Csv {
        writer: csv::Writer<Output>,
        header: Option<Vec<String>>,
    },
    JsonLines(Output),
    Parquet(ParquetOutput),
}

/// Streams chunks of rows into one output file.
///
/// Nothing appears at the final path until [`finish`](ChunkWriter::finish);
/// dropping an unfinished writer removes the tmp file.
pub struct ChunkWriter {
    encoder: Encoder,
    rows_written: usize,
}

impl ChunkWriter {
    pub fn create(path: &Path, format: ExportFormat, compress: bool) -> Result<Self, ExportError> {
        let encoder = match format {
            ExportFormat::Csv => Encoder::Csv {
                writer: csv::Writer::from_writer(Output::open(path, compress)?),
                header: None,
            },
            ExportFormat::Json => Encoder::JsonLines(Output::open(path, compress)?),
            ExportFormat::Parquet => {
                let compression = if compress {
                    let level = ZstdLevel::try_new(PARQUET_ZSTD_LEVEL)?;
                    Compression::ZSTD(level)
                } else {
                    Compression::UNCOMPRESSED
                };
                Encoder::Parquet(ParquetOutput {
                    pending: Some(AtomicFile::create(path)?),
                    open: None,
                    props: WriterProperties::builder()
                        .set_compression(compression)
                        .build(),
                })
            }
        };
        Ok(Self {
            encoder,
            rows_written: 0,
        })
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Append `rows`; rows that cannot be encoded are returned, not written.
    pub fn write_chunk(&mut self, rows: &[Record]) -> Result<Vec<RowRejection>, ExportError> {
        let mut rejected = Vec::new();
        if rows.is_empty() {
            return Ok(rejected);
        }
        match &mut self.encoder {
            Encoder::Csv { writer, header } => {
                let header = header.get_or_insert_with(|| header_union(rows));
                if self.rows_written == 0 {
                    writer.write_record(header.iter())?;
                }
                for row in rows {
                    writer.write_record(
                        header
                            .iter()
                            .map(|h| row.get(h).map(Value::to_online_string).unwrap_or_default()),
                    )?;
                }
                writer.flush()?;
                self.rows_written += rows.len();
            }
            Encoder::JsonLines(out) => {
                for row in rows {
                    serde_json::to_writer(&mut *out, row).map_err(io::Error::from)?;
                    out.write_all(b"\n")?;
                }
                self.rows_written += rows.len();
            }
            Encoder::Parquet(parquet) => {
                if parquet.open.is_none() {
                    parquet.open(infer_schema(rows))?;
                }
                if let Some(open) = parquet.open.as_mut() {
                    let mut accepted: Vec<&Record> = Vec::with_capacity(rows.len());
                    for row in rows {
                        match check_row(&open.inferred, row) {
                            Ok(()) => accepted.push(row),
                            Err(r) => rejected.push(r),
                        }
                    }
                    if !accepted.is_empty() {
                        let batch = build_batch(&open.inferred.schema, &accepted)?;
                        open.writer.write(&batch)?;
                    }
                    self.rows_written += accepted.len();
                }
            }
        }
        Ok(rejected)
    }

    /// Flush, publish the file and return its size in bytes.
    ///
    /// `columns` names the Parquet schema when no row was ever written.
    pub fn finish(self, columns: &[String]) -> Result<u64, ExportError> {
        let file = match self.encoder {
            Encoder::Csv { writer, .. } => writer
                .into_inner()
                .map_err(|e| ExportError::Io(e.into_error()))?
                .into_file()?,
            Encoder::JsonLines(out) => out.into_file()?,
            Encoder::Parquet(parquet) => parquet.into_file(columns)?,
        };
        Ok(file.commit()?)
    }
}

/// Column types from the first chunk: the first non-null value decides.
/// All-null columns become untyped Utf8.
pub fn infer_schema(rows: &[Record]) -> InferredSchema {
    let mut untyped = FxHashSet::default();
    let fields: Vec<Field> = header_union(rows)
        .into_iter()
        .map(|name| {
            let data_type = rows
                .iter()
                .filter_map(|r| r.get(&name))
                .find_map(|v| match v {
                    Value::Int(_) => Some(DataType::Int64),
                    Value::Float(_) => Some(DataType::Float64),
                    Value::Bool(_) => Some(DataType::Boolean),
                    Value::String(_) => Some(DataType::Utf8),
                    Value::Null => None,
                });
            let data_type = data_type.unwrap_or_else(|| {
                untyped.insert(name.clone());
                DataType::Utf8
            });
            Field::new(name, data_type, true)
        })
        .collect();
    InferredSchema {
        schema: Arc::new(Schema::new(fields)),
        untyped,
    }
}

fn fits(data_type: &DataType, value: &Value) -> bool {
    matches!(
        (data_type, value),
        (_, Value::Null)
            | (DataType::Int64, Value::Int(_))
            | (DataType::Float64, Value::Float(_) | Value::Int(_))
            | (DataType::Boolean, Value::Bool(_))
            | (DataType::Utf8, Value::String(_))
    )
}

fn check_row(inferred: &InferredSchema, row: &Record) -> Result<(), RowRejection> {
    for (name, value) in row.iter() {
        let field = inferred.schema.field_with_name(name).map_err(|_| {
            RowRejection::new(
                ErrorKind::Transform,
                format!("column '{name}' is not in the output schema"),
            )
        })?;
        if !inferred.untyped.contains(name) && !fits(field.data_type(), value) {
            return Err(RowRejection::new(
                ErrorKind::Transform,
                format!(
                    "value {value:?} in column '{name}' does not fit type {}",
                    field.data_type()
                ),
            ));
        }
    }
    Ok(())
}

fn build_batch(schema: &SchemaRef, rows: &[&Record]) -> Result<RecordBatch, ExportError> {
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|field| build_column(field, rows))
        .collect();
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn build_column(field: &Field, rows: &[&Record]) -> ArrayRef {
    let name = field.name();
    match field.data_type() {
        DataType::Int64 => Arc::new(
            rows.iter()
                .map(|r| match r.get(name) {
                    Some(Value::Int(i)) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(
            rows.iter()
                .map(|r| match r.get(name) {
                    Some(Value::Float(f)) => Some(*f),
                    Some(Value::Int(i)) => Some(*i as f64),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
        DataType::Boolean => Arc::new(
            rows.iter()
                .map(|r| match r.get(name) {
                    Some(Value::Bool(b)) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        _ => Arc::new(
            rows.iter()
                .map(|r| match r.get(name) {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(v.to_online_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}
