//! Record codec between JSON, JSON-lines or CSV files and ordered records

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use serde::Deserialize;

use crate::record::{Record, Value};
use crate::sink::AtomicFile;

/// File formats understood for transfer input and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// A JSON array of objects, or a single object
    Json,
    /// One JSON object per line
    JsonLines,
    /// Header row plus one record per row
    Csv,
}

impl FileFormat {
    /// Detect format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, CodecError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::JsonLines),
            "csv" => Ok(Self::Csv),
            other => Err(CodecError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug)]
pub enum CodecError {
    Io(io::Error),
    UnsupportedFormat(String),
    Parse { line: Option<usize>, message: String },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::UnsupportedFormat(ext) => write!(
                f,
                "unsupported file extension '{ext}' (expected .json, .jsonl, .ndjson or .csv)"
            ),
            Self::Parse {
                line: Some(line),
                message,
            } => write!(f, "parse error at line {line}: {message}"),
            Self::Parse {
                line: None,
                message,
            } => write!(f, "parse error: {message}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for CodecError {
    fn from(e: csv::Error) -> Self {
        let line = e.position().map(|p| p.line() as usize);
        Self::Parse {
            line,
            message: e.to_string(),
        }
    }
}

/// One input element: a record, or something that is not an object.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEntry {
    Record(Record),
    /// Element that is not a JSON object (kept so indices stay aligned)
    Invalid(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonEntry {
    Object(Record),
    Other(Value),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonDocument {
    Many(Vec<JsonEntry>),
    One(Record),
}

impl From<JsonEntry> for InputEntry {
    fn from(e: JsonEntry) -> Self {
        match e {
            JsonEntry::Object(r) => Self::Record(r),
            JsonEntry::Other(v) => Self::Invalid(format!("not an object: {}", v.to_online_string())),
        }
    }
}

/// Read all entries of an input file, format chosen by extension.
pub fn read_entries(path: &Path) -> Result<Vec<InputEntry>, CodecError> {
    let format = FileFormat::from_path(path)?;
    let file = File::open(path)?;
    read_entries_from(BufReader::new(file), format)
}

pub fn read_entries_from(reader: impl BufRead, format: FileFormat) -> Result<Vec<InputEntry>, CodecError> {
    match format {
        FileFormat::Json => read_json(reader),
        FileFormat::JsonLines => read_json_lines(reader),
        FileFormat::Csv => read_csv(reader),
    }
}

fn read_json(reader: impl BufRead) -> Result<Vec<InputEntry>, CodecError> {
    let doc: JsonDocument = serde_json::from_reader(reader).map_err(|e| CodecError::Parse {
        line: Some(e.line()),
        message: e.to_string(),
    })?;
    Ok(match doc {
        JsonDocument::Many(entries) => entries.into_iter().map(InputEntry::from).collect(),
        JsonDocument::One(record) => vec![InputEntry::Record(record)],
    })
}

fn read_json_lines(reader: impl BufRead) -> Result<Vec<InputEntry>, CodecError> {
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match sonic_rs::from_str::<Record>(trimmed) {
            Ok(record) => entries.push(InputEntry::Record(record)),
            Err(e) => match sonic_rs::from_str::<Value>(trimmed) {
                Ok(v) => entries.push(InputEntry::Invalid(format!(
                    "not an object: {}",
                    v.to_online_string()
                ))),
                Err(_) => {
                    return Err(CodecError::Parse {
                        line: Some(idx + 1),
                        message: e.to_string(),
                    });
                }
            },
        }
    }
    Ok(entries)
}

fn read_csv(reader: impl BufRead) -> Result<Vec<InputEntry>, CodecError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut entries = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let mut record = Record::with_capacity(headers.len());
        for (i, name) in headers.iter().enumerate() {
            let value = row.get(i).map_or(Value::Null, Value::infer);
            record.insert(name.clone(), value);
        }
        entries.push(InputEntry::Record(record));
    }
    Ok(entries)
}

/// Union of field names across records, in first-seen order.
pub fn header_union<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for r in records {
        for name in r.names() {
            if !header.iter().any(|h| h == name) {
                header.push(name.to_string());
            }
        }
    }
    header
}

/// Write records to `path` atomically, format chosen by extension.
pub fn write_records(path: &Path, records: &[Record]) -> Result<u64, CodecError> {
    let format = FileFormat::from_path(path)?;
    let mut file = AtomicFile::create(path)?;
    write_records_to(&mut file, format, records)?;
    Ok(file.commit()?)
}

pub fn write_records_to(
    mut writer: impl Write,
    format: FileFormat,
    records: &[Record],
) -> Result<(), CodecError> {
    match format {
        FileFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, records).map_err(io::Error::from)?;
            writer.write_all(b"\n")?;
        }
        FileFormat::JsonLines => {
            for r in records {
                serde_json::to_writer(&mut writer, r).map_err(io::Error::from)?;
                writer.write_all(b"\n")?;
            }
        }
        FileFormat::Csv => {
            let header = header_union(records);
            let mut wtr = csv::Writer::from_writer(&mut writer);
            if !header.is_empty() {
                wtr.write_record(&header)?;
            }
            for r in records {
                wtr.write_record(
                    header
                        .iter()
                        .map(|h| r.get(h).map(Value::to_online_string).unwrap_or_default()),
                )?;
            }
            wtr.flush()?;
        }
    }
    writer.flush()?;
    Ok(())
}
