//! Persisted raw snapshots. A source's raw file is written once by its
//! acquirer and read back as a list of records by the normalizer.

use crate::error::{Result, ScraperError};
use crate::types::{RawPayload, RawRecord};
use chrono::{DateTime, Local, NaiveDate};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How records are laid out inside a JSON raw file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonLayout {
    /// `[record, ...]`
    Array,
    /// `{"<key>": [record, ...], ...}`
    ArrayAt(&'static str),
    /// `{"<record[field]>": {rest of record}, ...}`
    KeyedObject(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    Json(JsonLayout),
    JsonLines,
    Csv,
    Yaml,
    /// The whole file is one record `{"text": ...}`.
    Text,
}

pub struct RawStore {
    path: PathBuf,
    format: RawFormat,
}

impl RawStore {
    pub fn new(path: impl Into<PathBuf>, format: RawFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Local date of the file's last modification.
    pub fn modified_date(&self) -> Result<NaiveDate> {
        let modified = fs::metadata(&self.path)?.modified()?;
        Ok(DateTime::<Local>::from(modified).date_naive())
    }

    /// Writes the payload through a temporary file and renames it into place.
    pub fn persist(&self, payload: &RawPayload) -> Result<()> {
        let bytes = match payload {
            RawPayload::Bytes(bytes) => bytes.clone(),
            RawPayload::Records(records) => self.encode(records)?,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("part");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Persisted {} bytes of raw data to {}", bytes.len(), self.path.display());
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<RawRecord>> {
        let content = fs::read_to_string(&self.path)?;
        decode(&content, self.format)
    }

    fn encode(&self, records: &[RawRecord]) -> Result<Vec<u8>> {
        match self.format {
            RawFormat::Json(layout) => {
                let value = match layout {
                    JsonLayout::Array => Value::Array(records.to_vec()),
                    JsonLayout::ArrayAt(key) => {
                        let mut object = Map::new();
                        object.insert(key.to_string(), Value::Array(records.to_vec()));
                        Value::Object(object)
                    }
                    JsonLayout::KeyedObject(field) => Value::Object(key_records(records, field)?),
                };
                Ok(serde_json::to_vec_pretty(&value)?)
            }
            RawFormat::JsonLines => {
                let mut out = Vec::new();
                for record in records {
                    serde_json::to_writer(&mut out, record)?;
                    out.push(b'\n');
                }
                Ok(out)
            }
            RawFormat::Csv => encode_csv(records),
            RawFormat::Yaml => Ok(serde_yaml::to_string(records)?.into_bytes()),
            RawFormat::Text => {
                let mut out = Vec::new();
                for record in records {
                    let text = record.get("text").and_then(Value::as_str).unwrap_or_default();
                    writeln!(out, "{text}")?;
                }
                Ok(out)
            }
        }
    }
}

/// Parses raw file content into records.
pub fn decode(content: &str, format: RawFormat) -> Result<Vec<RawRecord>> {
    match format {
        RawFormat::Json(layout) => {
            let value: Value = serde_json::from_str(content)?;
            match layout {
                JsonLayout::Array => into_array(value, "top level"),
                JsonLayout::ArrayAt(key) => match value {
                    Value::Object(mut object) => {
                        let inner = object
                            .remove(key)
                            .ok_or_else(|| ScraperError::MissingField(key.to_string()))?;
                        into_array(inner, key)
                    }
                    _ => Err(ScraperError::parse("expected a JSON object at top level")),
                },
                JsonLayout::KeyedObject(field) => match value {
                    Value::Object(object) => Ok(unkey_records(object, field)),
                    _ => Err(ScraperError::parse("expected a JSON object at top level")),
                },
            }
        }
        RawFormat::JsonLines => content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(ScraperError::from))
            .collect(),
        RawFormat::Csv => decode_csv(content),
        RawFormat::Yaml => {
            let value: Value = serde_yaml::from_str(content)?;
            match value {
                Value::Array(rows) => Ok(rows),
                Value::Null => Ok(Vec::new()),
                other => Ok(vec![other]),
            }
        }
        RawFormat::Text => {
            let mut record = Map::new();
            record.insert("text".into(), Value::String(content.to_string()));
            Ok(vec![Value::Object(record)])
        }
    }
}

fn into_array(value: Value, what: &str) -> Result<Vec<RawRecord>> {
    match value {
        Value::Array(rows) => Ok(rows),
        _ => Err(ScraperError::parse(format!("expected a JSON array at {what}"))),
    }
}

fn key_records(records: &[RawRecord], field: &str) -> Result<Map<String, Value>> {
    let mut keyed = Map::new();
    for record in records {
        let mut object = record
            .as_object()
            .cloned()
            .ok_or_else(|| ScraperError::parse("keyed raw records must be JSON objects"))?;
        let key = match object.remove(field) {
            Some(Value::String(key)) => key,
            _ => return Err(ScraperError::MissingField(field.to_string())),
        };
        keyed.insert(key, Value::Object(object));
    }
    Ok(keyed)
}

fn unkey_records(object: Map<String, Value>, field: &str) -> Vec<RawRecord> {
    object
        .into_iter()
        .map(|(key, value)| {
            let mut record = Map::new();
            record.insert(field.to_string(), Value::String(key));
            match value {
                Value::Object(rest) => record.extend(rest),
                other => {
                    record.insert("value".into(), other);
                }
            }
            Value::Object(record)
        })
        .collect()
}

fn encode_csv(records: &[RawRecord]) -> Result<Vec<u8>> {
    let columns: Vec<String> = records
        .first()
        .and_then(Value::as_object)
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    let mut writer = csv::Writer::from_writer(Vec::new());
    if !columns.is_empty() {
        writer.write_record(&columns)?;
    }
    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| match record.get(column) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ScraperError::Io(e.into_error()))
}

fn decode_csv(content: &str) -> Result<Vec<RawRecord>> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Map::new();
        for (column, value) in headers.iter().zip(record.iter()) {
            row.insert(column.to_string(), Value::String(value.to_string()));
        }
        rows.push(Value::Object(row));
    }
    Ok(rows)
}
