//! Tabular serialisation of row sets.
//!
//! The engine itself only produces [`RowSet`]s; this module renders them in
//! the formats downstream consumers ask for. Columnar formats (Parquet,
//! Avro) are the host pipeline's concern, not the engine's.

use std::io::Write;

use crate::SofError;
use crate::rows::RowSet;

/// Output formats for [`format_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Comma-separated values without a header row
    Csv,
    /// Comma-separated values with a header row
    CsvWithHeader,
    /// A pretty-printed JSON array of row objects
    Json,
    /// Newline-delimited JSON, one row object per line
    Ndjson,
}

impl ContentType {
    /// Parses a MIME type, honouring the CSV `header` parameter.
    ///
    /// `text/csv` defaults to headers on; `text/csv;header=false` turns
    /// them off.
    pub fn from_string(s: &str) -> Result<Self, SofError> {
        let mut parts = s.split(';').map(str::trim);
        let mime = parts.next().unwrap_or("");
        match mime {
            "text/csv" => {
                let header_off = parts.any(|p| p.eq_ignore_ascii_case("header=false"));
                Ok(if header_off {
                    ContentType::Csv
                } else {
                    ContentType::CsvWithHeader
                })
            }
            "application/json" | "json" => Ok(ContentType::Json),
            "application/ndjson" | "application/x-ndjson" | "ndjson" => Ok(ContentType::Ndjson),
            other => Err(SofError::UnsupportedContentType(other.to_string())),
        }
    }
}

/// Serialises a row set in the requested format.
pub fn format_output(rows: &RowSet, content_type: ContentType) -> Result<Vec<u8>, SofError> {
    match content_type {
        ContentType::Csv => format_csv(rows, false),
        ContentType::CsvWithHeader => format_csv(rows, true),
        ContentType::Json => {
            let objects: Vec<serde_json::Value> =
                rows.rows().iter().map(|row| row.to_json()).collect();
            Ok(serde_json::to_vec_pretty(&objects).map_err(SofError::from)?)
        }
        ContentType::Ndjson => {
            let mut out = Vec::new();
            for row in rows.rows() {
                serde_json::to_writer(&mut out, &row.to_json()).map_err(SofError::from)?;
                out.write_all(b"\n")?;
            }
            Ok(out)
        }
    }
}

fn format_csv(rows: &RowSet, include_header: bool) -> Result<Vec<u8>, SofError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if include_header {
        writer.write_record(rows.schema().columns().iter().map(|c| c.name.as_str()))?;
    }
    for row in rows.rows() {
        let record: Vec<String> = row.values().iter().map(csv_cell).collect();
        writer.write_record(&record)?;
    }
    writer
        .into_inner()
        .map_err(|e| SofError::CsvWriter(e.to_string()))
}

/// CSV rendering of one cell: null is the empty field, strings are written
/// raw (the writer quotes as needed), everything else is its JSON form.
fn csv_cell(value: &Option<serde_json::Value>) -> String {
    match value {
        None => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}
