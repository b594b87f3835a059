//! Export and import: CSV, Parquet and JSON artifacts.
//!
//! Canonical frames round-trip losslessly through both CSV and Parquet:
//! - **CSV**: floats are written in shortest round-trip form (`1.0`, not
//!   `1`), so integer and float measurement columns keep their types on
//!   re-import; nulls are empty fields
//! - **Parquet**: the same layout the frame cache uses
//!
//! Arbitrary `DataFrame`s (joined or imported datasets) are written with the
//! `csv` writer and read back through the polars CSV reader with schema
//! inference.

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use sentitap_core::data::{read_parquet, write_parquet};
use sentitap_core::domain::frame::{BIN_SIZE, DATETIME, SERIES_ID, SOURCE};
use sentitap_core::domain::{CanonicalFrame, MeasurementColumn};
use sentitap_core::join::normalize_key;
use sentitap_core::AuditReport;

/// Datetime layout used in CSV output.
pub const CSV_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// File formats the exporters understand, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Parquet,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(FileFormat::Csv),
            Some("parquet") => Ok(FileFormat::Parquet),
            other => bail!(
                "unsupported file type {:?} for {} (expected .csv or .parquet)",
                other.unwrap_or(""),
                path.display()
            ),
        }
    }
}

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize an audit report to pretty JSON.
pub fn export_report_json(report: &AuditReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize AuditReport to JSON")
}

// ─── Canonical frame CSV ────────────────────────────────────────────

fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(CSV_DATETIME_FORMAT).to_string()
}

fn format_f64(v: f64) -> String {
    format!("{v:?}")
}

/// Export a canonical frame as CSV: metadata columns, then measurements by name.
pub fn export_frame_csv(frame: &CanonicalFrame) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(frame.column_names())
        .context("failed to write CSV header")?;

    let measurements: Vec<&MeasurementColumn> = frame.measurements().values().collect();
    for i in 0..frame.height() {
        let mut row = vec![
            format_datetime(&frame.datetimes()[i]),
            frame.t_epochs()[i].to_string(),
            frame.sources()[i].clone(),
            frame.series_ids()[i].clone(),
            frame.bin_sizes()[i].label().to_string(),
        ];
        for col in &measurements {
            row.push(match col {
                MeasurementColumn::Int64(v) => v[i].map(|x| x.to_string()).unwrap_or_default(),
                MeasurementColumn::Float64(v) => v[i].map(format_f64).unwrap_or_default(),
            });
        }
        wtr.write_record(&row)
            .with_context(|| format!("failed to write CSV row {i}"))?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Rebuild a canonical frame from [`export_frame_csv`] output.
pub fn import_frame_csv(text: &str) -> Result<CanonicalFrame> {
    let mut df = read_csv_dataframe(text, &[SOURCE, SERIES_ID, BIN_SIZE])?;
    let datetime = df
        .column(DATETIME)
        .context("CSV has no 'datetime' column")?
        .clone();
    let parsed = normalize_key(&datetime)?
        .with_context(|| format!("column '{DATETIME}' is not parseable as datetime"))?;
    df.with_column(parsed)
        .context("failed to replace datetime column")?;

    // A measurement column with no values carries no type in CSV.
    let untyped: Vec<Column> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String && c.null_count() == c.len())
        .filter(|c| ![SOURCE, SERIES_ID, BIN_SIZE].contains(&c.name().as_str()))
        .map(|c| c.cast(&DataType::Int64))
        .collect::<PolarsResult<_>>()
        .context("failed to type empty columns")?;
    for column in untyped {
        df.with_column(column)
            .context("failed to replace empty column")?;
    }
    CanonicalFrame::from_dataframe(&df).context("CSV does not match the canonical schema")
}

// ─── Generic DataFrame CSV ──────────────────────────────────────────

/// Parse CSV text into a `DataFrame` with the polars CSV reader, inferring
/// column types over every row. Empty fields are nulls. Columns named in
/// `force_string` are always strings.
pub fn read_csv_dataframe(text: &str, force_string: &[&str]) -> Result<DataFrame> {
    let overrides: Schema = force_string
        .iter()
        .map(|name| Field::new((*name).into(), DataType::String))
        .collect();
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_schema_overwrite(Some(Arc::new(overrides)))
        .into_reader_with_file_handle(Cursor::new(text.as_bytes()))
        .finish()
        .context("failed to parse CSV")
}

/// Write any `DataFrame` as CSV. Datetimes use [`CSV_DATETIME_FORMAT`].
pub fn export_dataframe_csv(df: &DataFrame) -> Result<String> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let rendered = df
        .get_columns()
        .iter()
        .map(render_column)
        .collect::<Result<Vec<_>>>()?;

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(&names)
        .context("failed to write CSV header")?;
    for i in 0..df.height() {
        wtr.write_record(rendered.iter().map(|col| col[i].as_str()))
            .with_context(|| format!("failed to write CSV row {i}"))?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn render_column(col: &Column) -> Result<Vec<String>> {
    let name = col.name().to_string();
    let dtype = col.dtype().clone();
    let out = match dtype {
        DataType::Datetime(_, _) => {
            let naive = normalize_key(col)?.unwrap_or_else(|| col.clone());
            naive
                .cast(&DataType::Int64)?
                .i64()?
                .iter()
                .map(|v| {
                    v.and_then(DateTime::from_timestamp_millis)
                        .map(|dt| format_datetime(&dt.naive_utc()))
                        .unwrap_or_default()
                })
                .collect()
        }
        DataType::String => col
            .str()?
            .iter()
            .map(|v| v.map(str::to_string).unwrap_or_default())
            .collect(),
        DataType::Boolean => col
            .bool()?
            .iter()
            .map(|v| v.map(|b| b.to_string()).unwrap_or_default())
            .collect(),
        dt if dt.is_integer() => col
            .cast(&DataType::Int64)?
            .i64()?
            .iter()
            .map(|v| v.map(|x| x.to_string()).unwrap_or_default())
            .collect(),
        dt if dt.is_float() => col
            .cast(&DataType::Float64)?
            .f64()?
            .iter()
            .map(|v| v.map(format_f64).unwrap_or_default())
            .collect(),
        _ => col
            .cast(&DataType::String)
            .with_context(|| format!("column '{name}' cannot be rendered as text"))?
            .str()?
            .iter()
            .map(|v| v.map(str::to_string).unwrap_or_default())
            .collect(),
    };
    Ok(out)
}

// ─── File-level helpers ─────────────────────────────────────────────

/// Write a canonical frame to `path` as CSV or Parquet, by extension.
pub fn save_frame(frame: &CanonicalFrame, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    match FileFormat::from_path(path)? {
        FileFormat::Csv => {
            let csv = export_frame_csv(frame)?;
            fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))?;
        }
        FileFormat::Parquet => {
            let mut df = frame.to_dataframe()?;
            write_parquet(&mut df, path)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
    }
    tracing::info!(path = %path.display(), rows = frame.height(), "exported frame");
    Ok(())
}

/// Read a canonical frame written by [`save_frame`].
pub fn load_frame(path: &Path) -> Result<CanonicalFrame> {
    match FileFormat::from_path(path)? {
        FileFormat::Csv => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            import_frame_csv(&text)
        }
        FileFormat::Parquet => {
            let df = read_parquet(path)?;
            CanonicalFrame::from_dataframe(&df)
                .with_context(|| format!("{} does not match the canonical schema", path.display()))
        }
    }
}

/// Write any `DataFrame` to `path` as CSV or Parquet, by extension.
pub fn save_dataframe(df: &mut DataFrame, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    match FileFormat::from_path(path)? {
        FileFormat::Csv => {
            let csv = export_dataframe_csv(df)?;
            fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))?;
        }
        FileFormat::Parquet => write_parquet(df, path)
            .with_context(|| format!("failed to write {}", path.display()))?,
    }
    tracing::info!(path = %path.display(), rows = df.height(), "exported dataset");
    Ok(())
}

/// Read a CSV or Parquet file into a `DataFrame`, by extension.
pub fn load_dataframe(path: &Path) -> Result<DataFrame> {
    match FileFormat::from_path(path)? {
        FileFormat::Csv => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            read_csv_dataframe(&text, &[])
        }
        FileFormat::Parquet => Ok(read_parquet(path)?),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}
