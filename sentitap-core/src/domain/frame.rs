//! The canonical frame: a typed, columnar, source-agnostic time series table.
//!
//! A small closed set of metadata columns (`datetime`, `t_epoch`, `source`,
//! `series_id`, `bin_size`) plus a dynamically sized map of typed measurement
//! columns. Frames convert to and from a polars `DataFrame` for parquet I/O
//! and joins.

use super::record::{CanonicalRecord, MeasurementValue};
use super::BinSize;
use crate::error::PipelineError;
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DATETIME: &str = "datetime";
pub const T_EPOCH: &str = "t_epoch";
pub const SOURCE: &str = "source";
pub const SERIES_ID: &str = "series_id";
pub const BIN_SIZE: &str = "bin_size";

/// Metadata columns, in frame order.
pub const METADATA_COLUMNS: [&str; 5] = [DATETIME, T_EPOCH, SOURCE, SERIES_ID, BIN_SIZE];

/// A nullable measurement column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum MeasurementColumn {
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
}

impl MeasurementColumn {
    pub fn len(&self) -> usize {
        match self {
            MeasurementColumn::Int64(v) => v.len(),
            MeasurementColumn::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize) -> Option<MeasurementValue> {
        match self {
            MeasurementColumn::Int64(v) => v.get(row).copied().flatten().map(MeasurementValue::Int),
            MeasurementColumn::Float64(v) => {
                v.get(row).copied().flatten().map(MeasurementValue::Float)
            }
        }
    }

    /// Values widened to `f64`, nulls preserved.
    pub fn to_f64(&self) -> Vec<Option<f64>> {
        match self {
            MeasurementColumn::Int64(v) => v.iter().map(|x| x.map(|i| i as f64)).collect(),
            MeasurementColumn::Float64(v) => v.clone(),
        }
    }

    fn push(&mut self, value: Option<MeasurementValue>) {
        match self {
            MeasurementColumn::Int64(v) => v.push(value.map(|m| match m {
                MeasurementValue::Int(i) => i,
                MeasurementValue::Float(f) => f as i64,
            })),
            MeasurementColumn::Float64(v) => v.push(value.map(MeasurementValue::as_f64)),
        }
    }

    fn take(&self, indices: &[usize]) -> MeasurementColumn {
        match self {
            MeasurementColumn::Int64(v) => {
                MeasurementColumn::Int64(indices.iter().map(|&i| v[i]).collect())
            }
            MeasurementColumn::Float64(v) => {
                MeasurementColumn::Float64(indices.iter().map(|&i| v[i]).collect())
            }
        }
    }

    fn to_polars(&self, name: &str) -> Column {
        match self {
            MeasurementColumn::Int64(v) => Column::new(name.into(), v.clone()),
            MeasurementColumn::Float64(v) => Column::new(name.into(), v.clone()),
        }
    }
}

/// Normalized tabular result: one row per observed timestamp bucket.
///
/// Timestamps are naive (UTC wall clock). Duplicate timestamps and gaps are
/// allowed; they are reported by the audit, not repaired here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFrame {
    datetime: Vec<NaiveDateTime>,
    t_epoch: Vec<i64>,
    source: Vec<String>,
    series_id: Vec<String>,
    bin_size: Vec<BinSize>,
    measurements: BTreeMap<String, MeasurementColumn>,
}

impl CanonicalFrame {
    /// Build a frame from records, preserving their order.
    ///
    /// The measurement column set is the union over all records. A column is
    /// `Int64` only if every present value is an integer, otherwise `Float64`.
    pub fn from_records(records: Vec<CanonicalRecord>) -> Self {
        let n = records.len();

        let mut all_int: BTreeMap<String, bool> = BTreeMap::new();
        for rec in &records {
            for (name, value) in &rec.measurements {
                let entry = all_int.entry(name.clone()).or_insert(true);
                if matches!(value, MeasurementValue::Float(_)) {
                    *entry = false;
                }
            }
        }

        let mut measurements: BTreeMap<String, MeasurementColumn> = all_int
            .into_iter()
            .map(|(name, ints)| {
                let col = if ints {
                    MeasurementColumn::Int64(Vec::with_capacity(n))
                } else {
                    MeasurementColumn::Float64(Vec::with_capacity(n))
                };
                (name, col)
            })
            .collect();

        let mut frame = CanonicalFrame {
            datetime: Vec::with_capacity(n),
            t_epoch: Vec::with_capacity(n),
            source: Vec::with_capacity(n),
            series_id: Vec::with_capacity(n),
            bin_size: Vec::with_capacity(n),
            measurements: BTreeMap::new(),
        };

        for rec in records {
            for (name, col) in measurements.iter_mut() {
                col.push(rec.measurements.get(name).copied());
            }
            frame.datetime.push(rec.datetime);
            frame.t_epoch.push(rec.t_epoch);
            frame.source.push(rec.source);
            frame.series_id.push(rec.series_id);
            frame.bin_size.push(rec.bin_size);
        }

        frame.measurements = measurements;
        frame
    }

    pub fn height(&self) -> usize {
        self.datetime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datetime.is_empty()
    }

    pub fn datetimes(&self) -> &[NaiveDateTime] {
        &self.datetime
    }

    pub fn t_epochs(&self) -> &[i64] {
        &self.t_epoch
    }

    pub fn sources(&self) -> &[String] {
        &self.source
    }

    pub fn series_ids(&self) -> &[String] {
        &self.series_id
    }

    pub fn bin_sizes(&self) -> &[BinSize] {
        &self.bin_size
    }

    pub fn measurements(&self) -> &BTreeMap<String, MeasurementColumn> {
        &self.measurements
    }

    pub fn measurement(&self, name: &str) -> Option<&MeasurementColumn> {
        self.measurements.get(name)
    }

    /// Metadata columns followed by measurement columns (sorted by name).
    pub fn column_names(&self) -> Vec<String> {
        METADATA_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.measurements.keys().cloned())
            .collect()
    }

    pub fn first_datetime(&self) -> Option<NaiveDateTime> {
        self.datetime.iter().min().copied()
    }

    pub fn last_datetime(&self) -> Option<NaiveDateTime> {
        self.datetime.iter().max().copied()
    }

    /// Numeric columns as `f64`: `t_epoch` followed by every measurement.
    pub fn numeric_columns(&self) -> Vec<(String, Vec<Option<f64>>)> {
        let epoch = (
            T_EPOCH.to_string(),
            self.t_epoch.iter().map(|&t| Some(t as f64)).collect(),
        );
        std::iter::once(epoch)
            .chain(
                self.measurements
                    .iter()
                    .map(|(name, col)| (name.clone(), col.to_f64())),
            )
            .collect()
    }

    /// Row `i` as a record; null measurements are omitted.
    pub fn record(&self, i: usize) -> Option<CanonicalRecord> {
        if i >= self.height() {
            return None;
        }
        let measurements = self
            .measurements
            .iter()
            .filter_map(|(name, col)| col.get(i).map(|v| (name.clone(), v)))
            .collect();
        Some(CanonicalRecord {
            datetime: self.datetime[i],
            t_epoch: self.t_epoch[i],
            source: self.source[i].clone(),
            series_id: self.series_id[i].clone(),
            bin_size: self.bin_size[i],
            measurements,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = CanonicalRecord> + '_ {
        (0..self.height()).filter_map(|i| self.record(i))
    }

    /// New frame with the given rows, in the given order. Column set is kept.
    ///
    /// Every index must be below `height()`; callers pass indices derived
    /// from this frame.
    pub(crate) fn take(&self, indices: &[usize]) -> CanonicalFrame {
        CanonicalFrame {
            datetime: indices.iter().map(|&i| self.datetime[i]).collect(),
            t_epoch: indices.iter().map(|&i| self.t_epoch[i]).collect(),
            source: indices.iter().map(|&i| self.source[i].clone()).collect(),
            series_id: indices.iter().map(|&i| self.series_id[i].clone()).collect(),
            bin_size: indices.iter().map(|&i| self.bin_size[i]).collect(),
            measurements: self
                .measurements
                .iter()
                .map(|(name, col)| (name.clone(), col.take(indices)))
                .collect(),
        }
    }

    /// Convert to a polars `DataFrame` (`datetime` as naive millisecond datetime).
    pub fn to_dataframe(&self) -> Result<DataFrame, PipelineError> {
        let millis: Vec<i64> = self
            .datetime
            .iter()
            .map(|d| d.and_utc().timestamp_millis())
            .collect();
        let bins: Vec<&str> = self.bin_size.iter().map(|b| b.label()).collect();

        let mut columns = vec![
            Column::new(DATETIME.into(), millis)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
            Column::new(T_EPOCH.into(), self.t_epoch.clone()),
            Column::new(SOURCE.into(), self.source.clone()),
            Column::new(SERIES_ID.into(), self.series_id.clone()),
            Column::new(BIN_SIZE.into(), bins),
        ];
        for (name, col) in &self.measurements {
            columns.push(col.to_polars(name));
        }

        DataFrame::new(columns)
            .map_err(|e| PipelineError::Frame(format!("dataframe creation: {e}")))
    }

    /// Rebuild a frame from a `DataFrame` produced by [`Self::to_dataframe`].
    ///
    /// Every non-metadata column must be numeric; integer columns stay
    /// `Int64`, everything else becomes `Float64`.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self, PipelineError> {
        let column = |name: &str| {
            df.column(name)
                .map_err(|_| PipelineError::Frame(format!("missing column '{name}'")))
        };

        let datetime = datetime_values(column(DATETIME)?)?;
        let t_epoch = column(T_EPOCH)?
            .cast(&DataType::Int64)?
            .i64()?
            .iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| null_at(T_EPOCH, i)))
            .collect::<Result<Vec<_>, _>>()?;
        let source = string_values(column(SOURCE)?)?;
        let series_id = string_values(column(SERIES_ID)?)?;
        let bin_size = string_values(column(BIN_SIZE)?)?
            .iter()
            .map(|s| s.parse::<BinSize>().map_err(PipelineError::Frame))
            .collect::<Result<Vec<_>, _>>()?;

        let mut measurements = BTreeMap::new();
        for col in df.get_columns() {
            let name = col.name().as_str();
            if METADATA_COLUMNS.contains(&name) {
                continue;
            }
            let dtype = col.dtype();
            let values = if dtype.is_integer() {
                MeasurementColumn::Int64(col.cast(&DataType::Int64)?.i64()?.iter().collect())
            } else if dtype.is_float() {
                MeasurementColumn::Float64(col.cast(&DataType::Float64)?.f64()?.iter().collect())
            } else {
                return Err(PipelineError::Frame(format!(
                    "measurement column '{name}' has non-numeric type {dtype}"
                )));
            };
            measurements.insert(name.to_string(), values);
        }

        Ok(CanonicalFrame {
            datetime,
            t_epoch,
            source,
            series_id,
            bin_size,
            measurements,
        })
    }
}

fn null_at(column: &str, row: usize) -> PipelineError {
    PipelineError::Frame(format!("null {column} at row {row}"))
}

fn datetime_values(col: &Column) -> Result<Vec<NaiveDateTime>, PipelineError> {
    let millis = col
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .cast(&DataType::Int64)?;
    millis
        .i64()?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.and_then(DateTime::from_timestamp_millis)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| null_at(DATETIME, i))
        })
        .collect()
}

fn string_values(col: &Column) -> Result<Vec<String>, PipelineError> {
    Ok(col
        .str()?
        .iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}
