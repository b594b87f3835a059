//! Dataset registry: named, ordered datasets prepared for joining.
//!
//! Datasets come from acquisitions (canonical frames) or from CSV/Parquet
//! files. Column operations replace a dataset's frame with a new one; the
//! join result is kept separately and never overwrites its inputs.

use crate::export::load_dataframe;
use chrono::{NaiveDateTime, Utc};
use polars::prelude::*;
use sentitap_core::domain::CanonicalFrame;
use sentitap_core::{join_frames, JoinHow, NamedFrame, PipelineError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WranglerError {
    #[error("dataset '{0}' already exists")]
    DuplicateName(String),

    #[error("no dataset named '{0}'")]
    UnknownDataset(String),

    #[error("column '{column}' not found in dataset '{dataset}'")]
    UnknownColumn { dataset: String, column: String },

    #[error("column '{column}' already exists in dataset '{dataset}'")]
    ColumnExists { dataset: String, column: String },

    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<PolarsError> for WranglerError {
    fn from(e: PolarsError) -> Self {
        WranglerError::Pipeline(e.into())
    }
}

/// Where a dataset came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetOrigin {
    Acquisition { request: String },
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub name: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub origin: DatasetOrigin,
    pub imported_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub meta: DatasetMeta,
    pub frame: DataFrame,
}

impl Dataset {
    fn new(name: String, frame: DataFrame, origin: DatasetOrigin) -> Self {
        let meta = DatasetMeta {
            name,
            rows: frame.height(),
            columns: column_names(&frame),
            origin,
            imported_at: Utc::now().naive_utc(),
        };
        Self { meta, frame }
    }

    fn replace_frame(&mut self, frame: DataFrame) {
        self.meta.rows = frame.height();
        self.meta.columns = column_names(&frame);
        self.frame = frame;
    }

    fn require_column(&self, column: &str) -> Result<(), WranglerError> {
        if self.meta.columns.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(WranglerError::UnknownColumn {
                dataset: self.meta.name.clone(),
                column: column.to_string(),
            })
        }
    }
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

/// Ordered collection of datasets plus the last join result.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    datasets: Vec<Dataset>,
    joined: Option<DataFrame>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Dataset names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.datasets.iter().map(|d| d.meta.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.meta.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Dataset, WranglerError> {
        self.datasets
            .iter_mut()
            .find(|d| d.meta.name == name)
            .ok_or_else(|| WranglerError::UnknownDataset(name.to_string()))
    }

    pub fn metas(&self) -> Vec<&DatasetMeta> {
        self.datasets.iter().map(|d| &d.meta).collect()
    }

    fn insert(&mut self, dataset: Dataset) -> Result<&DatasetMeta, WranglerError> {
        if self.get(&dataset.meta.name).is_some() {
            return Err(WranglerError::DuplicateName(dataset.meta.name));
        }
        tracing::info!(
            name = %dataset.meta.name,
            rows = dataset.meta.rows,
            columns = dataset.meta.columns.len(),
            "dataset registered"
        );
        self.datasets.push(dataset);
        let last = self.datasets.len() - 1;
        Ok(&self.datasets[last].meta)
    }

    /// Register a canonical frame produced by an acquisition.
    pub fn import_frame(
        &mut self,
        name: &str,
        frame: &CanonicalFrame,
        request: &str,
    ) -> Result<&DatasetMeta, WranglerError> {
        let df = frame.to_dataframe()?;
        self.insert(Dataset::new(
            name.to_string(),
            df,
            DatasetOrigin::Acquisition {
                request: request.to_string(),
            },
        ))
    }

    /// Load a CSV or Parquet file. The name defaults to the file stem.
    pub fn load_dataset(
        &mut self,
        path: &Path,
        name: Option<&str>,
    ) -> Result<&DatasetMeta, WranglerError> {
        let df = load_dataframe(path).map_err(|e| WranglerError::Load {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        })?;
        let name = match name {
            Some(n) => n.to_string(),
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("dataset")
                .to_string(),
        };
        self.insert(Dataset::new(
            name,
            df,
            DatasetOrigin::File {
                path: path.to_path_buf(),
            },
        ))
    }

    /// Unregister a dataset and hand it back.
    pub fn remove(&mut self, name: &str) -> Result<Dataset, WranglerError> {
        let idx = self
            .datasets
            .iter()
            .position(|d| d.meta.name == name)
            .ok_or_else(|| WranglerError::UnknownDataset(name.to_string()))?;
        Ok(self.datasets.remove(idx))
    }

    /// Remove `columns` from a dataset; every name must exist.
    pub fn drop_columns(&mut self, name: &str, columns: &[String]) -> Result<(), WranglerError> {
        let dataset = self.get_mut(name)?;
        for c in columns {
            dataset.require_column(c)?;
        }
        let frame = dataset.frame.drop_many(columns.iter().map(String::as_str));
        dataset.replace_frame(frame);
        tracing::debug!(dataset = name, dropped = columns.len(), "columns dropped");
        Ok(())
    }

    /// Rename one column; the new name must not already be taken.
    pub fn rename_column(&mut self, name: &str, from: &str, to: &str) -> Result<(), WranglerError> {
        let dataset = self.get_mut(name)?;
        dataset.require_column(from)?;
        if from != to && dataset.meta.columns.iter().any(|c| c == to) {
            return Err(WranglerError::ColumnExists {
                dataset: name.to_string(),
                column: to.to_string(),
            });
        }
        let mut frame = dataset.frame.clone();
        frame.rename(from, to.into())?;
        dataset.replace_frame(frame);
        Ok(())
    }

    /// Keep only `columns`, in the given order.
    pub fn select_columns(&mut self, name: &str, columns: &[String]) -> Result<(), WranglerError> {
        let dataset = self.get_mut(name)?;
        for c in columns {
            dataset.require_column(c)?;
        }
        let frame = dataset.frame.select(columns.iter().map(String::as_str))?;
        dataset.replace_frame(frame);
        Ok(())
    }

    /// Join every registered dataset, in registration order, on `keys`.
    pub fn join(&mut self, keys: &[String], how: JoinHow) -> Result<&DataFrame, WranglerError> {
        let frames: Vec<NamedFrame> = self
            .datasets
            .iter()
            .map(|d| NamedFrame::new(d.meta.name.clone(), d.frame.clone()))
            .collect();
        let joined = join_frames(&frames, keys, how)?;
        tracing::info!(
            datasets = frames.len(),
            how = %how,
            rows = joined.height(),
            columns = joined.width(),
            "datasets joined"
        );
        let joined = &*self.joined.insert(joined);
        Ok(joined)
    }

    /// The most recent join result.
    pub fn joined(&self) -> Option<&DataFrame> {
        self.joined.as_ref()
    }
}
