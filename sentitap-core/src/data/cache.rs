//! Parquet frame cache keyed by request.
//!
//! Layout: `{cache_dir}/{key}.parquet` plus `{cache_dir}/{key}.meta.json`.
//!
//! - Atomic writes (unique temp file, rename into place)
//! - Integrity check on load (readable, non-empty, sidecar for the same
//!   request whose hash matches); a missing or stale sidecar is a miss
//! - Quarantine for corrupt files (`{key}.parquet.quarantined`), reported as a miss

use crate::domain::{CacheKey, CanonicalFrame, FetchRequest};
use crate::error::PipelineError;
use crate::fingerprint::FrameFingerprint;
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const ARTIFACT_EXT: &str = "parquet";
const META_SUFFIX: &str = ".meta.json";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metadata sidecar for one cached artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub key: String,
    pub request: FetchRequest,
    pub row_count: usize,
    pub data_hash: FrameFingerprint,
    pub cached_at: NaiveDateTime,
    /// Columns the source's field table promised, for auditing cache hits.
    #[serde(default)]
    pub expected_columns: Vec<String>,
}

/// On-disk cache of complete canonical frames.
#[derive(Debug, Clone)]
pub struct FrameCache {
    cache_dir: PathBuf,
}

impl FrameCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{key}.{ARTIFACT_EXT}"))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{key}{META_SUFFIX}"))
    }

    /// Whether an artifact exists for this request. Does not validate it.
    pub fn contains(&self, request: &FetchRequest) -> bool {
        self.artifact_path(&request.cache_key()).is_file()
    }

    /// Load the frame for a request. Missing or corrupt artifacts are a miss.
    pub fn get(&self, request: &FetchRequest) -> Result<Option<CanonicalFrame>, PipelineError> {
        Ok(self.lookup(request)?.map(|(frame, _)| frame))
    }

    /// Load the frame together with its validated sidecar.
    ///
    /// A hit requires the artifact and a sidecar written for this exact
    /// request whose row count and hash match the artifact. A missing,
    /// foreign or out-of-date sidecar is a plain miss (an interrupted `put`
    /// leaves one behind); an unreadable or empty artifact is quarantined.
    pub fn lookup(
        &self,
        request: &FetchRequest,
    ) -> Result<Option<(CanonicalFrame, CacheMeta)>, PipelineError> {
        let key = request.cache_key();
        let path = self.artifact_path(&key);
        if !path.is_file() {
            return Ok(None);
        }

        let Some(meta) = self.read_meta(&key) else {
            tracing::warn!(key = %key, "cache artifact has no readable sidecar, treating as miss");
            return Ok(None);
        };
        if meta.request != *request {
            tracing::warn!(key = %key, stored = %meta.request, "cache sidecar belongs to another request");
            return Ok(None);
        }

        let frame = match load_artifact(&path) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "quarantining corrupt cache artifact");
                self.quarantine(&key, &path);
                return Ok(None);
            }
        };

        let hash = FrameFingerprint::of(&frame)?;
        if meta.row_count != frame.height() || meta.data_hash != hash {
            tracing::warn!(
                key = %key,
                rows = frame.height(),
                sidecar_rows = meta.row_count,
                "cache artifact does not match its sidecar, treating as miss"
            );
            return Ok(None);
        }

        tracing::debug!(key = %key, rows = frame.height(), "cache hit");
        Ok(Some((frame, meta)))
    }

    fn quarantine(&self, key: &CacheKey, path: &Path) {
        let quarantined = path.with_extension(format!("{ARTIFACT_EXT}.quarantined"));
        if let Err(e) = fs::rename(path, &quarantined) {
            tracing::warn!(path = %path.display(), error = %e, "quarantine rename failed");
        }
        let _ = fs::remove_file(self.meta_path(key));
    }

    /// Store a complete frame for a request, replacing any previous artifact.
    pub fn put(
        &self,
        request: &FetchRequest,
        frame: &CanonicalFrame,
        expected_columns: &[String],
    ) -> Result<CacheMeta, PipelineError> {
        if frame.is_empty() {
            return Err(PipelineError::Cache("refusing to cache an empty frame".into()));
        }
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| PipelineError::Cache(format!("failed to create dir: {e}")))?;

        let key = request.cache_key();
        let mut df = frame.to_dataframe()?;
        let path = self.artifact_path(&key);
        let tmp_path = self.tmp_path(&key);

        write_parquet(&mut df, &tmp_path)?;

        let meta = CacheMeta {
            key: key.as_str().to_string(),
            request: request.clone(),
            row_count: frame.height(),
            data_hash: FrameFingerprint::of(frame)?,
            cached_at: chrono::Utc::now().naive_utc(),
            expected_columns: expected_columns.to_vec(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| PipelineError::Cache(format!("meta serialization: {e}")))?;
        let meta_tmp = self.tmp_path(&key);
        if let Err(e) = fs::write(&meta_tmp, meta_json) {
            let _ = fs::remove_file(&tmp_path);
            let _ = fs::remove_file(&meta_tmp);
            return Err(PipelineError::Cache(format!("meta write: {e}")));
        }

        // Both files are complete before either is published. A reader that
        // sees only one of the renames finds a missing or mismatched sidecar
        // and treats the key as a miss.
        if let Err(e) = rename_into_place(&tmp_path, &path) {
            let _ = fs::remove_file(&meta_tmp);
            return Err(e);
        }
        rename_into_place(&meta_tmp, &self.meta_path(&key))?;

        tracing::info!(key = %key, rows = meta.row_count, "cached frame");
        Ok(meta)
    }

    fn tmp_path(&self, key: &CacheKey) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.cache_dir
            .join(format!(".{key}.{}.{n}.tmp", std::process::id()))
    }

    /// Sidecar metadata for a request, if present and readable.
    pub fn meta(&self, request: &FetchRequest) -> Option<CacheMeta> {
        self.read_meta(&request.cache_key())
    }

    fn read_meta(&self, key: &CacheKey) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Delete a request's artifact and sidecar. Returns whether anything was removed.
    pub fn remove(&self, request: &FetchRequest) -> Result<bool, PipelineError> {
        let key = request.cache_key();
        let mut removed = false;
        for path in [self.artifact_path(&key), self.meta_path(&key)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PipelineError::Cache(format!("remove {}: {e}", path.display()))),
            }
        }
        Ok(removed)
    }

    /// Sidecars of every cached artifact, sorted by key.
    pub fn entries(&self) -> Result<Vec<CacheMeta>, PipelineError> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let dir = fs::read_dir(&self.cache_dir)
            .map_err(|e| PipelineError::Cache(format!("read dir: {e}")))?;

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| PipelineError::Cache(format!("dir entry: {e}")))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(META_SUFFIX) {
                continue;
            }
            match fs::read_to_string(entry.path())
                .ok()
                .and_then(|c| serde_json::from_str::<CacheMeta>(&c).ok())
            {
                Some(meta) => entries.push(meta),
                None => tracing::warn!(file = name, "skipping unreadable cache sidecar"),
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove every artifact, sidecar, quarantined file and stale temp file.
    pub fn clear(&self) -> Result<usize, PipelineError> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }
        let dir = fs::read_dir(&self.cache_dir)
            .map_err(|e| PipelineError::Cache(format!("read dir: {e}")))?;

        let mut removed = 0;
        for entry in dir {
            let entry = entry.map_err(|e| PipelineError::Cache(format!("dir entry: {e}")))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let ours = name.ends_with(".parquet")
                || name.ends_with(META_SUFFIX)
                || name.ends_with(".quarantined")
                || name.ends_with(".tmp");
            if path.is_file() && ours {
                fs::remove_file(&path)
                    .map_err(|e| PipelineError::Cache(format!("remove {}: {e}", path.display())))?;
                if name.ends_with(".parquet") {
                    removed += 1;
                }
            }
        }
        tracing::info!(dir = %self.cache_dir.display(), removed, "cleared cache");
        Ok(removed)
    }
}

fn load_artifact(path: &Path) -> Result<CanonicalFrame, PipelineError> {
    let df = read_parquet(path)?;
    let frame = CanonicalFrame::from_dataframe(&df)?;
    if frame.is_empty() {
        return Err(PipelineError::Cache("empty artifact".into()));
    }
    Ok(frame)
}

fn rename_into_place(tmp: &Path, dest: &Path) -> Result<(), PipelineError> {
    fs::rename(tmp, dest).map_err(|e| {
        let _ = fs::remove_file(tmp);
        PipelineError::Cache(format!("atomic rename failed: {e}"))
    })
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Write a DataFrame to a Parquet file.
pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), PipelineError> {
    let file =
        fs::File::create(path).map_err(|e| PipelineError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| PipelineError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// Read a Parquet file into a DataFrame.
pub fn read_parquet(path: &Path) -> Result<DataFrame, PipelineError> {
    let file = fs::File::open(path).map_err(|e| PipelineError::Parquet(format!("open: {e}")))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| PipelineError::Parquet(format!("read: {e}")))
}
