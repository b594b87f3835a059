//! Fetch requests, their cache keys, and the windows they are split into.

use super::BinSize;
use crate::error::PipelineError;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire format for timestamps in upstream query parameters.
pub const WIRE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Compact timestamp format used in cache file names.
const KEY_DATETIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Full-precision timestamp format hashed into the cache key.
const DIGEST_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

/// Hex digits of the request digest appended to each cache key.
const KEY_DIGEST_LEN: usize = 16;

/// Immutable description of one acquisition.
///
/// `start`/`end` are naive and interpreted as UTC. The span is half-open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchRequest {
    source_id: String,
    series_id: String,
    bin_size: BinSize,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl FetchRequest {
    pub fn new(
        source_id: impl Into<String>,
        series_id: impl Into<String>,
        bin_size: BinSize,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Self, PipelineError> {
        if start >= end {
            return Err(PipelineError::InvalidRange { start, end });
        }
        Ok(Self {
            source_id: source_id.into(),
            series_id: series_id.into(),
            bin_size,
            start,
            end,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn bin_size(&self) -> BinSize {
        self.bin_size
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    /// Deterministic key over the full parameter tuple.
    ///
    /// A readable stem (sanitized ids, bin label, second-precision times)
    /// followed by a BLAKE3 digest of the exact tuple, so requests that
    /// sanitize or truncate to the same stem still get distinct keys.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey(format!(
            "{}_{}_{}_{}_{}_{}",
            sanitize(&self.source_id),
            sanitize(&self.series_id),
            self.bin_size.label(),
            self.start.format(KEY_DATETIME_FORMAT),
            self.end.format(KEY_DATETIME_FORMAT),
            self.digest(),
        ))
    }

    /// Length-prefixed encoding of every field, hashed.
    fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for field in [
            self.source_id.clone(),
            self.series_id.clone(),
            self.bin_size.label().to_string(),
            self.start.format(DIGEST_DATETIME_FORMAT).to_string(),
            self.end.format(DIGEST_DATETIME_FORMAT).to_string(),
        ] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        hex.as_str()[..KEY_DIGEST_LEN].to_string()
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} @ {} [{}, {})",
            self.source_id, self.series_id, self.bin_size, self.start, self.end
        )
    }
}

/// Replace anything outside `[A-Za-z0-9-]` so keys are safe file stems.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Cache key derived from a [`FetchRequest`]; doubles as the artifact file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A half-open sub-interval `[start, end)` of a request's span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.start.format(WIRE_DATETIME_FORMAT),
            self.end.format(WIRE_DATETIME_FORMAT)
        )
    }
}
