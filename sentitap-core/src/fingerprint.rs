//! Deterministic content fingerprints for canonical frames.
//!
//! The fingerprint is a BLAKE3 hash over the frame's canonical serialization.
//! Measurement columns live in a `BTreeMap`, so column order never affects
//! the hash; row order does.

use crate::domain::CanonicalFrame;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 hex digest of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameFingerprint(String);

impl FrameFingerprint {
    pub fn of(frame: &CanonicalFrame) -> Result<Self, PipelineError> {
        let bytes = serde_json::to_vec(frame).map_err(|e| PipelineError::Frame(e.to_string()))?;
        Ok(Self(blake3::hash(&bytes).to_hex().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for FrameFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
