//! Build a window source for a request's `source_id`.
//!
//! `bitmex` selects the BitMEX bucketed-trade endpoint and `synthetic` the
//! offline generator; any other id is an Augmento sentiment source
//! (`twitter`, `reddit`, `bitcointalk`, ...) passed through as the `source`
//! query parameter.

use crate::config::PipelineConfig;
use sentitap_core::data::{AugmentoProvider, BitmexProvider, SyntheticSource, WindowSource};
use sentitap_core::PipelineError;
use std::time::Duration;

/// Seed used by the synthetic source when built from config.
pub const SYNTHETIC_SEED: u64 = 42;
/// Topic count of the synthetic source.
pub const SYNTHETIC_TOPICS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Augmento,
    Bitmex,
    Synthetic,
}

impl SourceKind {
    pub fn for_source_id(source_id: &str) -> Self {
        match source_id.to_ascii_lowercase().as_str() {
            "bitmex" => SourceKind::Bitmex,
            "synthetic" => SourceKind::Synthetic,
            _ => SourceKind::Augmento,
        }
    }
}

pub fn source_for(
    config: &PipelineConfig,
    source_id: &str,
) -> Result<Box<dyn WindowSource>, PipelineError> {
    let timeout = Duration::from_secs(config.executor.window_timeout_secs);
    let source: Box<dyn WindowSource> = match SourceKind::for_source_id(source_id) {
        SourceKind::Bitmex => Box::new(BitmexProvider::new(
            config.bitmex.base_url.clone(),
            config.bitmex.row_cap,
            timeout,
            config.retry,
        )?),
        SourceKind::Synthetic => Box::new(SyntheticSource::new(
            SYNTHETIC_SEED,
            SYNTHETIC_TOPICS,
            config.augmento.row_cap,
        )),
        SourceKind::Augmento => Box::new(augmento_for(config)?),
    };
    tracing::debug!(source_id, provider = source.name(), "source selected");
    Ok(source)
}

/// Augmento provider that persists its API summary next to the cache.
pub fn augmento_for(config: &PipelineConfig) -> Result<AugmentoProvider, PipelineError> {
    Ok(AugmentoProvider::new(
        config.augmento.base_url.clone(),
        config.augmento.row_cap,
        Duration::from_secs(config.executor.window_timeout_secs),
        config.retry,
    )?
    .with_summary_path(config.summary_path()))
}
