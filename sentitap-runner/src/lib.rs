//! SentiTap Runner: acquisition orchestration, dataset registry, export, config.
//!
//! This crate builds on `sentitap-core` to provide:
//! - Fetch executor running windows on a private worker pool
//! - Pipeline lifecycle (plan, fetch, merge, cache, audit) with single-flight
//! - Source selection from configuration
//! - Dataset registry with column operations and joins
//! - CSV / Parquet / JSON export
//! - TOML configuration

pub mod config;
pub mod executor;
pub mod export;
pub mod pipeline;
pub mod single_flight;
pub mod sources;
pub mod wrangler;

pub use config::{ConfigError, PipelineConfig, SourceConfig};
pub use executor::{ExecutorConfig, FetchExecutor, FetchOutcome, WindowOutcome, WindowStatus};
pub use pipeline::{Acquisition, Origin, Pipeline, Stage, StageTracker};
pub use single_flight::{Role, SingleFlight};
pub use sources::{source_for, SourceKind};
pub use wrangler::{Dataset, DatasetMeta, DatasetOrigin, DatasetRegistry, WranglerError};
