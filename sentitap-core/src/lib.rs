//! SentiTap Core: domain types, window planning, sources, cache, audit, and joins.
//!
//! This crate contains the acquisition building blocks:
//! - Domain types (bin sizes, requests, windows, raw and canonical records, frames)
//! - Window planner splitting a span into API-sized windows
//! - Upstream sources (Augmento, BitMEX, synthetic) behind one trait
//! - Schema mapping, merge, and the parquet frame cache
//! - Data-quality audit and multi-dataset joins

pub mod audit;
pub mod data;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod join;
pub mod merge;
pub mod window;

pub use audit::{audit, AuditPolicy, AuditReport, ColumnStats};
pub use error::{PipelineError, WindowFetchError};
pub use fingerprint::FrameFingerprint;
pub use join::{join_frames, JoinHow, NamedFrame};
pub use merge::merge_batches;
pub use window::{plan_request, plan_windows};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared with the executor's worker
    /// threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::FetchRequest>();
        require_sync::<domain::FetchRequest>();
        require_send::<domain::RawRecord>();
        require_sync::<domain::RawRecord>();
        require_send::<domain::CanonicalRecord>();
        require_sync::<domain::CanonicalRecord>();
        require_send::<domain::CanonicalFrame>();
        require_sync::<domain::CanonicalFrame>();
        require_send::<data::SchemaMapper>();
        require_sync::<data::SchemaMapper>();
        require_send::<data::CancelToken>();
        require_sync::<data::CancelToken>();
        require_send::<data::FrameCache>();
        require_sync::<data::FrameCache>();
        require_send::<data::AugmentoProvider>();
        require_sync::<data::AugmentoProvider>();
        require_send::<data::BitmexProvider>();
        require_sync::<data::BitmexProvider>();
        require_send::<PipelineError>();
        require_sync::<PipelineError>();
        require_send::<AuditReport>();
        require_sync::<AuditReport>();
    }

    /// Architecture contract: sources only see one window at a time and never
    /// touch the cache. If the trait grows a cache parameter, this breaks.
    #[test]
    fn window_source_is_object_safe() {
        fn _fetch(
            source: &dyn data::WindowSource,
            request: &domain::FetchRequest,
            window: &domain::Window,
        ) -> Result<Vec<domain::RawRecord>, WindowFetchError> {
            source.fetch_window(request, window, &data::CancelToken::new())
        }
    }
}
