//! Window source trait and cooperative cancellation.
//!
//! A `WindowSource` abstracts one upstream API (Augmento, BitMEX, synthetic)
//! as a single capability: fetch the raw records for one window of one
//! request. The cache and the executor sit above this trait; sources know
//! nothing about either.

use super::schema::FieldTable;
use crate::domain::{BinSize, FetchRequest, RawRecord, Window};
use crate::error::{PipelineError, WindowFetchError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, checked before each window and between retries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One upstream data source.
pub trait WindowSource: Send + Sync {
    /// Human-readable provider name (for logs).
    fn name(&self) -> &str;

    /// Maximum rows the API returns per call.
    fn row_cap(&self) -> usize;

    /// Bin sizes this source can serve.
    fn supported_bin_sizes(&self) -> &[BinSize];

    /// Index → column name table used to map this request's raw records.
    fn field_table(&self, request: &FetchRequest) -> Result<FieldTable, PipelineError>;

    /// Fetch raw records for one window of a request.
    fn fetch_window(
        &self,
        request: &FetchRequest,
        window: &Window,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, WindowFetchError>;

    /// Whether the source currently accepts requests (not blocked or rate limited).
    fn is_available(&self) -> bool {
        true
    }

    /// Fail before any network call if the bin size is not served.
    fn check_bin_size(&self, bin_size: BinSize) -> Result<(), PipelineError> {
        if self.supported_bin_sizes().contains(&bin_size) {
            Ok(())
        } else {
            Err(PipelineError::UnsupportedBinSize {
                source_name: self.name().to_string(),
                bin_size: bin_size.to_string(),
            })
        }
    }
}
