//! Fetch executor: runs the planned windows of one request in parallel.
//!
//! Windows run on a private rayon pool (never the global one). A failed
//! window is logged with its bounds and contributes no rows; the request as
//! a whole fails only when no window produced any data.

use rayon::prelude::*;
use sentitap_core::data::{CancelToken, RequestMeta, SchemaMapper, WindowSource};
use sentitap_core::domain::{CanonicalRecord, FetchRequest, Window};
use sentitap_core::{PipelineError, WindowFetchError};
use serde::{Deserialize, Serialize};

/// Executor settings (`[executor]` in the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker threads in the private pool.
    pub concurrency: usize,
    /// Per-request HTTP timeout, applied to every window attempt.
    pub window_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            window_timeout_secs: 30,
        }
    }
}

/// What happened to one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WindowStatus {
    Fetched { rows: usize },
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub window: Window,
    #[serde(flatten)]
    pub status: WindowStatus,
}

/// Mapped batches (one per window, in window order) plus per-window outcomes.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub batches: Vec<Vec<CanonicalRecord>>,
    pub windows: Vec<WindowOutcome>,
    /// Metadata plus mapped measurement names for the request's field table.
    pub expected_columns: Vec<String>,
}

impl FetchOutcome {
    pub fn rows(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn failed(&self) -> usize {
        self.windows
            .iter()
            .filter(|w| matches!(w.status, WindowStatus::Failed { .. }))
            .count()
    }

    pub fn cancelled(&self) -> usize {
        self.windows
            .iter()
            .filter(|w| w.status == WindowStatus::Cancelled)
            .count()
    }

    /// Every window fetched; only complete results are cached.
    pub fn is_complete(&self) -> bool {
        self.failed() == 0 && self.cancelled() == 0
    }
}

/// Runs a request's windows on a private worker pool.
pub struct FetchExecutor {
    pool: rayon::ThreadPool,
    concurrency: usize,
}

impl FetchExecutor {
    /// Pool of `concurrency` workers (at least one).
    pub fn new(concurrency: usize) -> Result<Self, PipelineError> {
        let concurrency = concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("sentitap-fetch-{i}"))
            .build()
            .map_err(|e| PipelineError::Io(format!("failed to build fetch pool: {e}")))?;
        Ok(Self { pool, concurrency })
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self, PipelineError> {
        Self::new(config.concurrency)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch and map every window of `request`.
    ///
    /// Fails with `UnsupportedBinSize` before any network call, with
    /// `Cancelled` if cancellation left no rows, and with `NoDataCollected`
    /// if the windows together produced no rows.
    pub fn execute(
        &self,
        source: &dyn WindowSource,
        request: &FetchRequest,
        windows: &[Window],
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, PipelineError> {
        source.check_bin_size(request.bin_size())?;
        let mapper = SchemaMapper::new(
            source.field_table(request)?,
            RequestMeta {
                source: request.source_id().to_string(),
                series_id: request.series_id().to_string(),
                bin_size: request.bin_size(),
            },
        );

        tracing::info!(
            request = %request,
            provider = source.name(),
            windows = windows.len(),
            concurrency = self.concurrency,
            "fetching windows"
        );

        let results: Vec<(Vec<CanonicalRecord>, WindowOutcome)> = self.pool.install(|| {
            windows
                .par_iter()
                .map(|window| fetch_one(source, &mapper, request, window, cancel))
                .collect()
        });

        let mut outcome = FetchOutcome {
            expected_columns: mapper.table().expected_columns(),
            ..FetchOutcome::default()
        };
        for (batch, window) in results {
            outcome.batches.push(batch);
            outcome.windows.push(window);
        }

        if outcome.rows() == 0 {
            if outcome.cancelled() > 0 {
                return Err(PipelineError::Cancelled);
            }
            return Err(PipelineError::NoDataCollected {
                request: request.to_string(),
            });
        }

        tracing::info!(
            rows = outcome.rows(),
            failed = outcome.failed(),
            cancelled = outcome.cancelled(),
            "windows complete"
        );
        Ok(outcome)
    }
}

fn fetch_one(
    source: &dyn WindowSource,
    mapper: &SchemaMapper,
    request: &FetchRequest,
    window: &Window,
    cancel: &CancelToken,
) -> (Vec<CanonicalRecord>, WindowOutcome) {
    let cancelled = || WindowOutcome {
        window: *window,
        status: WindowStatus::Cancelled,
    };

    if cancel.is_cancelled() {
        tracing::debug!(start = %window.start, end = %window.end, "window skipped after cancel");
        return (Vec::new(), cancelled());
    }

    match source.fetch_window(request, window, cancel) {
        Ok(raw) => {
            let batch = mapper.map_batch(raw);
            tracing::info!(start = %window.start, end = %window.end, rows = batch.len(), "window fetched");
            let status = WindowStatus::Fetched { rows: batch.len() };
            (
                batch,
                WindowOutcome {
                    window: *window,
                    status,
                },
            )
        }
        Err(WindowFetchError::Cancelled) => (Vec::new(), cancelled()),
        Err(e) => {
            tracing::warn!(start = %window.start, end = %window.end, error = %e, "window failed");
            (
                Vec::new(),
                WindowOutcome {
                    window: *window,
                    status: WindowStatus::Failed {
                        error: e.to_string(),
                    },
                },
            )
        }
    }
}
