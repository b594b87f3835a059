//! BitMEX trade-bucket provider (`/trade/bucketed`).

use super::circuit_breaker::CircuitBreaker;
use super::http::{build_client, get_json};
use super::provider::{CancelToken, WindowSource};
use super::retry::RetryPolicy;
use super::schema::FieldTable;
use crate::domain::{BinSize, BucketRecord, FetchRequest, RawRecord, Window, WIRE_DATETIME_FORMAT};
use crate::error::{PipelineError, WindowFetchError};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.bitmex.com/api/v1";
pub const DEFAULT_ROW_CAP: usize = 750;
/// Hard upper bound the endpoint accepts for `count`.
pub const MAX_ROW_CAP: usize = 1000;

/// BitMEX's label for a bin size. Every canonical size is served.
pub fn wire_bin_label(bin_size: BinSize) -> &'static str {
    match bin_size {
        BinSize::OneMinute => "1m",
        BinSize::FiveMinutes => "5m",
        BinSize::OneHour => "1h",
        BinSize::OneDay => "1d",
    }
}

/// BitMEX `/trade/bucketed` source for OHLCV price series.
pub struct BitmexProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    row_cap: usize,
    retry: RetryPolicy,
    circuit_breaker: CircuitBreaker,
}

impl BitmexProvider {
    pub fn new(
        base_url: impl Into<String>,
        row_cap: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, PipelineError> {
        if row_cap == 0 || row_cap > MAX_ROW_CAP {
            return Err(PipelineError::InvalidRowCap(row_cap));
        }
        let client = build_client(timeout).map_err(|e| PipelineError::Io(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            row_cap,
            retry,
            circuit_breaker: CircuitBreaker::default_provider(),
        })
    }
}

impl WindowSource for BitmexProvider {
    fn name(&self) -> &str {
        "bitmex"
    }

    fn row_cap(&self) -> usize {
        self.row_cap
    }

    fn supported_bin_sizes(&self) -> &[BinSize] {
        &BinSize::ALL
    }

    fn field_table(&self, request: &FetchRequest) -> Result<FieldTable, PipelineError> {
        Ok(FieldTable::ohlcv(request.source_id()))
    }

    fn fetch_window(
        &self,
        request: &FetchRequest,
        window: &Window,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, WindowFetchError> {
        let query = [
            ("symbol", request.series_id().to_string()),
            ("binSize", wire_bin_label(request.bin_size()).to_string()),
            ("count", self.row_cap.to_string()),
            ("partial", "false".to_string()),
            ("startTime", window.start.format(WIRE_DATETIME_FORMAT).to_string()),
            ("endTime", window.end.format(WIRE_DATETIME_FORMAT).to_string()),
        ];
        let buckets: Vec<BucketRecord> = get_json(
            &self.client,
            &self.circuit_breaker,
            &self.retry,
            &format!("{}/trade/bucketed", self.base_url),
            &query,
            cancel,
        )?;
        Ok(buckets.into_iter().map(RawRecord::Bucket).collect())
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
