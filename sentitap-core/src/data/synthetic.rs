//! Synthetic topic-count source for offline runs and tests.
//!
//! Values are derived from a BLAKE3 sub-seed per `(seed, request, bucket)`,
//! so a bucket produces the same counts whatever window it is fetched in.

use super::provider::{CancelToken, WindowSource};
use super::schema::FieldTable;
use crate::domain::{BinSize, FetchRequest, RawRecord, Window};
use crate::error::{PipelineError, WindowFetchError};
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Offline source producing seeded topic counts, one row per bin.
pub struct SyntheticSource {
    seed: u64,
    topics: usize,
    row_cap: usize,
    calls: AtomicUsize,
}

impl SyntheticSource {
    pub fn new(seed: u64, topics: usize, row_cap: usize) -> Self {
        Self {
            seed,
            topics,
            row_cap: row_cap.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `fetch_window` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn bucket_seed(&self, request: &FetchRequest, bucket: NaiveDateTime) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(request.source_id().as_bytes());
        hasher.update(request.series_id().as_bytes());
        hasher.update(&bucket.and_utc().timestamp().to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    fn topic_names(&self) -> HashMap<String, String> {
        (0..self.topics)
            .map(|i| (i.to_string(), format!("Topic {i}")))
            .collect()
    }
}

impl WindowSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn row_cap(&self) -> usize {
        self.row_cap
    }

    fn supported_bin_sizes(&self) -> &[BinSize] {
        &BinSize::ALL
    }

    fn field_table(&self, request: &FetchRequest) -> Result<FieldTable, PipelineError> {
        Ok(FieldTable::from_topics(request.source_id(), &self.topic_names()))
    }

    fn fetch_window(
        &self,
        request: &FetchRequest,
        window: &Window,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, WindowFetchError> {
        if cancel.is_cancelled() {
            return Err(WindowFetchError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let unit = request.bin_size().unit_duration();
        let mut bucket = request.bin_size().floor(window.start);
        if bucket < window.start {
            bucket += unit;
        }

        let mut records = Vec::new();
        while bucket < window.end {
            let mut rng = StdRng::seed_from_u64(self.bucket_seed(request, bucket));
            let counts = (0..self.topics).map(|_| rng.gen_range(0..500)).collect();
            records.push(RawRecord::TopicCounts {
                datetime: bucket,
                t_epoch: bucket.and_utc().timestamp(),
                counts,
            });
            bucket += unit;
        }
        Ok(records)
    }
}
