//! End-to-end acquisition through the pipeline with offline sources.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use sentitap_core::data::{
    AugmentoProvider, CancelToken, FieldTable, FrameCache, RetryPolicy, SyntheticSource,
    WindowSource,
};
use sentitap_core::domain::{BinSize, FetchRequest, RawRecord, Window};
use sentitap_core::{AuditPolicy, PipelineError, WindowFetchError};
use sentitap_runner::{FetchExecutor, Origin, Pipeline, Stage, WindowStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

// ── Test sources ─────────────────────────────────────────────────────

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn request(hours: i64) -> FetchRequest {
    FetchRequest::new(
        "synthetic",
        "bitcoin",
        BinSize::OneHour,
        base(),
        base() + Duration::hours(hours),
    )
    .unwrap()
}

fn pipeline(dir: &tempfile::TempDir) -> Pipeline {
    Pipeline::new(
        FrameCache::new(dir.path()),
        FetchExecutor::new(4).unwrap(),
        AuditPolicy::default(),
    )
}

/// Every window fails with a server error.
struct DownSource;

impl WindowSource for DownSource {
    fn name(&self) -> &str {
        "down"
    }
    fn row_cap(&self) -> usize {
        5
    }
    fn supported_bin_sizes(&self) -> &[BinSize] {
        &BinSize::ALL
    }
    fn field_table(&self, request: &FetchRequest) -> Result<FieldTable, PipelineError> {
        Ok(FieldTable::ohlcv(request.source_id()))
    }
    fn fetch_window(
        &self,
        _: &FetchRequest,
        _: &Window,
        _: &CancelToken,
    ) -> Result<Vec<RawRecord>, WindowFetchError> {
        Err(WindowFetchError::Http {
            status: 502,
            message: "bad gateway".into(),
        })
    }
}

/// Synthetic data, but windows starting at one of `failing_hours` fail.
struct FlakySource {
    inner: SyntheticSource,
    failing_hours: Vec<i64>,
}

impl WindowSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }
    fn row_cap(&self) -> usize {
        self.inner.row_cap()
    }
    fn supported_bin_sizes(&self) -> &[BinSize] {
        self.inner.supported_bin_sizes()
    }
    fn field_table(&self, request: &FetchRequest) -> Result<FieldTable, PipelineError> {
        self.inner.field_table(request)
    }
    fn fetch_window(
        &self,
        request: &FetchRequest,
        window: &Window,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, WindowFetchError> {
        let hour = (window.start - base()).num_hours();
        if self.failing_hours.contains(&hour) {
            return Err(WindowFetchError::Timeout("slow upstream".into()));
        }
        self.inner.fetch_window(request, window, cancel)
    }
}

/// Synthetic data with a delay per window, counting calls.
struct SlowSource {
    inner: SyntheticSource,
    calls: AtomicUsize,
}

impl WindowSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }
    fn row_cap(&self) -> usize {
        self.inner.row_cap()
    }
    fn supported_bin_sizes(&self) -> &[BinSize] {
        self.inner.supported_bin_sizes()
    }
    fn field_table(&self, request: &FetchRequest) -> Result<FieldTable, PipelineError> {
        self.inner.field_table(request)
    }
    fn fetch_window(
        &self,
        request: &FetchRequest,
        window: &Window,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, WindowFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(std::time::Duration::from_millis(150));
        self.inner.fetch_window(request, window, cancel)
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[test]
fn fresh_fetch_is_cached_then_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&dir);
    let req = request(23);

    let source = SyntheticSource::new(3, 4, 5);
    let first = pipeline.acquire(&source, &req, &CancelToken::new()).unwrap();
    assert_eq!(first.origin, Origin::Network);
    assert_eq!(
        first.stages,
        vec![Stage::Planned, Stage::Fetching, Stage::Merged, Stage::Cached, Stage::Audited]
    );
    assert_eq!(first.windows.len(), 5);
    assert!(!first.is_partial());
    assert_eq!(first.frame.height(), 23);
    assert!(first.report.missing_time_points.is_empty());
    assert!(pipeline.cache().contains(&req));

    let fresh = SyntheticSource::new(3, 4, 5);
    let second = pipeline.acquire(&fresh, &req, &CancelToken::new()).unwrap();
    assert_eq!(fresh.calls(), 0);
    assert_eq!(second.origin, Origin::Cache);
    assert_eq!(second.stages, vec![Stage::Planned, Stage::Audited]);
    assert!(second.windows.is_empty());
    assert_eq!(*second.frame, *first.frame);
    assert_eq!(*second.report, *first.report);
}

#[test]
fn schema_check_uses_the_field_table() {
    let dir = tempfile::tempdir().unwrap();
    let acquisition = pipeline(&dir)
        .acquire(&SyntheticSource::new(1, 3, 10), &request(6), &CancelToken::new())
        .unwrap();

    let report = &acquisition.report;
    assert_eq!(report.missing_columns.as_ref().map(|c| c.len()), Some(0));
    assert_eq!(report.unexpected_columns.as_ref().map(|c| c.len()), Some(0));
}

#[test]
fn all_windows_failing_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&dir);
    let req = request(12);

    let err = pipeline
        .acquire(&DownSource, &req, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoDataCollected { .. }));
    assert!(!pipeline.cache().contains(&req));
}

#[test]
fn partial_result_is_returned_but_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&dir);
    let req = request(20);
    let source = FlakySource {
        inner: SyntheticSource::new(9, 2, 5),
        failing_hours: vec![5],
    };

    let acquisition = pipeline.acquire(&source, &req, &CancelToken::new()).unwrap();
    assert!(acquisition.is_partial());
    assert_eq!(
        acquisition.stages,
        vec![Stage::Planned, Stage::Fetching, Stage::Merged, Stage::Audited]
    );
    assert_eq!(acquisition.frame.height(), 15);
    assert!(matches!(
        acquisition.windows[1].status,
        WindowStatus::Failed { .. }
    ));
    // Hours 05..=09 are a gap between 04:00 and 10:00.
    assert_eq!(acquisition.report.missing_time_points.len(), 5);
    assert!(!pipeline.cache().contains(&req));
}

#[test]
fn cancelled_request_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&dir);
    let req = request(10);
    let source = SyntheticSource::new(1, 2, 5);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = pipeline.acquire(&source, &req, &cancel).unwrap_err();
    assert_eq!(err, PipelineError::Cancelled);
    assert_eq!(source.calls(), 0);
    assert!(!pipeline.cache().contains(&req));
}

#[test]
fn unsupported_bin_size_fails_before_network() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens here; the bin size check must reject first.
    let provider = AugmentoProvider::new(
        "http://127.0.0.1:9",
        1000,
        std::time::Duration::from_secs(1),
        RetryPolicy::none(),
    )
    .unwrap();
    let req = FetchRequest::new(
        "twitter",
        "bitcoin",
        BinSize::FiveMinutes,
        base(),
        base() + Duration::hours(1),
    )
    .unwrap();

    let err = pipeline(&dir)
        .acquire(&provider, &req, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedBinSize { .. }));
}

// ── Single-flight ────────────────────────────────────────────────────

#[test]
fn concurrent_identical_requests_fetch_once() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(pipeline(&dir));
    let source = Arc::new(SlowSource {
        inner: SyntheticSource::new(5, 2, 5),
        calls: AtomicUsize::new(0),
    });
    let req = request(10);
    let callers = 4;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let source = Arc::clone(&source);
            let barrier = Arc::clone(&barrier);
            let req = req.clone();
            thread::spawn(move || {
                barrier.wait();
                pipeline.acquire(&*source, &req, &CancelToken::new())
            })
        })
        .collect();

    let acquisitions: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    // Two windows of five hours, fetched once.
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    let network = acquisitions
        .iter()
        .filter(|a| a.origin == Origin::Network)
        .count();
    assert_eq!(network, 1);
    assert!(acquisitions
        .iter()
        .all(|a| a.origin != Origin::Network || a.stages.contains(&Stage::Cached)));
    for a in &acquisitions {
        assert_eq!(*a.frame, *acquisitions[0].frame);
    }
}

#[test]
fn leader_cancellation_does_not_fail_waiting_callers() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(pipeline(&dir));
    let source = Arc::new(SlowSource {
        inner: SyntheticSource::new(5, 2, 5),
        calls: AtomicUsize::new(0),
    });
    // Eight windows on four workers: the second round starts after the cancel.
    let req = request(40);
    let leader_cancel = CancelToken::new();

    let leader = {
        let pipeline = Arc::clone(&pipeline);
        let source = Arc::clone(&source);
        let req = req.clone();
        let cancel = leader_cancel.clone();
        thread::spawn(move || pipeline.acquire(&*source, &req, &cancel))
    };
    thread::sleep(std::time::Duration::from_millis(30));
    let follower = {
        let pipeline = Arc::clone(&pipeline);
        let source = Arc::clone(&source);
        let req = req.clone();
        thread::spawn(move || pipeline.acquire(&*source, &req, &CancelToken::new()))
    };
    thread::sleep(std::time::Duration::from_millis(30));
    leader_cancel.cancel();

    let led = leader.join().unwrap();
    assert!(led.map_or(true, |a| a.is_partial()));

    let followed = follower.join().unwrap().unwrap();
    assert!(!followed.is_partial());
    assert_eq!(followed.frame.height(), 40);
    assert!(pipeline.cache().contains(&req));
}

#[test]
fn cache_hit_without_sidecar_is_refetched_and_schema_checked() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(&dir);
    let req = request(6);
    pipeline
        .acquire(&SyntheticSource::new(1, 3, 10), &req, &CancelToken::new())
        .unwrap();

    // An interrupted write can leave the artifact without its sidecar.
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.to_string_lossy().ends_with(".meta.json") {
            std::fs::remove_file(path).unwrap();
        }
    }

    let source = SyntheticSource::new(1, 3, 10);
    let again = pipeline.acquire(&source, &req, &CancelToken::new()).unwrap();
    assert_eq!(again.origin, Origin::Network);
    assert!(source.calls() > 0);
    assert_eq!(again.report.missing_columns.as_ref().map(|c| c.len()), Some(0));
    assert!(pipeline.cache().meta(&req).is_some());
}
