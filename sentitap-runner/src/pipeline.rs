//! Acquisition pipeline: plan → fetch → merge → cache → audit.
//!
//! The pipeline is a function of the request and the cache contents. Each
//! acquisition walks a forward-only lifecycle; concurrent acquisitions of
//! the same cache key are coalesced onto one fetch.

use crate::config::PipelineConfig;
use crate::executor::{FetchExecutor, WindowOutcome, WindowStatus};
use crate::single_flight::{Role, SingleFlight};
use sentitap_core::data::{CacheMeta, CancelToken, FrameCache, WindowSource};
use sentitap_core::domain::{CacheKey, CanonicalFrame, FetchRequest};
use sentitap_core::{audit, merge_batches, plan_request, AuditPolicy, AuditReport, PipelineError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ── Lifecycle ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planned,
    Fetching,
    Merged,
    Cached,
    Audited,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Audited | Stage::Failed)
    }

    /// Allowed edges. A cache hit skips straight to `Audited`; a partial
    /// result skips `Cached`.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Planned, Fetching) | (Planned, Audited) => true,
            (Fetching, Merged) => true,
            (Merged, Cached) | (Merged, Audited) => true,
            (Cached, Audited) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Planned => "planned",
            Stage::Fetching => "fetching",
            Stage::Merged => "merged",
            Stage::Cached => "cached",
            Stage::Audited => "audited",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Records the stages one acquisition has passed through.
#[derive(Debug, Clone)]
pub struct StageTracker {
    key: CacheKey,
    history: Vec<Stage>,
}

impl StageTracker {
    pub fn new(key: CacheKey) -> Self {
        tracing::debug!(key = %key, stage = %Stage::Planned, "acquisition planned");
        Self {
            key,
            history: vec![Stage::Planned],
        }
    }

    pub fn current(&self) -> Stage {
        self.history.last().copied().unwrap_or(Stage::Planned)
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), PipelineError> {
        let from = self.current();
        if !from.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }
        tracing::info!(key = %self.key, from = %from, to = %next, "stage transition");
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self, error: &PipelineError) {
        if self.current().can_advance_to(Stage::Failed) {
            tracing::warn!(key = %self.key, from = %self.current(), error = %error, "acquisition failed");
            self.history.push(Stage::Failed);
        }
    }

    fn into_history(self) -> Vec<Stage> {
        self.history
    }
}

// ── Acquisition ──────────────────────────────────────────────────────

/// Where an acquisition's frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Network,
    Cache,
    /// Waited on another caller's in-flight fetch of the same key.
    Coalesced,
}

/// Result handed to the consumer: the canonical frame plus its audit.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub request: FetchRequest,
    pub frame: Arc<CanonicalFrame>,
    pub report: Arc<AuditReport>,
    pub origin: Origin,
    pub stages: Vec<Stage>,
    /// Per-window outcomes; empty for cache hits.
    pub windows: Vec<WindowOutcome>,
}

impl Acquisition {
    /// Whether any window failed or was cancelled.
    pub fn is_partial(&self) -> bool {
        self.windows
            .iter()
            .any(|w| !matches!(w.status, WindowStatus::Fetched { .. }))
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────

/// Cache-first acquisition with per-key single-flight.
pub struct Pipeline {
    cache: FrameCache,
    executor: FetchExecutor,
    audit_policy: AuditPolicy,
    flights: SingleFlight<CacheKey, Acquisition>,
}

impl Pipeline {
    pub fn new(cache: FrameCache, executor: FetchExecutor, audit_policy: AuditPolicy) -> Self {
        Self {
            cache,
            executor,
            audit_policy,
            flights: SingleFlight::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self::new(
            FrameCache::new(config.cache_dir.clone()),
            FetchExecutor::from_config(&config.executor)?,
            config.audit.clone(),
        ))
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn audit_policy(&self) -> &AuditPolicy {
        &self.audit_policy
    }

    /// Acquire and audit the frame for `request`.
    ///
    /// Served from cache when a valid artifact exists; otherwise fetched.
    /// A caller arriving while the same key is being fetched waits for that
    /// fetch and gets `Origin::Coalesced`. Cancellation is per caller: if the
    /// leader's caller cancels, waiters that did not cancel run the request
    /// again instead of adopting the cancelled result.
    pub fn acquire(
        &self,
        source: &dyn WindowSource,
        request: &FetchRequest,
        cancel: &CancelToken,
    ) -> Result<Acquisition, PipelineError> {
        let key = request.cache_key();
        loop {
            let (result, role) = self.flights.run(key.clone(), cancel, || {
                self.acquire_uncoalesced(source, request, cancel)
            });

            match role {
                Role::Leader => return result,
                Role::Follower if !cancel.is_cancelled() && cancelled_by_leader(&result) => {
                    tracing::info!(key = %key, "in-flight acquisition was cancelled by its caller, retrying");
                }
                Role::Follower => {
                    tracing::info!(key = %key, "joined in-flight acquisition");
                    return result.map(|mut acquisition| {
                        acquisition.origin = Origin::Coalesced;
                        acquisition
                    });
                }
            }
        }
    }

    fn acquire_uncoalesced(
        &self,
        source: &dyn WindowSource,
        request: &FetchRequest,
        cancel: &CancelToken,
    ) -> Result<Acquisition, PipelineError> {
        let mut tracker = StageTracker::new(request.cache_key());
        match self.run_stages(&mut tracker, source, request, cancel) {
            Ok((frame, report, origin, windows)) => Ok(Acquisition {
                request: request.clone(),
                frame: Arc::new(frame),
                report: Arc::new(report),
                origin,
                stages: tracker.into_history(),
                windows,
            }),
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        tracker: &mut StageTracker,
        source: &dyn WindowSource,
        request: &FetchRequest,
        cancel: &CancelToken,
    ) -> Result<(CanonicalFrame, AuditReport, Origin, Vec<WindowOutcome>), PipelineError> {
        source.check_bin_size(request.bin_size())?;

        if let Some((frame, meta)) = self.cached_frame(request) {
            let report = audit(
                &frame,
                request.bin_size(),
                Some(meta.expected_columns.as_slice()),
                &self.audit_policy,
            )?;
            tracker.advance(Stage::Audited)?;
            return Ok((frame, report, Origin::Cache, Vec::new()));
        }

        let windows = plan_request(request, source.row_cap())?;
        tracker.advance(Stage::Fetching)?;
        let outcome = self.executor.execute(source, request, &windows, cancel)?;
        let complete = outcome.is_complete();
        let expected = outcome.expected_columns;
        let window_outcomes = outcome.windows;

        let frame = merge_batches(outcome.batches);
        tracker.advance(Stage::Merged)?;

        if complete {
            match self.cache.put(request, &frame, &expected) {
                Ok(_) => tracker.advance(Stage::Cached)?,
                Err(e) => tracing::warn!(request = %request, error = %e, "cache write failed"),
            }
        } else {
            tracing::info!(request = %request, "partial result, not caching");
        }

        let report = audit(
            &frame,
            request.bin_size(),
            Some(expected.as_slice()),
            &self.audit_policy,
        )?;
        tracker.advance(Stage::Audited)?;
        Ok((frame, report, Origin::Network, window_outcomes))
    }

    fn cached_frame(&self, request: &FetchRequest) -> Option<(CanonicalFrame, CacheMeta)> {
        match self.cache.lookup(request) {
            Ok(Some((frame, meta))) => {
                tracing::info!(request = %request, rows = frame.height(), "cache hit");
                Some((frame, meta))
            }
            Ok(None) => {
                tracing::debug!(request = %request, "cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(request = %request, error = %e, "cache read failed, refetching");
                None
            }
        }
    }
}

/// Whether a shared result reflects the leader's cancellation rather than
/// the upstream data.
fn cancelled_by_leader(result: &Result<Acquisition, PipelineError>) -> bool {
    match result {
        Err(PipelineError::Cancelled) => true,
        Err(_) => false,
        Ok(acquisition) => acquisition
            .windows
            .iter()
            .any(|w| matches!(w.status, WindowStatus::Cancelled)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_paths_are_allowed() {
        use Stage::*;
        for path in [
            vec![Planned, Fetching, Merged, Cached, Audited],
            vec![Planned, Audited],
            vec![Planned, Fetching, Merged, Audited],
        ] {
            for pair in path.windows(2) {
                assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn backward_and_terminal_moves_are_rejected() {
        use Stage::*;
        assert!(!Merged.can_advance_to(Fetching));
        assert!(!Audited.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Planned));
        assert!(!Planned.can_advance_to(Merged));
        assert!(!Cached.can_advance_to(Cached));
        assert!(Fetching.can_advance_to(Failed));
    }

    #[test]
    fn tracker_reports_invalid_transition() {
        let req = FetchRequest::new(
            "synthetic",
            "bitcoin",
            sentitap_core::domain::BinSize::OneHour,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
        .unwrap();
        let mut tracker = StageTracker::new(req.cache_key());
        tracker.advance(Stage::Fetching).unwrap();
        let err = tracker.advance(Stage::Cached).unwrap_err();
        assert_eq!(
            err,
            PipelineError::InvalidTransition {
                from: "fetching".into(),
                to: "cached".into()
            }
        );

        tracker.fail(&err);
        assert_eq!(tracker.current(), Stage::Failed);
        // Failing twice does not append.
        tracker.fail(&err);
        assert_eq!(tracker.history(), &[Stage::Planned, Stage::Fetching, Stage::Failed]);
    }
}
