//! Data-quality audit of a canonical frame.
//!
//! Four independent checks: missing time points, duplicate timestamps,
//! schema drift against an expected column list, and per-column descriptive
//! statistics with anomaly flags. The report is a pure function of its inputs.

use crate::domain::{BinSize, CanonicalFrame};
use crate::error::PipelineError;
use crate::fingerprint::FrameFingerprint;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Thresholds for the distribution check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditPolicy {
    /// Flag a column when `max > heavy_tail_ratio * mean` (and `mean > 0`).
    pub heavy_tail_ratio: f64,
    /// Flag columns whose sample standard deviation is exactly zero.
    pub flag_constant_columns: bool,
    /// Numeric columns left out of the statistics.
    pub excluded_columns: Vec<String>,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            heavy_tail_ratio: 10.0,
            flag_constant_columns: true,
            excluded_columns: vec!["t_epoch".to_string()],
        }
    }
}

/// Descriptive statistics for one numeric column. Nulls and NaN are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation; `None` with fewer than two values.
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub p25: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub max: Option<f64>,
}

impl ColumnStats {
    pub fn compute(column: &str, values: &[Option<f64>]) -> Self {
        let mut sorted: Vec<f64> = values
            .iter()
            .flatten()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = (count > 0).then(|| sorted.iter().sum::<f64>() / count as f64);
        let std = mean.filter(|_| count > 1).map(|m| {
            let ss: f64 = sorted.iter().map(|v| (v - m).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        });

        Self {
            column: column.to_string(),
            count,
            mean,
            std,
            min: sorted.first().copied(),
            p25: quantile(&sorted, 0.25),
            p50: quantile(&sorted, 0.50),
            p75: quantile(&sorted, 0.75),
            max: sorted.last().copied(),
        }
    }

    /// Constant column, or a maximum far above the mean.
    pub fn is_anomalous(&self, policy: &AuditPolicy) -> bool {
        let constant = policy.flag_constant_columns && self.std == Some(0.0);
        let heavy_tail = match (self.mean, self.max) {
            (Some(mean), Some(max)) => mean > 0.0 && max > policy.heavy_tail_ratio * mean,
            _ => false,
        };
        constant || heavy_tail
    }
}

/// Linear-interpolated quantile of ascending `sorted`.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Result of auditing one frame. Recomputed on demand, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub frame_fingerprint: FrameFingerprint,
    pub bin_size: BinSize,
    pub row_count: usize,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    pub missing_time_points: Vec<NaiveDateTime>,
    /// Every row whose timestamp occurs more than once, in frame order.
    pub duplicate_timestamps: CanonicalFrame,
    pub missing_columns: Option<BTreeSet<String>>,
    pub unexpected_columns: Option<BTreeSet<String>>,
    pub flagged_columns: Vec<String>,
    pub descriptive_statistics: Vec<ColumnStats>,
}

/// Run every check against `frame`.
///
/// The schema check runs only when `expected_columns` is given and non-empty.
pub fn audit(
    frame: &CanonicalFrame,
    bin_size: BinSize,
    expected_columns: Option<&[String]>,
    policy: &AuditPolicy,
) -> Result<AuditReport, PipelineError> {
    let missing_time_points = missing_time_points(frame, bin_size);
    let duplicate_timestamps = duplicate_timestamps(frame);

    let (missing_columns, unexpected_columns) = match expected_columns {
        Some(expected) if !expected.is_empty() => {
            let (missing, unexpected) = schema_drift(frame, expected);
            (Some(missing), Some(unexpected))
        }
        _ => (None, None),
    };

    let descriptive_statistics = distribution_stats(frame, policy);
    let flagged_columns = descriptive_statistics
        .iter()
        .filter(|s| s.is_anomalous(policy))
        .map(|s| s.column.clone())
        .collect();

    let report = AuditReport {
        frame_fingerprint: FrameFingerprint::of(frame)?,
        bin_size,
        row_count: frame.height(),
        first_timestamp: frame.first_datetime(),
        last_timestamp: frame.last_datetime(),
        missing_time_points,
        duplicate_timestamps,
        missing_columns,
        unexpected_columns,
        flagged_columns,
        descriptive_statistics,
    };

    tracing::info!(
        rows = report.row_count,
        missing = report.missing_time_points.len(),
        duplicates = report.duplicate_timestamps.height(),
        flagged = report.flagged_columns.len(),
        "audit complete"
    );
    Ok(report)
}

/// Grid points between the first and last floored timestamps with no row.
pub fn missing_time_points(frame: &CanonicalFrame, bin_size: BinSize) -> Vec<NaiveDateTime> {
    let present: BTreeSet<NaiveDateTime> = frame
        .datetimes()
        .iter()
        .map(|&ts| bin_size.floor(ts))
        .collect();
    let (Some(&first), Some(&last)) = (present.first(), present.last()) else {
        return Vec::new();
    };

    let unit = bin_size.unit_duration();
    let mut missing = Vec::new();
    let mut ts = first;
    while ts <= last {
        if !present.contains(&ts) {
            missing.push(ts);
        }
        ts += unit;
    }
    missing
}

/// All rows sharing a timestamp with another row.
pub fn duplicate_timestamps(frame: &CanonicalFrame) -> CanonicalFrame {
    let mut counts: BTreeMap<NaiveDateTime, usize> = BTreeMap::new();
    for ts in frame.datetimes() {
        *counts.entry(*ts).or_default() += 1;
    }
    let indices: Vec<usize> = frame
        .datetimes()
        .iter()
        .enumerate()
        .filter(|(_, ts)| counts.get(*ts).copied().unwrap_or(0) > 1)
        .map(|(i, _)| i)
        .collect();
    frame.take(&indices)
}

/// `(expected - present, present - expected)`.
pub fn schema_drift(
    frame: &CanonicalFrame,
    expected: &[String],
) -> (BTreeSet<String>, BTreeSet<String>) {
    let present: BTreeSet<String> = frame.column_names().into_iter().collect();
    let expected: BTreeSet<String> = expected.iter().cloned().collect();
    let missing = expected.difference(&present).cloned().collect();
    let unexpected = present.difference(&expected).cloned().collect();
    (missing, unexpected)
}

pub fn distribution_stats(frame: &CanonicalFrame, policy: &AuditPolicy) -> Vec<ColumnStats> {
    frame
        .numeric_columns()
        .into_iter()
        .filter(|(name, _)| !policy.excluded_columns.contains(name))
        .map(|(name, values)| ColumnStats::compute(&name, &values))
        .collect()
}

const SAMPLE_SIZE: usize = 5;

impl AuditReport {
    /// Plain-text summary for terminals and logs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let fmt_ts = |ts: Option<NaiveDateTime>| ts.map_or_else(|| "n/a".to_string(), |t| t.to_string());

        let _ = writeln!(out, "=== Audit Report ===");
        let _ = writeln!(
            out,
            "Date range: {} to {}",
            fmt_ts(self.first_timestamp),
            fmt_ts(self.last_timestamp)
        );
        let _ = writeln!(out, "Total rows: {}", self.row_count);
        let _ = writeln!(out, "Fingerprint: {}", self.frame_fingerprint.short());
        let _ = writeln!(
            out,
            "Missing {} intervals: {}",
            self.bin_size,
            self.missing_time_points.len()
        );
        let _ = writeln!(out, "Duplicate timestamps: {}", self.duplicate_timestamps.height());
        if let (Some(missing), Some(unexpected)) = (&self.missing_columns, &self.unexpected_columns) {
            let _ = writeln!(out, "Missing columns: {}", missing.len());
            let _ = writeln!(out, "Unexpected columns: {}", unexpected.len());
        }
        let _ = writeln!(
            out,
            "Statistical summary available for {} columns.",
            self.descriptive_statistics.len()
        );

        if !self.flagged_columns.is_empty() {
            let _ = writeln!(out, "Flagged columns: {}", self.flagged_columns.join(", "));
        }
        if !self.missing_time_points.is_empty() {
            let sample: Vec<String> = self
                .missing_time_points
                .iter()
                .take(SAMPLE_SIZE)
                .map(|t| t.to_string())
                .collect();
            let _ = writeln!(out, "Missing sample: {}", sample.join(", "));
        }
        if !self.duplicate_timestamps.is_empty() {
            let _ = writeln!(out, "Duplicate sample:");
            for rec in self.duplicate_timestamps.records().take(SAMPLE_SIZE) {
                let _ = writeln!(out, "  {} {} {}", rec.datetime, rec.source, rec.series_id);
            }
        }
        if let Some(missing) = self.missing_columns.as_ref().filter(|m| !m.is_empty()) {
            let cols: Vec<&str> = missing.iter().map(String::as_str).collect();
            let _ = writeln!(out, "Missing columns: {}", cols.join(", "));
        }
        if let Some(unexpected) = self.unexpected_columns.as_ref().filter(|u| !u.is_empty()) {
            let cols: Vec<&str> = unexpected.iter().map(String::as_str).collect();
            let _ = writeln!(out, "Unexpected columns: {}", cols.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CanonicalRecord, MeasurementValue};
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn rec(datetime: NaiveDateTime, v: i64) -> CanonicalRecord {
        CanonicalRecord {
            datetime,
            t_epoch: datetime.and_utc().timestamp(),
            source: "twitter".into(),
            series_id: "bitcoin".into(),
            bin_size: BinSize::OneHour,
            measurements: BTreeMap::from([("twitter_hacks".to_string(), MeasurementValue::Int(v))]),
        }
    }

    fn frame(points: &[(NaiveDateTime, i64)]) -> CanonicalFrame {
        CanonicalFrame::from_records(points.iter().map(|&(t, v)| rec(t, v)).collect())
    }

    #[test]
    fn single_gap_is_reported() {
        let f = frame(&[(ts(0, 0), 1), (ts(1, 0), 2), (ts(3, 0), 3)]);
        assert_eq!(missing_time_points(&f, BinSize::OneHour), vec![ts(2, 0)]);
    }

    #[test]
    fn off_grid_timestamps_are_floored() {
        let f = frame(&[(ts(0, 10), 1), (ts(1, 59), 2)]);
        assert!(missing_time_points(&f, BinSize::OneHour).is_empty());
    }

    #[test]
    fn both_duplicate_rows_are_reported() {
        let f = frame(&[(ts(11, 0), 1), (ts(12, 0), 2), (ts(12, 0), 3), (ts(13, 0), 4)]);
        let dups = duplicate_timestamps(&f);
        assert_eq!(dups.height(), 2);
        assert!(dups.datetimes().iter().all(|&t| t == ts(12, 0)));
    }

    #[test]
    fn schema_drift_both_directions() {
        let f = frame(&[(ts(0, 0), 1)]);
        let mut expected: Vec<String> = crate::domain::METADATA_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .collect();
        expected.push("twitter_bullish".into());
        let (missing, unexpected) = schema_drift(&f, &expected);
        assert_eq!(missing, BTreeSet::from(["twitter_bullish".to_string()]));
        assert_eq!(unexpected, BTreeSet::from(["twitter_hacks".to_string()]));
    }

    #[test]
    fn stats_match_describe_semantics() {
        let s = ColumnStats::compute("x", &[Some(1.0), Some(2.0), Some(3.0), Some(4.0), None]);
        assert_eq!(s.count, 4);
        assert_eq!(s.mean, Some(2.5));
        assert!((s.std.unwrap() - 1.290_994_448_735_805_6).abs() < 1e-12);
        assert_eq!(s.min, Some(1.0));
        assert_eq!(s.p25, Some(1.75));
        assert_eq!(s.p50, Some(2.5));
        assert_eq!(s.p75, Some(3.25));
        assert_eq!(s.max, Some(4.0));
    }

    #[test]
    fn single_value_has_no_std() {
        let s = ColumnStats::compute("x", &[Some(5.0)]);
        assert_eq!(s.std, None);
        assert!(!s.is_anomalous(&AuditPolicy::default()));
    }

    #[test]
    fn constant_and_heavy_tailed_columns_are_flagged() {
        let policy = AuditPolicy::default();
        let constant = ColumnStats::compute("c", &[Some(3.0), Some(3.0), Some(3.0)]);
        assert!(constant.is_anomalous(&policy));

        let mut tail = vec![Some(1.0); 30];
        tail.push(Some(500.0));
        assert!(ColumnStats::compute("t", &tail).is_anomalous(&policy));

        let normal = ColumnStats::compute("n", &[Some(1.0), Some(2.0), Some(3.0)]);
        assert!(!normal.is_anomalous(&policy));

        let lenient = AuditPolicy {
            flag_constant_columns: false,
            ..AuditPolicy::default()
        };
        assert!(!constant.is_anomalous(&lenient));
    }

    #[test]
    fn t_epoch_excluded_by_default() {
        let f = frame(&[(ts(0, 0), 1), (ts(1, 0), 2)]);
        let stats = distribution_stats(&f, &AuditPolicy::default());
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].column, "twitter_hacks");
    }

    #[test]
    fn audit_is_idempotent() {
        let f = frame(&[(ts(0, 0), 1), (ts(2, 0), 5), (ts(2, 0), 7)]);
        let policy = AuditPolicy::default();
        let a = audit(&f, BinSize::OneHour, None, &policy).unwrap();
        let b = audit(&f, BinSize::OneHour, None, &policy).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.missing_columns, None);
        assert_eq!(a.missing_time_points, vec![ts(1, 0)]);
        assert_eq!(a.duplicate_timestamps.height(), 2);
    }

    #[test]
    fn empty_frame_audits_cleanly() {
        let report = audit(&CanonicalFrame::default(), BinSize::OneHour, None, &AuditPolicy::default()).unwrap();
        assert_eq!(report.row_count, 0);
        assert!(report.missing_time_points.is_empty());
        assert!(report.render().contains("Total rows: 0"));
    }

    #[test]
    fn report_serializes_with_expected_keys() {
        let f = frame(&[(ts(0, 0), 1)]);
        let report = audit(&f, BinSize::OneHour, Some(&["datetime".to_string()]), &AuditPolicy::default()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        for key in [
            "frame_fingerprint",
            "missing_time_points",
            "duplicate_timestamps",
            "missing_columns",
            "unexpected_columns",
            "flagged_columns",
            "descriptive_statistics",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        let text = report.render();
        assert!(text.contains("Unexpected columns: 5"));
    }
}
