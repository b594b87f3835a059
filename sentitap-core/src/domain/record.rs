//! Raw upstream observations and their canonical, source-agnostic form.

use super::BinSize;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One upstream observation, before schema mapping.
///
/// Exists only while a single window is being fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// Sentiment counts indexed by numeric topic id.
    TopicCounts {
        datetime: NaiveDateTime,
        t_epoch: i64,
        counts: Vec<i64>,
    },
    /// OHLCV-style trade bucket.
    Bucket(BucketRecord),
}

/// Trade bucket as returned by `/trade/bucketed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub symbol: Option<String>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub vwap: Option<f64>,
    pub turnover: Option<i64>,
    pub home_notional: Option<f64>,
    pub foreign_notional: Option<f64>,
    pub trades: Option<i64>,
    pub last_size: Option<i64>,
}

impl BucketRecord {
    /// Field values in field-table index order.
    pub fn values(&self) -> Vec<Option<MeasurementValue>> {
        use MeasurementValue::{Float, Int};
        vec![
            self.open.map(Float),
            self.high.map(Float),
            self.low.map(Float),
            self.close.map(Float),
            self.volume.map(Int),
            self.vwap.map(Float),
            self.turnover.map(Int),
            self.home_notional.map(Float),
            self.foreign_notional.map(Float),
            self.trades.map(Int),
            self.last_size.map(Int),
        ]
    }
}

/// A typed measurement cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Int(i64),
    Float(f64),
}

impl MeasurementValue {
    pub fn as_f64(self) -> f64 {
        match self {
            MeasurementValue::Int(v) => v as f64,
            MeasurementValue::Float(v) => v,
        }
    }

    /// Total order used for deterministic tie-breaking.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MeasurementValue::Int(a), MeasurementValue::Int(b)) => a.cmp(b),
            _ => self.as_f64().total_cmp(&other.as_f64()),
        }
    }
}

/// One normalized row: closed metadata plus named measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub datetime: NaiveDateTime,
    pub t_epoch: i64,
    pub source: String,
    pub series_id: String,
    pub bin_size: BinSize,
    pub measurements: BTreeMap<String, MeasurementValue>,
}

impl CanonicalRecord {
    /// Order by timestamp first, then by every remaining field.
    ///
    /// Rows that compare equal are identical in content, so sorting with this
    /// order yields the same sequence whatever the input order.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.datetime
            .cmp(&other.datetime)
            .then_with(|| self.t_epoch.cmp(&other.t_epoch))
            .then_with(|| self.source.cmp(&other.source))
            .then_with(|| self.series_id.cmp(&other.series_id))
            .then_with(|| self.bin_size.cmp(&other.bin_size))
            .then_with(|| cmp_measurements(&self.measurements, &other.measurements))
    }
}

fn cmp_measurements(
    a: &BTreeMap<String, MeasurementValue>,
    b: &BTreeMap<String, MeasurementValue>,
) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((ka, va)), Some((kb, vb))) => {
                let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_record_parses_bitmex_row() {
        let json = r#"{
            "timestamp": "2024-01-01T01:00:00.000Z",
            "symbol": "XBTUSD",
            "open": 42000.5, "high": 42100.0, "low": 41900.0, "close": 42050.0,
            "trades": 1200, "volume": 3500000, "vwap": 42010.2,
            "lastSize": 100, "turnover": 8300000000,
            "homeNotional": 83.1, "foreignNotional": 3500000.0
        }"#;
        let rec: BucketRecord = serde_json::from_str(json).unwrap();
        let values = rec.values();
        assert_eq!(values.len(), 11);
        assert_eq!(values[0], Some(MeasurementValue::Float(42000.5)));
        assert_eq!(values[4], Some(MeasurementValue::Int(3_500_000)));
        assert_eq!(values[10], Some(MeasurementValue::Int(100)));
    }

    #[test]
    fn bucket_record_tolerates_null_prices() {
        let json = r#"{"timestamp": "2024-01-01T01:00:00Z", "open": null, "high": null,
            "low": null, "close": null, "trades": 0, "volume": 0, "vwap": null,
            "lastSize": null, "turnover": 0, "homeNotional": 0, "foreignNotional": 0}"#;
        let rec: BucketRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.values()[0], None);
        assert_eq!(rec.values()[9], Some(MeasurementValue::Int(0)));
    }

    #[test]
    fn mixed_int_float_compare_numerically() {
        let a = MeasurementValue::Int(2);
        let b = MeasurementValue::Float(2.5);
        assert_eq!(a.total_cmp(&b), Ordering::Less);
    }
}
