//! Sampling granularity of a time series.

use chrono::{DateTime, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket width of a time series. Closed set; each source supports a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BinSize {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl BinSize {
    pub const ALL: [BinSize; 4] = [
        BinSize::OneMinute,
        BinSize::FiveMinutes,
        BinSize::OneHour,
        BinSize::OneDay,
    ];

    /// Length of one bucket.
    pub fn unit_duration(self) -> Duration {
        Duration::seconds(self.unit_seconds())
    }

    pub fn unit_seconds(self) -> i64 {
        match self {
            BinSize::OneMinute => 60,
            BinSize::FiveMinutes => 5 * 60,
            BinSize::OneHour => 60 * 60,
            BinSize::OneDay => 24 * 60 * 60,
        }
    }

    /// Canonical label used in cache keys and frame metadata.
    pub fn label(self) -> &'static str {
        match self {
            BinSize::OneMinute => "1m",
            BinSize::FiveMinutes => "5m",
            BinSize::OneHour => "1h",
            BinSize::OneDay => "1d",
        }
    }

    /// Floor a timestamp to the start of its bucket (epoch-aligned).
    pub fn floor(self, ts: NaiveDateTime) -> NaiveDateTime {
        let unit_ms = self.unit_seconds() * 1000;
        let ms = ts.and_utc().timestamp_millis();
        let floored = ms.div_euclid(unit_ms) * unit_ms;
        DateTime::from_timestamp_millis(floored)
            .map(|dt| dt.naive_utc())
            .unwrap_or(ts)
    }
}

impl fmt::Display for BinSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BinSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "1min" => Ok(BinSize::OneMinute),
            "5m" | "5min" => Ok(BinSize::FiveMinutes),
            "1h" | "60m" => Ok(BinSize::OneHour),
            "1d" | "24h" => Ok(BinSize::OneDay),
            other => Err(format!("unknown bin size '{other}'")),
        }
    }
}
