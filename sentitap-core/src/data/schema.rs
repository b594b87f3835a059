//! Schema mapping: upstream field indices to canonical column names.

use crate::domain::frame::METADATA_COLUMNS;
use crate::domain::{BinSize, CanonicalRecord, MeasurementValue, RawRecord};
use std::collections::{BTreeMap, HashMap};

/// BitMEX bucket fields, in [`crate::domain::BucketRecord::values`] order.
pub const OHLCV_FIELDS: [&str; 11] = [
    "open",
    "high",
    "low",
    "close",
    "volume",
    "vwap",
    "turnover",
    "homeNotional",
    "foreignNotional",
    "trades",
    "lastSize",
];

/// Static index → canonical name table for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTable {
    source: String,
    names: BTreeMap<usize, String>,
}

impl FieldTable {
    pub fn new(source: impl Into<String>, names: BTreeMap<usize, String>) -> Self {
        Self {
            source: source.into(),
            names,
        }
    }

    /// Table from an Augmento `/topics` payload (`{"0": "Hacks", ...}`).
    ///
    /// Keys that are not integers are skipped.
    pub fn from_topics(source: &str, raw_topics: &HashMap<String, String>) -> Self {
        let names = raw_topics
            .iter()
            .filter_map(|(idx, name)| {
                idx.parse::<usize>()
                    .ok()
                    .map(|i| (i, topic_column_name(source, name)))
            })
            .collect();
        Self::new(source, names)
    }

    /// Fixed OHLCV table: `<source>_open`, `<source>_high`, ...
    pub fn ohlcv(source: &str) -> Self {
        let names = OHLCV_FIELDS
            .iter()
            .enumerate()
            .map(|(i, field)| (i, format!("{source}_{field}")))
            .collect();
        Self::new(source, names)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Canonical name for an index; unmapped indices get a placeholder.
    pub fn name_for(&self, index: usize) -> String {
        self.names
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("{}_unknown_{index}", self.source))
    }

    /// Mapped measurement names in index order.
    pub fn measurement_names(&self) -> Vec<String> {
        self.names.values().cloned().collect()
    }

    /// Every column a frame mapped with this table should carry.
    pub fn expected_columns(&self) -> Vec<String> {
        METADATA_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.names.values().cloned())
            .collect()
    }
}

/// Normalize a topic name into a column name.
///
/// Lowercase; `/`, spaces and `-` become `_`; parentheses are dropped.
pub fn topic_column_name(source: &str, topic: &str) -> String {
    format!("{source}_{}", topic.to_lowercase())
        .replace(['/', ' ', '-'], "_")
        .replace(['(', ')'], "")
}

/// Request-scoped metadata injected on every mapped row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub source: String,
    pub series_id: String,
    pub bin_size: BinSize,
}

/// Pure mapper from raw upstream records to canonical records.
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    table: FieldTable,
    meta: RequestMeta,
}

impl SchemaMapper {
    pub fn new(table: FieldTable, meta: RequestMeta) -> Self {
        Self { table, meta }
    }

    pub fn table(&self) -> &FieldTable {
        &self.table
    }

    pub fn map(&self, raw: RawRecord) -> CanonicalRecord {
        let (datetime, t_epoch, values) = match raw {
            RawRecord::TopicCounts {
                datetime,
                t_epoch,
                counts,
            } => (
                datetime,
                t_epoch,
                counts
                    .into_iter()
                    .map(|c| Some(MeasurementValue::Int(c)))
                    .collect::<Vec<_>>(),
            ),
            RawRecord::Bucket(bucket) => {
                let datetime = bucket.timestamp.naive_utc();
                (datetime, bucket.timestamp.timestamp(), bucket.values())
            }
        };

        let measurements = values
            .into_iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (self.table.name_for(i), v)))
            .collect();

        CanonicalRecord {
            datetime,
            t_epoch,
            source: self.meta.source.clone(),
            series_id: self.meta.series_id.clone(),
            bin_size: self.meta.bin_size,
            measurements,
        }
    }

    pub fn map_batch(&self, raw: Vec<RawRecord>) -> Vec<CanonicalRecord> {
        raw.into_iter().map(|r| self.map(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BucketRecord;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn meta(source: &str) -> RequestMeta {
        RequestMeta {
            source: source.into(),
            series_id: "bitcoin".into(),
            bin_size: BinSize::OneHour,
        }
    }

    #[test]
    fn topic_names_are_normalized() {
        assert_eq!(topic_column_name("twitter", "Bullish"), "twitter_bullish");
        assert_eq!(
            topic_column_name("twitter", "Price (positive)"),
            "twitter_price_positive"
        );
        assert_eq!(
            topic_column_name("reddit", "Whales/Big players"),
            "reddit_whales_big_players"
        );
        assert_eq!(topic_column_name("twitter", "Pump-and-dump"), "twitter_pump_and_dump");
    }

    #[test]
    fn unmapped_topic_index_gets_placeholder() {
        let topics: HashMap<String, String> =
            [("0".to_string(), "Hacks".to_string())].into_iter().collect();
        let mapper = SchemaMapper::new(FieldTable::from_topics("twitter", &topics), meta("twitter"));
        let datetime = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        let rec = mapper.map(RawRecord::TopicCounts {
            datetime,
            t_epoch: 1_704_067_200,
            counts: vec![3, 9],
        });

        assert_eq!(rec.measurements["twitter_hacks"], MeasurementValue::Int(3));
        assert_eq!(rec.measurements["twitter_unknown_1"], MeasurementValue::Int(9));
        assert_eq!(rec.source, "twitter");
        assert_eq!(rec.series_id, "bitcoin");
        assert_eq!(rec.bin_size, BinSize::OneHour);
    }

    #[test]
    fn bucket_maps_through_ohlcv_table() {
        let mapper = SchemaMapper::new(FieldTable::ohlcv("bitmex"), meta("bitmex"));
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let rec = mapper.map(RawRecord::Bucket(BucketRecord {
            timestamp: ts,
            symbol: Some("XBTUSD".into()),
            open: Some(1.0),
            high: Some(2.0),
            low: None,
            close: Some(1.5),
            volume: Some(10),
            vwap: None,
            turnover: None,
            home_notional: None,
            foreign_notional: None,
            trades: Some(4),
            last_size: None,
        }));

        assert_eq!(rec.t_epoch, ts.timestamp());
        assert_eq!(rec.datetime, ts.naive_utc());
        assert_eq!(rec.measurements["bitmex_open"], MeasurementValue::Float(1.0));
        assert_eq!(rec.measurements["bitmex_volume"], MeasurementValue::Int(10));
        assert_eq!(rec.measurements["bitmex_trades"], MeasurementValue::Int(4));
        assert!(!rec.measurements.contains_key("bitmex_low"));
    }

    #[test]
    fn expected_columns_include_metadata() {
        let cols = FieldTable::ohlcv("bitmex").expected_columns();
        assert_eq!(cols.len(), 5 + OHLCV_FIELDS.len());
        assert!(cols.contains(&"datetime".to_string()));
        assert!(cols.contains(&"bitmex_lastSize".to_string()));
    }
}
