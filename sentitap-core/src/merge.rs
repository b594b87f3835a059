//! Merge per-window batches into one canonical frame.

use crate::domain::{CanonicalFrame, CanonicalRecord};

/// Concatenate batches and sort by timestamp.
///
/// Ties are broken by the remaining row content, so the result is the same
/// whatever order the windows completed in. Duplicates and gaps are kept.
pub fn merge_batches(batches: Vec<Vec<CanonicalRecord>>) -> CanonicalFrame {
    let mut records: Vec<CanonicalRecord> = batches.into_iter().flatten().collect();
    records.sort_by(CanonicalRecord::canonical_cmp);
    CanonicalFrame::from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BinSize, MeasurementValue};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn rec(h: u32, v: i64) -> CanonicalRecord {
        let datetime = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap();
        CanonicalRecord {
            datetime,
            t_epoch: datetime.and_utc().timestamp(),
            source: "twitter".into(),
            series_id: "bitcoin".into(),
            bin_size: BinSize::OneHour,
            measurements: BTreeMap::from([("twitter_hacks".to_string(), MeasurementValue::Int(v))]),
        }
    }

    #[test]
    fn sorted_and_duplicates_kept() {
        let frame = merge_batches(vec![vec![rec(3, 1), rec(1, 1)], vec![rec(2, 1), rec(1, 5)]]);
        assert_eq!(frame.height(), 4);
        let hours: Vec<u32> = frame
            .datetimes()
            .iter()
            .map(|d| chrono::Timelike::hour(d))
            .collect();
        assert_eq!(hours, vec![1, 1, 2, 3]);
    }

    #[test]
    fn batch_order_does_not_matter() {
        let a = vec![rec(1, 2), rec(2, 2)];
        let b = vec![rec(1, 1), rec(0, 9)];
        assert_eq!(
            merge_batches(vec![a.clone(), b.clone()]),
            merge_batches(vec![b, a])
        );
    }

    #[test]
    fn empty_input_gives_empty_frame() {
        assert!(merge_batches(Vec::new()).is_empty());
        assert!(merge_batches(vec![Vec::new(), Vec::new()]).is_empty());
    }
}
