//! Augmento sentiment provider.
//!
//! Serves hourly and daily topic-count series from `/events/aggregated`.
//! Topic names come from `/topics` and are persisted, together with the
//! other reference endpoints, in a JSON summary reused across runs.

use super::circuit_breaker::CircuitBreaker;
use super::http::{build_client, get_json};
use super::provider::{CancelToken, WindowSource};
use super::retry::RetryPolicy;
use super::schema::FieldTable;
use crate::domain::{BinSize, FetchRequest, RawRecord, Window, WIRE_DATETIME_FORMAT};
use crate::error::{PipelineError, WindowFetchError};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.augmento.ai/v0.1";
pub const DEFAULT_ROW_CAP: usize = 1000;
pub const SUMMARY_FILE_NAME: &str = "augmento_api_summary.json";

const SUPPORTED: [BinSize; 2] = [BinSize::OneHour, BinSize::OneDay];

/// Topic ids grouped by sentiment. A topic may appear in more than one group.
pub const SENTIMENT_GROUPS: [(&str, &[usize]); 5] = [
    ("FOMO", &[11]),
    ("Uncertain", &[28]),
    ("Hopeful", &[42]),
    ("Positive", &[38, 91, 23, 39, 75, 42]),
    ("Negative", &[26, 6, 85, 54, 53, 1, 14, 73, 92]),
];

/// Augmento's label for a bin size, if served.
pub fn wire_bin_label(bin_size: BinSize) -> Option<&'static str> {
    match bin_size {
        BinSize::OneHour => Some("1H"),
        BinSize::OneDay => Some("24H"),
        BinSize::OneMinute | BinSize::FiveMinutes => None,
    }
}

/// One element of the `/events/aggregated` array.
#[derive(Debug, Deserialize)]
struct AggregatedEvent {
    datetime: String,
    t_epoch: i64,
    counts: Vec<i64>,
}

impl AggregatedEvent {
    fn into_raw(self) -> Result<RawRecord, WindowFetchError> {
        let datetime = parse_event_datetime(&self.datetime)
            .or_else(|| DateTime::from_timestamp(self.t_epoch, 0).map(|dt| dt.naive_utc()))
            .ok_or_else(|| {
                WindowFetchError::ResponseFormatChanged(format!(
                    "unparseable datetime '{}'",
                    self.datetime
                ))
            })?;
        Ok(RawRecord::TopicCounts {
            datetime,
            t_epoch: self.t_epoch,
            counts: self.counts,
        })
    }
}

fn parse_event_datetime(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, WIRE_DATETIME_FORMAT).ok())
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
}

/// Topics split into sentiment groups and everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorizedTopics {
    #[serde(rename = "Other_Topics")]
    pub other: BTreeMap<String, String>,
    #[serde(rename = "Sentiment_Topics")]
    pub sentiment: BTreeMap<String, BTreeMap<String, String>>,
}

impl CategorizedTopics {
    pub fn from_raw(raw_topics: &HashMap<String, String>) -> Self {
        let by_id: BTreeMap<usize, &String> = raw_topics
            .iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|id| (id, v)))
            .collect();

        let mut sentiment = BTreeMap::new();
        for (group, ids) in SENTIMENT_GROUPS {
            let members = ids
                .iter()
                .filter_map(|id| by_id.get(id).map(|name| (id.to_string(), (*name).clone())))
                .collect();
            sentiment.insert(group.to_string(), members);
        }

        let other = by_id
            .iter()
            .filter(|(id, _)| {
                !SENTIMENT_GROUPS
                    .iter()
                    .any(|(_, ids)| ids.contains(*id))
            })
            .map(|(id, name)| (id.to_string(), (*name).clone()))
            .collect();

        Self { other, sentiment }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub raw_topics: HashMap<String, String>,
    pub categorized_topics: CategorizedTopics,
}

/// Snapshot of Augmento's reference endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSummary {
    #[serde(rename = "Datetime", default)]
    pub datetime: serde_json::Value,
    #[serde(rename = "Sources", default)]
    pub sources: Vec<String>,
    #[serde(rename = "Coins", default)]
    pub coins: Vec<String>,
    #[serde(rename = "Bin_sizes", default)]
    pub bin_sizes: Vec<String>,
    #[serde(rename = "Topics")]
    pub topics: TopicSummary,
}

impl ApiSummary {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| PipelineError::Metadata(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Metadata(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Augmento `/events/aggregated` source.
pub struct AugmentoProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    row_cap: usize,
    retry: RetryPolicy,
    circuit_breaker: CircuitBreaker,
    summary_path: Option<PathBuf>,
    topics: Mutex<Option<HashMap<String, String>>>,
}

impl AugmentoProvider {
    pub fn new(
        base_url: impl Into<String>,
        row_cap: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, PipelineError> {
        if row_cap == 0 {
            return Err(PipelineError::InvalidRowCap(row_cap));
        }
        let client = build_client(timeout).map_err(|e| PipelineError::Io(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            row_cap,
            retry,
            circuit_breaker: CircuitBreaker::default_provider(),
            summary_path: None,
            topics: Mutex::new(None),
        })
    }

    /// Persist and reuse the API summary at `path`.
    pub fn with_summary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_path = Some(path.into());
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    fn get_reference<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<T, PipelineError> {
        get_json(
            &self.client,
            &self.circuit_breaker,
            &self.retry,
            &self.url(endpoint),
            &[],
            &CancelToken::new(),
        )
        .map_err(|e| PipelineError::Metadata(format!("{endpoint}: {e}")))
    }

    /// Fetch all reference endpoints and build a fresh summary.
    pub fn fetch_summary(&self) -> Result<ApiSummary, PipelineError> {
        tracing::info!(base_url = %self.base_url, "fetching augmento api summary");
        let raw_topics: HashMap<String, String> = self.get_reference("/topics")?;
        let categorized_topics = CategorizedTopics::from_raw(&raw_topics);
        Ok(ApiSummary {
            datetime: self.get_reference("/datetime")?,
            sources: self.get_reference("/sources")?,
            coins: self.get_reference("/coins")?,
            bin_sizes: self.get_reference("/bin_sizes")?,
            topics: TopicSummary {
                raw_topics,
                categorized_topics,
            },
        })
    }

    /// Load the persisted summary, or fetch and persist it if absent.
    pub fn load_or_fetch_summary(&self) -> Result<ApiSummary, PipelineError> {
        if let Some(path) = &self.summary_path {
            if path.exists() {
                match ApiSummary::load(path) {
                    Ok(summary) => return Ok(summary),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable summary"),
                }
            }
        }
        let summary = self.fetch_summary()?;
        if let Some(path) = &self.summary_path {
            summary.save(path)?;
            tracing::info!(path = %path.display(), "saved augmento api summary");
        }
        Ok(summary)
    }

    fn raw_topics(&self) -> Result<HashMap<String, String>, PipelineError> {
        let mut guard = self
            .topics
            .lock()
            .map_err(|_| PipelineError::Metadata("topic table lock poisoned".into()))?;
        if let Some(topics) = guard.as_ref() {
            return Ok(topics.clone());
        }
        let topics = if self.summary_path.is_some() {
            self.load_or_fetch_summary()?.topics.raw_topics
        } else {
            self.get_reference("/topics")?
        };
        *guard = Some(topics.clone());
        Ok(topics)
    }
}

impl WindowSource for AugmentoProvider {
    fn name(&self) -> &str {
        "augmento"
    }

    fn row_cap(&self) -> usize {
        self.row_cap
    }

    fn supported_bin_sizes(&self) -> &[BinSize] {
        &SUPPORTED
    }

    fn field_table(&self, request: &FetchRequest) -> Result<FieldTable, PipelineError> {
        let topics = self.raw_topics()?;
        Ok(FieldTable::from_topics(request.source_id(), &topics))
    }

    fn fetch_window(
        &self,
        request: &FetchRequest,
        window: &Window,
        cancel: &CancelToken,
    ) -> Result<Vec<RawRecord>, WindowFetchError> {
        let bin_label =
            wire_bin_label(request.bin_size()).ok_or_else(|| WindowFetchError::Http {
                status: 400,
                message: format!("bin size {} not served", request.bin_size()),
            })?;
        let query = [
            ("source", request.source_id().to_string()),
            ("coin", request.series_id().to_string()),
            ("bin_size", bin_label.to_string()),
            ("count_ptr", self.row_cap.to_string()),
            ("start_ptr", "0".to_string()),
            ("start_datetime", window.start.format(WIRE_DATETIME_FORMAT).to_string()),
            ("end_datetime", window.end.format(WIRE_DATETIME_FORMAT).to_string()),
        ];
        let events: Vec<AggregatedEvent> = get_json(
            &self.client,
            &self.circuit_breaker,
            &self.retry,
            &self.url("/events/aggregated"),
            &query,
            cancel,
        )?;
        events.into_iter().map(AggregatedEvent::into_raw).collect()
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(usize, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect()
    }

    #[test]
    fn categorizes_sentiment_and_other_topics() {
        let topics = raw(&[(11, "FOMO"), (42, "Hopeful"), (1, "Bearish"), (0, "Hacks")]);
        let cat = CategorizedTopics::from_raw(&topics);

        assert_eq!(cat.sentiment["FOMO"]["11"], "FOMO");
        // 42 belongs to both Hopeful and Positive
        assert!(cat.sentiment["Hopeful"].contains_key("42"));
        assert!(cat.sentiment["Positive"].contains_key("42"));
        assert_eq!(cat.sentiment["Negative"]["1"], "Bearish");
        assert!(cat.sentiment["Uncertain"].is_empty());
        assert_eq!(cat.other.len(), 1);
        assert_eq!(cat.other["0"], "Hacks");
    }

    #[test]
    fn summary_uses_persisted_key_names() {
        let summary = ApiSummary {
            sources: vec!["twitter".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("Sources").is_some());
        assert!(json.get("Bin_sizes").is_some());
        assert!(json["Topics"]["categorized_topics"].get("Other_Topics").is_some());
    }

    #[test]
    fn event_datetime_formats() {
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(5, 0, 0)
            .unwrap();
        assert_eq!(parse_event_datetime("2024-01-01T05:00:00Z"), Some(expected));
        assert_eq!(parse_event_datetime("2024-01-01T06:00:00+01:00"), Some(expected));
        assert_eq!(parse_event_datetime("2024-01-01 05:00:00"), Some(expected));
        assert_eq!(parse_event_datetime("yesterday"), None);
    }

    #[test]
    fn wire_labels() {
        assert_eq!(wire_bin_label(BinSize::OneHour), Some("1H"));
        assert_eq!(wire_bin_label(BinSize::OneDay), Some("24H"));
        assert_eq!(wire_bin_label(BinSize::OneMinute), None);
    }
}
