//! Join several named datasets on shared key columns.
//!
//! Before joining, datetime-like keys are normalized so that frames from
//! different sources line up: tz-aware datetimes become naive UTC, every
//! datetime key uses millisecond precision, and string keys that parse as
//! datetimes are converted. Inputs are never mutated.

use crate::error::PipelineError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A dataset with the name used to suffix its colliding columns.
#[derive(Debug, Clone)]
pub struct NamedFrame {
    pub name: String,
    pub frame: DataFrame,
}

impl NamedFrame {
    pub fn new(name: impl Into<String>, frame: DataFrame) -> Self {
        Self {
            name: name.into(),
            frame,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinHow {
    #[default]
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinHow {
    fn join_type(self) -> JoinType {
        match self {
            JoinHow::Inner => JoinType::Inner,
            JoinHow::Left => JoinType::Left,
            JoinHow::Right => JoinType::Right,
            JoinHow::Outer => JoinType::Full,
        }
    }
}

impl fmt::Display for JoinHow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinHow::Inner => "inner",
            JoinHow::Left => "left",
            JoinHow::Right => "right",
            JoinHow::Outer => "outer",
        })
    }
}

impl FromStr for JoinHow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinHow::Inner),
            "left" => Ok(JoinHow::Left),
            "right" => Ok(JoinHow::Right),
            "outer" | "full" => Ok(JoinHow::Outer),
            other => Err(format!("unknown join type '{other}'")),
        }
    }
}

/// Join `frames` left to right on `keys`.
///
/// Non-key columns of a later frame that collide with earlier ones get the
/// suffix `_<name>`. Key columns are coalesced, including for outer joins.
pub fn join_frames(
    frames: &[NamedFrame],
    keys: &[String],
    how: JoinHow,
) -> Result<DataFrame, PipelineError> {
    if frames.len() < 2 {
        return Err(PipelineError::InsufficientInputs { got: frames.len() });
    }
    if keys.is_empty() {
        return Err(PipelineError::Join("no join keys given".into()));
    }
    for named in frames {
        for key in keys {
            if named.frame.column(key).is_err() {
                return Err(PipelineError::MissingJoinKey {
                    dataset: named.name.clone(),
                    key: key.clone(),
                });
            }
        }
    }

    let key_exprs: Vec<Expr> = keys.iter().map(|k| col(k.as_str())).collect();
    let mut joined = normalized(&frames[0].frame, keys)?.lazy();
    for named in &frames[1..] {
        let right = normalized(&named.frame, keys)?.lazy();
        joined = joined.join(
            right,
            key_exprs.clone(),
            key_exprs.clone(),
            JoinArgs {
                how: how.join_type(),
                suffix: Some(format!("_{}", named.name).into()),
                coalesce: JoinCoalesce::CoalesceColumns,
                ..Default::default()
            },
        );
    }

    let out = joined
        .collect()
        .map_err(|e| PipelineError::Join(e.to_string()))?;
    tracing::info!(
        datasets = frames.len(),
        how = %how,
        rows = out.height(),
        columns = out.width(),
        "joined datasets"
    );
    Ok(out)
}

/// Copy of `df` with every key column normalized.
fn normalized(df: &DataFrame, keys: &[String]) -> Result<DataFrame, PipelineError> {
    let mut out = df.clone();
    for key in keys {
        let column = out.column(key)?;
        if let Some(replacement) = normalize_key(column)? {
            out.with_column(replacement)?;
        }
    }
    Ok(out)
}

const MS_DATETIME: DataType = DataType::Datetime(TimeUnit::Milliseconds, None);

/// Normalized replacement for a key column, or `None` to keep it as is.
pub fn normalize_key(column: &Column) -> Result<Option<Column>, PipelineError> {
    match column.dtype() {
        DataType::Datetime(TimeUnit::Milliseconds, None) => Ok(None),
        DataType::Datetime(unit, _) => {
            // Physical values are UTC instants in `unit`; reinterpret as naive.
            let naive = column
                .cast(&DataType::Int64)?
                .cast(&DataType::Datetime(*unit, None))?
                .cast(&MS_DATETIME)?;
            Ok(Some(naive))
        }
        DataType::String => {
            let strings = column.str()?;
            let mut millis: Vec<Option<i64>> = Vec::with_capacity(strings.len());
            for value in strings.iter() {
                match value {
                    None => millis.push(None),
                    Some(s) => match parse_datetime(s) {
                        Some(ts) => millis.push(Some(ts.and_utc().timestamp_millis())),
                        None => return Ok(None),
                    },
                }
            }
            let parsed = Column::new(column.name().clone(), millis).cast(&MS_DATETIME)?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Parse a datetime string in one of the accepted layouts, as naive UTC.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
