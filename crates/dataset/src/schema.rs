//! Task row schema: alias normalisation, validation, conversion to [`Task`].

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use prophet_core::{Task, TaskId};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::SchemaError;

/// Fields the schema understands; everything else lands in `metadata._extra_fields`.
const KNOWN_FIELDS: &[&str] = &[
    "task_id",
    "title",
    "context",
    "outcomes",
    "ground_truth",
    "predict_by",
    "source",
    "criteria",
    "metadata",
    "run_id",
    "end_time",
];

/// One validated dataset row, before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    /// Explicit id, if the row carried one
    pub task_id: Option<String>,
    /// Trimmed question
    pub title: String,
    /// Trimmed, non-empty outcomes
    pub outcomes: Vec<String>,
    /// Background
    pub context: Option<String>,
    /// 0/1 label per outcome
    pub ground_truth: Option<BTreeMap<String, u8>>,
    /// Raw deadline string (validated parseable)
    pub predict_by: Option<String>,
    /// Question origin
    pub source: Option<String>,
    /// Resolution criteria
    pub criteria: Option<String>,
    /// Metadata, including `_extra_fields`
    pub metadata: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawRow {
    task_id: Option<String>,
    title: Option<String>,
    context: Option<String>,
    outcomes: Option<Vec<Value>>,
    ground_truth: Option<BTreeMap<String, i64>>,
    predict_by: Option<String>,
    source: Option<String>,
    criteria: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl TaskRow {
    /// Parse and validate one row.
    pub fn parse(value: Value) -> Result<Self, SchemaError> {
        let Value::Object(mut map) = value else {
            return Err(SchemaError::NotAnObject);
        };

        // Legacy aliases only apply when the canonical field is absent.
        if let Some(run_id) = map.remove("run_id") {
            map.entry("task_id").or_insert(run_id);
        }
        if let Some(end_time) = map.remove("end_time") {
            map.entry("predict_by").or_insert(end_time);
        }

        let extra: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let raw: RawRow = serde_json::from_value(Value::Object(map))
            .map_err(|e| SchemaError::Malformed(e.to_string()))?;

        let title = raw.title.as_deref().map(str::trim).unwrap_or_default().to_string();
        if title.is_empty() {
            return Err(SchemaError::EmptyTitle);
        }

        let mut outcomes = Vec::new();
        for outcome in raw.outcomes.unwrap_or_default() {
            let Value::String(outcome) = outcome else {
                return Err(SchemaError::NonStringOutcome(outcome.to_string()));
            };
            let outcome = outcome.trim();
            if !outcome.is_empty() {
                outcomes.push(outcome.to_string());
            }
        }
        if outcomes.len() < 2 {
            return Err(SchemaError::TooFewOutcomes);
        }

        if let Some(predict_by) = &raw.predict_by {
            if parse_date(predict_by).is_none() {
                return Err(SchemaError::PredictBy(predict_by.clone()));
            }
        }

        let ground_truth = match raw.ground_truth {
            Some(gt) => Some(validate_ground_truth(gt, &outcomes)?),
            None => None,
        };

        let mut metadata = raw.metadata.unwrap_or_default();
        if !extra.is_empty() {
            metadata.insert("_extra_fields".to_string(), Value::Object(extra));
        }

        Ok(Self {
            task_id: raw.task_id,
            title,
            outcomes,
            context: raw.context,
            ground_truth,
            predict_by: raw.predict_by,
            source: raw.source,
            criteria: raw.criteria,
            metadata,
        })
    }

    /// Convert to a task, shifting `predict_by` back by `offset` days.
    ///
    /// Fails when the shifted date leaves the representable calendar.
    pub fn into_task(self, task_id: TaskId, offset: i64) -> Result<Task, SchemaError> {
        let predict_by = match self.predict_by.as_deref() {
            Some(p) => Some(to_mm_dd_yyyy(p, offset).ok_or_else(|| SchemaError::DateOffset {
                predict_by: p.to_string(),
                offset,
            })?),
            None => None,
        };

        Ok(Task {
            task_id,
            title: self.title,
            outcomes: self.outcomes,
            context: self.context,
            ground_truth: self.ground_truth,
            predict_by,
            source: self.source,
            criteria: self.criteria,
            metadata: self.metadata,
        })
    }
}

fn validate_ground_truth(
    gt: BTreeMap<String, i64>,
    outcomes: &[String],
) -> Result<BTreeMap<String, u8>, SchemaError> {
    let missing: Vec<String> = outcomes.iter().filter(|o| !gt.contains_key(*o)).cloned().collect();
    let unknown: Vec<String> = gt.keys().filter(|k| !outcomes.contains(*k)).cloned().collect();
    if !missing.is_empty() || !unknown.is_empty() {
        return Err(SchemaError::GroundTruthKeys { missing, unknown });
    }

    let invalid: Vec<String> = gt
        .iter()
        .filter(|(_, v)| !matches!(**v, 0 | 1))
        .map(|(k, _)| k.clone())
        .collect();
    if !invalid.is_empty() {
        return Err(SchemaError::GroundTruthValues(invalid));
    }

    Ok(gt.into_iter().map(|(k, v)| (k, v as u8)).collect())
}

/// Parse the date formats datasets use in practice.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    None
}

/// Render a date as `MM/DD/YYYY`, `offset` days earlier.
///
/// `None` if `s` is not a date or the shift overflows.
pub fn to_mm_dd_yyyy(s: &str, offset: i64) -> Option<String> {
    let date = parse_date(s)?.checked_sub_signed(Duration::try_days(offset)?)?;
    Some(date.format("%m/%d/%Y").to_string())
}
