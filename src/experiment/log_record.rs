//! Log Record - numbered telemetry entries of a run

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::RunStatus;

/// A log entry to be written by `add_logs`.
///
/// `number` orders the entry within its run. Numbers may arrive out of
/// order and with gaps; values are a flat JSON object whose keys are
/// indexed as property names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLog {
    number: i64,
    #[serde(rename = "type")]
    log_type: String,
    #[serde(default)]
    values: Map<String, Value>,
}

impl NewLog {
    /// Create a log entry with no values.
    #[must_use]
    pub fn new(number: i64, log_type: impl Into<String>) -> Self {
        Self {
            number,
            log_type: log_type.into(),
            values: Map::new(),
        }
    }

    /// Add a single value.
    #[must_use]
    pub fn value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Replace all values.
    #[must_use]
    pub fn values(mut self, values: Map<String, Value>) -> Self {
        self.values = values;
        self
    }

    pub(crate) fn into_parts(self) -> (i64, String, Map<String, Value>) {
        (self.number, self.log_type, self.values)
    }

    /// Get the log number.
    #[must_use]
    pub const fn number(&self) -> i64 {
        self.number
    }

    /// Get the log type.
    #[must_use]
    pub fn log_type(&self) -> &str {
        &self.log_type
    }

    /// Get the log values.
    #[must_use]
    pub const fn values_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// A visible log entry, joined with its run and experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub(crate) log_id: String,
    pub(crate) experiment_id: String,
    pub(crate) experiment_name: String,
    pub(crate) run_id: String,
    pub(crate) run_name: Option<String>,
    pub(crate) run_status: RunStatus,
    pub(crate) number: i64,
    #[serde(rename = "type")]
    pub(crate) log_type: String,
    pub(crate) values: Map<String, Value>,
}

impl LogRecord {
    /// Get the log ID.
    #[must_use]
    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the run name, if any.
    #[must_use]
    pub fn run_name(&self) -> Option<&str> {
        self.run_name.as_deref()
    }

    /// Get the run status at read time.
    #[must_use]
    pub const fn run_status(&self) -> RunStatus {
        self.run_status
    }

    /// Get the log number.
    #[must_use]
    pub const fn number(&self) -> i64 {
        self.number
    }

    /// Get the log type.
    #[must_use]
    pub fn log_type(&self) -> &str {
        &self.log_type
    }

    /// Get the log values.
    #[must_use]
    pub const fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// An unfilled number in a run's active generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingLog {
    /// Run ID
    pub run_id: String,
    /// Missing log number
    pub number: i64,
}

/// A contiguous run of unfilled numbers, `first..=last`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingRange {
    /// Run ID
    pub run_id: String,
    /// First missing number
    pub first: i64,
    /// Last missing number (inclusive)
    pub last: i64,
}

impl MissingRange {
    /// Number of missing entries in the range.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn count(&self) -> u64 {
        (self.last - self.first + 1) as u64
    }
}

/// Pending log count of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCount {
    /// Run ID
    pub run_id: String,
    /// Number of unfilled numbers in the active generation
    pub count: u64,
}

/// Last confirmed entry of a given type in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastLog {
    /// Run ID
    pub run_id: String,
    /// Log type
    #[serde(rename = "type")]
    pub log_type: String,
    /// The entry itself
    pub log: LogRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_log_values() {
        let log = NewLog::new(3, "trial").value("x", 9).value("label", "a");

        assert_eq!(log.number(), 3);
        assert_eq!(log.log_type(), "trial");
        assert_eq!(log.values_map().len(), 2);
        assert_eq!(log.values_map()["x"], 9);
    }

    #[test]
    fn test_new_log_deserializes_without_values() {
        let log: NewLog = serde_json::from_str(r#"{"number": 1, "type": "start"}"#).unwrap();
        assert_eq!(log, NewLog::new(1, "start"));
    }

    #[test]
    fn test_missing_range_count() {
        let range = MissingRange {
            run_id: "r".into(),
            first: 4,
            last: 6,
        };
        assert_eq!(range.count(), 3);
    }
}
