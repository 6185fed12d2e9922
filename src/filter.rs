//! Query filters
//!
//! Every filter dimension is optional. An absent dimension matches
//! everything; a present but empty list matches nothing; otherwise the
//! dimension is a set-membership test. Dimensions combine with AND.

use std::str::FromStr;

use rusqlite::types::Value;

use crate::codec::{IdCodec, IdKind};
use crate::experiment::RunStatus;
use crate::{Error, Result};

/// Run status constraint: `"idle"` keeps idle runs, `"-idle"` drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// Keep runs with this status.
    Is(RunStatus),
    /// Drop runs with this status.
    Not(RunStatus),
}

impl FromStr for StatusFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_prefix('-') {
            Some(status) => Ok(Self::Not(status.parse()?)),
            None => Ok(Self::Is(s.parse()?)),
        }
    }
}

impl From<RunStatus> for StatusFilter {
    fn from(status: RunStatus) -> Self {
        Self::Is(status)
    }
}

/// Statuses admitted by a list of status constraints.
///
/// Inclusions form the candidate set (all statuses if there are none),
/// exclusions are then removed from it.
fn admitted_statuses(filters: &[StatusFilter]) -> Vec<RunStatus> {
    if filters.is_empty() {
        return Vec::new();
    }
    let has_inclusions = filters.iter().any(|f| matches!(f, StatusFilter::Is(_)));
    RunStatus::ALL
        .into_iter()
        .filter(|status| !has_inclusions || filters.contains(&StatusFilter::Is(*status)))
        .filter(|status| !filters.contains(&StatusFilter::Not(*status)))
        .collect()
}

fn strings<I, S>(values: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Some(values.into_iter().map(Into::into).collect())
}

/// Filter over experiments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentFilter {
    /// Experiment ids
    pub ids: Option<Vec<String>>,
    /// Experiment names
    pub names: Option<Vec<String>>,
}

impl ExperimentFilter {
    /// Match everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to these ids.
    #[must_use]
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = strings(ids);
        self
    }

    /// Restrict to these names.
    #[must_use]
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = strings(names);
        self
    }

    /// Conditions over the `e` (experiments) alias.
    pub(crate) fn conditions(&self, codec: &IdCodec) -> Conditions {
        let mut conditions = Conditions::default();
        conditions.push_ids("e.experiment_id", self.ids.as_deref(), codec, IdKind::Experiment);
        conditions.push_texts("e.name", self.names.as_deref());
        conditions
    }
}

/// Filter over runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    /// Run ids
    pub ids: Option<Vec<String>>,
    /// Run names
    pub names: Option<Vec<String>>,
    /// Parent experiment ids
    pub experiment_ids: Option<Vec<String>>,
    /// Parent experiment names
    pub experiment_names: Option<Vec<String>>,
    /// Run status constraints
    pub status: Option<Vec<StatusFilter>>,
}

impl RunFilter {
    /// Match everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to these run ids.
    #[must_use]
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = strings(ids);
        self
    }

    /// Restrict to these run names.
    #[must_use]
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = strings(names);
        self
    }

    /// Restrict to runs of these experiments.
    #[must_use]
    pub fn experiment_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.experiment_ids = strings(ids);
        self
    }

    /// Restrict to runs of experiments with these names.
    #[must_use]
    pub fn experiment_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.experiment_names = strings(names);
        self
    }

    /// Restrict by run status.
    #[must_use]
    pub fn status<I, S>(mut self, status: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StatusFilter>,
    {
        self.status = Some(status.into_iter().map(Into::into).collect());
        self
    }

    /// Conditions over the `r` (runs) and `e` (experiments) aliases.
    pub(crate) fn conditions(&self, codec: &IdCodec) -> Conditions {
        let mut conditions = Conditions::default();
        conditions.push_ids("r.run_id", self.ids.as_deref(), codec, IdKind::Run);
        conditions.push_texts("r.name", self.names.as_deref());
        conditions.push_ids(
            "e.experiment_id",
            self.experiment_ids.as_deref(),
            codec,
            IdKind::Experiment,
        );
        conditions.push_texts("e.name", self.experiment_names.as_deref());
        if let Some(status) = &self.status {
            let admitted: Vec<Value> = admitted_statuses(status)
                .into_iter()
                .map(|s| Value::Text(s.as_str().to_string()))
                .collect();
            conditions.push_in("r.status", admitted);
        }
        conditions
    }
}

/// Filter over log entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Constraints on the owning run and experiment
    pub run: RunFilter,
    /// Log types
    pub log_types: Option<Vec<String>>,
}

impl From<RunFilter> for LogFilter {
    fn from(run: RunFilter) -> Self {
        Self {
            run,
            log_types: None,
        }
    }
}

impl LogFilter {
    /// Match everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to these log types.
    #[must_use]
    pub fn log_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_types = strings(types);
        self
    }

    /// Restrict to these run ids.
    #[must_use]
    pub fn run_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run = self.run.ids(ids);
        self
    }

    /// Restrict to these run names.
    #[must_use]
    pub fn run_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run = self.run.names(names);
        self
    }

    /// Restrict to these experiment ids.
    #[must_use]
    pub fn experiment_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run = self.run.experiment_ids(ids);
        self
    }

    /// Restrict to these experiment names.
    #[must_use]
    pub fn experiment_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run = self.run.experiment_names(names);
        self
    }

    /// Restrict by run status.
    #[must_use]
    pub fn run_status<I, S>(mut self, status: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StatusFilter>,
    {
        self.run = self.run.status(status);
        self
    }

    /// Conditions over the `r`, `e` and `v` (visible logs) aliases.
    pub(crate) fn conditions(&self, codec: &IdCodec) -> Conditions {
        self.run.conditions(codec).and(self.type_conditions())
    }

    /// Conditions over the `v` alias only.
    pub(crate) fn type_conditions(&self) -> Conditions {
        let mut conditions = Conditions::default();
        conditions.push_texts("v.log_type", self.log_types.as_deref());
        conditions
    }
}

/// A conjunction of SQL predicates with their positional parameters.
#[derive(Debug, Clone, Default)]
pub(crate) struct Conditions {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Conditions {
    /// `column IN (...)`; an empty list becomes an always-false predicate.
    pub(crate) fn push_in(&mut self, column: &str, values: Vec<Value>) {
        if values.is_empty() {
            self.clauses.push("0".to_string());
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.clauses.push(format!("{column} IN ({placeholders})"));
        self.params.extend(values);
    }

    fn push_texts(&mut self, column: &str, values: Option<&[String]>) {
        if let Some(values) = values {
            self.push_in(column, values.iter().cloned().map(Value::Text).collect());
        }
    }

    fn push_ids(&mut self, column: &str, ids: Option<&[String]>, codec: &IdCodec, kind: IdKind) {
        if let Some(ids) = ids {
            let keys = codec.decode_all(kind, ids);
            self.push_in(column, keys.into_iter().map(Value::Integer).collect());
        }
    }

    /// Add a raw predicate with its parameters.
    pub(crate) fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    /// Predicate text, `1` when unconstrained.
    pub(crate) fn sql(&self) -> String {
        if self.clauses.is_empty() {
            "1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }

    pub(crate) fn params(&self) -> &[Value] {
        &self.params
    }

    /// Append another conjunction's predicates after this one's.
    pub(crate) fn and(mut self, other: Self) -> Self {
        self.clauses.extend(other.clauses);
        self.params.extend(other.params);
        self
    }
}
