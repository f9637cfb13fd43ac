//! Builder for test alerts.

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{Alert, LabelSet};

/// Builds [`Alert`]s with sensible defaults for tests.
#[derive(Debug, Clone)]
pub struct AlertBuilder {
    labels: LabelSet,
    annotations: LabelSet,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
}

impl AlertBuilder {
    /// Creates a firing alert with the given `alertname` label, started
    /// now.
    pub fn new(alertname: &str) -> Self {
        let mut labels = LabelSet::new();
        labels.insert("alertname", alertname);
        Self { labels, annotations: LabelSet::new(), starts_at: Utc::now(), ends_at: None }
    }

    /// Adds a label.
    pub fn label(mut self, name: &str, value: &str) -> Self {
        self.labels.insert(name, value);
        self
    }

    /// Adds an annotation.
    pub fn annotation(mut self, name: &str, value: &str) -> Self {
        self.annotations.insert(name, value);
        self
    }

    /// Sets the start time.
    pub fn starts_at(mut self, starts_at: DateTime<Utc>) -> Self {
        self.starts_at = starts_at;
        self
    }

    /// Sets the end time.
    pub fn ends_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    /// Marks the alert resolved one second ago.
    pub fn resolved(mut self) -> Self {
        self.ends_at = Some(Utc::now() - TimeDelta::seconds(1));
        self
    }

    /// Builds the alert.
    pub fn build(self) -> Alert {
        Alert {
            labels: self.labels,
            annotations: self.annotations,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        }
    }
}
