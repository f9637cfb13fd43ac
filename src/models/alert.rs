//! The alert event consumed by the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::labels::{Fingerprint, LabelSet};

/// A single alert event admitted to the dispatch pipeline.
///
/// Alerts are produced and owned by the external alert store; the
/// dispatcher only holds transient copies while routing and while an
/// alert sits buffered inside an aggregation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// The full label set identifying this alert.
    pub labels: LabelSet,

    /// Free-form annotation labels carried through to the pipeline.
    #[serde(default)]
    pub annotations: LabelSet,

    /// The instant the alert started firing.
    pub starts_at: DateTime<Utc>,

    /// The instant the alert ended, if it has been resolved.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// The stable fingerprint of the alert's full label set.
    pub fn fingerprint(&self) -> Fingerprint {
        self.labels.fingerprint()
    }

    /// Returns true if the alert is resolved as of `now`.
    ///
    /// A single captured `now` must be used when classifying a whole
    /// batch, so that a batch never reports an alert as resolved that a
    /// later-classified sibling would still consider firing.
    pub fn is_resolved_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.ends_at, Some(ends_at) if ends_at <= now)
    }
}
