//! Flush metadata and introspection snapshots for aggregation groups.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{alert::Alert, labels::LabelSet};

/// Request-scoped metadata handed to the notification pipeline with every
/// flushed batch.
///
/// This is passed explicitly rather than smuggled through an ambient
/// context so the pipeline boundary stays type-safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushContext {
    /// The stable key of the flushing group (`route key` + group labels).
    pub group_key: String,

    /// The group-label values shared by every alert in the batch.
    pub group_labels: LabelSet,

    /// The receiver the matched route delivers to.
    pub receiver: String,

    /// How often downstream may re-notify for already-delivered alerts.
    pub repeat_interval: Duration,

    /// Names of mute time intervals active on the matched route.
    pub mute_time_intervals: Vec<String>,

    /// Names of active time intervals on the matched route.
    pub active_time_intervals: Vec<String>,

    /// The pipeline's notion of "now": the tick time of this flush.
    pub now: DateTime<Utc>,
}

/// A point-in-time snapshot of one aggregation group, produced by the
/// dispatcher's read path for introspection and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertGroup {
    /// The group-label values keying this group.
    pub labels: LabelSet,

    /// The receiver the group's route delivers to.
    pub receiver: String,

    /// The identifier of the route that owns this group.
    pub route_id: String,

    /// The alerts buffered in the group at snapshot time.
    pub alerts: Vec<Alert>,
}
