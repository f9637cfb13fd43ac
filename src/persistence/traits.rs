//! The flush-log contract shared by dispatcher replicas.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use super::error::PersistenceError;
use crate::models::Fingerprint;

/// One recorded first-flush instant for an aggregation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushLogEntry {
    /// The fingerprint of the group the entry belongs to.
    pub fingerprint: Fingerprint,

    /// The canonical first-flush instant replicas align their tick
    /// schedules to.
    pub flush_time: DateTime<Utc>,

    /// The earliest instant at which the store may discard the entry.
    pub expiry_threshold: DateTime<Utc>,

    /// The time-to-live the writer derived the threshold from, retained so
    /// replicas can recompute it after clock adjustments.
    #[serde(with = "duration_secs")]
    pub expiry: Duration,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// The persisted flush-log store consumed by cluster-synchronized timers.
///
/// Implementations must support safe concurrent read/write/delete across
/// dispatcher replicas; their consistency model is otherwise their own
/// concern.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FlushLog: Send + Sync {
    /// Records the canonical first-flush instant for a group.
    async fn log(
        &self,
        fingerprint: Fingerprint,
        flush_time: DateTime<Utc>,
        expiry_threshold: DateTime<Utc>,
        expiry: Duration,
    ) -> Result<(), PersistenceError>;

    /// Returns the recorded entries for a group, or the
    /// [`PersistenceError::NotFound`] sentinel when none exist.
    async fn query(&self, fingerprint: Fingerprint) -> Result<Vec<FlushLogEntry>, PersistenceError>;

    /// Removes the recorded entry for a group.
    async fn delete(&self, fingerprint: Fingerprint) -> Result<(), PersistenceError>;
}
