//! In-memory flush log for tests and single-replica deployments.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{
    error::PersistenceError,
    traits::{FlushLog, FlushLogEntry},
};
use crate::models::Fingerprint;

/// A [`FlushLog`] backed by a process-local concurrent map.
///
/// Expired entries are dropped lazily on query.
#[derive(Debug, Default)]
pub struct InMemoryFlushLog {
    entries: DashMap<Fingerprint, FlushLogEntry>,
}

impl InMemoryFlushLog {
    /// Creates an empty flush log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl FlushLog for InMemoryFlushLog {
    async fn log(
        &self,
        fingerprint: Fingerprint,
        flush_time: DateTime<Utc>,
        expiry_threshold: DateTime<Utc>,
        expiry: Duration,
    ) -> Result<(), PersistenceError> {
        tracing::debug!(%fingerprint, %flush_time, "Recording flush-log entry.");
        self.entries
            .insert(fingerprint, FlushLogEntry { fingerprint, flush_time, expiry_threshold, expiry });
        Ok(())
    }

    async fn query(&self, fingerprint: Fingerprint) -> Result<Vec<FlushLogEntry>, PersistenceError> {
        let now = Utc::now();
        if let Some(entry) = self.entries.get(&fingerprint) {
            if entry.expiry_threshold > now {
                return Ok(vec![entry.clone()]);
            }
        }

        // Either absent or expired; expired entries are removed on the way
        // out so the map does not accumulate dead groups.
        self.entries.remove_if(&fingerprint, |_, entry| entry.expiry_threshold <= now);
        Err(PersistenceError::NotFound(fingerprint.to_string()))
    }

    async fn delete(&self, fingerprint: Fingerprint) -> Result<(), PersistenceError> {
        self.entries.remove(&fingerprint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(n: u64) -> Fingerprint {
        Fingerprint(n)
    }

    #[tokio::test]
    async fn query_returns_not_found_for_missing_entries() {
        let log = InMemoryFlushLog::new();

        let err = log.query(fingerprint(1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn logged_entries_are_queryable_until_expiry() {
        let log = InMemoryFlushLog::new();
        let now = Utc::now();
        let expiry = Duration::from_secs(3600);

        log.log(fingerprint(1), now, now + chrono::Duration::seconds(3600), expiry)
            .await
            .unwrap();

        let entries = log.query(fingerprint(1)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].flush_time, now);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_query() {
        let log = InMemoryFlushLog::new();
        let now = Utc::now();

        log.log(
            fingerprint(1),
            now - chrono::Duration::hours(48),
            now - chrono::Duration::hours(24),
            Duration::from_secs(24 * 3600),
        )
        .await
        .unwrap();

        let err = log.query(fingerprint(1)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let log = InMemoryFlushLog::new();
        let now = Utc::now();

        log.log(fingerprint(1), now, now + chrono::Duration::hours(1), Duration::from_secs(3600))
            .await
            .unwrap();
        log.delete(fingerprint(1)).await.unwrap();

        assert!(log.query(fingerprint(1)).await.unwrap_err().is_not_found());
    }
}
