//! The concurrent alert buffer owned by each aggregation group.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::models::{Alert, Fingerprint};

/// A concurrency-safe alert buffer keyed by alert fingerprint.
///
/// The buffer is written by the dispatcher's consuming loop (inserts) and
/// read by the owning group's flush task, so every operation is safe
/// without external locking. Each write stamps a store-wide sequence
/// number, which lets a flush delete exactly the entries it snapshotted
/// and nothing written since.
#[derive(Debug, Default)]
pub struct AlertStore {
    alerts: DashMap<Fingerprint, StoredAlert>,
    seq: AtomicU64,
}

#[derive(Debug, Clone)]
struct StoredAlert {
    alert: Alert,
    seq: u64,
}

impl AlertStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the alert keyed by its own fingerprint.
    pub fn set(&self, alert: Alert) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.alerts.insert(alert.fingerprint(), StoredAlert { alert, seq });
    }

    /// Returns a copy of the alert with the given fingerprint, if buffered.
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Alert> {
        self.alerts.get(&fingerprint).map(|entry| entry.alert.clone())
    }

    /// Snapshots all buffered alerts along with their write sequence
    /// numbers.
    pub fn list(&self) -> Vec<(Alert, u64)> {
        self.alerts.iter().map(|entry| (entry.alert.clone(), entry.seq)).collect()
    }

    /// Deletes the entry only if it has not been re-written since the
    /// snapshot that observed `seq` was taken. Returns true if the entry
    /// was removed.
    pub fn delete_if_unmodified(&self, fingerprint: Fingerprint, seq: u64) -> bool {
        self.alerts.remove_if(&fingerprint, |_, stored| stored.seq == seq).is_some()
    }

    /// Returns true if no alerts are buffered.
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Returns the number of buffered alerts.
    pub fn len(&self) -> usize {
        self.alerts.len()
    }
}
