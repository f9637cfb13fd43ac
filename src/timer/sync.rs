//! The cluster-synchronized timer.
//!
//! Replicas of a clustered deployment must flush the same group at the
//! same wall-clock instant despite restarts and clock skew. Anchoring
//! every group to a persisted first-flush time and recomputing the
//! iteration count on each reset converges all replicas onto one tick
//! grid without per-tick leader election.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::{Deadline, FlushTimer, TimerFactory};
use crate::{
    models::Fingerprint,
    persistence::FlushLog,
    routing::RouteOpts,
};

/// Tick skew against the shared grid above which a warning is logged.
pub const SYNC_TIMER_MAX_DRIFT: Duration = Duration::from_secs(2);

/// Lower bound on the lifetime of a persisted first-flush entry.
const MIN_FLUSH_LOG_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// This replica's position among the cluster members owning a group.
///
/// Position 0 is responsible for flush-log writes. Membership can change
/// at runtime, so the position is read at every use rather than captured
/// at timer construction.
pub trait PeerPosition: Send + Sync {
    /// The current position of this replica, starting at 0.
    fn position(&self) -> usize;
}

/// A fixed replica position, for deployments without dynamic membership.
#[derive(Debug, Clone, Copy)]
pub struct StaticPosition(pub usize);

impl PeerPosition for StaticPosition {
    fn position(&self) -> usize {
        self.0
    }
}

/// A timer that aligns its ticks to a first-flush instant shared through
/// the flush log.
pub struct SyncTimer {
    fingerprint: Fingerprint,
    interval: Duration,
    flush_log: Arc<dyn FlushLog>,
    position: Arc<dyn PeerPosition>,
    deadline: Deadline,
}

impl SyncTimer {
    /// Creates a timer armed `group_wait` from now; synchronization starts
    /// with the first reset.
    pub fn new(
        fingerprint: Fingerprint,
        group_wait: Duration,
        group_interval: Duration,
        flush_log: Arc<dyn FlushLog>,
        position: Arc<dyn PeerPosition>,
    ) -> Self {
        Self {
            fingerprint,
            interval: group_interval,
            flush_log,
            position,
            deadline: Deadline::armed_in(group_wait),
        }
    }

    /// Projects the next tick onto the grid anchored at `anchor` and
    /// returns the delay until it, logging when the current tick drifted
    /// more than [`SYNC_TIMER_MAX_DRIFT`] off the grid.
    fn aligned_delay(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let interval_ms = i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX).max(1);
        let elapsed_ms = (now - anchor).num_milliseconds();

        let next = if elapsed_ms < 0 {
            // The shared first flush is still ahead of us; tick exactly then.
            anchor
        } else {
            let iterations = elapsed_ms / interval_ms + 1;
            anchor + TimeDelta::milliseconds(iterations.saturating_mul(interval_ms))
        };

        let prev = next - TimeDelta::milliseconds(interval_ms);
        let drift = std::cmp::min((now - prev).abs(), (next - now).abs());
        if drift.to_std().map(|d| d > SYNC_TIMER_MAX_DRIFT).unwrap_or(false) {
            tracing::warn!(
                fingerprint = %self.fingerprint,
                drift_ms = drift.num_milliseconds(),
                "Group flush drifted off the cluster-aligned schedule."
            );
        }

        (next - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Plain-interval fallback used when no anchor exists; position 0
    /// records the group's first-flush instant for the other replicas.
    async fn fallback_delay(&self, now: DateTime<Utc>, persist: bool) -> Duration {
        if persist && self.position.position() == 0 {
            let expiry = std::cmp::max(self.interval * 2, MIN_FLUSH_LOG_EXPIRY);
            let threshold =
                now + TimeDelta::from_std(expiry).unwrap_or(TimeDelta::MAX);
            if let Err(e) = self.flush_log.log(self.fingerprint, now, threshold, expiry).await {
                tracing::error!(
                    error = %e,
                    fingerprint = %self.fingerprint,
                    "Failed to record first-flush entry."
                );
            }
        }
        self.interval
    }
}

#[async_trait]
impl FlushTimer for SyncTimer {
    async fn wait(&self) -> DateTime<Utc> {
        self.deadline.wait().await
    }

    async fn reset(&self, now: DateTime<Utc>) {
        let delay = match self.flush_log.query(self.fingerprint).await {
            Ok(entries) => match entries.iter().map(|e| e.flush_time).max() {
                Some(anchor) => self.aligned_delay(anchor, now),
                None => self.fallback_delay(now, true).await,
            },
            Err(e) if e.is_not_found() => self.fallback_delay(now, true).await,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fingerprint = %self.fingerprint,
                    "Flush-log query failed; falling back to plain interval countdown."
                );
                self.fallback_delay(now, false).await
            }
        };
        self.deadline.arm_in(delay);
    }

    fn fire_now(&self) {
        self.deadline.fire_now();
    }

    async fn stop(&self, clean_state: bool) {
        self.deadline.park();
        if clean_state && self.position.position() == 0 {
            if let Err(e) = self.flush_log.delete(self.fingerprint).await {
                tracing::error!(
                    error = %e,
                    fingerprint = %self.fingerprint,
                    "Failed to delete first-flush entry."
                );
            }
        }
    }
}

/// Builds [`SyncTimer`]s sharing one flush log and peer position.
pub struct SyncTimerFactory {
    flush_log: Arc<dyn FlushLog>,
    position: Arc<dyn PeerPosition>,
}

impl SyncTimerFactory {
    /// Creates a factory handing every timer the given flush log and
    /// replica position.
    pub fn new(flush_log: Arc<dyn FlushLog>, position: Arc<dyn PeerPosition>) -> Self {
        Self { flush_log, position }
    }
}

impl TimerFactory for SyncTimerFactory {
    fn build(&self, fingerprint: Fingerprint, opts: &RouteOpts) -> Box<dyn FlushTimer> {
        Box::new(SyncTimer::new(
            fingerprint,
            opts.group_wait,
            opts.group_interval,
            Arc::clone(&self.flush_log),
            Arc::clone(&self.position),
        ))
    }
}
