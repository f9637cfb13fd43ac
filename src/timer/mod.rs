//! Pluggable per-group flush scheduling.
//!
//! Each aggregation group owns one [`FlushTimer`] driving its flush loop.
//! The timer is shared between the group's run task (which waits on it and
//! re-arms it after every tick) and the dispatcher's insert path (which may
//! force an immediate tick), so implementations use interior mutability.

pub mod standard;
pub mod sync;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    sync::watch,
    time::{sleep_until, Instant},
};

pub use standard::{StandardTimer, StandardTimerFactory};
pub use sync::{PeerPosition, StaticPosition, SyncTimer, SyncTimerFactory};

use crate::{models::Fingerprint, routing::RouteOpts};

/// The scheduling strategy of one aggregation group.
#[async_trait]
pub trait FlushTimer: Send + Sync {
    /// Completes at the armed deadline and returns the tick time.
    ///
    /// Cancel-safe: the future may be dropped and re-created freely, and a
    /// deadline re-armed while a wait is pending takes effect immediately.
    async fn wait(&self) -> DateTime<Utc>;

    /// Re-arms the timer for the next interval, given the pipeline's
    /// notion of "now".
    async fn reset(&self, now: DateTime<Utc>);

    /// Forces an immediate tick, honoring an already-elapsed group wait.
    fn fire_now(&self);

    /// Cancels any pending tick permanently. `clean_state` signals that
    /// persisted schedule state may be discarded.
    async fn stop(&self, clean_state: bool);
}

/// Builds the [`FlushTimer`] for a newly created aggregation group.
pub trait TimerFactory: Send + Sync {
    /// Creates a timer for the group with the given fingerprint, armed
    /// with the route's group wait.
    fn build(&self, fingerprint: Fingerprint, opts: &RouteOpts) -> Box<dyn FlushTimer>;
}

/// A re-armable deadline shared between the waiting task and concurrent
/// re-arms, backed by a watch channel so every re-arm wakes a pending
/// wait.
#[derive(Debug)]
pub(crate) struct Deadline {
    tx: watch::Sender<Option<Instant>>,
}

impl Deadline {
    /// Creates a deadline armed `delay` from now.
    pub(crate) fn armed_in(delay: std::time::Duration) -> Self {
        let (tx, _) = watch::channel(Some(Instant::now() + delay));
        Self { tx }
    }

    /// Re-arms the deadline `delay` from now.
    pub(crate) fn arm_in(&self, delay: std::time::Duration) {
        let _ = self.tx.send(Some(Instant::now() + delay));
    }

    /// Arms the deadline to fire immediately.
    pub(crate) fn fire_now(&self) {
        let _ = self.tx.send(Some(Instant::now()));
    }

    /// Parks the deadline; no tick fires until the next re-arm.
    pub(crate) fn park(&self) {
        let _ = self.tx.send(None);
    }

    /// Sleeps until the armed deadline, tracking re-arms, and returns the
    /// fire time.
    pub(crate) async fn wait(&self) -> DateTime<Utc> {
        let mut rx = self.tx.subscribe();
        loop {
            let target = *rx.borrow_and_update();
            match target {
                Some(deadline) => {
                    tokio::select! {
                        _ = sleep_until(deadline) => return Utc::now(),
                        changed = rx.changed() => {
                            if changed.is_err() {
                                // The sender lives in the owning timer, so a
                                // closed channel means the timer is gone.
                                std::future::pending::<()>().await;
                            }
                        }
                    }
                }
                None => {
                    if rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }
}
