//! The plain countdown timer used by standalone deployments.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Deadline, FlushTimer, TimerFactory};
use crate::{models::Fingerprint, routing::RouteOpts};

/// A plain countdown: armed with the group wait at creation, re-armed to
/// the group interval on every reset.
#[derive(Debug)]
pub struct StandardTimer {
    interval: Duration,
    deadline: Deadline,
}

impl StandardTimer {
    /// Creates a timer armed `group_wait` from now, re-arming to
    /// `group_interval` on reset.
    pub fn new(group_wait: Duration, group_interval: Duration) -> Self {
        Self { interval: group_interval, deadline: Deadline::armed_in(group_wait) }
    }
}

#[async_trait]
impl FlushTimer for StandardTimer {
    async fn wait(&self) -> DateTime<Utc> {
        self.deadline.wait().await
    }

    async fn reset(&self, _now: DateTime<Utc>) {
        self.deadline.arm_in(self.interval);
    }

    fn fire_now(&self) {
        self.deadline.fire_now();
    }

    async fn stop(&self, _clean_state: bool) {
        self.deadline.park();
    }
}

/// Builds [`StandardTimer`]s from the matched route's options.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardTimerFactory;

impl TimerFactory for StandardTimerFactory {
    fn build(&self, _fingerprint: Fingerprint, opts: &RouteOpts) -> Box<dyn FlushTimer> {
        Box::new(StandardTimer::new(opts.group_wait, opts.group_interval))
    }
}
