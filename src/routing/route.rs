//! The immutable routing tree matched against incoming alerts.

use std::{collections::BTreeSet, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use super::matcher::{Matcher, MatcherError};
use crate::{config::deserialize_opt_duration_from_seconds, models::LabelSet};

/// Default initial delay before a fresh group first flushes.
pub const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(30);

/// Default cadence of periodic re-flushes after the first one.
pub const DEFAULT_GROUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default re-notification cadence for already-delivered alerts.
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// The `group_by` entry selecting grouping by the full label set.
const GROUP_BY_ALL: &str = "...";

/// Errors raised while building the routing tree from configuration.
#[derive(Debug, Error)]
pub enum RouteError {
    /// A matcher expression on a route failed to parse or compile.
    #[error("Route matcher error: {0}")]
    Matcher(#[from] MatcherError),

    /// The root route has no receiver configured.
    #[error("Root route must have a receiver")]
    MissingRootReceiver,
}

/// The resolved per-route options, after applying inheritance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOpts {
    /// The receiver alerts matched by this route are delivered to.
    pub receiver: String,

    /// The label names alerts are grouped by under this route.
    pub group_by: BTreeSet<String>,

    /// Groups by the full label set instead of `group_by` when true.
    pub group_by_all: bool,

    /// Initial delay before a fresh group first flushes.
    pub group_wait: Duration,

    /// Cadence of periodic re-flushes after the first one.
    pub group_interval: Duration,

    /// Re-notification cadence for already-delivered alerts, carried as
    /// metadata for downstream consumers.
    pub repeat_interval: Duration,

    /// Names of mute time intervals applying to this route.
    pub mute_time_intervals: Vec<String>,

    /// Names of active time intervals applying to this route.
    pub active_time_intervals: Vec<String>,
}

impl Default for RouteOpts {
    fn default() -> Self {
        Self {
            receiver: String::new(),
            group_by: BTreeSet::new(),
            group_by_all: false,
            group_wait: DEFAULT_GROUP_WAIT,
            group_interval: DEFAULT_GROUP_INTERVAL,
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
            mute_time_intervals: Vec::new(),
            active_time_intervals: Vec::new(),
        }
    }
}

/// One node of the declarative routing configuration tree.
///
/// Unset fields inherit the parent's already-resolved options when the
/// tree is built.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteConfig {
    /// The receiver for this route; required on the root, inherited below.
    #[serde(default)]
    pub receiver: Option<String>,

    /// Matcher expressions (`name="v"`, `name!="v"`, `name=~"v"`,
    /// `name!~"v"`) that must all hold for the route to match.
    #[serde(default)]
    pub matchers: Vec<String>,

    /// Label names to group by; the single entry `"..."` selects grouping
    /// by the full label set.
    #[serde(default)]
    pub group_by: Vec<String>,

    /// Initial flush delay in seconds.
    #[serde(default, deserialize_with = "deserialize_opt_duration_from_seconds")]
    pub group_wait: Option<Duration>,

    /// Re-flush cadence in seconds.
    #[serde(default, deserialize_with = "deserialize_opt_duration_from_seconds")]
    pub group_interval: Option<Duration>,

    /// Re-notification cadence in seconds.
    #[serde(default, deserialize_with = "deserialize_opt_duration_from_seconds")]
    pub repeat_interval: Option<Duration>,

    /// Whether sibling routes are still evaluated after this one matches.
    #[serde(default, rename = "continue")]
    pub continue_matching: bool,

    /// Names of mute time intervals applying to this route.
    #[serde(default)]
    pub mute_time_intervals: Vec<String>,

    /// Names of active time intervals applying to this route.
    #[serde(default)]
    pub active_time_intervals: Vec<String>,

    /// Child routes.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// One node of the immutable routing tree.
///
/// Built once from configuration at startup and read-only thereafter;
/// the dispatcher never mutates it.
#[derive(Debug)]
pub struct Route {
    matchers: Vec<Matcher>,
    opts: RouteOpts,
    continue_matching: bool,
    routes: Vec<Route>,
    key: String,
    id: String,
}

impl Route {
    /// Builds the resolved routing tree from its configuration.
    pub fn new(config: &RouteConfig) -> Result<Self, RouteError> {
        if config.receiver.is_none() {
            return Err(RouteError::MissingRootReceiver);
        }

        let mut root = Self::build(config, &RouteOpts::default(), "")?;
        root.id = format!("{}[0]", root.key);
        Ok(root)
    }

    fn build(
        config: &RouteConfig,
        parent_opts: &RouteOpts,
        parent_key: &str,
    ) -> Result<Self, RouteError> {
        let mut matchers = config
            .matchers
            .iter()
            .map(|expr| expr.parse())
            .collect::<Result<Vec<Matcher>, MatcherError>>()?;
        // Sorted so the rendered key is independent of configuration order.
        matchers.sort();

        let rendered: Vec<String> = matchers.iter().map(Matcher::to_string).collect();
        let own_key = format!("{{{}}}", rendered.join(","));
        let key = if parent_key.is_empty() {
            own_key
        } else {
            format!("{}/{}", parent_key, own_key)
        };

        let opts = Self::resolve_opts(config, parent_opts);

        let mut routes = Vec::with_capacity(config.routes.len());
        for child_config in &config.routes {
            let mut child = Self::build(child_config, &opts, &key)?;
            let ordinal =
                routes.iter().filter(|sibling: &&Route| sibling.key == child.key).count();
            child.id = format!("{}[{}]", child.key, ordinal);
            routes.push(child);
        }

        Ok(Self {
            matchers,
            opts,
            continue_matching: config.continue_matching,
            routes,
            key,
            id: String::new(),
        })
    }

    fn resolve_opts(config: &RouteConfig, parent: &RouteOpts) -> RouteOpts {
        let receiver =
            config.receiver.clone().unwrap_or_else(|| parent.receiver.clone());

        let (group_by, group_by_all) = if config.group_by.is_empty() {
            (parent.group_by.clone(), parent.group_by_all)
        } else {
            let names: BTreeSet<String> =
                config.group_by.iter().filter(|n| n.as_str() != GROUP_BY_ALL).cloned().collect();
            if names.is_empty() {
                // Only "..." was configured.
                (BTreeSet::new(), true)
            } else {
                // Explicit labels win over "..." when both are present.
                (names, false)
            }
        };

        let mute_time_intervals = if config.mute_time_intervals.is_empty() {
            parent.mute_time_intervals.clone()
        } else {
            config.mute_time_intervals.clone()
        };
        let active_time_intervals = if config.active_time_intervals.is_empty() {
            parent.active_time_intervals.clone()
        } else {
            config.active_time_intervals.clone()
        };

        RouteOpts {
            receiver,
            group_by,
            group_by_all,
            group_wait: config.group_wait.unwrap_or(parent.group_wait),
            group_interval: config.group_interval.unwrap_or(parent.group_interval),
            repeat_interval: config.repeat_interval.unwrap_or(parent.repeat_interval),
            mute_time_intervals,
            active_time_intervals,
        }
    }

    /// Returns all routes matching the given label set, leaf-first in
    /// depth-first, left-to-right order.
    ///
    /// A node matches when all its matchers hold (a matcher-less node
    /// always matches). Matches produced by a child with `continue` unset
    /// stop the evaluation of its later siblings, and a node with no
    /// matching descendant is itself the match.
    pub fn match_labels<'a>(&'a self, labels: &LabelSet) -> Vec<&'a Route> {
        let mut matched = Vec::new();
        self.collect_matches(labels, &mut matched);
        matched
    }

    fn collect_matches<'a>(&'a self, labels: &LabelSet, matched: &mut Vec<&'a Route>) -> bool {
        if !self.matchers.iter().all(|m| m.matches(labels)) {
            return false;
        }

        let before = matched.len();
        for child in &self.routes {
            let child_matched = child.collect_matches(labels, matched);
            if child_matched && !child.continue_matching {
                break;
            }
        }

        if matched.len() == before {
            matched.push(self);
        }
        true
    }

    /// Projects an alert's labels onto this route's grouping, returning the
    /// group-label set alerts are aggregated under.
    pub fn group_labels(&self, labels: &LabelSet) -> LabelSet {
        if self.opts.group_by_all {
            labels.clone()
        } else {
            labels.projected(&self.opts.group_by)
        }
    }

    /// The resolved options of this route.
    pub fn opts(&self) -> &RouteOpts {
        &self.opts
    }

    /// The deterministic matcher-path string of this route.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The route identifier: the key, disambiguated among same-key
    /// siblings by their index.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether sibling routes are still evaluated after this one matches.
    pub fn continue_matching(&self) -> bool {
        self.continue_matching
    }

    /// The child routes of this node.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
