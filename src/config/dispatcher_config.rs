use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::deserialize_duration_from_seconds;
use crate::routing::RouteConfig;

/// Provides the default value for cleanup_interval_secs.
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(30)
}

/// Provides the default value for max_aggregation_groups.
fn default_max_aggregation_groups() -> usize {
    0
}

/// Provides the default value for replica_position.
fn default_replica_position() -> usize {
    0
}

/// Configuration for a dispatcher instance.
#[derive(Debug, Deserialize, Clone)]
pub struct DispatcherConfig {
    /// The interval in seconds between sweeps for empty aggregation
    /// groups.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_cleanup_interval"
    )]
    pub cleanup_interval_secs: Duration,

    /// The maximum number of live aggregation groups across all routes.
    /// Zero means unlimited.
    #[serde(default = "default_max_aggregation_groups")]
    pub max_aggregation_groups: usize,

    /// This replica's position in the cluster; position 0 owns flush-log
    /// writes.
    #[serde(default = "default_replica_position")]
    pub replica_position: usize,

    /// The routing tree configuration.
    #[serde(default)]
    pub route: RouteConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
            max_aggregation_groups: default_max_aggregation_groups(),
            replica_position: default_replica_position(),
            route: RouteConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Loads the configuration from an optional directory of config files,
    /// layered with `HERALD_`-prefixed environment variables.
    pub fn new(config_dir: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = config_dir.unwrap_or("configs");

        let config = Config::builder()
            .add_source(File::with_name(&format!("{}/herald", config_dir)).required(false))
            .add_source(Environment::with_prefix("HERALD").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
