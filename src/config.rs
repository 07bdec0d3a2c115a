use std::time::Duration;

use serde::Deserialize;

fn default_id() -> String {
    "relay".to_string()
}
fn default_max_concurrent() -> usize {
    16
}
fn default_refresh_secs() -> u64 {
    300
}
fn default_clean_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_cog_port() -> u16 {
    1883
}
fn default_reconnect_cap_secs() -> u64 {
    60
}

/// Connection target for the Cog host.
#[derive(Debug, Clone, Deserialize)]
pub struct CogConfig {
    pub host: String,
    #[serde(default = "default_cog_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Ceiling on the reconnect backoff after a dropped link, in seconds.
    #[serde(default = "default_reconnect_cap_secs")]
    pub reconnect_cap_secs: u64,
}

impl Default for CogConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_cog_port(),
            username: None,
            password: None,
            reconnect_cap_secs: default_reconnect_cap_secs(),
        }
    }
}

impl CogConfig {
    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_secs(self.reconnect_cap_secs)
    }
}

/// Container engine settings. Present iff the Docker engine is enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    /// Dead-container reap period, in seconds.
    #[serde(default = "default_clean_secs")]
    pub clean_interval_secs: u64,
    /// Registry the relay pulls bundle images from.
    #[serde(default)]
    pub registry_host: Option<String>,
    #[serde(default)]
    pub registry_user: Option<String>,
    #[serde(default)]
    pub registry_password: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            clean_interval_secs: default_clean_secs(),
            registry_host: None,
            registry_user: None,
            registry_password: None,
        }
    }
}

impl DockerConfig {
    pub fn clean_duration(&self) -> Duration {
        Duration::from_secs(self.clean_interval_secs)
    }
}

/// Relay configuration. Loading from file or environment is the caller's
/// concern; the core only reads the resolved values.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Relay identity advertised to Cog.
    #[serde(default = "default_id")]
    pub id: String,
    /// Number of commands executed in parallel.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub cog: CogConfig,
    /// Bundle refresh period, in seconds.
    #[serde(default = "default_refresh_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_true")]
    pub native_enabled: bool,
    #[serde(default)]
    pub docker: Option<DockerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: default_id(),
            max_concurrent: default_max_concurrent(),
            cog: CogConfig::default(),
            refresh_interval_secs: default_refresh_secs(),
            native_enabled: true,
            docker: None,
        }
    }
}

impl Config {
    pub fn refresh_duration(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn native_enabled(&self) -> bool {
        self.native_enabled
    }

    pub fn docker_enabled(&self) -> bool {
        self.docker.is_some()
    }

    /// Worker count: `max_concurrent` execution slots plus two reserved for
    /// directive handling, so a saturated execution workload cannot starve
    /// bundle refreshes.
    pub fn worker_count(&self) -> usize {
        self.max_concurrent + 2
    }

    /// Queue capacity: double the concurrency to absorb brief bursts without
    /// back-pressuring the bus handler path.
    pub fn queue_depth(&self) -> usize {
        self.max_concurrent * 2
    }
}
