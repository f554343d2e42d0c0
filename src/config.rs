use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

/// Hard upper bound on entries per queue batch
pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiSection,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    pub regions: Vec<RegionConfig>,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub slugs: SlugConfig,
}

/// SQLite storage configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,

    /// Upper bound for a single storage call
    #[serde(default = "default_timeout_secs")]
    pub db_timeout_secs: u64,
}

impl StorageConfig {
    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
            db_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    #[serde(default)]
    pub enable_cors: bool,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            enable_cors: false,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Minimum time between two dispatches of the same monitor
    #[serde(default = "default_interval_floor_secs")]
    pub interval_floor_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn interval_floor(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.interval_floor_secs as i64)
    }

    /// Batch size clamped to `1..=MAX_BATCH_SIZE`
    pub fn batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            interval_floor_secs: default_interval_floor_secs(),
            batch_size: default_batch_size(),
            send_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegionConfig {
    pub id: String,
    pub queue_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotifierConfig {
    /// Relay that receives downtime alerts; none disables delivery
    pub webhook_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SlugConfig {
    /// Provision tickets on startup when none exist
    #[serde(default = "default_true")]
    pub seed: bool,

    #[serde(default = "default_slug_start")]
    pub start: i64,

    #[serde(default = "default_slug_range")]
    pub range: i64,

    #[serde(default = "default_slug_tickets")]
    pub tickets: u32,
}

impl Default for SlugConfig {
    fn default() -> Self {
        Self {
            seed: true,
            start: default_slug_start(),
            range: default_slug_range(),
            tickets: default_slug_tickets(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./upwatch.db")
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_tick_secs() -> u64 {
    60
}

fn default_interval_floor_secs() -> u64 {
    180
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

fn default_slug_start() -> i64 {
    100_000
}

fn default_slug_range() -> i64 {
    100_000
}

fn default_slug_tickets() -> u32 {
    5
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.regions.is_empty() {
            anyhow::bail!("at least one region must be configured");
        }

        let mut seen = HashSet::new();
        for region in &self.regions {
            if region.id.trim().is_empty() {
                anyhow::bail!("region id must not be empty");
            }
            if !seen.insert(region.id.as_str()) {
                anyhow::bail!("duplicate region id: {}", region.id);
            }
        }

        if self.slugs.range <= 0 {
            anyhow::bail!("slug ticket range must be positive");
        }

        Ok(())
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config: Config = serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}
