use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Timing constants are in milliseconds on the engine clock.
pub const DEFAULT_WAIT_MS: u64 = 500;
pub const BACKPRESSURE_WAIT_MS: u64 = 1;
pub const DEFAULT_MAILBOX_CAPACITY: usize = 20_000;
pub const DEFAULT_THREAD_NAME: &str = "cadence-timer";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

/// Scheduler thread tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Wait used when the index is empty or the blocked mailbox has no space.
    #[serde(default = "default_wait_ms")]
    pub default_wait_ms: u64,
    /// Re-scan delay when a saturated mailbox has already drained again.
    #[serde(default = "backpressure_wait_ms")]
    pub backpressure_wait_ms: u64,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_wait_ms: DEFAULT_WAIT_MS,
            backpressure_wait_ms: BACKPRESSURE_WAIT_MS,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of each priority lane of a mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

fn default_wait_ms() -> u64 {
    DEFAULT_WAIT_MS
}
fn backpressure_wait_ms() -> u64 {
    BACKPRESSURE_WAIT_MS
}
fn default_thread_name() -> String {
    DEFAULT_THREAD_NAME.to_string()
}
fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_TIMER__DEFAULT_WAIT_MS=250`. A missing file is not an error;
    /// every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
