//! Configuration management for the Hackacast live timers

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_PATH_ENV: &str = "HACKACAST_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Document store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Timer documents and display refresh
    #[serde(default)]
    pub timers: TimersConfig,

    /// Active-question lookup
    #[serde(default)]
    pub questions: QuestionsConfig,

    /// Administrator identity
    #[serde(default)]
    pub admin: AdminConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the file-backed document store
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimersConfig {
    /// Stopwatch singleton document path
    #[serde(default = "default_stopwatch_path")]
    pub stopwatch_path: String,

    /// Countdown singleton document path
    #[serde(default = "default_countdown_path")]
    pub countdown_path: String,

    /// Local display recomputation period while a timer runs (ms)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Delay between attempts to re-establish a lost store listener (ms)
    #[serde(default = "default_resubscribe_interval")]
    pub resubscribe_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionsConfig {
    /// Collection holding submitted questions
    #[serde(default = "default_questions_collection")]
    pub collection: String,

    /// Period of the active-question refresh (ms)
    #[serde(default = "default_question_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long a fetched active question is served from cache (ms)
    #[serde(default = "default_question_cache_ttl")]
    pub cache_ttl_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Recorded as `updatedBy` on timer documents (generated if not set)
    pub actor_id: Option<String>,
}

// Default value functions
fn default_store_root() -> PathBuf {
    directories::ProjectDirs::from("dev", "hackacast", "live")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| std::env::temp_dir().join("hackacast-store"))
}

fn default_stopwatch_path() -> String {
    "meta/timer".to_string()
}

fn default_countdown_path() -> String {
    "meta/countdownTimer".to_string()
}

fn default_tick_interval() -> u64 {
    100 // ~10 display updates per second
}

fn default_resubscribe_interval() -> u64 {
    2_000
}

fn default_questions_collection() -> String {
    "questions".to_string()
}

fn default_question_poll_interval() -> u64 {
    10_000
}

fn default_question_cache_ttl() -> u64 {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            stopwatch_path: default_stopwatch_path(),
            countdown_path: default_countdown_path(),
            tick_interval_ms: default_tick_interval(),
            resubscribe_interval_ms: default_resubscribe_interval(),
        }
    }
}

impl Default for QuestionsConfig {
    fn default() -> Self {
        Self {
            collection: default_questions_collection(),
            poll_interval_ms: default_question_poll_interval(),
            cache_ttl_ms: default_question_cache_ttl(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load configuration from `config_path`, writing defaults there if absent
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(config_path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        if let Ok(override_path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(override_path));
        }

        let proj_dirs = directories::ProjectDirs::from("dev", "hackacast", "live")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Get or generate the administrator actor id
    pub fn actor_id(&self) -> String {
        self.admin
            .actor_id
            .clone()
            .unwrap_or_else(|| format!("admin-{}", uuid::Uuid::new_v4()))
    }
}
