//! Startup configuration (`~/.wagertally/config.toml`)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::services::CalendarRules;
use crate::store::{JsonFileStore, MemoryStore, SqliteStore, TotalsStore};
use crate::types::{Result, TallyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Json,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Defaults to `bet_totals.db` / `bet_totals.json` in the data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_week_start")]
    pub week_start: String,
    #[serde(default = "default_month_anchor_day")]
    pub month_anchor_day: u32,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            week_start: default_week_start(),
            month_anchor_day: default_month_anchor_day(),
            io_timeout_ms: default_io_timeout_ms(),
            store: StoreConfig::default(),
        }
    }
}

fn default_timezone() -> String {
    "Asia/Ho_Chi_Minh".to_string()
}

fn default_week_start() -> String {
    "Sun".to_string()
}

const fn default_month_anchor_day() -> u32 {
    30
}

const fn default_io_timeout_ms() -> u64 {
    2_000
}

impl Config {
    /// `~/.wagertally`
    pub fn data_dir() -> Result<PathBuf> {
        let base_dirs = BaseDirs::new()
            .ok_or_else(|| TallyError::Config("Cannot determine home directory".into()))?;
        Ok(base_dirs.home_dir().join(".wagertally"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("config.toml"))
    }

    /// Load from `path`, or from the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TallyError::Parse(format!("config: {}", e)))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Validate the calendar settings
    pub fn calendar(&self) -> Result<CalendarRules> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|e| {
                TallyError::Config(format!("unknown timezone '{}': {}", self.timezone, e))
            })?;
        let week_start: Weekday = self
            .week_start
            .parse()
            .map_err(|_| TallyError::Config(format!("unknown weekday '{}'", self.week_start)))?;
        CalendarRules::new(timezone, week_start, self.month_anchor_day)
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }
        let file = match self.store.backend {
            StoreBackend::Json => "bet_totals.json",
            StoreBackend::Sqlite | StoreBackend::Memory => "bet_totals.db",
        };
        Ok(Self::data_dir()?.join(file))
    }

    /// Build the configured store
    pub fn open_store(&self) -> Result<Box<dyn TotalsStore>> {
        Ok(match self.store.backend {
            StoreBackend::Memory => Box::new(MemoryStore::new()),
            StoreBackend::Json => {
                Box::new(JsonFileStore::new(self.store_path()?, self.io_timeout()))
            }
            StoreBackend::Sqlite => {
                Box::new(SqliteStore::open(self.store_path()?, self.io_timeout())?)
            }
        })
    }
}
