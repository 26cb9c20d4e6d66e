//! # Engine Configuration
//!
//! Configuration for one terminal.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DEPOT_DB_PATH=/srv/depot/depot.db                                  │
//! │     DEPOT_LOCK_TTL_SECS=600                                            │
//! │     DEPOT_PRIMARY_WAREHOUSE=MAIN                                       │
//! │     DEPOT_TERMINAL_NAME="Counter 2"                                    │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/depot-pos/depot.toml (Linux)                             │
//! │     ~/Library/Application Support/com.depot.pos/depot.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [terminal]
//! name = "Counter 1"
//!
//! [locks]
//! ttl_secs = 600
//! sweep_interval_secs = 30
//! heartbeat_interval_secs = 120
//! release_retry_ms = 2000
//!
//! [warehouses]
//! primary = "MAIN"
//!
//! [database]
//! path = "/srv/depot/depot.db"
//! max_connections = 5
//! ```

use std::path::PathBuf;
use std::time::Duration;

use depot_db::DbConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

const CONFIG_FILE: &str = "depot.toml";
const DB_FILE: &str = "depot.db";

// =============================================================================
// Terminal
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Shown in logs and on other terminals' lock banners.
    #[serde(default = "default_terminal_name")]
    pub name: String,
}

fn default_terminal_name() -> String {
    "POS Terminal".to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            name: default_terminal_name(),
        }
    }
}

// =============================================================================
// Lock Settings
// =============================================================================

/// Editing lease timing.
///
/// ```text
/// acquire ──┬── heartbeat ──┬── heartbeat ──┬── ...        (every 120 s)
///           │               │               │
///           └───── ttl 600 s, pushed forward by each renew
///
/// sweep ── every 30 s deletes leases whose ttl ran out
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Must be shorter than `ttl_secs` or the foreground lease lapses.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// How long a failed release keeps retrying before giving up.
    #[serde(default = "default_release_retry")]
    pub release_retry_ms: u64,
}

fn default_ttl() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    120
}

fn default_release_retry() -> u64 {
    2000
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            ttl_secs: default_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            release_retry_ms: default_release_retry(),
        }
    }
}

impl LockSettings {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn release_retry(&self) -> Duration {
        Duration::from_millis(self.release_retry_ms)
    }
}

// =============================================================================
// Warehouses
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarehouseSettings {
    /// Preferred warehouse when auto-distributing stock.
    #[serde(default)]
    pub primary: Option<String>,
}

// =============================================================================
// Database
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete terminal configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub locks: LockSettings,

    #[serde(default)]
    pub warehouses: WarehouseSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (depot.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.terminal.name.trim().is_empty() {
            return Err(EngineError::Config("terminal name must not be empty".into()));
        }

        let locks = &self.locks;
        if locks.ttl_secs == 0 || locks.sweep_interval_secs == 0 || locks.heartbeat_interval_secs == 0
        {
            return Err(EngineError::Config(
                "lock ttl, sweep and heartbeat intervals must be greater than 0".into(),
            ));
        }
        if locks.heartbeat_interval_secs >= locks.ttl_secs {
            return Err(EngineError::Config(format!(
                "heartbeat_interval_secs ({}) must be shorter than ttl_secs ({})",
                locks.heartbeat_interval_secs, locks.ttl_secs
            )));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup (the environment in production).
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("DEPOT_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(ttl) = lookup("DEPOT_LOCK_TTL_SECS") {
            match ttl.parse::<u64>() {
                Ok(secs) => self.locks.ttl_secs = secs,
                Err(_) => warn!(value = %ttl, "Ignoring invalid DEPOT_LOCK_TTL_SECS"),
            }
        }

        if let Some(warehouse) = lookup("DEPOT_PRIMARY_WAREHOUSE") {
            self.warehouses.primary = Some(warehouse).filter(|w| !w.is_empty());
        }

        if let Some(name) = lookup("DEPOT_TERMINAL_NAME") {
            self.terminal.name = name;
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "depot", "pos")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The configured database file, else `depot.db` in the platform data
    /// directory, else the working directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return path.clone();
        }
        directories::ProjectDirs::from("com", "depot", "pos")
            .map(|dirs| dirs.data_dir().join(DB_FILE))
            .unwrap_or_else(|| PathBuf::from(DB_FILE))
    }

    /// Pool settings for [`depot_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path()).max_connections(self.database.max_connections)
    }

    pub fn primary_warehouse(&self) -> Option<&str> {
        self.warehouses.primary.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.locks.ttl_secs, 600);
        assert_eq!(config.locks.sweep_interval_secs, 30);
        assert_eq!(config.locks.heartbeat_interval_secs, 120);
        assert_eq!(config.locks.release_retry_ms, 2000);
        assert_eq!(config.locks.ttl(), chrono::Duration::minutes(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [locks]
            ttl_secs = 300

            [warehouses]
            primary = "NORTH"
            "#,
        )
        .unwrap();

        assert_eq!(config.locks.ttl_secs, 300);
        assert_eq!(config.locks.heartbeat_interval_secs, 120);
        assert_eq!(config.primary_warehouse(), Some("NORTH"));
        assert_eq!(config.terminal.name, "POS Terminal");
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.locks.heartbeat_interval_secs = 600;
        assert!(config.validate().is_err());

        config.locks.heartbeat_interval_secs = 60;
        config.locks.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        config.locks.sweep_interval_secs = 30;
        config.terminal.name = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("DEPOT_DB_PATH", "/tmp/depot-test.db"),
            ("DEPOT_LOCK_TTL_SECS", "900"),
            ("DEPOT_PRIMARY_WAREHOUSE", "SOUTH"),
            ("DEPOT_TERMINAL_NAME", "Counter 2"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_path(), PathBuf::from("/tmp/depot-test.db"));
        assert_eq!(config.locks.ttl_secs, 900);
        assert_eq!(config.primary_warehouse(), Some("SOUTH"));
        assert_eq!(config.terminal.name, "Counter 2");
    }

    #[test]
    fn test_invalid_ttl_override_is_ignored() {
        let mut config = EngineConfig::default();
        config.apply_overrides_from(|key| {
            (key == "DEPOT_LOCK_TTL_SECS").then(|| "ten minutes".to_string())
        });
        assert_eq!(config.locks.ttl_secs, 600);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("depot-config-{}", uuid::Uuid::new_v4()))
            .join("depot.toml");

        let mut config = EngineConfig::default();
        config.terminal.name = "Back Counter".into();
        config.warehouses.primary = Some("MAIN".into());
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[locks]"));

        let loaded: EngineConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.terminal.name, "Back Counter");
        assert_eq!(loaded.primary_warehouse(), Some("MAIN"));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
