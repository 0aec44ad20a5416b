//! Configuration management with file persistence

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::locking::{CleanupMethod, LockConfig};

/// Lockwarden configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cleanup: CleanupConfig,
    pub locking: LockingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub method: CleanupMethod,
    pub interval_secs: u64,
    pub amount: usize,
    pub max_age_secs: u64,
    pub memory_threshold_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    pub expiry_offset_ms: u64,
    pub event_capacity: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        let defaults = LockConfig::default();
        Self {
            method: defaults.cleanup_method,
            interval_secs: defaults.cleanup_interval.as_secs(),
            amount: defaults.cleanup_amount,
            max_age_secs: defaults.cleanup_max_age.as_secs(),
            memory_threshold_mb: defaults.memory_threshold_bytes / (1024 * 1024),
        }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        let defaults = LockConfig::default();
        Self {
            expiry_offset_ms: defaults.expiry_offset.as_millis() as u64,
            event_capacity: defaults.event_capacity,
        }
    }
}

const KEYS: [&str; 7] = [
    "cleanup.method",
    "cleanup.interval_secs",
    "cleanup.amount",
    "cleanup.max_age_secs",
    "cleanup.memory_threshold_mb",
    "locking.expiry_offset_ms",
    "locking.event_capacity",
];

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOCKWARDEN_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| Error::ConfigError("Could not determine config directory".to_string()))?
                .join("lockwarden")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                Error::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
            })?;
            let config: Config = toml::from_str(&contents).map_err(|e| {
                Error::ConfigError(format!("Failed to parse config file {}: {}", path.display(), e))
            })?;
            config.validate()?;
            Ok(config)
        } else {
            // Return default config without creating file
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).map_err(|e| {
            Error::ConfigError(format!("Failed to create config directory {}: {}", dir.display(), e))
        })?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(&path, contents).map_err(|e| {
            Error::ConfigError(format!("Failed to write config file {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Ok(self.lock_config().validate()?)
    }

    /// Runtime lock manager options described by this file
    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            cleanup_method: self.cleanup.method,
            cleanup_interval: Duration::from_secs(self.cleanup.interval_secs),
            cleanup_amount: self.cleanup.amount,
            cleanup_max_age: Duration::from_secs(self.cleanup.max_age_secs),
            memory_threshold_bytes: self.cleanup.memory_threshold_mb.saturating_mul(1024 * 1024),
            expiry_offset: Duration::from_millis(self.locking.expiry_offset_ms),
            event_capacity: self.locking.event_capacity,
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> Result<String> {
        match key {
            // Cleanup settings
            "cleanup.method" => Ok(self.cleanup.method.to_string()),
            "cleanup.interval_secs" => Ok(self.cleanup.interval_secs.to_string()),
            "cleanup.amount" => Ok(self.cleanup.amount.to_string()),
            "cleanup.max_age_secs" => Ok(self.cleanup.max_age_secs.to_string()),
            "cleanup.memory_threshold_mb" => Ok(self.cleanup.memory_threshold_mb.to_string()),

            // Locking settings
            "locking.expiry_offset_ms" => Ok(self.locking.expiry_offset_ms.to_string()),
            "locking.event_capacity" => Ok(self.locking.event_capacity.to_string()),

            _ => Err(unknown_key(key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            // Cleanup settings
            "cleanup.method" => {
                self.cleanup.method = value.parse()?;
            }
            "cleanup.interval_secs" => {
                let secs: u64 = parse_value("interval_secs", value)?;
                if secs == 0 {
                    return Err(Error::InvalidInput(
                        "Cleanup interval must be at least one second".to_string(),
                    ));
                }
                self.cleanup.interval_secs = secs;
            }
            "cleanup.amount" => {
                self.cleanup.amount = parse_value("amount", value)?;
            }
            "cleanup.max_age_secs" => {
                self.cleanup.max_age_secs = parse_value("max_age_secs", value)?;
            }
            "cleanup.memory_threshold_mb" => {
                self.cleanup.memory_threshold_mb = parse_value("memory_threshold_mb", value)?;
            }

            // Locking settings
            "locking.expiry_offset_ms" => {
                self.locking.expiry_offset_ms = parse_value("expiry_offset_ms", value)?;
            }
            "locking.event_capacity" => {
                let capacity: usize = parse_value("event_capacity", value)?;
                if capacity == 0 {
                    return Err(Error::InvalidInput("Event capacity must be positive".to_string()));
                }
                self.locking.event_capacity = capacity;
            }

            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        KEYS.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn unknown_key(key: &str) -> Error {
    Error::InvalidInput(format!(
        "Unknown configuration key: {}. Use `lockwarden config list` to see available keys.",
        key
    ))
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Invalid {} value: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // LOCKWARDEN_CONFIG_DIR is process-wide
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_config_dir<F: FnOnce()>(f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: tests touching the variable are serialized by ENV_LOCK
        unsafe { env::set_var("LOCKWARDEN_CONFIG_DIR", dir.path()) };
        f();
        unsafe { env::remove_var("LOCKWARDEN_CONFIG_DIR") };
    }

    #[test]
    fn test_defaults_match_lock_config() {
        let config = Config::default();
        let lock_config = config.lock_config();
        let defaults = LockConfig::default();

        assert_eq!(lock_config.cleanup_method, defaults.cleanup_method);
        assert_eq!(lock_config.cleanup_interval, defaults.cleanup_interval);
        assert_eq!(lock_config.cleanup_amount, defaults.cleanup_amount);
        assert_eq!(lock_config.cleanup_max_age, defaults.cleanup_max_age);
        assert_eq!(lock_config.memory_threshold_bytes, defaults.memory_threshold_bytes);
        assert_eq!(lock_config.expiry_offset, defaults.expiry_offset);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();

        config.set("cleanup.method", "amount").unwrap();
        config.set("cleanup.amount", "25").unwrap();
        config.set("locking.expiry_offset_ms", "150").unwrap();

        assert_eq!(config.get("cleanup.method").unwrap(), "amount");
        assert_eq!(config.get("cleanup.amount").unwrap(), "25");
        assert_eq!(
            config.lock_config().expiry_offset,
            Duration::from_millis(150)
        );
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();

        let err = config.set("cleanup.method", "sometimes").unwrap_err();
        assert_eq!(err.code(), "E304");
        assert!(config.set("cleanup.interval_secs", "0").is_err());
        assert!(config.set("cleanup.amount", "-1").is_err());
        assert!(config.set("locking.event_capacity", "0").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_key() {
        let mut config = Config::default();
        let err = config.get("cleanup.nope").unwrap_err();
        assert_eq!(err.code(), "E800");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(matches!(config.set("nope", "1"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_list_covers_every_key() {
        let listed = Config::default().list().unwrap();
        assert_eq!(listed.len(), KEYS.len());
        assert!(listed.iter().any(|(k, v)| k == "cleanup.method" && v == "time"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[cleanup]\nmethod = \"always\"\n").unwrap();
        assert_eq!(config.cleanup.method, CleanupMethod::Always);
        assert_eq!(config.cleanup.interval_secs, 60);
        assert_eq!(config.locking, LockingConfig::default());
    }

    #[test]
    fn test_save_load_and_reset() {
        with_config_dir(|| {
            assert_eq!(Config::load().unwrap(), Config::default());

            let mut config = Config::default();
            config.set("cleanup.max_age_secs", "30").unwrap();
            config.save().unwrap();
            assert!(Config::config_path().unwrap().exists());

            let loaded = Config::load().unwrap();
            assert_eq!(loaded.cleanup.max_age_secs, 30);

            Config::reset().unwrap();
            assert!(!Config::config_path().unwrap().exists());
            assert_eq!(Config::load().unwrap(), Config::default());
        });
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        with_config_dir(|| {
            let path = Config::config_path().unwrap();
            fs::write(&path, "[cleanup]\ninterval_secs = 0\n").unwrap();
            assert!(Config::load().is_err());

            fs::write(&path, "not = [valid").unwrap();
            let err = Config::load().unwrap_err();
            assert_eq!(err.code(), "E600");
            assert!(err.to_string().contains("Failed to parse config file"));
        });
    }

    #[test]
    fn test_unrepresentable_durations_fail_validation() {
        let mut config = Config::default();
        config.set("cleanup.max_age_secs", &u64::MAX.to_string()).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "E304");

        let mut config = Config::default();
        config.set("locking.expiry_offset_ms", &u64::MAX.to_string()).unwrap();
        assert!(config.validate().is_err());

        with_config_dir(|| {
            assert!(config.save().is_err());
            assert!(!Config::config_path().unwrap().exists());

            let path = Config::config_path().unwrap();
            fs::write(&path, format!("[cleanup]\nmax_age_secs = {}\n", i64::MAX)).unwrap();
            assert!(matches!(Config::load(), Err(Error::Lock(_))));
        });
    }
}
