//! TOML configuration with per-section defaults.

use crate::error::ChimeError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level Chime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

/// General daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Default IANA timezone for reminders and for backfilling legacy rows.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl BotConfig {
    /// The configured timezone, parsed.
    pub fn tz(&self) -> Result<Tz, ChimeError> {
        self.timezone
            .parse()
            .map_err(|_| ChimeError::InvalidTimezone(self.timezone.clone()))
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            timezone: default_timezone(),
        }
    }
}

/// Storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Logging config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: FileLoggingConfig::default(),
        }
    }
}

/// Optional log-to-file sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
        }
    }
}

/// Allow/block filter applied by the command layer before reminders are
/// created. Both lists hold user-id regexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub allowlist: AccessListConfig,
    #[serde(default)]
    pub blocklist: AccessListConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessListConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub regexes: Vec<String>,
}

fn default_name() -> String {
    "chime".to_string()
}

fn default_timezone() -> String {
    "Etc/UTC".to_string()
}

fn default_db_path() -> String {
    "~/.chime/data/chime.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_path() -> String {
    "chime.log".to_string()
}

/// Expand `~` to the home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, ChimeError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ChimeError::Config(format!("failed to read {}: {e}", path.display())))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| ChimeError::Config(format!("failed to parse config: {e}")))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.bot.name, "chime");
        assert_eq!(cfg.bot.timezone, "Etc/UTC");
        assert_eq!(cfg.bot.tz().unwrap(), chrono_tz::Etc::UTC);
        assert!(!cfg.logging.file.enabled);
        assert!(!cfg.access.allowlist.enabled);
        assert!(!cfg.access.blocklist.enabled);
    }

    #[test]
    fn parses_full_config() {
        let cfg: Config = toml::from_str(
            r#"
            [bot]
            name = "standup-bot"
            timezone = "Europe/Berlin"

            [storage]
            db_path = "/var/lib/chime/chime.db"

            [logging]
            level = "debug"

            [logging.file]
            enabled = true
            path = "/var/log/chime.log"

            [access.allowlist]
            enabled = true
            regexes = ["@.*:example\\.org"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.bot.name, "standup-bot");
        assert_eq!(cfg.bot.tz().unwrap().name(), "Europe/Berlin");
        assert_eq!(cfg.storage.db_path, "/var/lib/chime/chime.db");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.file.enabled);
        assert!(cfg.access.allowlist.enabled);
        assert_eq!(cfg.access.allowlist.regexes.len(), 1);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [bot]
            timezone = "America/New_York"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bot.name, "chime");
        assert_eq!(cfg.bot.timezone, "America/New_York");
        assert_eq!(cfg.storage.db_path, "~/.chime/data/chime.db");
    }

    #[test]
    fn invalid_timezone_is_reported() {
        let cfg: Config = toml::from_str("[bot]\ntimezone = \"Mars/Olympus\"\n").unwrap();
        assert!(matches!(cfg.bot.tz(), Err(ChimeError::InvalidTimezone(_))));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = load("/definitely/not/a/real/config.toml").unwrap();
        assert_eq!(cfg.bot.timezone, "Etc/UTC");
    }
}
