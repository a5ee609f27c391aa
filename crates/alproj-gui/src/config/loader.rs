use std::path::{Path, PathBuf};

use log::debug;

use crate::config::schema::Settings;
use crate::error::ConfigError;

pub const ENV_LOG_LEVEL: &str = "ALPROJ_LOG_LEVEL";
pub const ENV_RECOVERY_DIR: &str = "ALPROJ_RECOVERY_DIR";
pub const ENV_MATCHING_TIMEOUT: &str = "ALPROJ_MATCHING_TIMEOUT_SECS";
pub const ENV_ESTIMATION_TIMEOUT: &str = "ALPROJ_ESTIMATION_TIMEOUT_SECS";
pub const ENV_EXPORT_TIMEOUT: &str = "ALPROJ_EXPORT_TIMEOUT_SECS";

/// Loads settings from a YAML (or JSON) file, then applies environment
/// overrides.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut settings = parse_settings(&content)?;
    settings.apply_env()?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Parses and validates settings without consulting the environment.
pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings = parse_settings(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

fn parse_timeout(name: &str, value: &str) -> Result<Option<u64>, ConfigError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") || value == "0" {
        return Ok(None);
    }
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|e| ConfigError::Validation {
            message: format!("{} must be a number of seconds or 'none': {}", name, e),
        })
}

impl Settings {
    /// Applies `ALPROJ_*` environment overrides.
    ///
    /// A timeout variable set to `0` or `none` disables that limit.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            debug!("Log level overridden from {}", ENV_LOG_LEVEL);
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var(ENV_RECOVERY_DIR) {
            if !dir.trim().is_empty() {
                self.recovery.directory = PathBuf::from(dir);
            }
        }
        if let Ok(value) = std::env::var(ENV_MATCHING_TIMEOUT) {
            self.jobs.matching_timeout_secs = parse_timeout(ENV_MATCHING_TIMEOUT, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_ESTIMATION_TIMEOUT) {
            self.jobs.estimation_timeout_secs = parse_timeout(ENV_ESTIMATION_TIMEOUT, &value)?;
        }
        if let Ok(value) = std::env::var(ENV_EXPORT_TIMEOUT) {
            self.jobs.export_timeout_secs = parse_timeout(ENV_EXPORT_TIMEOUT, &value)?;
        }
        Ok(())
    }
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    let timeouts = [
        ("jobs.matching_timeout_secs", settings.jobs.matching_timeout_secs),
        ("jobs.estimation_timeout_secs", settings.jobs.estimation_timeout_secs),
        ("jobs.export_timeout_secs", settings.jobs.export_timeout_secs),
    ];
    for (name, value) in timeouts {
        if value == Some(0) {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero (use null for no limit)", name),
            });
        }
    }

    if settings.progress.channel_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "progress.channel_capacity must be greater than zero".to_string(),
        });
    }

    let reconnect = &settings.reconnect;
    if reconnect.base_delay_ms == 0 {
        return Err(ConfigError::Validation {
            message: "reconnect.base_delay_ms must be greater than zero".to_string(),
        });
    }
    if reconnect.multiplier == 0 {
        return Err(ConfigError::Validation {
            message: "reconnect.multiplier must be at least 1".to_string(),
        });
    }
    if reconnect.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "reconnect.max_attempts must be at least 1".to_string(),
        });
    }
    if reconnect
        .max_delay_ms
        .is_some_and(|max| max < reconnect.base_delay_ms)
    {
        return Err(ConfigError::Validation {
            message: "reconnect.max_delay_ms must not be below reconnect.base_delay_ms"
                .to_string(),
        });
    }

    if settings.recovery.directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "recovery.directory must not be empty".to_string(),
        });
    }

    if settings.logging.level.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "logging.level must not be empty".to_string(),
        });
    }

    Ok(())
}
