use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Time limits per long-running operation, in seconds. `null` disables the
/// limit for that operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_matching_timeout")]
    pub matching_timeout_secs: Option<u64>,
    #[serde(default = "default_estimation_timeout")]
    pub estimation_timeout_secs: Option<u64>,
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: Option<u64>,
    /// How long finished jobs stay queryable.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

fn default_matching_timeout() -> Option<u64> {
    Some(20 * 60)
}

fn default_estimation_timeout() -> Option<u64> {
    Some(10 * 60)
}

fn default_export_timeout() -> Option<u64> {
    Some(20 * 60)
}

fn default_retention() -> u64 {
    3600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            matching_timeout_secs: default_matching_timeout(),
            estimation_timeout_secs: default_estimation_timeout(),
            export_timeout_secs: default_export_timeout(),
            retention_secs: default_retention(),
        }
    }
}

impl JobsConfig {
    /// Time limit for the job that computes `stage`.
    pub fn timeout_for(&self, stage: Stage) -> Option<Duration> {
        let secs = match stage {
            Stage::Matching => self.matching_timeout_secs,
            Stage::Estimation => self.estimation_timeout_secs,
            Stage::Export => self.export_timeout_secs,
            Stage::Input | Stage::CameraSetup => None,
        };
        secs.map(Duration::from_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Buffered events per channel before slow subscribers start lagging.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    100
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            max_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_recovery_directory")]
    pub directory: PathBuf,
    /// Recovery files older than this are removed at startup.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
}

/// `~/.alproj/recovery`, or a directory under the system temp dir when no
/// home directory is known.
pub fn default_recovery_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".alproj")
        .join("recovery")
}

fn default_max_age_days() -> u64 {
    7
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            directory: default_recovery_directory(),
            max_age_days: default_max_age_days(),
        }
    }
}

impl RecoveryConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `alproj_gui=debug`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
