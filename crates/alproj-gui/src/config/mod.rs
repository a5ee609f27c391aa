pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from_str};
pub use schema::{
    default_recovery_directory, JobsConfig, LoggingConfig, ProgressConfig, ReconnectConfig,
    RecoveryConfig, Settings,
};
