use std::path::PathBuf;
use thiserror::Error;

use crate::jobs::{JobId, JobStatus};
use crate::stage::Stage;

#[derive(Error, Debug)]
pub enum AlprojError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Wizard error: {0}")]
    Wizard(#[from] WizardError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Project error: {0}")]
    Project(#[from] ProjectError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job {job_id} is already running")]
    AlreadyRunning { job_id: JobId },

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {job_id} cannot be cancelled in status '{status}'")]
    NotCancellable { job_id: JobId, status: JobStatus },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("{stage} requires {missing} to be completed first")]
    UpstreamIncomplete { stage: Stage, missing: Stage },
}

#[derive(Error, Debug)]
pub enum WizardError {
    #[error("Invalid value for '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("{0} is edited directly and does not run as a job")]
    NotRunnable(Stage),

    #[error("Options for {expected} were supplied to {actual}")]
    OptionsMismatch { expected: Stage, actual: Stage },

    #[error("Job {job_id} is still active; wait for it or cancel it first")]
    JobActive { job_id: JobId },

    #[error("Could not write recovery snapshot: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Could not save project: {0}")]
    Project(#[from] ProjectError),
}

impl WizardError {
    pub(crate) fn validation(field: &str, reason: impl Into<String>) -> Self {
        WizardError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Failed to create recovery directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list recovery directory '{path}': {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write recovery file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read recovery file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize recovery state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Recovery file not found: {0}")]
    NotFound(PathBuf),

    #[error("Recovery file '{path}' is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Failed to create project directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write project file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read project file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse project file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize project: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid project name: {0}")]
    InvalidName(String),

    #[error("Project file '{path}' has inconsistent stages: {source}")]
    InconsistentStages {
        path: PathBuf,
        #[source]
        source: StageError,
    },
}

/// Errors reported by the georectification library.
#[derive(Error, Debug)]
pub enum GeorectifyError {
    #[error("Image matching failed: {found} corresponding points found, at least {required} required")]
    InsufficientMatches { found: usize, required: usize },

    #[error("Camera parameter estimation did not converge after {iterations} iterations")]
    NotConverged { iterations: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Georectification library error: {0}")]
    Library(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Connection dropped: {0}")]
    Disconnected(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Gave up after {attempts} reconnect attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

pub type Result<T> = std::result::Result<T, AlprojError>;
