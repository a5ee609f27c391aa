pub mod broadcast;
pub mod config;
pub mod error;
pub mod georectify;
pub mod jobs;
pub mod logging;
pub mod project;
pub mod recovery;
pub mod sanitize;
pub mod stage;
pub mod storage;
pub mod transport;
pub mod wizard;

pub use broadcast::{JobEvent, JobMessage, JobProgressBroadcaster, JobProgressEvent, JobSubscription};
pub use config::{load_settings, Settings};
pub use error::{
    AlprojError, ConfigError, GeorectifyError, JobError, ProjectError, RecoveryError, Result,
    StageError, TransportError, WizardError,
};
pub use georectify::{Georectifier, StageOptions, StageRequest};
pub use jobs::{Job, JobContext, JobFailure, JobHandle, JobId, JobRegistry, JobStatus};
pub use logging::init_logging;
pub use project::{JsonProjectStore, ProjectState, ProjectStatus, ProjectStore};
pub use recovery::{RecoveryCandidate, RecoveryFile, RecoveryStore};
pub use stage::{Invalidation, Stage, StageOutput, StageSet, StageState};
pub use transport::{LocalTransport, ProgressClient, ProgressTransport, ReconnectPolicy};
pub use wizard::{StageOutcome, WizardController, WizardSnapshot};
