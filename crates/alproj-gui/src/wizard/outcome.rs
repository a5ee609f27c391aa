use serde::{Deserialize, Serialize};

use crate::jobs::{FailureKind, Job, JobFailure, JobStatus};
use crate::project::ProjectState;
use crate::stage::{Stage, StageOutput};

/// What the front end shows for a stage job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageOutcome {
    Pending,
    Running {
        progress: f64,
        step: String,
    },
    Completed {
        output: StageOutput,
    },
    /// One readable summary plus the raw failure for diagnostics.
    Failed {
        summary: String,
        error: JobFailure,
    },
    Cancelled {
        summary: String,
    },
}

impl StageOutcome {
    pub fn from_job(job: &Job) -> Self {
        match job.status {
            JobStatus::Pending => StageOutcome::Pending,
            JobStatus::Running => StageOutcome::Running {
                progress: job.progress,
                step: job.step.clone(),
            },
            JobStatus::Completed => StageOutcome::Completed {
                output: job.result.clone().unwrap_or(serde_json::Value::Null),
            },
            JobStatus::Failed => {
                let error = job
                    .error
                    .clone()
                    .unwrap_or_else(|| JobFailure::internal("Unknown error"));
                StageOutcome::Failed {
                    summary: failure_summary(job.stage, &error),
                    error,
                }
            }
            JobStatus::Cancelled => StageOutcome::Cancelled {
                summary: format!("{} was cancelled", job.stage),
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, StageOutcome::Pending | StageOutcome::Running { .. })
    }
}

fn failure_summary(stage: Stage, error: &JobFailure) -> String {
    match error.kind {
        FailureKind::Timeout => format!("{} took too long: {}", stage, error.message),
        FailureKind::Validation => format!("{} could not start: {}", stage, error.message),
        FailureKind::Internal => format!("{} stopped unexpectedly: {}", stage, error.message),
        FailureKind::Execution => format!("{} failed: {}", stage, error.message),
    }
}

/// Read-only view of the wizard handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardSnapshot {
    pub project: ProjectState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_job: Option<Job>,
    /// First stage still to be completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<Stage>,
}
