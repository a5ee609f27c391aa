//! The job record and its lifecycle transitions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

/// Opaque job identifier, assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Pending or running.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Completed, failed or cancelled.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad class of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad input discovered while the job was already running.
    Validation,
    /// The external library reported an error.
    Execution,
    /// The job exceeded its time budget.
    Timeout,
    /// The worker itself broke (panic, lost task).
    Internal,
}

/// Structured error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub kind: FailureKind,
    /// Machine-readable error code, e.g. `insufficient_matches`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Step that was running when the failure happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Raw error text for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, code: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.to_string(),
            message: message.into(),
            step: None,
            detail: None,
        }
    }

    pub fn execution(code: &str, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Execution, code, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, "invalid_input", message)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            "timeout",
            format!("Operation timed out after {}s", limit.as_secs()),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, "internal", message)
    }

    pub fn with_step(mut self, step: &str) -> Self {
        if !step.is_empty() {
            self.step = Some(step.to_string());
        }
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Error returned by a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkError {
    /// The work observed a cancellation request and stopped.
    Cancelled,
    Failed(JobFailure),
}

impl From<JobFailure> for WorkError {
    fn from(failure: JobFailure) -> Self {
        WorkError::Failed(failure)
    }
}

/// Result produced by a unit of work.
pub type WorkResult = Result<serde_json::Value, WorkError>;

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Completed(serde_json::Value),
    Failed(JobFailure),
    Cancelled,
}

impl Termination {
    pub fn status(&self) -> JobStatus {
        match self {
            Termination::Completed(_) => JobStatus::Completed,
            Termination::Failed(_) => JobStatus::Failed,
            Termination::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// One long-running unit of work tied to a wizard stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub stage: Stage,
    pub status: JobStatus,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub step: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Creates a pending job for `stage`.
    pub fn new(stage: Stage) -> Self {
        Self {
            id: JobId::new(),
            stage,
            status: JobStatus::Pending,
            progress: 0.0,
            step: stage.step_label().to_string(),
            message: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    /// Returns true if this job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves a pending job to running. Returns false otherwise.
    pub(crate) fn start(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Records a progress report and returns the effective fraction.
    ///
    /// Fractions are clamped to `[0, 1]` and never move backwards.
    pub(crate) fn record_progress(&mut self, fraction: f64, step: &str, message: &str) -> f64 {
        let fraction = if fraction.is_nan() {
            self.progress
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.progress = self.progress.max(fraction);
        self.step = step.to_string();
        self.message = message.to_string();
        self.progress
    }

    /// Applies the terminal transition. Returns false if the job had
    /// already finished, in which case nothing changes.
    pub(crate) fn finish(&mut self, termination: Termination) -> bool {
        if self.is_finished() {
            return false;
        }
        self.status = termination.status();
        match termination {
            Termination::Completed(result) => {
                self.progress = 1.0;
                self.result = Some(result);
            }
            Termination::Failed(failure) => {
                self.error = Some(failure);
            }
            Termination::Cancelled => {}
        }
        self.completed_at = Some(Utc::now());
        true
    }
}
