//! Seam to the external georectification library.
//!
//! Matching, camera estimation and raster warping are opaque to the pipeline
//! core. A [`Georectifier`] implementation wraps the library and reports
//! progress through the [`JobContext`] it is handed.

pub mod options;

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::GeorectifyError;
use crate::jobs::{JobContext, JobFailure, WorkError};
use crate::stage::{Stage, StageOutput};

pub use options::{
    EstimateOptions, ExportOptions, MatchMethod, MatchOptions, Optimizer, StageOptions,
};

/// Everything the library needs to compute one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRequest {
    pub project_id: Uuid,
    pub stage: Stage,
    /// Outputs of every stage before `stage`.
    pub upstream: BTreeMap<Stage, StageOutput>,
    pub options: StageOptions,
}

impl StageRequest {
    pub fn upstream_output(&self, stage: Stage) -> Option<&StageOutput> {
        self.upstream.get(&stage)
    }
}

/// The georectification library.
#[async_trait]
pub trait Georectifier: Send + Sync {
    /// Finds corresponding points between the photograph and the simulated
    /// view.
    async fn match_images(
        &self,
        request: &StageRequest,
        ctx: &JobContext,
    ) -> Result<StageOutput, GeorectifyError>;

    /// Optimizes the camera parameters against the matched points.
    async fn estimate(
        &self,
        request: &StageRequest,
        ctx: &JobContext,
    ) -> Result<StageOutput, GeorectifyError>;

    /// Warps the photograph into a GeoTIFF.
    async fn export(
        &self,
        request: &StageRequest,
        ctx: &JobContext,
    ) -> Result<StageOutput, GeorectifyError>;
}

/// Calls the library operation that computes `request.stage`.
pub async fn run_stage(
    georectifier: &dyn Georectifier,
    request: &StageRequest,
    ctx: &JobContext,
) -> Result<StageOutput, GeorectifyError> {
    match request.stage {
        Stage::Matching => georectifier.match_images(request, ctx).await,
        Stage::Estimation => georectifier.estimate(request, ctx).await,
        Stage::Export => georectifier.export(request, ctx).await,
        stage => Err(GeorectifyError::InvalidInput(format!(
            "{} is not computed by the georectification library",
            stage
        ))),
    }
}

impl GeorectifyError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            GeorectifyError::InsufficientMatches { .. } => "insufficient_matches",
            GeorectifyError::NotConverged { .. } => "not_converged",
            GeorectifyError::InvalidInput(_) => "invalid_input",
            GeorectifyError::Io(_) => "io",
            GeorectifyError::Library(_) => "library",
            GeorectifyError::Cancelled => "cancelled",
        }
    }

    /// Structured failure recorded on the job.
    pub fn to_failure(&self) -> JobFailure {
        let failure = match self {
            GeorectifyError::InvalidInput(reason) => JobFailure::validation(reason.clone()),
            GeorectifyError::InsufficientMatches { found, required } => JobFailure::execution(
                self.code(),
                format!(
                    "Image matching found only {} corresponding points ({} required). \
                     Try adjusting the initial camera parameters or another matching method.",
                    found, required
                ),
            ),
            GeorectifyError::NotConverged { iterations } => JobFailure::execution(
                self.code(),
                format!(
                    "Camera estimation did not converge after {} iterations. \
                     Try more generations or better initial parameters.",
                    iterations
                ),
            ),
            GeorectifyError::Io(e) => {
                JobFailure::execution(self.code(), format!("File access failed: {}", e))
            }
            GeorectifyError::Library(_) => {
                JobFailure::execution(self.code(), "The georectification library reported an error")
            }
            GeorectifyError::Cancelled => JobFailure::internal("Cancelled"),
        };
        failure.with_detail(self.to_string())
    }
}

impl From<GeorectifyError> for WorkError {
    fn from(error: GeorectifyError) -> Self {
        match error {
            GeorectifyError::Cancelled => WorkError::Cancelled,
            other => WorkError::Failed(other.to_failure()),
        }
    }
}
