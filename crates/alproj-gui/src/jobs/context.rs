use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::jobs::job::{JobId, Termination, WorkError};
use crate::jobs::registry::Shared;
use crate::stage::Stage;

/// Handle given to a running unit of work.
///
/// Lets the work report progress and poll for cancellation at safe points.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    stage: Stage,
    token: CancellationToken,
    shared: Arc<Shared>,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, stage: Stage, token: CancellationToken, shared: Arc<Shared>) -> Self {
        Self {
            job_id,
            stage,
            token,
            shared,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Reports progress. Ignored once the job has reached a terminal state.
    pub fn report(&self, fraction: f64, step: &str, message: &str) {
        self.shared.record_progress(self.job_id, fraction, step, message);
    }

    /// Completes the job with `result` right away. Returns false if it has
    /// already reached a terminal state, e.g. through its time limit.
    ///
    /// Lets work commit side effects together with the terminal transition;
    /// the value it later returns is then ignored.
    pub(crate) fn complete(&self, result: serde_json::Value) -> bool {
        self.shared.finish(self.job_id, Termination::Completed(result))
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `Err(WorkError::Cancelled)` if cancellation was requested.
    ///
    /// Call this between steps of long-running work.
    pub fn checkpoint(&self) -> Result<(), WorkError> {
        if self.token.is_cancelled() {
            Err(WorkError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested. Useful with `tokio::select!`.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A child token for sub-tasks spawned by the work.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("stage", &self.stage)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
