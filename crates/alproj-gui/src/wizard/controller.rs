use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use serde_json::Value;

use crate::broadcast::{JobEvent, JobProgressBroadcaster, JobProgressEvent};
use crate::config::{JobsConfig, Settings};
use crate::error::{JobError, WizardError};
use crate::georectify::{self, Georectifier, StageOptions, StageRequest};
use crate::jobs::{
    BroadcastProgress, Job, JobContext, JobFailure, JobHandle, JobId, JobOptions, JobRegistry,
    ProgressReporter, WorkError, WorkResult,
};
use crate::project::{ProjectState, ProjectStatus, ProjectStore};
use crate::recovery::RecoveryStore;
use crate::stage::{Invalidation, Stage, StageOutput, StageSet};
use crate::transport::LocalTransport;
use crate::wizard::outcome::{StageOutcome, WizardSnapshot};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Wizard state lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Forwards job events to the broadcaster and keeps the project status in
/// step with the job's terminal state.
///
/// Runs under the registry's job table lock, so it only touches the status
/// slot, which is never held while taking another lock.
struct WizardReporter {
    broadcast: BroadcastProgress,
    status: Arc<Mutex<ProjectStatus>>,
}

impl ProgressReporter for WizardReporter {
    fn opened(&self, job: &Job) {
        self.broadcast.opened(job);
    }

    fn closed(&self, job_id: JobId) {
        self.broadcast.closed(job_id);
    }

    fn report(&self, event: &JobProgressEvent) {
        self.broadcast.report(event);

        let status = match &event.event {
            JobEvent::Progress { .. } => return,
            JobEvent::Completed { .. } if event.stage == Stage::Export => {
                ProjectStatus::Completed
            }
            JobEvent::Completed { .. } | JobEvent::Cancelled => ProjectStatus::Draft,
            JobEvent::Failed { .. } => ProjectStatus::Error,
        };
        *lock(&self.status) = status;
    }
}

struct Inner {
    project: Mutex<ProjectState>,
    status: Arc<Mutex<ProjectStatus>>,
    registry: JobRegistry,
    broadcaster: JobProgressBroadcaster,
    recovery: RecoveryStore,
    georectifier: Arc<dyn Georectifier>,
    jobs: JobsConfig,
}

impl Inner {
    fn project(&self) -> ProjectState {
        let mut project = lock(&self.project).clone();
        project.status = *lock(&self.status);
        project
    }

    fn ensure_idle(&self) -> Result<(), WizardError> {
        match self.registry.active() {
            Some(job) => Err(WizardError::JobActive { job_id: job.id }),
            None => Ok(()),
        }
    }

    /// Completes the stage job and stores its output as one step.
    ///
    /// The job's terminal transition happens under the project lock, so a
    /// job that timed out or was cancelled first never touches the project,
    /// and a completed job always has its output stored.
    fn record_output(
        &self,
        ctx: &JobContext,
        stage: Stage,
        output: StageOutput,
    ) -> Result<(), WorkError> {
        let mut project = lock(&self.project);
        let stages = project.stages.mark_completed(stage, output.clone()).map_err(|e| {
            WorkError::Failed(
                JobFailure::internal("Stage result could not be stored").with_detail(e.to_string()),
            )
        })?;
        if !ctx.complete(output) {
            info!(
                "Discarding {} result of job {}: it already finished",
                stage,
                ctx.job_id()
            );
            return Err(WorkError::Cancelled);
        }
        project.stages = stages;
        project.touch();
        Ok(())
    }
}

async fn execute_stage(inner: Arc<Inner>, request: StageRequest, ctx: JobContext) -> WorkResult {
    let output = georectify::run_stage(inner.georectifier.as_ref(), &request, &ctx).await?;
    ctx.checkpoint()?;
    inner.record_output(&ctx, request.stage, output.clone())?;
    Ok(output)
}

/// Drives the five-stage wizard for one project.
///
/// Owns the project's [`StageSet`]; every other component sees clones.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WizardController {
    inner: Arc<Inner>,
}

impl WizardController {
    /// Creates a controller with its own job registry and progress channel.
    pub fn new(
        project: ProjectState,
        georectifier: Arc<dyn Georectifier>,
        recovery: RecoveryStore,
        settings: &Settings,
    ) -> Self {
        Self::from_parts(
            project,
            georectifier,
            recovery,
            JobRegistry::new(),
            JobProgressBroadcaster::new(settings.progress.channel_capacity),
            settings.jobs.clone(),
        )
    }

    pub fn from_parts(
        project: ProjectState,
        georectifier: Arc<dyn Georectifier>,
        recovery: RecoveryStore,
        registry: JobRegistry,
        broadcaster: JobProgressBroadcaster,
        jobs: JobsConfig,
    ) -> Self {
        // A restored project is never mid-job.
        let status = match project.status {
            ProjectStatus::Processing => ProjectStatus::Draft,
            other => other,
        };
        Self {
            inner: Arc::new(Inner {
                project: Mutex::new(project),
                status: Arc::new(Mutex::new(status)),
                registry,
                broadcaster,
                recovery,
                georectifier,
                jobs,
            }),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.inner.broadcaster
    }

    pub fn recovery(&self) -> &RecoveryStore {
        &self.inner.recovery
    }

    /// Transport a front end can follow jobs through.
    pub fn transport(&self) -> LocalTransport {
        LocalTransport::new(self.inner.registry.clone(), self.inner.broadcaster.clone())
    }

    /// Current project state.
    pub fn project(&self) -> ProjectState {
        self.inner.project()
    }

    pub fn stages(&self) -> StageSet {
        lock(&self.inner.project).stages.clone()
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        let project = self.inner.project();
        let next_stage = project.stages.first_pending();
        WizardSnapshot {
            project,
            active_job: self.inner.registry.active(),
            next_stage,
        }
    }

    /// Stores the input data selection and invalidates every later stage.
    pub fn set_inputs(&self, inputs: StageOutput) -> Result<StageSet, WizardError> {
        self.edit(Stage::Input, inputs, Invalidation::InputsChanged)
    }

    /// Stores the initial camera parameters and invalidates every later stage.
    pub fn set_camera_params(&self, params: StageOutput) -> Result<StageSet, WizardError> {
        self.edit(Stage::CameraSetup, params, Invalidation::CameraParamsChanged)
    }

    fn edit(
        &self,
        stage: Stage,
        output: StageOutput,
        invalidation: Invalidation,
    ) -> Result<StageSet, WizardError> {
        if output.is_null() {
            return Err(WizardError::validation(stage.step_label(), "must not be empty"));
        }

        let mut project = lock(&self.inner.project);
        self.inner.ensure_idle()?;

        let stages = project.stages.mark_completed(stage, output)?.apply(invalidation);
        project.stages = stages.clone();
        project.touch();
        *lock(&self.inner.status) = ProjectStatus::Draft;

        info!("{} updated for project {}", stage, project.id);
        Ok(stages)
    }

    /// Starts the job that (re)computes `stage`.
    ///
    /// Validation happens synchronously and never creates a job. Once
    /// admitted, the pre-processing state is written to the recovery store,
    /// every later stage is invalidated, and the job is submitted. The
    /// previous result of `stage` itself stays until the job replaces it.
    pub fn run_stage(&self, stage: Stage, options: StageOptions) -> Result<JobHandle, WizardError> {
        if !stage.runs_as_job() {
            return Err(WizardError::NotRunnable(stage));
        }
        if options.stage() != stage {
            return Err(WizardError::OptionsMismatch {
                expected: options.stage(),
                actual: stage,
            });
        }
        options.validate()?;

        let mut project = lock(&self.inner.project);
        project.stages.ensure_upstream_completed(stage)?;
        self.inner.ensure_idle()?;

        let mut before = project.clone();
        before.status = *lock(&self.inner.status);
        self.inner.recovery.snapshot(&before)?;

        project.stages = project.stages.apply(Invalidation::Rerun(stage));
        project.touch();

        let upstream: BTreeMap<Stage, Value> = stage
            .upstream()
            .iter()
            .filter_map(|s| project.stages.output(*s).map(|o| (*s, o.clone())))
            .collect();
        let request = StageRequest {
            project_id: project.id,
            stage,
            upstream,
            options,
        };

        let previous_status = std::mem::replace(&mut *lock(&self.inner.status), ProjectStatus::Processing);
        let reporter: Arc<dyn ProgressReporter> = Arc::new(WizardReporter {
            broadcast: BroadcastProgress::new(self.inner.broadcaster.clone()),
            status: Arc::clone(&self.inner.status),
        });
        let inner = Arc::clone(&self.inner);
        let submitted = self.inner.registry.submit(
            stage,
            JobOptions::with_timeout(self.inner.jobs.timeout_for(stage)),
            reporter,
            move |ctx| execute_stage(inner, request, ctx),
        );

        match submitted {
            Ok(handle) => {
                info!("{} started for project {} as job {}", stage, project.id, handle.id());
                Ok(handle)
            }
            Err(e) => {
                *lock(&self.inner.status) = previous_status;
                Err(e.into())
            }
        }
    }

    /// Requests cancellation of the active job. Returns `None` when idle.
    pub fn cancel(&self) -> Result<Option<Job>, WizardError> {
        let Some(active) = self.inner.registry.active() else {
            return Ok(None);
        };
        match self.inner.registry.cancel(active.id) {
            Ok(job) => Ok(Some(job)),
            // Finished between the two calls.
            Err(JobError::NotCancellable { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.inner.registry.status(job_id)
    }

    pub fn outcome(&self, job_id: JobId) -> Option<StageOutcome> {
        self.job(job_id).map(|job| StageOutcome::from_job(&job))
    }

    /// Normal save path: writes the project and removes its recovery file.
    pub fn save(&self, store: &dyn ProjectStore) -> Result<PathBuf, WizardError> {
        self.inner.ensure_idle()?;
        let project = self.inner.project();
        let path = store.save(&project)?;
        self.inner.recovery.discard_project(project.id);
        Ok(path)
    }

    /// Drops finished jobs past the configured retention, along with their
    /// progress channels.
    pub fn cleanup_finished_jobs(&self) -> usize {
        self.inner.registry.cleanup_finished(self.inner.jobs.retention())
    }
}
