//! Job registry enforcing a single active long-running job.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::broadcast::job_progress::{JobEvent, JobProgressEvent};
use crate::error::JobError;
use crate::jobs::context::JobContext;
use crate::jobs::job::{Job, JobFailure, JobId, Termination, WorkError, WorkResult};
use crate::jobs::progress::ProgressReporter;
use crate::stage::Stage;

/// Per-submission options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Maximum run time. `None` means no limit.
    pub timeout: Option<Duration>,
}

impl JobOptions {
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

struct JobEntry {
    job: Job,
    token: CancellationToken,
    reporter: Arc<dyn ProgressReporter>,
    done: watch::Sender<Option<Job>>,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Job registry slot lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// State shared between the registry, job contexts and worker tasks.
pub(crate) struct Shared {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    /// The current job slot. Holding this lock serializes admission.
    active: Mutex<Option<JobId>>,
}

impl Shared {
    fn get(&self, job_id: JobId) -> Option<Job> {
        read_lock(&self.jobs).get(&job_id).map(|entry| entry.job.clone())
    }

    fn start(&self, job_id: JobId) -> bool {
        let mut jobs = write_lock(&self.jobs);
        match jobs.get_mut(&job_id) {
            Some(entry) => entry.job.start(),
            None => false,
        }
    }

    fn request_cancel(&self, job_id: JobId) {
        if let Some(entry) = read_lock(&self.jobs).get(&job_id) {
            entry.token.cancel();
        }
    }

    pub(crate) fn record_progress(&self, job_id: JobId, fraction: f64, step: &str, message: &str) {
        let mut jobs = write_lock(&self.jobs);
        let Some(entry) = jobs.get_mut(&job_id) else {
            return;
        };
        if entry.job.is_finished() {
            debug!("Ignoring progress for finished job {}", job_id);
            return;
        }
        let fraction = entry.job.record_progress(fraction, step, message);
        let event = JobProgressEvent::new(
            job_id,
            entry.job.stage,
            JobEvent::Progress {
                fraction,
                step: step.to_string(),
                message: message.to_string(),
            },
        );
        entry.reporter.report(&event);
    }

    /// Applies the terminal transition of a job. Returns false if the job
    /// is unknown or already finished, in which case nothing happens.
    pub(crate) fn finish(&self, job_id: JobId, termination: Termination) -> bool {
        {
            let mut jobs = write_lock(&self.jobs);
            let Some(entry) = jobs.get_mut(&job_id) else {
                warn!("Finished job {} is no longer registered", job_id);
                return false;
            };
            if !entry.job.finish(termination) {
                return false;
            }

            let event = match entry.job.status {
                crate::jobs::JobStatus::Completed => JobEvent::Completed {
                    result: entry.job.result.clone().unwrap_or(serde_json::Value::Null),
                },
                crate::jobs::JobStatus::Failed => JobEvent::Failed {
                    error: entry
                        .job
                        .error
                        .clone()
                        .unwrap_or_else(|| JobFailure::internal("Job failed without an error")),
                },
                _ => JobEvent::Cancelled,
            };

            match &event {
                JobEvent::Failed { error } => {
                    error!("Job {} ({}) failed: {}", job_id, entry.job.stage, error)
                }
                JobEvent::Cancelled => info!("Job {} ({}) cancelled", job_id, entry.job.stage),
                _ => info!("Job {} ({}) completed", job_id, entry.job.stage),
            }

            entry
                .reporter
                .report(&JobProgressEvent::new(job_id, entry.job.stage, event));
            entry.done.send_replace(Some(entry.job.clone()));
        }

        let mut active = lock(&self.active);
        if *active == Some(job_id) {
            *active = None;
        }
        true
    }
}

/// Handle returned by [`JobRegistry::submit`].
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    done: watch::Receiver<Option<Job>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Waits for the job to reach a terminal state and returns it.
    ///
    /// Returns `None` only if the registry was dropped before the job
    /// finished.
    pub async fn wait(&mut self) -> Option<Job> {
        match self.done.wait_for(Option::is_some).await {
            Ok(job) => (*job).clone(),
            Err(_) => None,
        }
    }
}

/// Owns the lifecycle of at most one active job at a time.
#[derive(Clone)]
pub struct JobRegistry {
    shared: Arc<Shared>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                jobs: RwLock::new(HashMap::new()),
                active: Mutex::new(None),
            }),
        }
    }

    /// Submits `work` for background execution and returns immediately.
    ///
    /// Fails with [`JobError::AlreadyRunning`] if another job is pending or
    /// running; no job is created in that case. Must be called from within a
    /// tokio runtime.
    pub fn submit<F, Fut>(
        &self,
        stage: Stage,
        options: JobOptions,
        reporter: Arc<dyn ProgressReporter>,
        work: F,
    ) -> Result<JobHandle, JobError>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        let mut active = lock(&self.shared.active);
        if let Some(current) = *active {
            if self
                .shared
                .get(current)
                .is_some_and(|job| job.status.is_active())
            {
                return Err(JobError::AlreadyRunning { job_id: current });
            }
        }

        let job = Job::new(stage);
        let job_id = job.id;
        let token = CancellationToken::new();
        let (done, done_rx) = watch::channel(None);

        reporter.opened(&job);
        write_lock(&self.shared.jobs).insert(
            job_id,
            JobEntry {
                job,
                token: token.clone(),
                reporter,
                done,
            },
        );
        *active = Some(job_id);
        drop(active);

        info!("Job {} submitted for {}", job_id, stage);

        let ctx = JobContext::new(job_id, stage, token, Arc::clone(&self.shared));
        let shared = Arc::clone(&self.shared);
        let span = tracing::info_span!("job", job_id = %job_id, stage = stage.step_label());
        tokio::spawn(run_job(shared, ctx, options, work).instrument(span));

        Ok(JobHandle {
            id: job_id,
            done: done_rx,
        })
    }

    /// Point-in-time copy of a job.
    pub fn status(&self, job_id: JobId) -> Option<Job> {
        self.shared.get(job_id)
    }

    /// The pending or running job, if any.
    pub fn active(&self) -> Option<Job> {
        let active = *lock(&self.shared.active);
        active
            .and_then(|id| self.shared.get(id))
            .filter(|job| job.status.is_active())
    }

    /// All known jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = read_lock(&self.shared.jobs)
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Requests cooperative cancellation of a pending or running job.
    pub fn cancel(&self, job_id: JobId) -> Result<Job, JobError> {
        let jobs = read_lock(&self.shared.jobs);
        let entry = jobs.get(&job_id).ok_or(JobError::NotFound(job_id))?;
        if !entry.job.status.is_active() {
            return Err(JobError::NotCancellable {
                job_id,
                status: entry.job.status,
            });
        }
        entry.token.cancel();
        info!("Job {} cancellation requested", job_id);
        Ok(entry.job.clone())
    }

    /// Removes a finished job. Active jobs are never removed.
    ///
    /// The job's reporter is told through [`ProgressReporter::closed`].
    pub fn clear(&self, job_id: JobId) -> Option<Job> {
        let mut jobs = write_lock(&self.shared.jobs);
        if !jobs.get(&job_id).is_some_and(|entry| entry.job.is_finished()) {
            return None;
        }
        let entry = jobs.remove(&job_id)?;
        entry.reporter.closed(job_id);
        Some(entry.job)
    }

    /// Removes finished jobs that completed more than `max_age` ago.
    /// Returns the number of removed jobs.
    pub fn cleanup_finished(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut jobs = write_lock(&self.shared.jobs);
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|entry| {
                entry
                    .job
                    .completed_at
                    .is_some_and(|done| now - done >= max_age)
            })
            .map(|entry| entry.job.id)
            .collect();
        for id in &expired {
            if let Some(entry) = jobs.remove(id) {
                entry.reporter.closed(*id);
            }
        }
        if !expired.is_empty() {
            info!("Cleaned up {} finished jobs", expired.len());
        }
        expired.len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_job<F, Fut>(shared: Arc<Shared>, ctx: JobContext, options: JobOptions, work: F)
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    let job_id = ctx.job_id();

    if ctx.is_cancelled() {
        shared.finish(job_id, Termination::Cancelled);
        return;
    }
    if !shared.start(job_id) {
        return;
    }
    debug!("Job {} started", job_id);

    let mut task = tokio::spawn(work(ctx));

    let joined = match options.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                shared.request_cancel(job_id);
                task.abort();
                let step = shared.get(job_id).map(|job| job.step).unwrap_or_default();
                warn!("Job {} exceeded its {}s time limit", job_id, limit.as_secs());
                shared.finish(
                    job_id,
                    Termination::Failed(JobFailure::timeout(limit).with_step(&step)),
                );
                return;
            }
        },
        None => task.await,
    };

    let termination = match joined {
        Ok(Ok(result)) => Termination::Completed(result),
        Ok(Err(WorkError::Cancelled)) => Termination::Cancelled,
        Ok(Err(WorkError::Failed(failure))) => Termination::Failed(failure),
        Err(e) if e.is_cancelled() => Termination::Cancelled,
        Err(e) => {
            let step = shared.get(job_id).map(|job| job.step).unwrap_or_default();
            Termination::Failed(
                JobFailure::internal("The job worker stopped unexpectedly")
                    .with_step(&step)
                    .with_detail(e.to_string()),
            )
        }
    };
    shared.finish(job_id, termination);
}
