use crate::broadcast::job_progress::{JobMessage, JobProgressBroadcaster, JobProgressEvent};
use crate::jobs::job::{Job, JobId};

/// Receives the events of a job as the registry publishes them.
///
/// Calls happen while the registry holds its job table lock so that events
/// for one job are delivered in order. Implementations must not call back
/// into the registry.
pub trait ProgressReporter: Send + Sync {
    /// Called once when the job is admitted, before any event.
    fn opened(&self, _job: &Job) {}

    fn report(&self, event: &JobProgressEvent);

    /// Called once when a finished job is removed from the registry.
    fn closed(&self, _job_id: JobId) {}
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: &JobProgressEvent) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(&JobProgressEvent) + Send + Sync,
{
    fn report(&self, event: &JobProgressEvent) {
        self(event)
    }
}

/// Bridges registry events into a [`JobProgressBroadcaster`].
#[derive(Clone)]
pub struct BroadcastProgress {
    broadcaster: JobProgressBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: JobProgressBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn opened(&self, job: &Job) {
        self.broadcaster
            .open(job.id, job.stage, JobMessage::from(job));
    }

    fn report(&self, event: &JobProgressEvent) {
        self.broadcaster.send(event.clone());
    }

    fn closed(&self, job_id: JobId) {
        self.broadcaster.forget(job_id);
    }
}
