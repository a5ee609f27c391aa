//! Job progress broadcaster for real-time job status streaming.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::{Job, JobFailure, JobId, JobStatus};
use crate::stage::{Stage, StageOutput};

/// One event in a job's ordered stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        fraction: f64,
        step: String,
        message: String,
    },
    Completed {
        result: StageOutput,
    },
    Failed {
        error: JobFailure,
    },
    Cancelled,
}

impl JobEvent {
    /// Completed, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress { .. })
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: JobId,
    pub stage: Stage,
    pub event: JobEvent,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn new(job_id: JobId, stage: Stage, event: JobEvent) -> Self {
        Self {
            job_id,
            stage,
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Message pushed to a progress client.
///
/// The same shape is returned by the pull query, so a client can treat both
/// sources alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub status: JobStatus,
    pub progress: f64,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StageOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobMessage {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Folds an event into this message.
    pub fn apply(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Progress {
                fraction,
                step,
                message,
            } => {
                self.status = JobStatus::Running;
                self.progress = self.progress.max(*fraction);
                self.step = step.clone();
                self.message = (!message.is_empty()).then(|| message.clone());
            }
            JobEvent::Completed { result } => {
                self.status = JobStatus::Completed;
                self.progress = 1.0;
                self.result = Some(result.clone());
                self.error = None;
            }
            JobEvent::Failed { error } => {
                self.status = JobStatus::Failed;
                self.error = Some(error.message.clone());
                if let Some(step) = &error.step {
                    self.step = step.clone();
                }
            }
            JobEvent::Cancelled => {
                self.status = JobStatus::Cancelled;
                self.message = Some("Cancelled".to_string());
            }
        }
    }
}

impl From<&Job> for JobMessage {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            progress: job.progress,
            step: job.step.clone(),
            message: (!job.message.is_empty()).then(|| job.message.clone()),
            result: job.result.clone(),
            error: job.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

struct JobChannel {
    stage: Stage,
    sender: broadcast::Sender<JobProgressEvent>,
    snapshot: JobMessage,
}

fn lock_channels(
    channels: &Mutex<HashMap<JobId, JobChannel>>,
) -> MutexGuard<'_, HashMap<JobId, JobChannel>> {
    match channels.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Progress channel lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Broadcasts job progress events for streaming.
///
/// Keeps one ordered channel per job plus a global channel carrying every
/// event, and the current-state snapshot of each job.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
    channels: Arc<Mutex<HashMap<JobId, JobChannel>>>,
    capacity: usize,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Registers a job's channel with an initial snapshot. Emits nothing.
    pub fn open(&self, job_id: JobId, stage: Stage, snapshot: JobMessage) {
        let (sender, _) = broadcast::channel(self.capacity);
        lock_channels(&self.channels).insert(
            job_id,
            JobChannel {
                stage,
                sender,
                snapshot,
            },
        );
    }

    /// Sends a progress event to the job's subscribers and the global stream.
    ///
    /// Progress fractions are clamped to `[0, 1]` and never go below what
    /// the job already reported. Returns false if the job is unknown or
    /// already finished, in which case nothing is sent.
    pub fn send(&self, mut event: JobProgressEvent) -> bool {
        let mut channels = lock_channels(&self.channels);
        let Some(channel) = channels.get_mut(&event.job_id) else {
            return false;
        };
        if channel.snapshot.is_terminal() {
            return false;
        }
        if let JobEvent::Progress { fraction, .. } = &mut event.event {
            let reported = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
            *fraction = reported.max(channel.snapshot.progress);
        }
        channel.snapshot.apply(&event.event);
        // No receivers is fine
        let _ = channel.sender.send(event.clone());
        let _ = self.sender.send(event);
        true
    }

    /// Publishes `event` for `job_id`, stamped now.
    pub fn publish(&self, job_id: JobId, event: JobEvent) -> bool {
        let stage = match lock_channels(&self.channels).get(&job_id) {
            Some(channel) => channel.stage,
            None => return false,
        };
        self.send(JobProgressEvent::new(job_id, stage, event))
    }

    /// Creates a new subscriber for the events of every job.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Subscribes to one job: its current snapshot plus all later events.
    pub fn subscribe_job(&self, job_id: JobId) -> Option<JobSubscription> {
        let channels = lock_channels(&self.channels);
        let channel = channels.get(&job_id)?;
        let receiver = (!channel.snapshot.is_terminal()).then(|| channel.sender.subscribe());
        Some(JobSubscription {
            job_id,
            snapshot: channel.snapshot.clone(),
            receiver,
        })
    }

    /// Current state of a job as seen by the channel.
    pub fn snapshot(&self, job_id: JobId) -> Option<JobMessage> {
        lock_channels(&self.channels)
            .get(&job_id)
            .map(|channel| channel.snapshot.clone())
    }

    pub fn is_finished(&self, job_id: JobId) -> bool {
        self.snapshot(job_id).is_some_and(|s| s.is_terminal())
    }

    /// Drops a job's channel. Live subscribers see the stream end.
    pub fn forget(&self, job_id: JobId) -> bool {
        lock_channels(&self.channels).remove(&job_id).is_some()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// A subscription to one job's events.
pub struct JobSubscription {
    job_id: JobId,
    snapshot: JobMessage,
    receiver: Option<broadcast::Receiver<JobProgressEvent>>,
}

impl JobSubscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// State of the job at the moment of subscribing.
    pub fn snapshot(&self) -> &JobMessage {
        &self.snapshot
    }

    /// Next event, or `None` once the stream has ended.
    ///
    /// The stream ends after a terminal event or when the channel is dropped.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if event.event.is_terminal() {
                        self.receiver = None;
                    }
                    return Some(event.event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Progress subscriber for job {} lagged, skipped {} events",
                        self.job_id, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Turns the subscription into the push-protocol message stream.
    ///
    /// Yields the snapshot first, then one message per event, and ends after
    /// a terminal message.
    pub fn into_messages(self) -> impl Stream<Item = JobMessage> + Send + 'static {
        let first = self.snapshot.clone();
        let rest = stream::unfold(
            (self, first.clone()),
            |(mut subscription, mut current)| async move {
                let event = subscription.next_event().await?;
                current.apply(&event);
                Some((current.clone(), (subscription, current)))
            },
        );
        stream::once(async move { first }).chain(rest)
    }
}
