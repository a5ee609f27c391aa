use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, info, warn};

use crate::broadcast::JobMessage;
use crate::error::TransportError;
use crate::jobs::JobId;
use crate::transport::reconnect::ReconnectPolicy;

/// Stream of pushed messages for one job.
pub type MessageStream = BoxStream<'static, Result<JobMessage, TransportError>>;

/// How a client reaches the job backend.
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    /// Opens the push stream for a job. The first message is the job's
    /// current state.
    async fn connect(&self, job_id: JobId) -> Result<MessageStream, TransportError>;

    /// Pull query for the job's current state.
    async fn fetch_status(&self, job_id: JobId) -> Result<JobMessage, TransportError>;
}

/// Follows one job to completion over an unreliable transport.
pub struct ProgressClient<T> {
    transport: T,
    policy: ReconnectPolicy,
}

impl<T: ProgressTransport> ProgressClient<T> {
    pub fn new(transport: T, policy: ReconnectPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Forwards every received message to `on_message` and returns the
    /// terminal one.
    ///
    /// When the connection cannot be opened or drops, the client waits
    /// according to the policy, pulls the job status (returning it if the job
    /// already finished) and reconnects. The attempt counter resets whenever a
    /// message arrives. Once the policy is exhausted the last error is
    /// returned; no status is ever made up.
    pub async fn follow<F>(
        &self,
        job_id: JobId,
        mut on_message: F,
    ) -> Result<JobMessage, TransportError>
    where
        F: FnMut(&JobMessage) + Send,
    {
        let mut attempt: u32 = 0;
        let mut last_error = String::new();
        let mut stream = match self.transport.connect(job_id).await {
            Ok(stream) => Some(stream),
            Err(TransportError::JobNotFound(id)) => return Err(TransportError::JobNotFound(id)),
            Err(e) => {
                warn!("Progress connection for job {} failed: {}", job_id, e);
                last_error = e.to_string();
                None
            }
        };

        loop {
            if let Some(live) = stream.as_mut() {
                match live.next().await {
                    Some(Ok(message)) => {
                        attempt = 0;
                        on_message(&message);
                        if message.is_terminal() {
                            return Ok(message);
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!("Progress stream for job {} dropped: {}", job_id, e);
                        last_error = e.to_string();
                    }
                    None => {
                        warn!("Progress stream for job {} ended before completion", job_id);
                        last_error = "stream ended before a terminal status".to_string();
                    }
                }
                stream = None;
            }

            if self.policy.exhausted(attempt) {
                info!(
                    "Giving up on job {} after {} reconnect attempts",
                    job_id, attempt
                );
                return Err(TransportError::RetriesExhausted {
                    attempts: attempt,
                    last_error,
                });
            }
            attempt += 1;
            let delay = self.policy.delay(attempt);
            debug!(
                "Reconnecting to job {} in {:?} (attempt {}/{})",
                job_id, delay, attempt, self.policy.max_attempts
            );
            tokio::time::sleep(delay).await;

            match self.transport.fetch_status(job_id).await {
                Ok(message) if message.is_terminal() => {
                    on_message(&message);
                    return Ok(message);
                }
                Ok(_) => {}
                Err(TransportError::JobNotFound(id)) => {
                    return Err(TransportError::JobNotFound(id))
                }
                Err(e) => {
                    warn!("Status query for job {} failed: {}", job_id, e);
                    last_error = e.to_string();
                    continue;
                }
            }

            match self.transport.connect(job_id).await {
                Ok(live) => stream = Some(live),
                Err(TransportError::JobNotFound(id)) => {
                    return Err(TransportError::JobNotFound(id))
                }
                Err(e) => {
                    warn!("Progress connection for job {} failed: {}", job_id, e);
                    last_error = e.to_string();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    fn message(status: JobStatus, progress: f64) -> JobMessage {
        JobMessage {
            status,
            progress,
            step: "estimation".to_string(),
            message: None,
            result: None,
            error: None,
        }
    }

    /// Scripted transport: each `connect` pops the next script entry.
    struct Scripted {
        connects: Mutex<VecDeque<Result<Vec<Result<JobMessage, TransportError>>, TransportError>>>,
        statuses: Mutex<VecDeque<Result<JobMessage, TransportError>>>,
        calls: Arc<Mutex<Vec<(&'static str, Duration)>>>,
        started: Instant,
    }

    impl Scripted {
        fn new(
            connects: Vec<Result<Vec<Result<JobMessage, TransportError>>, TransportError>>,
            statuses: Vec<Result<JobMessage, TransportError>>,
        ) -> Self {
            Self {
                connects: Mutex::new(connects.into()),
                statuses: Mutex::new(statuses.into()),
                calls: Arc::new(Mutex::new(Vec::new())),
                started: Instant::now(),
            }
        }

        fn record(&self, call: &'static str) {
            self.calls
                .lock()
                .unwrap()
                .push((call, self.started.elapsed()));
        }

        fn fetch_times(&self) -> Vec<u64> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(call, _)| *call == "fetch")
                .map(|(_, at)| at.as_secs())
                .collect()
        }
    }

    fn refused() -> TransportError {
        TransportError::Connect("connection refused".to_string())
    }

    #[async_trait]
    impl ProgressTransport for Scripted {
        async fn connect(&self, _job_id: JobId) -> Result<MessageStream, TransportError> {
            self.record("connect");
            let next = self.connects.lock().unwrap().pop_front();
            match next {
                Some(Ok(messages)) => Ok(stream::iter(messages).boxed()),
                Some(Err(e)) => Err(e),
                None => Err(refused()),
            }
        }

        async fn fetch_status(&self, _job_id: JobId) -> Result<JobMessage, TransportError> {
            self.record("fetch");
            let next = self.statuses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(refused()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_forwards_every_message() {
        let transport = Scripted::new(
            vec![Ok(vec![
                Ok(message(JobStatus::Pending, 0.0)),
                Ok(message(JobStatus::Running, 0.5)),
                Ok(message(JobStatus::Completed, 1.0)),
            ])],
            vec![],
        );
        let client = ProgressClient::new(transport, ReconnectPolicy::default());

        let mut seen = Vec::new();
        let last = client
            .follow(JobId::new(), |m| seen.push(m.status))
            .await
            .unwrap();

        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(
            seen,
            vec![JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
        );
        assert!(client.transport().fetch_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_backoff_schedule() {
        let transport = Scripted::new(vec![], vec![]);
        let client = ProgressClient::new(transport, ReconnectPolicy::default());

        let mut seen = 0;
        let err = client
            .follow(JobId::new(), |_| seen += 1)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            TransportError::RetriesExhausted {
                attempts: 5,
                last_error: refused().to_string(),
            }
        );
        assert_eq!(seen, 0);
        // Waits of 1, 2, 4, 8 and 16 seconds between attempts.
        assert_eq!(client.transport().fetch_times(), vec![1, 3, 7, 15, 31]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_returns_terminal_status_after_drop() {
        let transport = Scripted::new(
            vec![Ok(vec![
                Ok(message(JobStatus::Running, 0.3)),
                Err(TransportError::Disconnected("reset by peer".to_string())),
            ])],
            vec![Ok(message(JobStatus::Failed, 0.3))],
        );
        let client = ProgressClient::new(transport, ReconnectPolicy::default());

        let mut seen = Vec::new();
        let last = client
            .follow(JobId::new(), |m| seen.push(m.status))
            .await
            .unwrap();

        assert_eq!(last.status, JobStatus::Failed);
        assert_eq!(seen, vec![JobStatus::Running, JobStatus::Failed]);
        assert_eq!(client.transport().fetch_times(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_and_resets_attempts() {
        let transport = Scripted::new(
            vec![
                Err(refused()),
                Err(refused()),
                Ok(vec![Ok(message(JobStatus::Running, 0.6))]),
                Ok(vec![Ok(message(JobStatus::Completed, 1.0))]),
            ],
            vec![
                Ok(message(JobStatus::Running, 0.5)),
                Ok(message(JobStatus::Running, 0.6)),
                Ok(message(JobStatus::Running, 0.6)),
            ],
        );
        let client = ProgressClient::new(transport, ReconnectPolicy::default());

        let last = client.follow(JobId::new(), |_| {}).await.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
        // initial connect fails; attempt 1 at +1s fails; attempt 2 at +2s
        // succeeds and resets; after the drop attempt 1 again waits 1s.
        assert_eq!(client.transport().fetch_times(), vec![1, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_job_is_not_retried() {
        let job_id = JobId::new();
        let transport = Scripted::new(vec![Err(TransportError::JobNotFound(job_id))], vec![]);
        let client = ProgressClient::new(transport, ReconnectPolicy::default());

        let err = client.follow(job_id, |_| {}).await.unwrap_err();
        assert_eq!(err, TransportError::JobNotFound(job_id));
        assert!(client.transport().fetch_times().is_empty());
    }
}
