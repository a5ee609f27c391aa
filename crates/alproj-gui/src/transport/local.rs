use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::broadcast::{JobMessage, JobProgressBroadcaster};
use crate::error::TransportError;
use crate::jobs::{JobId, JobRegistry};
use crate::transport::client::{MessageStream, ProgressTransport};

/// In-process transport backed by the registry and the broadcaster.
///
/// This is what a desktop command layer hands to the front end.
#[derive(Clone)]
pub struct LocalTransport {
    registry: JobRegistry,
    broadcaster: JobProgressBroadcaster,
}

impl LocalTransport {
    pub fn new(registry: JobRegistry, broadcaster: JobProgressBroadcaster) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }
}

#[async_trait]
impl ProgressTransport for LocalTransport {
    async fn connect(&self, job_id: JobId) -> Result<MessageStream, TransportError> {
        if let Some(subscription) = self.broadcaster.subscribe_job(job_id) {
            return Ok(subscription.into_messages().map(Ok).boxed());
        }
        // Channel already dropped: serve the final state once.
        let job = self
            .registry
            .status(job_id)
            .ok_or(TransportError::JobNotFound(job_id))?;
        Ok(stream::once(async move { Ok(JobMessage::from(&job)) }).boxed())
    }

    async fn fetch_status(&self, job_id: JobId) -> Result<JobMessage, TransportError> {
        self.registry
            .status(job_id)
            .map(|job| JobMessage::from(&job))
            .ok_or(TransportError::JobNotFound(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BroadcastProgress, JobOptions, JobStatus, ProgressReporter};
    use crate::stage::Stage;
    use crate::transport::{ProgressClient, ReconnectPolicy};
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_follow_local_job() {
        let registry = JobRegistry::new();
        let broadcaster = JobProgressBroadcaster::default();
        let reporter: Arc<dyn ProgressReporter> =
            Arc::new(BroadcastProgress::new(broadcaster.clone()));
        let gate = CancellationToken::new();
        let release = gate.clone();

        let handle = registry
            .submit(Stage::Matching, JobOptions::default(), reporter, move |ctx| async move {
                release.cancelled().await;
                ctx.report(0.5, "matching", "extracting features");
                Ok(json!({ "matches": 120 }))
            })
            .unwrap();

        let client = ProgressClient::new(
            LocalTransport::new(registry.clone(), broadcaster.clone()),
            ReconnectPolicy::default(),
        );
        let follow = client.follow(handle.id(), {
            let gate = gate.clone();
            let mut seen = 0;
            move |_message: &JobMessage| {
                seen += 1;
                if seen == 1 {
                    gate.cancel();
                }
            }
        });

        let last = follow.await.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
        assert_eq!(last.result, Some(json!({ "matches": 120 })));
    }

    #[tokio::test]
    async fn test_forgotten_channel_serves_final_state() {
        let registry = JobRegistry::new();
        let broadcaster = JobProgressBroadcaster::default();
        let reporter: Arc<dyn ProgressReporter> =
            Arc::new(BroadcastProgress::new(broadcaster.clone()));
        let mut handle = registry
            .submit(Stage::Export, JobOptions::default(), reporter, |_ctx| async move {
                Ok(json!({ "path": "/out/photo.tif" }))
            })
            .unwrap();
        handle.wait().await.unwrap();
        broadcaster.forget(handle.id());

        let transport = LocalTransport::new(registry, broadcaster);
        let messages: Vec<_> = transport.connect(handle.id()).await.unwrap().collect().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].as_ref().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let transport = LocalTransport::new(JobRegistry::new(), JobProgressBroadcaster::default());
        let job_id = JobId::new();
        assert!(matches!(
            transport.connect(job_id).await,
            Err(TransportError::JobNotFound(id)) if id == job_id
        ));
        assert_eq!(
            transport.fetch_status(job_id).await,
            Err(TransportError::JobNotFound(job_id))
        );
    }
}
