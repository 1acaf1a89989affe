//! Refresh work queue: JSON messages over in-process topics, consumed by a
//! bounded worker pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vtwiki_core::RefreshRequest;

use crate::synth::{SynthesisError, SynthesisOutcome, Synthesizer};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no subscriber for topic {0}")]
    UnknownTopic(String),
    #[error("topic {0} is closed")]
    Closed(String),
    #[error("encoding refresh request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn publish(&self, topic: &str, request: RefreshRequest) -> Result<(), QueueError>;
}

/// One bounded channel per subscribed topic. Dropping the queue closes
/// every topic, which lets [`consume`] drain and return.
#[derive(Debug)]
pub struct InProcessQueue {
    capacity: usize,
    senders: HashMap<String, mpsc::Sender<String>>,
}

impl InProcessQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: HashMap::new(),
        }
    }

    /// Replaces any earlier subscriber of `topic`.
    pub fn subscribe(&mut self, topic: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.senders.insert(topic.to_string(), tx);
        rx
    }
}

#[async_trait]
impl WorkQueue for InProcessQueue {
    async fn publish(&self, topic: &str, request: RefreshRequest) -> Result<(), QueueError> {
        let sender = self
            .senders
            .get(topic)
            .ok_or_else(|| QueueError::UnknownTopic(topic.to_string()))?;
        let message = serde_json::to_string(&request)?;
        sender
            .send(message)
            .await
            .map_err(|_| QueueError::Closed(topic.to_string()))
    }
}

#[async_trait]
pub trait RefreshHandler: Send + Sync {
    async fn handle(&self, request: RefreshRequest) -> Result<SynthesisOutcome, SynthesisError>;
}

pub struct ProfileRefreshHandler(pub Arc<Synthesizer>);

#[async_trait]
impl RefreshHandler for ProfileRefreshHandler {
    async fn handle(&self, request: RefreshRequest) -> Result<SynthesisOutcome, SynthesisError> {
        self.0.synthesize_profile(request.id, request.forced).await
    }
}

pub struct AgencyRefreshHandler(pub Arc<Synthesizer>);

#[async_trait]
impl RefreshHandler for AgencyRefreshHandler {
    async fn handle(&self, request: RefreshRequest) -> Result<SynthesisOutcome, SynthesisError> {
        self.0.refresh_agency(request.id, request.forced).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub malformed: usize,
}

impl ConsumeSummary {
    fn record(&mut self, result: Result<Result<SynthesisOutcome, SynthesisError>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(_)) => self.succeeded += 1,
            Ok(Err(err)) => {
                warn!(error = %err, "refresh failed");
                self.failed += 1;
            }
            Err(err) => {
                warn!(error = %err, "refresh task aborted");
                self.failed += 1;
            }
        }
    }
}

/// Handles messages from `rx` with at most `workers` in flight until the
/// topic closes. Failures are logged and counted; they never stop the loop.
pub async fn consume(
    topic: &str,
    mut rx: mpsc::Receiver<String>,
    workers: usize,
    handler: Arc<dyn RefreshHandler>,
) -> ConsumeSummary {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut summary = ConsumeSummary::default();

    while let Some(message) = rx.recv().await {
        let request: RefreshRequest = match serde_json::from_str(&message) {
            Ok(request) => request,
            Err(err) => {
                warn!(topic, error = %err, "dropping malformed refresh message");
                summary.malformed += 1;
                continue;
            }
        };
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        debug!(topic, id = request.id, forced = request.forced, "refresh dequeued");
        let handler = handler.clone();
        tasks.spawn(async move {
            let _permit = permit;
            handler.handle(request).await
        });
        while let Some(result) = tasks.try_join_next() {
            summary.record(result);
        }
    }

    while let Some(result) = tasks.join_next().await {
        summary.record(result);
    }
    info!(
        topic,
        succeeded = summary.succeeded,
        failed = summary.failed,
        malformed = summary.malformed,
        "topic drained"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;
    use vtwiki_adapters::AdapterError;
    use vtwiki_core::PROFILE_REFRESH_TOPIC;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<RefreshRequest>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RefreshHandler for RecordingHandler {
        async fn handle(&self, request: RefreshRequest) -> Result<SynthesisOutcome, SynthesisError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().await.push(request);
            if request.id == 13 {
                return Err(AdapterError::malformed("unlucky").into());
            }
            Ok(SynthesisOutcome::Persisted)
        }
    }

    #[tokio::test]
    async fn published_requests_reach_the_handler_as_json() {
        let mut queue = InProcessQueue::new(16);
        let rx = queue.subscribe(PROFILE_REFRESH_TOPIC);
        for id in [1, 2, 13] {
            queue
                .publish(PROFILE_REFRESH_TOPIC, RefreshRequest { id, forced: id == 2 })
                .await
                .unwrap();
        }
        drop(queue);

        let handler = Arc::new(RecordingHandler::default());
        let summary = consume(PROFILE_REFRESH_TOPIC, rx, 2, handler.clone()).await;

        assert_eq!(
            summary,
            ConsumeSummary {
                succeeded: 2,
                failed: 1,
                malformed: 0
            }
        );
        let mut seen = handler.seen.lock().await.clone();
        seen.sort_by_key(|request| request.id);
        assert_eq!(
            seen,
            vec![
                RefreshRequest { id: 1, forced: false },
                RefreshRequest { id: 2, forced: true },
                RefreshRequest { id: 13, forced: false },
            ]
        );
    }

    #[tokio::test]
    async fn malformed_messages_are_skipped_and_forced_defaults_off() {
        let (tx, rx) = mpsc::channel(4);
        tx.send("not json".to_string()).await.unwrap();
        tx.send(r#"{"id": 5}"#.to_string()).await.unwrap();
        drop(tx);

        let handler = Arc::new(RecordingHandler::default());
        let summary = consume("test", rx, 1, handler.clone()).await;

        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            handler.seen.lock().await.as_slice(),
            &[RefreshRequest { id: 5, forced: false }]
        );
    }

    #[tokio::test]
    async fn worker_count_bounds_concurrency() {
        let mut queue = InProcessQueue::new(32);
        let rx = queue.subscribe("bounded");
        for id in 0..12 {
            queue
                .publish("bounded", RefreshRequest { id, forced: true })
                .await
                .unwrap();
        }
        drop(queue);

        let handler = Arc::new(RecordingHandler::default());
        let summary = consume("bounded", rx, 3, handler.clone()).await;

        assert_eq!(summary.succeeded, 12);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn publishing_to_an_unknown_topic_fails() {
        let queue = InProcessQueue::new(1);
        let err = queue
            .publish("nowhere", RefreshRequest { id: 1, forced: false })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::UnknownTopic(topic) if topic == "nowhere"));
    }
}
