//! Bounded event stream between a pipeline run and its consumer

use super::models::{BatchPhase, BatchSummary, RunSummary, SkillResult};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Progress update for one batch or split sub-batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_index: usize,
    pub label: String,
    pub phase: BatchPhase,
}

/// Everything a run reports, serialized as `{"type": ..., "content": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum PipelineEvent {
    SkillResult(SkillResult),
    Status(BatchStatus),
    BatchCompleted(BatchSummary),
    ServiceDegraded { service: String, reason: String },
    /// Always the last event of a run
    Complete(RunSummary),
}

impl PipelineEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// The consumer dropped the stream
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("event stream closed by consumer")]
pub struct EventStreamClosed;

/// Create a bounded channel; a full buffer makes `publish` wait
pub fn channel(buffer: usize) -> (EventPublisher, EventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EventPublisher { tx }, EventStream { rx })
}

/// Producer side, cloned into every worker
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventPublisher {
    /// Publish an event, waiting for buffer space. Never drops.
    pub async fn publish(&self, event: PipelineEvent) -> Result<(), EventStreamClosed> {
        self.tx.send(event).await.map_err(|_| EventStreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a run's events
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<PipelineEvent>,
}

impl EventStream {
    /// Next event, or `None` once the sentinel has been delivered and the run has ended
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }

    /// Adapt into a `futures::Stream`
    pub fn into_stream(self) -> impl Stream<Item = PipelineEvent> {
        stream::unfold(self, |mut events| async move {
            events.next().await.map(|event| (event, events))
        })
    }

    /// Drain every remaining event
    pub async fn collect(mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GenerationStrategy;
    use futures::StreamExt;

    fn result(index: usize) -> PipelineEvent {
        PipelineEvent::SkillResult(SkillResult::success(
            index,
            format!("skill-{}", index),
            vec!["Q".to_string()],
            GenerationStrategy::ContextFree,
        ))
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (publisher, stream) = channel(4);
        tokio::spawn(async move {
            for i in 0..3 {
                publisher.publish(result(i)).await.unwrap();
            }
        });

        let events = stream.collect().await;
        assert_eq!(events, vec![result(0), result(1), result(2)]);
    }

    #[tokio::test]
    async fn test_full_buffer_applies_backpressure() {
        let (publisher, mut stream) = channel(1);
        publisher.publish(result(0)).await.unwrap();

        let pending = publisher.publish(result(1));
        tokio::pin!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());

        assert_eq!(stream.next().await, Some(result(0)));
        pending.await.unwrap();
        assert_eq!(stream.next().await, Some(result(1)));
    }

    #[tokio::test]
    async fn test_publish_fails_after_consumer_drops() {
        let (publisher, stream) = channel(2);
        drop(stream);
        assert_eq!(publisher.publish(result(0)).await, Err(EventStreamClosed));
        assert!(publisher.is_closed());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (publisher, stream) = channel(4);
        publisher.publish(result(7)).await.unwrap();
        drop(publisher);

        let events: Vec<_> = stream.into_stream().collect().await;
        assert_eq!(events, vec![result(7)]);
    }

    #[test]
    fn test_event_envelope() {
        let json = serde_json::to_value(result(1)).unwrap();
        assert_eq!(json["type"], "skill_result");
        assert_eq!(json["content"]["skill"], "skill-1");

        let degraded = PipelineEvent::ServiceDegraded {
            service: "generation".to_string(),
            reason: "quota".to_string(),
        };
        let json = serde_json::to_value(&degraded).unwrap();
        assert_eq!(json["type"], "service_degraded");
        assert_eq!(json["content"]["service"], "generation");

        let status = PipelineEvent::Status(BatchStatus {
            batch_index: 2,
            label: "Batch 2/3".to_string(),
            phase: BatchPhase::Splitting { sub_batches: 2 },
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["content"]["phase"]["splitting"]["sub_batches"], 2);
    }
}
