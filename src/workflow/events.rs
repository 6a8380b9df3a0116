//! Streaming progress events.
//!
//! Each assessment gets one event channel. Sends are lossy: a subscriber
//! that has gone away never blocks or fails the workflow.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::review::ReviewType;

/// Progress event streamed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The workflow started.
    WorkflowStart {
        /// First stage name.
        stage: String,
    },
    /// A workflow node completed.
    Stage {
        /// Pipeline stage grouping.
        stage: String,
        /// Node within the stage.
        node: String,
    },
    /// A human review gates further progress. The payload is enough to
    /// fetch the report out-of-band.
    ReviewRequired {
        /// Which review.
        review_type: ReviewType,
        /// Assessment to fetch.
        assessment_id: String,
    },
    /// The report is available.
    Report {
        /// Assessment the report belongs to.
        assessment_id: String,
    },
    /// The workflow finished.
    WorkflowComplete,
    /// Synchronous validation rejected the submission.
    ValidationError {
        /// Guidance payload.
        data: serde_json::Value,
    },
    /// The workflow hit a surfaced error.
    Error {
        /// Human-readable message.
        message: String,
    },
}

/// Lossy event publisher for one assessment.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl EventSink {
    /// A sink wired to a subscriber channel.
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything (no subscriber).
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Emit an event. Errors (receiver gone) are ignored.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event.clone()).is_err() {
                debug!(?event, "Event dropped, subscriber gone");
            }
        }
    }

    /// Shorthand for a stage/node event.
    pub fn stage(&self, stage: &str, node: &str) {
        self.emit(ProgressEvent::Stage {
            stage: stage.to_string(),
            node: node.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = ProgressEvent::Stage {
            stage: "retrieval".to_string(),
            node: "merge_results".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"stage\""));
        assert!(json.contains("\"node\":\"merge_results\""));
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.emit(ProgressEvent::WorkflowStart {
            stage: "ingestion".to_string(),
        });
        sink.stage("council", "stage1");
        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressEvent::WorkflowStart { .. }
        ));
        assert!(matches!(rx.recv().await.unwrap(), ProgressEvent::Stage { .. }));
    }

    #[test]
    fn test_disconnected_sink_never_panics() {
        let sink = EventSink::disconnected();
        sink.emit(ProgressEvent::WorkflowComplete);
        sink.stage("a", "b");
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_tolerated() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        drop(rx);
        sink.emit(ProgressEvent::WorkflowComplete);
    }
}
