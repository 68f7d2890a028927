//! Execution Event Schema Definition
//!
//! This module defines the canonical ExecutionEvent enum and envelope wrapper
//! for versioned execution tracing, replay, and monitoring.
//!
//! Events travel over an injected channel; the run emits them best-effort and
//! never fails because a sink went away.
//!
//! # Schema Version
//!
//! The schema version is used to ensure compatibility between trace recording
//! and replay systems. Versions are integers starting from 1.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use trellis_kernel::unit::WorkValue;

/// Current schema version for execution events
pub const SCHEMA_VERSION: u32 = 1;

/// Canonical execution event types for workflow execution tracing
///
/// This enum defines the closed vocabulary of events a run can emit. Per-node
/// ordering follows the node state machine; events of different nodes
/// interleave freely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ExecutionEvent {
    /// Workflow execution started
    WorkflowStarted {
        workflow_id: String,
        execution_id: String,
        workflow_name: String,
        started_at: u64, // Unix timestamp in milliseconds
    },

    /// Workflow execution completed
    WorkflowCompleted {
        workflow_id: String,
        execution_id: String,
        final_output: Option<WorkValue>,
        total_duration_ms: u64,
    },

    /// Workflow execution failed
    WorkflowFailed {
        workflow_id: String,
        execution_id: String,
        error: String,
        total_duration_ms: u64,
    },

    /// Overall run deadline elapsed; in-flight nodes drained, nothing new dispatched
    WorkflowTimeout {
        workflow_id: String,
        execution_id: String,
        timeout_ms: u64,
        total_duration_ms: u64,
    },

    /// Run cancelled by the caller
    WorkflowCancelled {
        workflow_id: String,
        execution_id: String,
        total_duration_ms: u64,
    },

    /// Node became ready and waits for a permit
    NodeQueued { node_id: String },

    /// Node execution started
    NodeStarted { node_id: String, node_name: String },

    /// Node execution completed
    NodeCompleted {
        node_id: String,
        output: Option<WorkValue>,
        duration_ms: u64,
    },

    /// Node execution failed after exhausting its retry policy
    NodeFailed {
        node_id: String,
        error: String,
        attempts: u32,
        duration_ms: u64,
    },

    /// Retry attempt for a node
    NodeRetrying {
        node_id: String,
        attempt: u32,
        max_attempts: u32,
        last_error: Option<String>,
    },

    /// Node skipped because a predecessor failed or was skipped
    NodeSkipped { node_id: String, reason: String },

    /// Several predecessor outputs merged into one node input
    BranchMerged {
        node_id: String,
        merged_from: Vec<String>,
    },
}

impl ExecutionEvent {
    /// The node this event concerns, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeQueued { node_id }
            | Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeRetrying { node_id, .. }
            | Self::NodeSkipped { node_id, .. }
            | Self::BranchMerged { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Whether this event ends the whole run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
                | Self::WorkflowTimeout { .. }
                | Self::WorkflowCancelled { .. }
        )
    }
}

/// Envelope wrapper for execution events with schema version
///
/// Events persisted outside the process should be wrapped in this envelope so
/// a reader can check the schema before interpreting the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionEventEnvelope {
    /// Schema version for this event
    pub schema_version: u32,

    /// The wrapped execution event
    pub event: ExecutionEvent,
}

impl ExecutionEventEnvelope {
    /// Create a new envelope with the current schema version
    pub fn new(event: ExecutionEvent) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            event,
        }
    }

    /// Validate that the schema version is compatible
    ///
    /// Returns true if the version matches the current schema version.
    /// In the future, this may support forward compatibility.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}

/// Create an event channel whose receiving half is a `futures` Stream
///
/// The sender is what `WorkflowExecutor::with_event_sender` expects.
pub fn event_channel(
    capacity: usize,
) -> (mpsc::Sender<ExecutionEvent>, ReceiverStream<ExecutionEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_serialize_deserialize_consistency() {
        let event = ExecutionEvent::WorkflowStarted {
            workflow_id: "wf-123".to_string(),
            execution_id: "exec-1".to_string(),
            workflow_name: "test_workflow".to_string(),
            started_at: 1700000000000,
        };

        let envelope = ExecutionEventEnvelope::new(event.clone());

        let serialized = serde_json::to_string(&envelope).unwrap();
        let deserialized: ExecutionEventEnvelope = serde_json::from_str(&serialized).unwrap();

        assert_eq!(envelope, deserialized);
    }

    #[test]
    fn test_schema_version_stored_correctly() {
        let event = ExecutionEvent::NodeCompleted {
            node_id: "node-1".to_string(),
            output: Some(WorkValue::from("ok")),
            duration_ms: 150,
        };

        let envelope = ExecutionEventEnvelope::new(event);

        let serialized = serde_json::to_string(&envelope).unwrap();
        let json: serde_json::Value = serde_json::from_str(&serialized).unwrap();

        assert_eq!(json["schema_version"], SCHEMA_VERSION);
        assert_eq!(json["event"]["type"], "NodeCompleted");
        assert_eq!(json["event"]["data"]["output"], "ok");
    }

    #[test]
    fn test_is_compatible_returns_true_for_current_version() {
        let envelope = ExecutionEventEnvelope::new(ExecutionEvent::NodeQueued {
            node_id: "n".to_string(),
        });
        assert!(envelope.is_compatible());

        let stale = ExecutionEventEnvelope {
            schema_version: SCHEMA_VERSION + 1,
            event: ExecutionEvent::NodeQueued {
                node_id: "n".to_string(),
            },
        };
        assert!(!stale.is_compatible());
    }

    #[test]
    fn test_event_variants_serialize_correctly() {
        let events = vec![
            ExecutionEvent::NodeStarted {
                node_id: "node-1".to_string(),
                node_name: "process".to_string(),
            },
            ExecutionEvent::NodeFailed {
                node_id: "node-1".to_string(),
                error: "boom".to_string(),
                attempts: 3,
                duration_ms: 12,
            },
            ExecutionEvent::NodeSkipped {
                node_id: "node-2".to_string(),
                reason: "predecessor 'node-1' failed".to_string(),
            },
            ExecutionEvent::BranchMerged {
                node_id: "join".to_string(),
                merged_from: vec!["a".to_string(), "b".to_string()],
            },
            ExecutionEvent::WorkflowTimeout {
                workflow_id: "wf-1".to_string(),
                execution_id: "exec-1".to_string(),
                timeout_ms: 1000,
                total_duration_ms: 1003,
            },
            ExecutionEvent::WorkflowCancelled {
                workflow_id: "wf-1".to_string(),
                execution_id: "exec-1".to_string(),
                total_duration_ms: 40,
            },
        ];

        for event in events {
            let envelope = ExecutionEventEnvelope::new(event);
            let serialized = serde_json::to_string(&envelope).unwrap();
            let deserialized: ExecutionEventEnvelope = serde_json::from_str(&serialized).unwrap();
            assert_eq!(envelope, deserialized);
        }
    }

    #[test]
    fn test_node_retrying_serialization() {
        let event = ExecutionEvent::NodeRetrying {
            node_id: "node-1".to_string(),
            attempt: 2,
            max_attempts: 3,
            last_error: Some("Connection timeout".to_string()),
        };

        let envelope = ExecutionEventEnvelope::new(event);
        let serialized = serde_json::to_string(&envelope).unwrap();
        let deserialized: ExecutionEventEnvelope = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_event_helpers() {
        let queued = ExecutionEvent::NodeQueued {
            node_id: "a".to_string(),
        };
        assert_eq!(queued.node_id(), Some("a"));
        assert!(!queued.is_terminal());

        let done = ExecutionEvent::WorkflowCompleted {
            workflow_id: "wf".to_string(),
            execution_id: "exec-1".to_string(),
            final_output: None,
            total_duration_ms: 5,
        };
        assert_eq!(done.node_id(), None);
        assert!(done.is_terminal());
    }

    #[tokio::test]
    async fn test_event_channel_streams_in_order() {
        let (tx, mut stream) = event_channel(16);

        tx.send(ExecutionEvent::NodeQueued {
            node_id: "a".to_string(),
        })
        .await
        .unwrap();
        tx.send(ExecutionEvent::NodeStarted {
            node_id: "a".to_string(),
            node_name: "A".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        assert!(matches!(
            stream.next().await,
            Some(ExecutionEvent::NodeQueued { .. })
        ));
        assert!(matches!(
            stream.next().await,
            Some(ExecutionEvent::NodeStarted { .. })
        ));
        assert!(stream.next().await.is_none());
    }
}
