//! Event system for songline
//!
//! Provides the pipeline event definitions and the EventBus used to fan them
//! out to SSE clients and any in-process listeners.

use crate::stage::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline job lifecycle events
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Job accepted and waiting for an execution slot
    JobQueued {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Job acquired an execution slot
    JobStarted {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Job entered a stage
    StageStarted {
        job_id: Uuid,
        stage: StageKind,
        timestamp: DateTime<Utc>,
    },

    /// Identify produced a fingerprint that is already persisted
    DuplicateDetected {
        job_id: Uuid,
        song_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Job finished with a result
    ///
    /// `song_id` is `None` for a metadata search that found nothing.
    JobCompleted {
        job_id: Uuid,
        song_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// Job reached the Failed state
    JobFailed {
        job_id: Uuid,
        stage: Option<StageKind>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event type name (used as the SSE `event:` field)
    pub fn event_type(&self) -> &str {
        match self {
            PipelineEvent::JobQueued { .. } => "JobQueued",
            PipelineEvent::JobStarted { .. } => "JobStarted",
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::DuplicateDetected { .. } => "DuplicateDetected",
            PipelineEvent::JobCompleted { .. } => "JobCompleted",
            PipelineEvent::JobFailed { .. } => "JobFailed",
        }
    }

    /// Job this event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            PipelineEvent::JobQueued { job_id, .. }
            | PipelineEvent::JobStarted { job_id, .. }
            | PipelineEvent::StageStarted { job_id, .. }
            | PipelineEvent::DuplicateDetected { job_id, .. }
            | PipelineEvent::JobCompleted { job_id, .. }
            | PipelineEvent::JobFailed { job_id, .. } => *job_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use songline_common::events::{EventBus, PipelineEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(PipelineEvent::JobQueued {
///     job_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let job_id = Uuid::new_v4();
        let event = PipelineEvent::StageStarted {
            job_id,
            stage: StageKind::Separate,
            timestamp: Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StageStarted");
        assert_eq!(json["stage"], "separate");
        assert_eq!(json["job_id"], job_id.to_string());
        assert_eq!(event.event_type(), "StageStarted");
        assert_eq!(event.job_id(), job_id);
    }

    #[test]
    fn test_emit_without_subscribers_is_dropped() {
        let bus = EventBus::new(10);
        bus.emit_lossy(PipelineEvent::JobQueued {
            job_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });

        // Late subscribers only see what comes after them
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        let job_id = Uuid::new_v4();
        bus.emit_lossy(PipelineEvent::JobStarted {
            job_id,
            timestamp: Utc::now(),
        });
        bus.emit_lossy(PipelineEvent::JobCompleted {
            job_id,
            song_id: None,
            timestamp: Utc::now(),
        });

        assert_eq!(rx.recv().await.unwrap().event_type(), "JobStarted");
        assert_eq!(rx.recv().await.unwrap().event_type(), "JobCompleted");
    }
}
