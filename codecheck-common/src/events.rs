//! Event types for the CodeCheck event system
//!
//! Provides the shared event definitions and the `EventBus` used to fan out
//! load progress to live subscribers (SSE clients, tests).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Code-load lifecycle events
///
/// Serialized with a `type` tag so SSE consumers can dispatch on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CodecheckEvent {
    /// A background load was accepted and its job created
    LoadStarted {
        job_id: Uuid,
        jurisdiction_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress checkpoint within a running load
    LoadProgress {
        job_id: Uuid,
        jurisdiction_id: String,
        /// Pipeline stage name (init, discovery, fetch, extraction, persistence)
        stage: String,
        /// Overall percentage, 0-100, never decreasing within one job
        percentage: u8,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Load finished and rules were committed
    LoadCompleted {
        job_id: Uuid,
        jurisdiction_id: String,
        rules_count: usize,
        /// Non-fatal degradations recorded during the run
        degradations: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Load ended without committing rules
    LoadFailed {
        job_id: Uuid,
        jurisdiction_id: String,
        error_message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl CodecheckEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            CodecheckEvent::LoadStarted { .. } => "LoadStarted",
            CodecheckEvent::LoadProgress { .. } => "LoadProgress",
            CodecheckEvent::LoadCompleted { .. } => "LoadCompleted",
            CodecheckEvent::LoadFailed { .. } => "LoadFailed",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            CodecheckEvent::LoadStarted { job_id, .. }
            | CodecheckEvent::LoadProgress { job_id, .. }
            | CodecheckEvent::LoadCompleted { job_id, .. }
            | CodecheckEvent::LoadFailed { job_id, .. } => *job_id,
        }
    }

    pub fn jurisdiction_id(&self) -> &str {
        match self {
            CodecheckEvent::LoadStarted { jurisdiction_id, .. }
            | CodecheckEvent::LoadProgress { jurisdiction_id, .. }
            | CodecheckEvent::LoadCompleted { jurisdiction_id, .. }
            | CodecheckEvent::LoadFailed { jurisdiction_id, .. } => jurisdiction_id,
        }
    }
}

/// Broadcast channel for `CodecheckEvent`s
///
/// Cloning shares the underlying channel. Slow subscribers lose the oldest
/// events once `capacity` is exceeded; the job row remains the durable record.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CodecheckEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use codecheck_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CodecheckEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CodecheckEvent,
    ) -> Result<usize, broadcast::error::SendError<CodecheckEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CodecheckEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(job_id: Uuid, percentage: u8) -> CodecheckEvent {
        CodecheckEvent::LoadProgress {
            job_id,
            jurisdiction_id: "denver-co".to_string(),
            stage: "fetch".to_string(),
            percentage,
            message: "Fetching".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert!(bus.emit(progress(Uuid::new_v4(), 10)).is_err());
        bus.emit_lossy(progress(Uuid::new_v4(), 10));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        assert_eq!(bus.emit(progress(job_id, 10)).unwrap(), 1);
        bus.emit_lossy(progress(job_id, 40));

        match rx.recv().await.unwrap() {
            CodecheckEvent::LoadProgress { percentage, .. } => assert_eq!(percentage, 10),
            other => panic!("unexpected event {:?}", other),
        }
        let second = rx.recv().await.unwrap();
        assert_eq!(second.job_id(), job_id);
        assert_eq!(second.jurisdiction_id(), "denver-co");
    }

    #[test]
    fn test_serialized_with_type_tag() {
        let event = CodecheckEvent::LoadFailed {
            job_id: Uuid::new_v4(),
            jurisdiction_id: "austin-tx".to_string(),
            error_message: "No usable sources".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "LoadFailed");
        assert_eq!(json["jurisdiction_id"], "austin-tx");
        assert_eq!(event.event_type(), "LoadFailed");
    }
}
