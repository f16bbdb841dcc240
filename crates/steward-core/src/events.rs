//! Execution lifecycle event broadcasting.
//!
//! The coordinator publishes one event when an execution starts and one when
//! it reaches its terminal state. Interfaces subscribe to surface progress
//! to the operator (the WebSocket feed, a status line, ...); the engine never
//! waits on subscribers, and events are dropped when nobody listens.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity. Slow subscribers past this lag and miss events.
const DEFAULT_CAPACITY: usize = 256;

/// Lifecycle event for one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// An invocation entered the Running state.
    Started { user_id: i64, mutating: bool },
    /// An invocation reached its terminal state.
    Finished {
        user_id: i64,
        outcome: String,
        execution_time_ms: u64,
    },
}

/// Broadcast bus for execution lifecycle events.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Returns the number of subscribers
    /// that received it; 0 when nobody is listening.
    pub fn emit(&self, event: ExecutionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::new();
        let count = bus.emit(ExecutionEvent::Started {
            user_id: 1,
            mutating: false,
        });
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ExecutionEvent::Started {
            user_id: 1,
            mutating: true,
        });
        bus.emit(ExecutionEvent::Finished {
            user_id: 1,
            outcome: "completed".to_string(),
            execution_time_ms: 42,
        });

        match rx.recv().await.unwrap() {
            ExecutionEvent::Started { user_id, mutating } => {
                assert_eq!(user_id, 1);
                assert!(mutating);
            }
            other => panic!("expected Started, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ExecutionEvent::Finished { outcome, .. } => assert_eq!(outcome, "completed"),
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = ExecutionEvent::Finished {
            user_id: 3,
            outcome: "timeout".to_string(),
            execution_time_ms: 1000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"finished\""));
        assert!(json.contains("\"outcome\":\"timeout\""));
    }
}
