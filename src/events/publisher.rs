//! # Lifecycle Event Publisher
//!
//! Broadcasts engine lifecycle events to any number of subscribers. Events
//! published while nobody is subscribed are dropped.
//!
//! ```rust
//! use deployment_engine::constants::events;
//! use deployment_engine::events::EventPublisher;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut rx = publisher.subscribe();
//!
//! assert_eq!(publisher.publish(events::ENGINE_FINISHED, json!({"steps": 2})), 1);
//! assert_eq!(rx.recv().await.unwrap().name, events::ENGINE_FINISHED);
//! # });
//! ```

use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::constants::events;
use crate::error::EngineError;
use crate::models::Execution;
use crate::state_machine::Transition;

/// Broadcast publisher for engine lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event with the given name and context.
    ///
    /// Returns the number of subscribers reached. Having no subscribers is
    /// not an error.
    pub fn publish(&self, event_name: impl Into<String>, context: Value) -> usize {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        self.sender.send(event).unwrap_or(0)
    }

    /// Publish the event matching an execution's transition.
    ///
    /// A failed attempt carries its classified error so subscribers can tell
    /// executor failures, undecodable payloads and timeouts apart.
    pub fn publish_transition(
        &self,
        step_name: &str,
        execution: &Execution,
        transition: &Transition,
        failure: Option<&EngineError>,
    ) -> usize {
        let name = match transition.to {
            crate::state_machine::ExecutionStatus::Succeeded => events::STEP_COMPLETED,
            crate::state_machine::ExecutionStatus::Retrying => events::STEP_RETRY_SCHEDULED,
            status if status.is_terminal() => events::STEP_FAILED,
            _ => events::EXECUTION_RECONCILED,
        };
        let mut context = json!({
            "step": step_name,
            "execution_id": execution.id,
            "from": transition.from,
            "to": transition.to,
            "event": transition.event,
            "error": execution.error,
            "code": execution.code,
        });
        if let Some(failure) = failure {
            context["failure"] = json!({
                "kind": failure.kind(),
                "message": failure.to_string(),
                "recoverable": failure.is_recoverable(),
            });
        }
        self.publish(name, context)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
