//! Domain events published while turns run.
//!
//! The runtime publishes on an [`EventBus`]; the gateway streams them to
//! operators and tests subscribe to assert on engine behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A turn was accepted for a conversation
    TurnStarted {
        conversation_id: String,
        files: usize,
        timestamp: DateTime<Utc>,
    },

    /// The router picked a branch
    RouteSelected {
        conversation_id: String,
        route: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        conversation_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An analysis replaced the conversation's report
    ReportStored {
        conversation_id: String,
        source_files: usize,
        timestamp: DateTime<Utc>,
    },

    /// The turn reached the terminal stage and its state was committed
    TurnCompleted {
        conversation_id: String,
        steps: usize,
        tool_rounds: usize,
        timestamp: DateTime<Utc>,
    },

    /// The turn failed; nothing was committed
    TurnFailed {
        conversation_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// SSE event name for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStarted { .. } => "turn_started",
            Self::RouteSelected { .. } => "route_selected",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::ReportStored { .. } => "report_stored",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::TurnFailed { .. } => "turn_failed",
        }
    }
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
