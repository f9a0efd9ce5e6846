//! Domain event system. Lets observers follow runs without coupling.
//!
//! Events are fire-and-forget notifications about run progress. Runs never
//! read from the bus, so attaching or dropping subscribers cannot change
//! what a run does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::result::RunStatus;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A Step Engine run started
    RunStarted {
        task_id: String,
        max_steps: u32,
        timestamp: DateTime<Utc>,
    },

    /// The Model Client answered (or failed) for one step
    ModelCalled {
        task_id: String,
        client: String,
        step: u32,
        attempt: u32,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was executed or refused
    ToolExecuted {
        task_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The Router picked a strategy
    StrategySelected {
        task_id: String,
        strategy: String,
        policy: String,
        timestamp: DateTime<Utc>,
    },

    /// A run reached its terminal status
    RunFinished {
        task_id: String,
        status: RunStatus,
        steps: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
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
