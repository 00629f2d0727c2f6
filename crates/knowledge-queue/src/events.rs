//! Events broadcast by the queue manager.

use serde::Serialize;
use uuid::Uuid;

/// Event emitted by the queue manager and item processor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    /// Background polling started.
    QueueStarted,
    /// Background polling stopped.
    QueueStopped,
    /// A scheduler run acquired a base.
    RunStarted { base_id: Uuid },
    /// A scheduler run released a base.
    RunFinished {
        base_id: Uuid,
        dispatched: usize,
        /// The run ended because it was stopped, not because it ran dry.
        stopped: bool,
    },
    /// An item was claimed for an attempt.
    ItemStarted {
        base_id: Uuid,
        item_id: Uuid,
        attempt: u32,
    },
    /// The backend reported progress.
    ItemProgress {
        base_id: Uuid,
        item_id: Uuid,
        percent: u8,
    },
    /// An attempt succeeded.
    ItemCompleted {
        base_id: Uuid,
        item_id: Uuid,
        duration_ms: u64,
    },
    /// An attempt failed.
    ItemFailed {
        base_id: Uuid,
        item_id: Uuid,
        error: String,
        /// No attempts are left for this item.
        dead_letter: bool,
    },
}

impl QueueEvent {
    /// Item this event relates to, if any.
    pub fn item_id(&self) -> Option<Uuid> {
        match self {
            QueueEvent::ItemStarted { item_id, .. }
            | QueueEvent::ItemProgress { item_id, .. }
            | QueueEvent::ItemCompleted { item_id, .. }
            | QueueEvent::ItemFailed { item_id, .. } => Some(*item_id),
            _ => None,
        }
    }

    /// Whether this event ends an item attempt.
    pub fn is_item_terminal(&self) -> bool {
        matches!(
            self,
            QueueEvent::ItemCompleted { .. } | QueueEvent::ItemFailed { .. }
        )
    }
}
