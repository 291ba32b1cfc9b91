//! Event bus for kpiboard using tokio::broadcast
//!
//! Explicit publish-subscribe channel injected at construction time;
//! dependents react to data and selection changes without holding
//! references to each other.

use crate::selection::Dimension;
use tokio::sync::broadcast;

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A dataset was (re)loaded into the record store
    DatasetLoaded(String),
    /// A discrete dimension's selection changed
    SelectionChanged(Dimension),
    /// The date-range interval changed
    DateRangeChanged,
    /// Every dimension and the date-range went back to unrestricted
    FiltersReset,
    /// The boundary snapshot was recomputed
    SnapshotUpdated,
    /// The drill-down controller changed state
    DrillDownChanged,
    /// A dataset fetch failed (dataset name carried)
    FetchFailed(String),
    /// A full fetch cycle (mount or manual refresh) finished
    RefreshCompleted,
}

/// Event bus for broadcasting engine events
///
/// Uses tokio::broadcast for multi-consumer support; the rendering layer
/// subscribes for redraw triggers.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: EngineEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
