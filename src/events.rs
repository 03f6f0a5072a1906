//! Change notifications for HUD, telemetry and logging consumers.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::quality::QualityTier;
use crate::spatial::ZoneCoord;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    InstanceCountChanged { count: usize },
    QualityChanged { from: QualityTier, to: QualityTier },
    ZoneLoaded(ZoneCoord),
    /// A zone left the streaming radius; `destroyed` instances went with it.
    ZoneUnloaded { zone: ZoneCoord, destroyed: usize },
    ZoneLoadFailed(ZoneCoord),
    /// First failure of a resource episode for the named batch slot.
    ResourceUnavailable(String),
}

/// Fan-out of engine events to any number of channel subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn publish(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
