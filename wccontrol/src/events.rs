//! Control-plane event bus.
//!
//! Consumers (API layer, dashboard feeds) subscribe with a bounded channel.
//! A subscriber that stops draining loses events past its queue depth and a
//! dropped subscriber is pruned; either way the control plane never blocks.

use crate::model::DeviceId;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Mutex;
use tracing::debug;

/// Events queued per subscriber before new ones are dropped for it.
const SUBSCRIBER_QUEUE: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CastEvent {
    DeviceDiscovered { device: DeviceId, name: String },
    DeviceLost { device: DeviceId },
    PlaybackStarted { device: DeviceId, content_ref: String },
    PlaybackStopped { device: DeviceId },
    DeviceErrored { device: DeviceId, reason: String },
    BlackoutActivated { affected: Vec<DeviceId> },
    BlackoutRestored { restored: Vec<DeviceId> },
}

/// Fan-out bus: every subscriber gets every event.
#[derive(Default)]
pub struct EventBus {
    senders: Mutex<Vec<Sender<CastEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<CastEvent> {
        let (tx, rx) = bounded(SUBSCRIBER_QUEUE);
        self.senders.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, event: CastEvent) {
        // Dropped receivers are pruned as they are found; full queues keep
        // their subscriber but lose this event.
        self.senders.lock().unwrap().retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("Subscriber queue full, dropping {:?}", event);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }
}
