//! Fan-out of driver and location events to admin panels.
//!
//! Each observer owns a bounded queue. Publishing never waits: an observer
//! whose queue is full or whose receiver is gone is dropped from the hub.
//! There is no backlog, so a new observer must query current state itself.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::models::{DriverRecord, ObserverId, OutboundEvent, RecordedLocation};

pub struct BroadcastHub {
    buffer: usize,
    observers: RwLock<HashMap<ObserverId, mpsc::Sender<Arc<OutboundEvent>>>>,
}

/// Receiving end handed to one admin panel.
pub struct Observer {
    id: ObserverId,
    rx: mpsc::Receiver<Arc<OutboundEvent>>,
}

impl Observer {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Waits for the next event. `None` once the hub has dropped this observer.
    pub async fn recv(&mut self) -> Option<Arc<OutboundEvent>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<OutboundEvent>> {
        self.rx.try_recv().ok()
    }
}

impl BroadcastHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            observers: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> Observer {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ObserverId::new();
        self.observers.write().insert(id, tx);
        debug!(observer_id = %id, "observer subscribed");
        Observer { id, rx }
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        if self.observers.write().remove(&id).is_some() {
            debug!(observer_id = %id, "observer unsubscribed");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn publish_drivers_updated(&self, drivers: Vec<DriverRecord>) -> usize {
        self.publish(OutboundEvent::DriversUpdated(drivers))
    }

    pub fn publish_location_update(&self, location: RecordedLocation) -> usize {
        self.publish(OutboundEvent::LocationUpdate(location))
    }

    /// Returns how many observers accepted the event.
    fn publish(&self, event: OutboundEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut failed = Vec::new();

        {
            let observers = self.observers.read();
            for (id, tx) in observers.iter() {
                match deliver(tx, event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(err) => failed.push((*id, err)),
                }
            }
        }

        if !failed.is_empty() {
            let mut observers = self.observers.write();
            for (id, err) in failed {
                observers.remove(&id);
                warn!(observer_id = %id, error = %err, "dropping observer");
            }
        }

        delivered
    }
}

fn deliver(
    tx: &mpsc::Sender<Arc<OutboundEvent>>,
    event: Arc<OutboundEvent>,
) -> Result<(), DeliveryError> {
    tx.try_send(event).map_err(|err| match err {
        TrySendError::Full(_) => DeliveryError::Lagging,
        TrySendError::Closed(_) => DeliveryError::Disconnected,
    })
}
