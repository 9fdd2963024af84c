//! Per-connection dispatch of inbound transport events.

use std::sync::Arc;

use crate::error::IngestError;
use crate::models::event::RegisterDriver;
use crate::models::{ConnectionId, InboundEvent, OutboundEvent};
use crate::presence::PresenceRegistry;
use crate::processor::IngestPipeline;

/// One live driver connection. Dropping it unbinds the connection.
pub struct Session {
    id: ConnectionId,
    registry: Arc<PresenceRegistry>,
    pipeline: Arc<IngestPipeline>,
    bound: bool,
}

impl Session {
    pub fn new(registry: Arc<PresenceRegistry>, pipeline: Arc<IngestPipeline>) -> Self {
        Self {
            id: ConnectionId::new(),
            registry,
            pipeline,
            bound: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Handles one event and returns the direct reply for this connection, if any.
    pub fn handle(&mut self, event: InboundEvent) -> Option<OutboundEvent> {
        match event {
            InboundEvent::RegisterDriver(register) => Some(self.register(register)),
            InboundEvent::LocationUpdate(sample) => self
                .pipeline
                .ingest(self.id, &sample)
                .err()
                .map(|e| OutboundEvent::from(&e)),
            InboundEvent::SyncLocations(samples) => {
                match self.pipeline.ingest_batch(self.id, &samples) {
                    Ok(outcome) => Some(OutboundEvent::Synced {
                        accepted: outcome.accepted,
                        rejected: outcome.rejected.len(),
                    }),
                    Err(e) => Some(OutboundEvent::from(&e)),
                }
            }
            InboundEvent::Disconnect => {
                self.close();
                None
            }
        }
    }

    /// Handles a raw JSON event. Malformed payloads produce a validation error reply.
    pub fn handle_json(&mut self, payload: &str) -> Option<OutboundEvent> {
        match serde_json::from_str::<InboundEvent>(payload) {
            Ok(event) => self.handle(event),
            Err(e) => Some(OutboundEvent::from(&IngestError::Validation(e.to_string()))),
        }
    }

    pub fn close(&mut self) {
        if self.bound {
            self.bound = false;
            self.registry.unbind(self.id);
        }
    }

    fn register(&mut self, register: RegisterDriver) -> OutboundEvent {
        let device_id = register.device_id.trim();
        let driver_name = register.driver_name.trim();
        if device_id.is_empty() {
            return OutboundEvent::from(&IngestError::Validation("missing deviceId".to_string()));
        }
        if driver_name.is_empty() {
            return OutboundEvent::from(&IngestError::Validation("missing driverName".to_string()));
        }

        let driver = self.registry.register(self.id, device_id, driver_name);
        self.bound = true;
        OutboundEvent::Registered(driver)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
