use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::runtime::Handle;
use tracing::{error, warn};

use super::LocationStore;
use crate::error::StoreError;
use crate::models::{DriverRecord, RecordedLocation};

/// Dispatches durable writes off the caller's path.
///
/// Failures are logged and dropped: in-memory state stays authoritative and
/// there is no retry queue.
#[derive(Clone)]
pub struct WriteBehind {
    store: Arc<dyn LocationStore>,
}

impl WriteBehind {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }

    pub fn upsert_drivers(&self, drivers: Vec<DriverRecord>) {
        if drivers.is_empty() {
            return;
        }
        let store = self.store.clone();
        self.dispatch(async move {
            let results = join_all(drivers.iter().map(|d| store.upsert_driver(d))).await;
            for (driver, result) in drivers.iter().zip(results) {
                if let Err(e) = result {
                    log_failure("upsert driver", &driver.device_id, &e);
                }
            }
        });
    }

    pub fn insert_location(&self, sample: RecordedLocation) {
        let store = self.store.clone();
        self.dispatch(async move {
            if let Err(e) = store.insert_location(&sample).await {
                log_failure("insert location", &sample.device_id, &e);
            }
        });
    }

    pub fn insert_locations(&self, device_id: String, batch: Vec<RecordedLocation>) {
        if batch.is_empty() {
            return;
        }
        let store = self.store.clone();
        self.dispatch(async move {
            if let Err(e) = store.insert_locations(&batch).await {
                log_failure("insert location batch", &device_id, &e);
            }
        });
    }

    fn dispatch<F>(&self, write: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(write);
            }
            Err(_) => warn!(
                backend = self.store.backend(),
                "no async runtime, durable write skipped"
            ),
        }
    }
}

fn log_failure(operation: &str, device_id: &str, err: &StoreError) {
    error!(device_id = %device_id, error = %err, "Failed to {}", operation);
}
