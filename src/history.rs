//! Bounded per-device location history.
//!
//! Each device keeps its `capacity` most recent samples ordered by timestamp.
//! Going over the cap evicts the oldest sample, and a sample older than
//! everything in a full ring is discarded, so a late offline sync can never
//! push out newer live fixes. With no durable store this is the only copy of
//! location data, so devices are never forgotten once seen.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::models::RecordedLocation;

pub struct HistoryBuffer {
    capacity: usize,
    devices: DashMap<String, VecDeque<RecordedLocation>>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            devices: DashMap::new(),
        }
    }

    pub fn append(&self, sample: RecordedLocation) {
        let device_id = sample.device_id.clone();
        self.extend(&device_id, std::iter::once(sample));
    }

    /// Inserts several samples for one device under a single lock.
    pub fn extend<I>(&self, device_id: &str, samples: I)
    where
        I: IntoIterator<Item = RecordedLocation>,
    {
        let mut ring = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        for sample in samples {
            // Ascending by timestamp; ties land after existing entries.
            let pos = ring.partition_point(|s| s.timestamp <= sample.timestamp);
            if ring.len() == self.capacity {
                if pos == 0 {
                    continue;
                }
                ring.pop_front();
                ring.insert(pos - 1, sample);
            } else {
                ring.insert(pos, sample);
            }
        }
    }

    /// Newest first by timestamp. `None` returns everything retained.
    pub fn recent(&self, device_id: &str, limit: Option<usize>) -> Vec<RecordedLocation> {
        self.recent_since(device_id, None, limit)
    }

    pub fn recent_since(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<RecordedLocation> {
        let ring = match self.devices.get(device_id) {
            Some(ring) => ring,
            None => return Vec::new(),
        };

        let samples = ring
            .iter()
            .rev()
            .take_while(|s| since.map_or(true, |since| s.timestamp >= since))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        samples
    }

    /// The maximum-timestamp sample of every device ever seen.
    pub fn latest_per_device(&self) -> HashMap<String, RecordedLocation> {
        self.devices
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .back()
                    .map(|s| (entry.key().clone(), s.clone()))
            })
            .collect()
    }

    pub fn len(&self, device_id: &str) -> usize {
        self.devices.get(device_id).map_or(0, |ring| ring.len())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}
