//! Out-of-order audio reassembly
//!
//! The MQTT gateway delivers audio packets out of order. This buffer
//! reconstructs a forward-ordered stream by timestamp before frames are
//! admitted to the audio stage.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::gateway::{self, FrameError};

/// Maximum number of late packets held back at once.
pub const DEFAULT_CAPACITY: usize = 20;

/// Timestamp-keyed reorder buffer.
pub struct ReorderBuffer {
    buffered: BTreeMap<u64, Vec<u8>>,
    last_processed: u64,
    capacity: usize,
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ReorderBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffered: BTreeMap::new(),
            last_processed: 0,
            capacity: capacity.max(1),
        }
    }

    /// Feed one raw gateway frame; returns the payloads to admit, in order.
    ///
    /// A frame at or past the high-water timestamp is admitted immediately
    /// and drains every buffered successor in sorted order. A late frame is
    /// held back unless the buffer is full, in which case it is admitted
    /// out of order rather than dropped.
    pub fn push(&mut self, frame: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        let frame = gateway::parse(frame)?;
        let mut admitted = Vec::with_capacity(1);

        if frame.timestamp >= self.last_processed {
            self.last_processed = frame.timestamp;
            admitted.push(frame.payload);

            while let Some((&ts, _)) = self
                .buffered
                .range((Bound::Excluded(self.last_processed), Bound::Unbounded))
                .next()
            {
                if let Some(payload) = self.buffered.remove(&ts) {
                    self.last_processed = ts;
                    admitted.push(payload);
                }
            }
        } else if self.buffered.len() < self.capacity {
            self.buffered.insert(frame.timestamp, frame.payload);
        } else {
            tracing::debug!(
                timestamp = frame.timestamp,
                "Reorder buffer full, admitting late packet out of order"
            );
            admitted.push(frame.payload);
        }

        Ok(admitted)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn last_processed(&self) -> u64 {
        self.last_processed
    }

    pub fn clear(&mut self) {
        self.buffered.clear();
    }
}
