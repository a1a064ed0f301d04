//! Common data types used across the data_capture subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One frame read from the capture interface.
///
/// Immutable once captured. Structured fields are derived later by the
/// analysis decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRecord {
    /// Wall clock time at which the frame was read.
    pub timestamp: DateTime<Utc>,
    /// Length of the frame on the wire, which may exceed `data.len()`.
    pub original_len: u32,
    /// Raw link-layer bytes.
    pub data: Vec<u8>,
}

impl CapturedRecord {
    pub fn new(timestamp: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            original_len: data.len() as u32,
            data,
        }
    }

    /// Timestamp as fractional seconds since the Unix epoch.
    pub fn epoch_seconds(&self) -> f64 {
        self.timestamp.timestamp() as f64
            + f64::from(self.timestamp.timestamp_subsec_micros()) / 1_000_000.0
    }
}
