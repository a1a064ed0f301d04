//! Record sink trait
//!
//! This module defines the `RecordSink` trait, the destination of every
//! record accepted by a capture session.
//!
//! Implementors are responsible for:
//! - Appending records durably, one at a time, in arrival order
//! - Never truncating or overwriting pre-existing data
//! - Leaving no partially written record behind when an append fails

use std::path::Path;

use crate::data_capture::types::CapturedRecord;
use crate::error_handling::types::StorageError;

/// Append-only destination for captured records.
///
/// A sink is owned by exactly one producer for its whole lifetime, hence the
/// `&mut self` receivers and the `Send` bound (the producer runs on a blocking
/// worker thread).
pub trait RecordSink: Send {
    /// Resolved location of the destination, fixed for the sink's lifetime.
    fn path(&self) -> &Path;

    /// Appends one record.
    ///
    /// When this returns `Ok`, the record is durable. When it returns `Err`,
    /// none of the record is left in the destination.
    fn append(&mut self, record: &CapturedRecord) -> Result<(), StorageError>;

    /// Flushes any buffered state to durable storage.
    fn flush(&mut self) -> Result<(), StorageError>;
}
