//! Storage subsystem
//!
//! This module provides the destination of captured records and the helpers
//! used to read a capture back for analysis.
//!
//! Components:
//! - `storage_trait`: the `RecordSink` trait every destination implements.
//! - `file_storage`: collision-safe naming, the append-only pcap file sink and
//!   the pcap reader.

pub mod file_storage;
pub mod storage_trait;

pub use file_storage::{read_capture, resolve, resolve_dir, PcapFileSink, PCAP_SNAPLEN};
pub use storage_trait::RecordSink;
