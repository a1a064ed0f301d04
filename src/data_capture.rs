//! Live capture subsystem
//!
//! - `types`: the `CapturedRecord` produced for every frame.
//! - `source`: backends opening an interface and yielding frames.
//! - `recorder`: the producer loop moving frames from a source into a sink.

pub mod recorder;
pub mod source;
pub mod types;

pub use recorder::{CaptureRecorder, ProgressCallback, RecorderFailure, RecorderOutcome};
pub use source::{CaptureBackend, PacketSource, PnetBackend};
pub use types::CapturedRecord;
