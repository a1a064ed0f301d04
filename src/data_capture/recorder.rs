//! Capture producer for a single session.
//!
//! `CaptureRecorder` pulls frames from a [`PacketSource`] and appends them to a
//! [`RecordSink`] until its cancellation token fires or either side fails. It
//! is the only writer of the sink and the only owner of the sequence counter.
//!
//! Ordering per record:
//! 1. append to the sink (durable on return)
//! 2. increment the sequence number
//! 3. invoke the progress callback
//!
//! so a callback never observes a record that is not already in the file.
//!
//! Records read before the stop signal are always appended, including the one
//! whose read was in flight when the signal fired.

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error_handling::types::{CaptureError, StorageError};
use crate::storage::RecordSink;

use super::source::PacketSource;
use super::types::CapturedRecord;

/// Called with the sequence number and the record, after the record is durable.
pub type ProgressCallback = Arc<dyn Fn(u64, &CapturedRecord) + Send + Sync>;

/// Reason a producer ended before being asked to.
#[derive(Debug)]
pub enum RecorderFailure {
    Capture(CaptureError),
    Storage(StorageError),
}

impl fmt::Display for RecorderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderFailure::Capture(e) => write!(f, "{}", e),
            RecorderFailure::Storage(e) => write!(f, "{}", e),
        }
    }
}

/// What the producer reports back once drained.
#[derive(Debug)]
pub struct RecorderOutcome {
    /// Sequence number of the last durable record, also the record count.
    pub records: u64,
    pub failure: Option<RecorderFailure>,
}

pub struct CaptureRecorder {
    session_id: Uuid,
    source: Box<dyn PacketSource>,
    sink: Box<dyn RecordSink>,
    progress: Option<ProgressCallback>,
    sequence: u64,
}

impl CaptureRecorder {
    pub fn new(session_id: Uuid, source: Box<dyn PacketSource>, sink: Box<dyn RecordSink>) -> Self {
        debug!("[{}] CaptureRecorder created", session_id);
        Self {
            session_id,
            source,
            sink,
            progress: None,
            sequence: 0,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the blocking capture loop until `stop` fires or a failure occurs.
    ///
    /// On failure the token is cancelled so every other party observing it
    /// (deadline watcher, interrupt handler) stands down. The sink is flushed
    /// in every case.
    pub fn run(mut self, stop: CancellationToken) -> RecorderOutcome {
        info!(
            "[{}] Recording to {}",
            self.session_id,
            self.sink.path().display()
        );

        let mut failure = None;
        while !stop.is_cancelled() {
            match self.source.next_packet() {
                Ok(Some(record)) => {
                    if let Err(e) = self.sink.append(&record) {
                        error!(
                            "[{}] Append failed after record #{}: {}",
                            self.session_id, self.sequence, e
                        );
                        failure = Some(RecorderFailure::Storage(e));
                        break;
                    }
                    self.sequence += 1;
                    trace!(
                        "[{}] Record #{} ({} bytes) stored",
                        self.session_id,
                        self.sequence,
                        record.data.len()
                    );
                    if let Some(progress) = &self.progress {
                        progress(self.sequence, &record);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "[{}] Capture read failed after record #{}: {}",
                        self.session_id, self.sequence, e
                    );
                    failure = Some(RecorderFailure::Capture(e));
                    break;
                }
            }
        }

        if failure.is_some() {
            stop.cancel();
        }

        if let Err(e) = self.sink.flush() {
            warn!("[{}] Final flush failed: {}", self.session_id, e);
            if failure.is_none() {
                failure = Some(RecorderFailure::Storage(e));
            }
        }

        info!(
            "[{}] Recorder drained: {} record(s) in {}",
            self.session_id,
            self.sequence,
            self.sink.path().display()
        );

        RecorderOutcome {
            records: self.sequence,
            failure,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex as StdMutex;

    use chrono::{TimeZone, Utc};

    /// Replays scripted reads, then cancels `stop` once exhausted.
    pub(crate) struct ScriptedSource {
        pub reads: VecDeque<Result<Option<CapturedRecord>, CaptureError>>,
        pub stop: Option<CancellationToken>,
    }

    impl PacketSource for ScriptedSource {
        fn next_packet(&mut self) -> Result<Option<CapturedRecord>, CaptureError> {
            match self.reads.pop_front() {
                Some(read) => read,
                None => {
                    if let Some(stop) = &self.stop {
                        stop.cancel();
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    Ok(None)
                }
            }
        }
    }

    /// In-memory sink sharing its records with the test.
    pub(crate) struct MemSink {
        pub path: PathBuf,
        pub records: Arc<StdMutex<Vec<CapturedRecord>>>,
        pub fail_after: Option<usize>,
    }

    impl MemSink {
        pub fn new() -> (Self, Arc<StdMutex<Vec<CapturedRecord>>>) {
            let records = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    path: PathBuf::from("mem.pcap"),
                    records: Arc::clone(&records),
                    fail_after: None,
                },
                records,
            )
        }
    }

    impl RecordSink for MemSink {
        fn path(&self) -> &Path {
            &self.path
        }

        fn append(&mut self, record: &CapturedRecord) -> Result<(), StorageError> {
            let mut records = self.records.lock().unwrap();
            if self.fail_after.is_some_and(|limit| records.len() >= limit) {
                return Err(StorageError::WriteFailed(io::Error::new(
                    io::ErrorKind::Other,
                    "disk full",
                )));
            }
            records.push(record.clone());
            Ok(())
        }

        fn flush(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    pub(crate) fn frame(secs: i64) -> CapturedRecord {
        CapturedRecord::new(
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            vec![secs as u8; 60],
        )
    }

    #[test]
    fn test_records_are_stored_before_progress() {
        let stop = CancellationToken::new();
        let source = ScriptedSource {
            reads: VecDeque::from(vec![Ok(Some(frame(0))), Ok(None), Ok(Some(frame(1)))]),
            stop: Some(stop.clone()),
        };
        let (sink, stored) = MemSink::new();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let progress: ProgressCallback = {
            let stored = Arc::clone(&stored);
            let seen = Arc::clone(&seen);
            Arc::new(move |seq: u64, record: &CapturedRecord| {
                let stored = stored.lock().unwrap();
                assert_eq!(stored.len() as u64, seq);
                assert_eq!(stored.last(), Some(record));
                seen.lock().unwrap().push(seq);
            })
        };

        let outcome = CaptureRecorder::new(Uuid::new_v4(), Box::new(source), Box::new(sink))
            .with_progress(Some(progress))
            .run(stop);

        assert_eq!(outcome.records, 2);
        assert!(outcome.failure.is_none());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*stored.lock().unwrap(), vec![frame(0), frame(1)]);
    }

    #[test]
    fn test_cancelled_before_run() {
        let stop = CancellationToken::new();
        stop.cancel();
        let source = ScriptedSource {
            reads: VecDeque::from(vec![Ok(Some(frame(0)))]),
            stop: None,
        };
        let (sink, stored) = MemSink::new();

        let outcome = CaptureRecorder::new(Uuid::new_v4(), Box::new(source), Box::new(sink)).run(stop);
        assert_eq!(outcome.records, 0);
        assert!(stored.lock().unwrap().is_empty());
    }

    #[test]
    fn test_storage_failure_cancels_and_reports_last_sequence() {
        let stop = CancellationToken::new();
        let source = ScriptedSource {
            reads: (0..5).map(|i| Ok(Some(frame(i)))).collect(),
            stop: None,
        };
        let (mut sink, stored) = MemSink::new();
        sink.fail_after = Some(3);

        let outcome =
            CaptureRecorder::new(Uuid::new_v4(), Box::new(source), Box::new(sink)).run(stop.clone());

        assert_eq!(outcome.records, 3);
        assert!(matches!(
            outcome.failure,
            Some(RecorderFailure::Storage(StorageError::WriteFailed(_)))
        ));
        assert!(stop.is_cancelled());
        assert_eq!(stored.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_capture_failure_keeps_stored_records() {
        let stop = CancellationToken::new();
        let source = ScriptedSource {
            reads: VecDeque::from(vec![
                Ok(Some(frame(0))),
                Err(CaptureError::ReadFailed(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "link down",
                ))),
                Ok(Some(frame(1))),
            ]),
            stop: None,
        };
        let (sink, stored) = MemSink::new();

        let outcome =
            CaptureRecorder::new(Uuid::new_v4(), Box::new(source), Box::new(sink)).run(stop.clone());

        assert_eq!(outcome.records, 1);
        assert!(matches!(outcome.failure, Some(RecorderFailure::Capture(_))));
        assert!(stop.is_cancelled());
        assert_eq!(*stored.lock().unwrap(), vec![frame(0)]);
    }
}
