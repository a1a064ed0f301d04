use crate::configuration::{CaptureConfig, Config};
use crate::data_capture::{CaptureBackend, CaptureRecorder, ProgressCallback, RecorderFailure, RecorderOutcome};
use crate::error_handling::types::SessionError;
use crate::session_management::session::{CaptureSession, SessionSummary};
use crate::session_management::SessionState;
use crate::error_handling::types::StorageError;
use crate::storage::{self, PcapFileSink, RecordSink};
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Creates the sink for a resolved artifact path.
pub type SinkFactory = Arc<dyn Fn(&Path) -> Result<Box<dyn RecordSink>, StorageError> + Send + Sync>;

fn pcap_sink(path: &Path) -> Result<Box<dyn RecordSink>, StorageError> {
    Ok(Box::new(PcapFileSink::create(path)?))
}

/// Supervisor of one bounded capture session.
///
/// The controller owns the validated configuration, computes the deadline,
/// spawns the capture producer on the blocking pool and arms a single timer
/// that fires the session's cancellation token at the deadline. The same token
/// is handed out by [`CaptureController::interrupt_handle`] so an interrupt
/// (Ctrl-C) stops the session the same way.
///
/// A controller runs at most one session and cannot be restarted.
///
/// # Fields Overview
///
/// - `backend`: opens the capture interface
/// - `sink_factory`: creates the sink at the resolved path, a pcap file by default
/// - `progress`: optional callback invoked after each durable record
/// - `config`: set by a successful `configure`
/// - `session`: state of the (single) session
/// - `stop`: cancellation signal shared by producer, timer and interrupt
/// - `producer`: join handle of the blocking producer, taken by `stop`
/// - `watcher`: join handle of the deadline timer task
/// - `summary`: final summary, cached once the session is over
pub struct CaptureController {
    backend: Arc<dyn CaptureBackend>,
    sink_factory: SinkFactory,
    progress: Option<ProgressCallback>,
    config: Option<CaptureConfig>,
    session: CaptureSession,
    stop: CancellationToken,
    producer: Option<JoinHandle<RecorderOutcome>>,
    watcher: Option<JoinHandle<()>>,
    summary: Option<SessionSummary>,
}

impl CaptureController {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        let session = CaptureSession::new();
        debug!("[{}] CaptureController created", session.id);
        Self {
            backend,
            sink_factory: Arc::new(pcap_sink),
            progress: None,
            config: None,
            session,
            stop: CancellationToken::new(),
            producer: None,
            watcher: None,
            summary: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_sink_factory(mut self, sink_factory: SinkFactory) -> Self {
        self.sink_factory = sink_factory;
        self
    }

    /// Validates and stores the configuration.
    ///
    /// Allowed only before the session starts. On error the controller is left
    /// untouched and the error names the offending field.
    pub fn configure(&mut self, config: &Config) -> Result<(), SessionError> {
        if self.session.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }
        let validated = config.validate().map_err(|e| {
            warn!("[{}] Rejected configuration: {}", self.session.id, e);
            SessionError::Configuration(e)
        })?;
        info!(
            "[{}] Configured capture on {} until {}",
            self.session.id, validated.interface, validated.deadline
        );
        self.config = Some(validated);
        Ok(())
    }

    /// Starts the session: resolves the artifact path, computes the deadline,
    /// opens the interface, creates the capture file, then spawns the producer
    /// and the deadline timer.
    ///
    /// Must be called from within a tokio runtime. Any failure leaves the
    /// session `Failed` with no producer running.
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.start_at(Local::now())
    }

    fn start_at(&mut self, now: DateTime<Local>) -> Result<(), SessionError> {
        let config = self.config.clone().ok_or(SessionError::NotConfigured)?;
        if self.session.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }

        if let Err(e) = self.launch(&config, now) {
            error!("[{}] Failed to start capture: {}", self.session.id, e);
            self.stop.cancel();
            self.session.transition(SessionState::Failed);
            self.session.stopped_at = Some(Local::now());
            self.summary = Some(self.session.summary(Some(e.to_string())));
            return Err(e);
        }
        Ok(())
    }

    fn launch(&mut self, config: &CaptureConfig, now: DateTime<Local>) -> Result<(), SessionError> {
        let deadline = config.deadline.deadline_from(&now)?;
        let path = storage::resolve(&config.output_directory, &config.base_name, &config.extension)
            .map_err(|error| SessionError::Storage {
                error,
                last_sequence: 0,
            })?;

        let source = self
            .backend
            .open(&config.interface)
            .map_err(|error| SessionError::Capture {
                error,
                last_sequence: 0,
            })?;
        let sink = (self.sink_factory)(&path).map_err(|error| SessionError::Storage {
            error,
            last_sequence: 0,
        })?;

        self.session.started_at = Some(now);
        self.session.deadline = Some(deadline);
        self.session.artifact = Some(path.clone());
        self.session.transition(SessionState::Running);

        info!(
            "[{}] Capturing on {} into {} until {}",
            self.session.id,
            config.interface,
            path.display(),
            deadline.format("%Y-%m-%d %H:%M:%S")
        );

        let recorder = CaptureRecorder::new(self.session.id, source, sink)
            .with_progress(self.progress.clone());
        let stop = self.stop.clone();
        self.producer = Some(tokio::task::spawn_blocking(move || recorder.run(stop)));

        let remaining = (deadline - Local::now()).to_std().unwrap_or(Duration::ZERO);
        let stop = self.stop.clone();
        let session_id = self.session.id;
        self.watcher = Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {
                    info!("[{}] Deadline reached", session_id);
                    stop.cancel();
                }
                _ = stop.cancelled() => {
                    debug!("[{}] Deadline timer disarmed", session_id);
                }
            }
        }));

        Ok(())
    }

    /// Stops the session and waits for the producer to drain.
    ///
    /// Idempotent. On `Idle` it does nothing. Once the session is over, later
    /// calls return the cached summary; a capture or storage error is returned
    /// as `Err` only by the call that observed it.
    pub async fn stop(&mut self) -> Result<SessionSummary, SessionError> {
        if self.session.state == SessionState::Idle {
            return Ok(self.session.summary(None));
        }
        if self.session.state.is_terminal() {
            return Ok(self
                .summary
                .clone()
                .unwrap_or_else(|| self.session.summary(None)));
        }

        info!("[{}] Stopping capture", self.session.id);
        self.stop.cancel();

        let joined = match self.producer.take() {
            Some(producer) => producer.await,
            None => {
                return Err(SessionError::ProducerPanicked(
                    "producer handle missing".to_string(),
                ))
            }
        };
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!("[{}] Deadline timer ended abnormally: {}", self.session.id, e);
            }
        }
        self.session.stopped_at = Some(Local::now());

        let failure = match joined {
            Ok(outcome) => {
                self.session.records = outcome.records;
                match outcome.failure {
                    None => None,
                    Some(RecorderFailure::Capture(error)) => {
                        self.session.transition(SessionState::Failed);
                        Some(SessionError::Capture {
                            error,
                            last_sequence: outcome.records,
                        })
                    }
                    Some(RecorderFailure::Storage(error)) => {
                        self.session.transition(SessionState::Stopped);
                        Some(SessionError::Storage {
                            error,
                            last_sequence: outcome.records,
                        })
                    }
                }
            }
            Err(e) => {
                self.session.transition(SessionState::Failed);
                Some(SessionError::ProducerPanicked(e.to_string()))
            }
        };
        if failure.is_none() {
            self.session.transition(SessionState::Stopped);
        }

        let summary = self
            .session
            .summary(failure.as_ref().map(|e| e.to_string()));
        self.summary = Some(summary.clone());

        match failure {
            Some(e) => {
                error!("[{}] Capture ended with error: {}", self.session.id, e);
                Err(e)
            }
            None => {
                info!(
                    "[{}] Capture stopped: {} record(s) in {}",
                    self.session.id,
                    summary.records,
                    summary
                        .artifact
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                );
                Ok(summary)
            }
        }
    }

    /// Waits for the deadline or an interrupt, then stops the session.
    pub async fn run_to_completion(&mut self) -> Result<SessionSummary, SessionError> {
        if self.session.state == SessionState::Running {
            self.stop.cancelled().await;
        }
        self.stop().await
    }

    /// Token firing the same stop signal as the deadline timer.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn deadline(&self) -> Option<DateTime<Local>> {
        self.session.deadline
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn config(&self) -> Option<&CaptureConfig> {
        self.config.as_ref()
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
