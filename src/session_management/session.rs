use super::SessionState;
use chrono::{DateTime, Local};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Mutable record of one capture session, owned by its controller.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: Uuid,
    pub state: SessionState,
    pub started_at: Option<DateTime<Local>>,
    /// Computed once, when the session starts.
    pub deadline: Option<DateTime<Local>>,
    pub stopped_at: Option<DateTime<Local>>,
    /// Resolved path of the capture file.
    pub artifact: Option<PathBuf>,
    /// Last sequence number confirmed durable.
    pub records: u64,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            started_at: None,
            deadline: None,
            stopped_at: None,
            artifact: None,
            records: 0,
        }
    }

    /// Moves to `next` if the state machine allows it.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "[{}] Refusing transition {:?} -> {:?}",
                self.id, self.state, next
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn summary(&self, error: Option<String>) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            state: self.state,
            artifact: self.artifact.clone(),
            records: self.records,
            started_at: self.started_at,
            deadline: self.deadline,
            stopped_at: self.stopped_at,
            error,
        }
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Final report of a session, handed to the caller by `stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub state: SessionState,
    pub artifact: Option<PathBuf>,
    pub records: u64,
    pub started_at: Option<DateTime<Local>>,
    pub deadline: Option<DateTime<Local>>,
    pub stopped_at: Option<DateTime<Local>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = CaptureSession::new();
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.deadline.is_none());
        assert_eq!(session.records, 0);
    }

    #[test]
    fn test_transition_never_reenters_running() {
        let mut session = CaptureSession::new();
        assert!(session.transition(SessionState::Running));
        assert!(session.transition(SessionState::Stopped));
        assert!(!session.transition(SessionState::Running));
        assert_eq!(session.state, SessionState::Stopped);
    }

    #[test]
    fn test_summary_copies_fields() {
        let mut session = CaptureSession::new();
        session.records = 7;
        session.artifact = Some(PathBuf::from("/tmp/capture.pcap"));
        let summary = session.summary(Some("boom".to_string()));
        assert_eq!(summary.session_id, session.id);
        assert_eq!(summary.records, 7);
        assert_eq!(summary.error.as_deref(), Some("boom"));
    }
}
