//! Session management core module.
//!
//! This module provides the capture session lifecycle: the session record and
//! its state machine, and the controller that supervises the capture producer.

use serde::{Deserialize, Serialize};

/// Submodule for session data structures and utilities.
pub mod session;
/// Submodule for the capture controller.
pub mod session_manager;

pub use session::{CaptureSession, SessionSummary};
pub use session_manager::CaptureController;

/// Represents the current state of a capture session.
///
/// Variants:
/// - `Idle`: configured or not, nothing started yet.
/// - `Running`: the producer is recording.
/// - `Stopped`: the session ended on deadline, interrupt, request or a sink error.
/// - `Failed`: the session could not start, or its source broke mid-run.
///
/// States only move forward: `Idle → Running → {Stopped, Failed}` and
/// `Idle → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::Running)
                | (SessionState::Idle, SessionState::Failed)
                | (SessionState::Running, SessionState::Stopped)
                | (SessionState::Running, SessionState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}
