//! Supervisor state and the snapshots handed to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sidecar::error::SupervisorError;
use crate::sidecar::process::ProcessHandle;

/// Lifecycle phase of the supervised sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Terminal until the next `start()`.
    Failed,
}

impl Phase {
    /// Whether an operation is in flight.
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// The single source of truth for the supervisor.
///
/// Only the lifecycle state machine mutates this; everyone else reads it
/// through a `watch::Receiver`.
#[derive(Debug, Clone)]
pub struct SupervisorState {
    pub(crate) phase: Phase,
    pub(crate) process: Option<ProcessHandle>,
    pub(crate) port: Option<u16>,
    pub(crate) last_error: Option<SupervisorError>,
    /// Incremented on every start; stale completions compare against it.
    pub(crate) run: u64,
    pub(crate) stop_requested: bool,
    pub(crate) changed_at: DateTime<Utc>,
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self {
            phase: Phase::Stopped,
            process: None,
            port: None,
            last_error: None,
            run: 0,
            stop_requested: false,
            changed_at: Utc::now(),
        }
    }
}

impl SupervisorState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ProcessHandle::pid)
    }

    pub fn last_error(&self) -> Option<&SupervisorError> {
        self.last_error.as_ref()
    }

    /// Read-only snapshot for callers.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase,
            port: self.port,
            pid: self.pid(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
            changed_at: self.changed_at,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.changed_at = Utc::now();
    }

    /// Stopped/Failed -> Starting. Returns the new run number.
    pub(crate) fn begin_start(&mut self) -> u64 {
        self.run += 1;
        self.process = None;
        self.port = None;
        self.last_error = None;
        self.stop_requested = false;
        self.set_phase(Phase::Starting);
        self.run
    }

    /// Record the spawned process and its port for the current run.
    pub(crate) fn attach(&mut self, run: u64, port: u16, process: ProcessHandle) -> bool {
        if self.run != run || self.phase != Phase::Starting {
            return false;
        }
        self.port = Some(port);
        self.process = Some(process);
        true
    }

    pub(crate) fn mark_running(&mut self) {
        self.set_phase(Phase::Running);
    }

    /// Running/Starting -> Stopping. Returns the process to terminate.
    pub(crate) fn begin_stop(&mut self) -> Option<ProcessHandle> {
        self.set_phase(Phase::Stopping);
        self.process.clone()
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.process = None;
        self.port = None;
        self.stop_requested = false;
        self.set_phase(Phase::Stopped);
    }

    pub(crate) fn mark_failed(&mut self, error: SupervisorError) {
        self.process = None;
        self.port = None;
        self.stop_requested = false;
        self.last_error = Some(error);
        self.set_phase(Phase::Failed);
    }

    /// A state that reports Running on `port` without owning a process.
    #[cfg(test)]
    pub(crate) fn running_on(port: u16) -> Self {
        let mut state = Self::default();
        state.begin_start();
        state.port = Some(port);
        state.mark_running();
        state
    }
}

/// Point-in-time view of the supervisor, safe to hand to a UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Human-readable result of a lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub message: String,
    pub phase: Phase,
    pub port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_initial_state_is_stopped() {
        let state = SupervisorState::default();
        let snapshot = state.snapshot();

        assert_eq!(snapshot.phase, Phase::Stopped);
        assert_eq!(snapshot.port, None);
        assert_eq!(snapshot.pid, None);
        assert_eq!(snapshot.last_error, None);
    }

    #[test]
    fn test_start_clears_previous_error() {
        let mut state = SupervisorState::default();
        state.begin_start();
        state.mark_failed(SupervisorError::StartAborted);
        assert_eq!(state.phase(), Phase::Failed);
        assert!(state.last_error().is_some());

        let run = state.begin_start();
        assert_eq!(run, 2);
        assert_eq!(state.phase(), Phase::Starting);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_failure_drops_port() {
        let mut state = SupervisorState::running_on(3100);
        assert_eq!(state.port(), Some(3100));

        state.mark_failed(SupervisorError::ProcessCrashed {
            status: "exit status: 1".to_string(),
        });
        assert_eq!(state.port(), None);
        assert_eq!(
            state.snapshot().last_error.as_deref(),
            Some("Sidecar process exited unexpectedly (exit status: 1)")
        );
    }

    #[test]
    fn test_snapshot_serializes_phase_name() {
        let snapshot = SupervisorState::running_on(3100).snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["phase"], "Running");
        assert_eq!(json["port"], 3100);
    }

    #[test]
    fn test_phase_transitional() {
        assert!(Phase::Starting.is_transitional());
        assert!(Phase::Stopping.is_transitional());
        assert!(!Phase::Running.is_transitional());
        assert!(!Phase::Failed.is_transitional());
        assert_eq!(Phase::Stopping.to_string(), "Stopping");
    }
}
