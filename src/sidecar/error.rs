//! Error types for sidecar supervision and request forwarding.
//!
//! Both enums serialize as `{"kind": "...", "message": "...", ..fields}` so a
//! UI layer can render them without knowing Rust types.

use std::time::Duration;

use serde::{Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

/// Result type for supervisor lifecycle operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors surfaced by `start`/`stop` and observed asynchronously via status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// No TCP port could be bound for the sidecar.
    #[error("No port available for the sidecar: {reason}")]
    PortUnavailable {
        /// Reason for failure.
        reason: String,
    },

    /// The sidecar executable could not be launched.
    #[error("Failed to spawn sidecar '{executable}': {reason}")]
    SpawnFailed {
        /// Executable path that was launched.
        executable: String,
        /// Reason for failure.
        reason: String,
    },

    /// The sidecar never answered its readiness endpoint in time.
    #[error("Sidecar on port {port} not ready within {timeout:?} ({attempts} attempts): {last}")]
    HealthCheckTimedOut {
        /// Port that was polled.
        port: u16,
        /// Configured readiness deadline.
        timeout: Duration,
        /// Number of probe attempts made.
        attempts: u32,
        /// Outcome of the last attempt.
        last: String,
    },

    /// The sidecar process exited without being asked to.
    #[error("Sidecar process exited unexpectedly ({status})")]
    ProcessCrashed {
        /// Exit status description.
        status: String,
    },

    /// A stop request arrived while the sidecar was still starting.
    #[error("Sidecar start aborted by a stop request")]
    StartAborted,
}

impl SupervisorError {
    /// Stable discriminant used in serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PortUnavailable { .. } => "port_unavailable",
            Self::SpawnFailed { .. } => "spawn_failed",
            Self::HealthCheckTimedOut { .. } => "health_check_timed_out",
            Self::ProcessCrashed { .. } => "process_crashed",
            Self::StartAborted => "start_aborted",
        }
    }
}

impl Serialize for SupervisorError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("kind", self.kind())?;
        map.serialize_entry("message", &self.to_string())?;
        match self {
            Self::HealthCheckTimedOut { port, .. } => map.serialize_entry("port", port)?,
            Self::SpawnFailed { executable, .. } => map.serialize_entry("executable", executable)?,
            _ => {}
        }
        map.end()
    }
}

/// Errors local to a single forwarded API call.
///
/// None of these change the supervisor phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The sidecar is not in the Running phase.
    #[error("Sidecar is not running")]
    NotRunning,

    /// The method string is not a valid HTTP method.
    #[error("Invalid HTTP method '{method}'")]
    InvalidMethod {
        /// Method as supplied by the caller.
        method: String,
    },

    /// Network-level failure talking to the sidecar.
    #[error("Connection to sidecar failed: {reason}")]
    ConnectionFailed {
        /// Reason for failure.
        reason: String,
    },

    /// The call exceeded its per-request timeout.
    #[error("Request to sidecar timed out after {timeout:?}")]
    RequestTimedOut {
        /// Configured per-call timeout.
        timeout: Duration,
    },

    /// The sidecar answered with a non-2xx status.
    #[error("Sidecar returned HTTP {status}: {body}")]
    UpstreamError {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
}

impl BridgeError {
    /// Stable discriminant used in serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotRunning => "not_running",
            Self::InvalidMethod { .. } => "invalid_method",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::RequestTimedOut { .. } => "request_timed_out",
            Self::UpstreamError { .. } => "upstream_error",
        }
    }
}

impl Serialize for BridgeError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("kind", self.kind())?;
        map.serialize_entry("message", &self.to_string())?;
        if let Self::UpstreamError { status, body } = self {
            map.serialize_entry("status", status)?;
            map.serialize_entry("body", body)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_serializes_status_and_body() {
        let err = BridgeError::UpstreamError {
            status: 503,
            body: "down".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "upstream_error");
        assert_eq!(json["status"], 503);
        assert_eq!(json["body"], "down");
        assert_eq!(json["message"], "Sidecar returned HTTP 503: down");
    }

    #[test]
    fn test_supervisor_error_kind_tag() {
        let err = SupervisorError::SpawnFailed {
            executable: "/nope".to_string(),
            reason: "No such file or directory".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "spawn_failed");
        assert_eq!(json["executable"], "/nope");
        assert!(json["message"].as_str().unwrap().contains("/nope"));
    }
}
