//! Port selection for the sidecar listener.
//!
//! Resolution happens on every start. A port that was free for the previous
//! run may still be held by the OS while the old process winds down.

use std::net::TcpListener;

use crate::sidecar::error::{Result, SupervisorError};

/// Outcome of port resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPort {
    /// Port the sidecar should bind.
    pub port: u16,
    /// The preferred port was requested but already bound by someone else.
    pub preferred_busy: bool,
}

/// Pick a port: the preferred one if it is free, otherwise any free ephemeral port.
pub fn resolve(host: &str, preferred: Option<u16>) -> Result<ResolvedPort> {
    let mut preferred_busy = false;

    if let Some(port) = preferred.filter(|p| *p != 0) {
        if is_free(host, port) {
            return Ok(ResolvedPort {
                port,
                preferred_busy: false,
            });
        }
        tracing::debug!("Preferred port {} is in use, picking an ephemeral port", port);
        preferred_busy = true;
    }

    let port = ephemeral(host)?;
    Ok(ResolvedPort {
        port,
        preferred_busy,
    })
}

/// Check whether `port` can currently be bound on `host`.
pub fn is_free(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}

fn ephemeral(host: &str) -> Result<u16> {
    let listener =
        TcpListener::bind((host, 0)).map_err(|e| SupervisorError::PortUnavailable {
            reason: format!("cannot bind an ephemeral port on {host}: {e}"),
        })?;
    let port = listener
        .local_addr()
        .map_err(|e| SupervisorError::PortUnavailable {
            reason: e.to_string(),
        })?
        .port();

    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_preferred_port_is_used() {
        let port = ephemeral("127.0.0.1").unwrap();

        let resolved = resolve("127.0.0.1", Some(port)).unwrap();
        assert_eq!(resolved.port, port);
        assert!(!resolved.preferred_busy);
    }

    #[test]
    fn test_busy_preferred_port_falls_back() {
        let holder = TcpListener::bind("127.0.0.1:0").unwrap();
        let busy = holder.local_addr().unwrap().port();

        let resolved = resolve("127.0.0.1", Some(busy)).unwrap();
        assert_ne!(resolved.port, busy);
        assert!(resolved.preferred_busy);
        assert!(!is_free("127.0.0.1", busy));
    }

    #[test]
    fn test_no_preference_picks_ephemeral() {
        let resolved = resolve("127.0.0.1", None).unwrap();
        assert_ne!(resolved.port, 0);
        assert!(!resolved.preferred_busy);

        let zero = resolve("127.0.0.1", Some(0)).unwrap();
        assert_ne!(zero.port, 0);
    }

    #[test]
    fn test_unbindable_host_is_port_unavailable() {
        let err = resolve("203.0.113.1", None).unwrap_err();
        assert!(matches!(err, SupervisorError::PortUnavailable { .. }));
    }
}
