//! Configuration types for sidecar supervision.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Configuration for a supervised sidecar process.
#[derive(Debug, Clone, Serialize)]
pub struct SidecarConfig {
    /// Path to the sidecar executable artifact.
    pub executable: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the child (inherits the host's when `None`).
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables: (name, value).
    pub env: Vec<(String, String)>,
    /// Port to prefer when it is free.
    pub preferred_port: Option<u16>,
    /// Name of the environment variable that carries the port to the child.
    pub port_env: String,
    /// Loopback host used for readiness probes and forwarded calls.
    pub host: String,
    /// Readiness check configuration.
    pub health_check: HealthCheck,
    /// Time to wait for the readiness check to pass.
    pub startup_timeout: Duration,
    /// Interval between readiness polls.
    pub health_poll_interval: Duration,
    /// Timeout for a single readiness probe.
    pub health_attempt_timeout: Duration,
    /// Timeout for a single forwarded API call.
    pub request_timeout: Duration,
    /// How long to wait after a cooperative stop before force-killing.
    pub shutdown_grace: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::new(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            preferred_port: None,
            port_env: "PORT".to_string(),
            host: "127.0.0.1".to_string(),
            health_check: HealthCheck::default(),
            startup_timeout: Duration::from_secs(20),
            health_poll_interval: Duration::from_millis(250),
            health_attempt_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

impl SidecarConfig {
    /// Create a config for an executable with otherwise default settings.
    pub fn for_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    /// Endpoint for a resolved port.
    pub fn endpoint(&self, port: u16) -> SidecarEndpoint {
        SidecarEndpoint {
            host: self.host.clone(),
            port,
        }
    }

    /// Upper bound on how long one lifecycle transition may take.
    ///
    /// Used to bound waits on an operation started by another caller.
    pub fn transition_bound(&self) -> Duration {
        self.startup_timeout + self.health_attempt_timeout + self.shutdown_grace * 2
    }
}

/// Readiness check configuration for a sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthCheck {
    /// HTTP GET on a path; ready on 2xx with a `{"status": "ok"}` body.
    Http {
        /// Path to check (e.g., "/api/health").
        path: String,
    },
    /// TCP connection test.
    Tcp,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::Http {
            path: "/api/health".to_string(),
        }
    }
}

/// Represents a sidecar endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarEndpoint {
    /// Host address (usually 127.0.0.1).
    pub host: String,
    /// Port the sidecar listens on.
    pub port: u16,
}

impl SidecarEndpoint {
    /// Get the base HTTP URL for this endpoint.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Full URL for a relative endpoint path.
    ///
    /// A missing leading slash is added.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.http_url(), path)
        } else {
            format!("{}/{}", self.http_url(), path)
        }
    }
}

impl std::fmt::Display for SidecarEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let config = SidecarConfig::for_executable("/bin/sidecar");
        let endpoint = config.endpoint(3100);

        assert_eq!(endpoint.http_url(), "http://127.0.0.1:3100");
        assert_eq!(endpoint.url_for("/api/data"), "http://127.0.0.1:3100/api/data");
        assert_eq!(endpoint.url_for("api/data"), "http://127.0.0.1:3100/api/data");
        assert_eq!(endpoint.to_string(), "127.0.0.1:3100");
    }

    #[test]
    fn test_default_health_check() {
        let config = SidecarConfig::default();

        assert_eq!(
            config.health_check,
            HealthCheck::Http {
                path: "/api/health".to_string()
            }
        );
        assert_eq!(config.port_env, "PORT");
    }

    #[test]
    fn test_transition_bound_covers_startup_and_grace() {
        let config = SidecarConfig {
            startup_timeout: Duration::from_secs(10),
            health_attempt_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
            ..Default::default()
        };

        assert_eq!(config.transition_bound(), Duration::from_secs(15));
    }
}
