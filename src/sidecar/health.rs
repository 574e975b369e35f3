//! Readiness polling for a freshly spawned sidecar.
//!
//! Every probe outcome other than success means "not ready yet". Refused
//! connections are routine while the child is still binding its listener,
//! so they are logged at trace level only.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::sidecar::config::{HealthCheck, SidecarConfig, SidecarEndpoint};

/// Result of a single readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The sidecar answered with the expected readiness shape.
    Ready,
    /// Nothing is listening yet.
    Refused,
    /// Something answered, but not with a ready signal.
    NotReady(String),
}

impl std::fmt::Display for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Refused => f.write_str("connection refused"),
            Self::NotReady(reason) => f.write_str(reason),
        }
    }
}

/// Reason polling stopped before the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// A stop was requested for this run.
    StopRequested,
    /// The child process exited.
    Exited(String),
}

/// Outcome of [`HealthMonitor::await_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready {
        attempts: u32,
        elapsed: Duration,
    },
    TimedOut {
        attempts: u32,
        last: Probe,
    },
    Interrupted(Interrupt),
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

/// Polls the readiness endpoint of a sidecar.
pub struct HealthMonitor {
    check: HealthCheck,
    host: String,
    interval: Duration,
    attempt_timeout: Duration,
    /// Reusable HTTP client for probes.
    http_client: reqwest::Client,
}

impl HealthMonitor {
    pub fn new(config: &SidecarConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.health_attempt_timeout)
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            check: config.health_check.clone(),
            host: config.host.clone(),
            interval: config.health_poll_interval,
            attempt_timeout: config.health_attempt_timeout,
            http_client,
        }
    }

    /// Poll until ready, the deadline passes, or `interrupt` reports a reason to stop.
    ///
    /// `interrupt` runs between attempts, so a stop is observed within one
    /// poll interval plus one attempt timeout.
    pub async fn await_ready<F>(&self, port: u16, deadline: Duration, mut interrupt: F) -> Readiness
    where
        F: FnMut() -> Option<Interrupt>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            if let Some(reason) = interrupt() {
                return Readiness::Interrupted(reason);
            }

            attempts += 1;
            let last = self.probe(port).await;
            match &last {
                Probe::Ready => {
                    return Readiness::Ready {
                        attempts,
                        elapsed: start.elapsed(),
                    };
                }
                Probe::Refused => {
                    tracing::trace!("Readiness attempt {} on port {}: refused", attempts, port);
                }
                Probe::NotReady(reason) => {
                    tracing::debug!("Readiness attempt {} on port {}: {}", attempts, port, reason);
                }
            }

            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Readiness::TimedOut { attempts, last };
            }
            tokio::time::sleep(self.interval.min(remaining)).await;
            if start.elapsed() >= deadline {
                return Readiness::TimedOut { attempts, last };
            }
        }
    }

    /// Run a single readiness probe.
    pub async fn probe(&self, port: u16) -> Probe {
        let endpoint = SidecarEndpoint {
            host: self.host.clone(),
            port,
        };
        match &self.check {
            HealthCheck::Http { path } => self.http_probe(&endpoint.url_for(path)).await,
            HealthCheck::Tcp => self.tcp_probe(&endpoint.to_string()).await,
        }
    }

    async fn http_probe(&self, url: &str) -> Probe {
        let response = match self.http_client.get(url).send().await {
            Ok(resp) => resp,
            // Connection refused is expected during startup
            Err(e) if e.is_connect() => return Probe::Refused,
            Err(e) => return Probe::NotReady(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return Probe::NotReady(format!("HTTP {status}"));
        }

        match response.json::<HealthBody>().await {
            Ok(body) if body.status == "ok" => Probe::Ready,
            Ok(body) => Probe::NotReady(format!("status '{}'", body.status)),
            Err(e) => Probe::NotReady(format!("malformed health body: {e}")),
        }
    }

    async fn tcp_probe(&self, addr: &str) -> Probe {
        use tokio::net::TcpStream;

        match tokio::time::timeout(self.attempt_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => Probe::Ready,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => Probe::Refused,
            Ok(Err(e)) => Probe::NotReady(e.to_string()),
            Err(_) => Probe::NotReady("connect timed out".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    use super::*;
    use crate::testing::{FakeSidecar, free_port};

    fn monitor(path: &str) -> HealthMonitor {
        HealthMonitor::new(&SidecarConfig {
            health_check: HealthCheck::Http {
                path: path.to_string(),
            },
            health_poll_interval: Duration::from_millis(20),
            health_attempt_timeout: Duration::from_millis(500),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_probe_ready_on_ok_status() {
        let sidecar = FakeSidecar::healthy().await;

        assert_eq!(monitor("/api/health").probe(sidecar.port()).await, Probe::Ready);
    }

    #[tokio::test]
    async fn test_probe_refused_when_nothing_listens() {
        let port = free_port();

        assert_eq!(monitor("/api/health").probe(port).await, Probe::Refused);
    }

    #[tokio::test]
    async fn test_probe_rejects_wrong_shape_and_status() {
        let app = Router::new()
            .route("/starting", get(|| async { r#"{"status":"starting"}"# }))
            .route("/garbage", get(|| async { "not json" }))
            .route(
                "/error",
                get(|| async { (StatusCode::SERVICE_UNAVAILABLE, r#"{"status":"ok"}"#) }),
            );
        let sidecar = FakeSidecar::serve(app).await;

        for path in ["/starting", "/garbage", "/error"] {
            let probe = monitor(path).probe(sidecar.port()).await;
            assert!(matches!(probe, Probe::NotReady(_)), "{path}: {probe:?}");
        }
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let sidecar = FakeSidecar::healthy().await;
        let tcp = HealthMonitor::new(&SidecarConfig {
            health_check: HealthCheck::Tcp,
            ..Default::default()
        });

        assert_eq!(tcp.probe(sidecar.port()).await, Probe::Ready);
        assert_eq!(tcp.probe(free_port()).await, Probe::Refused);
    }

    #[tokio::test]
    async fn test_await_ready_after_retries() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/health",
            get(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, "warming up".to_string())
                    } else {
                        (StatusCode::OK, r#"{"status":"ok"}"#.to_string())
                    }
                }
            }),
        );
        let sidecar = FakeSidecar::serve(app).await;

        let readiness = monitor("/health")
            .await_ready(sidecar.port(), Duration::from_secs(5), || None)
            .await;
        assert!(
            matches!(readiness, Readiness::Ready { attempts: 3, .. }),
            "{readiness:?}"
        );
    }

    #[tokio::test]
    async fn test_await_ready_times_out() {
        let port = free_port();
        let deadline = Duration::from_millis(200);
        let start = Instant::now();

        let readiness = monitor("/api/health").await_ready(port, deadline, || None).await;

        assert!(start.elapsed() >= deadline);
        match readiness {
            Readiness::TimedOut { attempts, last } => {
                assert!(attempts >= 2);
                assert_eq!(last, Probe::Refused);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_await_ready_interrupted() {
        let port = free_port();
        let mut calls = 0;

        let readiness = monitor("/api/health")
            .await_ready(port, Duration::from_secs(10), || {
                calls += 1;
                (calls > 2).then_some(Interrupt::StopRequested)
            })
            .await;

        assert_eq!(readiness, Readiness::Interrupted(Interrupt::StopRequested));
    }
}
