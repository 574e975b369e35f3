//! Host command surface.
//!
//! These are the calls a host UI binds to. Each one takes the injected
//! [`HostState`] rather than reaching for a global; the host builds it once
//! at startup and calls [`HostState::shutdown`] when it exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::sidecar::{
    ApiBridge, ApiRequest, BridgeError, SidecarConfig, SidecarSupervisor, StatusMessage,
    StatusSnapshot, SupervisorError,
};

/// Supervisor and bridge shared by every command handler.
#[derive(Clone)]
pub struct HostState {
    supervisor: Arc<SidecarSupervisor>,
    bridge: Arc<ApiBridge>,
}

impl HostState {
    /// Build host state for a sidecar launched from `config`.
    pub fn new(config: SidecarConfig) -> Self {
        Self::with_supervisor(Arc::new(SidecarSupervisor::new(config)))
    }

    /// Wrap an existing supervisor.
    pub fn with_supervisor(supervisor: Arc<SidecarSupervisor>) -> Self {
        let bridge = Arc::new(ApiBridge::new(&supervisor));
        Self { supervisor, bridge }
    }

    pub fn supervisor(&self) -> &Arc<SidecarSupervisor> {
        &self.supervisor
    }

    pub fn bridge(&self) -> &Arc<ApiBridge> {
        &self.bridge
    }

    /// Best-effort stop on host exit.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}

/// Start the sidecar. Returns once it is Running or Failed.
pub async fn start_server(state: &HostState) -> Result<StatusMessage, SupervisorError> {
    state.supervisor.start().await
}

/// Stop the sidecar. Returns once it is Stopped.
pub async fn stop_server(state: &HostState) -> Result<StatusMessage, SupervisorError> {
    state.supervisor.stop().await
}

/// Stop and start again.
pub async fn restart_server(state: &HostState) -> Result<StatusMessage, SupervisorError> {
    state.supervisor.restart().await
}

/// Proxy one call into the running sidecar and return the raw body.
pub async fn call_api(
    state: &HostState,
    endpoint: &str,
    method: Option<&str>,
    body: Option<&str>,
) -> Result<String, BridgeError> {
    let request = ApiRequest {
        path: endpoint.to_string(),
        method: method.map(str::to_string),
        body: body.map(str::to_string),
    };
    state.bridge.forward(&request).await
}

/// Snapshot of the supervisor. Never waits.
pub fn get_status(state: &HostState) -> StatusSnapshot {
    state.supervisor.status()
}

/// Start the sidecar after `delay`, in the background.
///
/// Safe to race with manual starts: the supervisor spawns at most one process.
pub fn spawn_autostart(state: &HostState, delay: Duration) -> JoinHandle<()> {
    let supervisor = Arc::clone(&state.supervisor);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match supervisor.start().await {
            Ok(message) => tracing::info!("Automatic start: {}", message.message),
            Err(e) => tracing::error!("Automatic sidecar start failed: {}", e),
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use axum::routing::get;

    use super::*;
    use crate::sidecar::{HealthCheck, Phase};
    use crate::testing::{ScriptedLauncher, ok_health_app};

    fn host(launcher: Arc<ScriptedLauncher>) -> HostState {
        let config = SidecarConfig {
            health_check: HealthCheck::Http {
                path: "/health".to_string(),
            },
            health_poll_interval: Duration::from_millis(50),
            startup_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
            ..SidecarConfig::for_executable("scripted-sidecar")
        };
        HostState::with_supervisor(Arc::new(SidecarSupervisor::with_launcher(config, launcher)))
    }

    fn data_launcher() -> Arc<ScriptedLauncher> {
        Arc::new(ScriptedLauncher::new(|| {
            ok_health_app().route(
                "/api/data",
                get(|| async { r#"{"data":[],"total":0}"# }),
            )
        }))
    }

    #[tokio::test]
    async fn test_call_before_start_is_not_running() {
        let launcher = data_launcher();
        let state = host(launcher.clone());

        let err = call_api(&state, "/api/data", None, None).await.unwrap_err();
        assert_eq!(err, BridgeError::NotRunning);
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_start_call_stop() {
        let state = host(data_launcher());

        let started = start_server(&state).await.unwrap();
        assert!(started.message.starts_with("Sidecar started on http://127.0.0.1:"));

        let body = call_api(&state, "/api/data", Some("GET"), None).await.unwrap();
        assert_eq!(body, r#"{"data":[],"total":0}"#);

        let status = get_status(&state);
        assert_eq!(status.phase, Phase::Running);
        assert!(status.pid.is_some());

        stop_server(&state).await.unwrap();
        let err = call_api(&state, "/api/data", None, None).await.unwrap_err();
        assert_eq!(err, BridgeError::NotRunning);
    }

    #[tokio::test]
    async fn test_failed_call_does_not_change_phase() {
        let state = host(data_launcher());
        start_server(&state).await.unwrap();

        let err = call_api(&state, "/api/nope", None, None).await.unwrap_err();
        assert!(matches!(err, BridgeError::UpstreamError { status: 404, .. }));
        assert_eq!(get_status(&state).phase, Phase::Running);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_autostart_races_manual_start() {
        let launcher = data_launcher();
        let state = host(launcher.clone());

        let auto = spawn_autostart(&state, Duration::from_millis(10));
        let manual = start_server(&state).await.unwrap();
        auto.await.unwrap();

        assert_eq!(manual.phase, Phase::Running);
        assert_eq!(get_status(&state).phase, Phase::Running);
        assert_eq!(launcher.launch_count(), 1);

        restart_server(&state).await.unwrap();
        assert_eq!(launcher.launch_count(), 2);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_does_not_wait_for_start() {
        let launcher = Arc::new(ScriptedLauncher::silent());
        let state = host(launcher);

        let starter = {
            let state = state.clone();
            tokio::spawn(async move { start_server(&state).await })
        };
        let mut rx = state.supervisor().subscribe();
        rx.wait_for(|s| s.phase() == Phase::Starting).await.unwrap();

        assert_eq!(get_status(&state).phase, Phase::Starting);

        stop_server(&state).await.unwrap();
        assert_eq!(
            starter.await.unwrap().unwrap_err(),
            SupervisorError::StartAborted
        );
    }

    #[tokio::test]
    async fn test_aborted_autostart_does_not_block_shutdown() {
        let launcher = Arc::new(ScriptedLauncher::silent());
        let state = host(launcher.clone());

        let auto = spawn_autostart(&state, Duration::ZERO);
        let mut rx = state.supervisor().subscribe();
        rx.wait_for(|s| s.phase() == Phase::Starting && s.port().is_some())
            .await
            .unwrap();
        auto.abort();

        tokio::time::timeout(Duration::from_secs(5), state.shutdown())
            .await
            .expect("shutdown did not complete");
        assert_eq!(get_status(&state).phase, Phase::Stopped);
        assert!(launcher.handles()[0].has_exited());
    }
}
