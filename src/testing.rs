//! Test helpers for exercising the supervisor without a real sidecar build.
//!
//! Provides:
//! - [`FakeSidecar`]: an in-process axum server on an ephemeral loopback port
//! - [`ScriptedLauncher`]: a [`ProcessLauncher`] that spawns a placeholder
//!   child and serves a scripted app on the port it was launched with
//! - [`CountingLauncher`]: wraps the real launcher and counts spawns
//! - [`CaptureSink`]: an [`OutputSink`] that records child output
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sidecar_supervisor::sidecar::{SidecarConfig, SidecarSupervisor};
//! use sidecar_supervisor::testing::ScriptedLauncher;
//!
//! # async fn example() {
//! let launcher = Arc::new(ScriptedLauncher::healthy());
//! let supervisor = SidecarSupervisor::with_launcher(SidecarConfig::default(), launcher.clone());
//! supervisor.start().await.unwrap();
//! assert_eq!(launcher.launch_count(), 1);
//! # }
//! ```

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::{Notify, oneshot};

use crate::sidecar::error::{Result, SupervisorError};
use crate::sidecar::process::{
    CommandLauncher, LaunchSpec, OutputSink, OutputStream, ProcessHandle, ProcessLauncher,
};

/// Find a loopback port that is free right now.
pub fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("failed to bind ephemeral port");
    listener
        .local_addr()
        .expect("failed to read local addr")
        .port()
}

/// Router answering the readiness shape on `/health` and `/api/health`.
pub fn ok_health_app() -> Router {
    let health = get(|| async {
        axum::Json(serde_json::json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "service": "fake sidecar",
        }))
    });
    Router::new()
        .route("/health", health.clone())
        .route("/api/health", health)
}

/// An axum app served in-process on an ephemeral loopback port.
///
/// The server shuts down when this value is dropped.
pub struct FakeSidecar {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakeSidecar {
    /// Serve `app` on a fresh port.
    pub async fn serve(app: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake sidecar");
        let port = listener.local_addr().expect("no local addr").port();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });
        Self {
            port,
            shutdown: Some(tx),
        }
    }

    /// Serve the standard readiness endpoints.
    pub async fn healthy() -> Self {
        Self::serve(ok_health_app()).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for FakeSidecar {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Records every line a child writes.
#[derive(Default)]
pub struct CaptureSink {
    lines: Mutex<Vec<(OutputStream, String)>>,
    notify: Notify,
}

impl CaptureSink {
    /// All captured lines so far.
    pub fn lines(&self) -> Vec<(OutputStream, String)> {
        self.lines.lock().expect("capture sink poisoned").clone()
    }

    /// Whether a line on `stream` contains `needle`.
    pub fn contains(&self, stream: OutputStream, needle: &str) -> bool {
        self.lines()
            .iter()
            .any(|(s, line)| *s == stream && line.contains(needle))
    }

    /// Wait until any captured line contains `needle`.
    pub async fn wait_for_line(&self, needle: &str, timeout: Duration) {
        let found = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.lines().iter().any(|(_, line)| line.contains(needle)) {
                    return;
                }
                notified.await;
            }
        })
        .await;
        assert!(found.is_ok(), "no output line containing {needle:?}");
    }
}

impl OutputSink for CaptureSink {
    fn line(&self, stream: OutputStream, line: &str) {
        self.lines
            .lock()
            .expect("capture sink poisoned")
            .push((stream, line.to_string()));
        self.notify.notify_waiters();
    }
}

type AppFactory = Arc<dyn Fn() -> Router + Send + Sync>;

enum Script {
    /// Placeholder child plus an app served on the launch port.
    Serve(AppFactory),
    /// Placeholder child, nothing listening.
    Silent,
    /// Child that exits right away.
    ExitsImmediately,
    /// Every launch fails.
    Unlaunchable,
    /// First launch fails, later launches serve the app.
    FlakyFirst(AppFactory),
}

/// A launcher whose "sidecar" is a placeholder process plus an in-process app.
///
/// The app stops serving as soon as the placeholder process exits, so
/// killing the handle looks like a sidecar crash.
pub struct ScriptedLauncher {
    script: Script,
    launched: Mutex<Vec<LaunchSpec>>,
    handles: Mutex<Vec<ProcessHandle>>,
}

impl ScriptedLauncher {
    /// Serve a fresh app from `factory` for each launch.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Router + Send + Sync + 'static,
    {
        Self::with_script(Script::Serve(Arc::new(factory)))
    }

    /// Serve the standard readiness endpoints.
    pub fn healthy() -> Self {
        Self::new(ok_health_app)
    }

    /// Spawn a process that never opens its port.
    pub fn silent() -> Self {
        Self::with_script(Script::Silent)
    }

    /// Spawn a process that exits before becoming ready.
    pub fn exits_immediately() -> Self {
        Self::with_script(Script::ExitsImmediately)
    }

    /// Fail every launch with `SpawnFailed`.
    pub fn unlaunchable() -> Self {
        Self::with_script(Script::Unlaunchable)
    }

    /// Fail the first launch, then serve the readiness endpoints.
    pub fn flaky_first_launch() -> Self {
        Self::with_script(Script::FlakyFirst(Arc::new(ok_health_app)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            launched: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Number of launch attempts, including failed ones.
    pub fn launch_count(&self) -> usize {
        self.launched().len()
    }

    /// Specs of every launch attempt, in order.
    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().expect("launcher poisoned").clone()
    }

    /// Handles of every process spawned, in order.
    pub fn handles(&self) -> Vec<ProcessHandle> {
        self.handles.lock().expect("launcher poisoned").clone()
    }
}

fn spawn_failed(spec: &LaunchSpec, reason: impl Into<String>) -> SupervisorError {
    SupervisorError::SpawnFailed {
        executable: spec.executable.display().to_string(),
        reason: reason.into(),
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        let attempt = {
            let mut launched = self.launched.lock().expect("launcher poisoned");
            launched.push(spec.clone());
            launched.len()
        };

        let app = match &self.script {
            Script::Unlaunchable => return Err(spawn_failed(spec, "scripted failure")),
            Script::FlakyFirst(_) if attempt == 1 => {
                return Err(spawn_failed(spec, "scripted first-launch failure"));
            }
            Script::Serve(factory) | Script::FlakyFirst(factory) => Some(factory()),
            Script::Silent | Script::ExitsImmediately => None,
        };

        let mut cmd = if matches!(self.script, Script::ExitsImmediately) {
            let mut c = Command::new("sh");
            c.args(["-c", "exit 3"]);
            c
        } else {
            let mut c = Command::new("sleep");
            c.arg("30");
            c
        };
        let child = cmd
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_failed(spec, e.to_string()))?;
        let handle = ProcessHandle::from_child(child);

        if let Some(app) = app {
            let port = spec
                .env
                .iter()
                .rev()
                .find(|(k, _)| k == "PORT")
                .and_then(|(_, v)| v.parse::<u16>().ok())
                .ok_or_else(|| spawn_failed(spec, "no PORT in launch env"))?;
            let listener = TcpListener::bind(("127.0.0.1", port))
                .await
                .map_err(|e| spawn_failed(spec, e.to_string()))?;
            let exited = handle.clone();
            tokio::spawn(async move {
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        exited.wait_exit().await;
                    })
                    .await;
            });
        }

        self.handles
            .lock()
            .expect("launcher poisoned")
            .push(handle.clone());
        Ok(handle)
    }
}

/// The real [`CommandLauncher`], counting how many processes it spawned.
pub struct CountingLauncher {
    inner: CommandLauncher,
    spawned: AtomicU32,
}

impl CountingLauncher {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            inner: CommandLauncher::new(sink),
            spawned: AtomicU32::new(0),
        }
    }

    /// Number of successful spawns.
    pub fn spawned(&self) -> u32 {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for CountingLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        let handle = self.inner.launch(spec).await?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }
}
