//! Sidecar lifecycle state machine.
//!
//! All transitions happen inside `watch::Sender::send_if_modified`, which
//! holds the channel's write lock for the duration of the closure. That lock
//! is the one mutual-exclusion boundary for phase, process and port; it is
//! never held across an `.await`.

use std::sync::Arc;

use tokio::sync::watch;

use crate::sidecar::config::{SidecarConfig, SidecarEndpoint};
use crate::sidecar::error::{Result, SupervisorError};
use crate::sidecar::health::{HealthMonitor, Interrupt, Probe, Readiness};
use crate::sidecar::port;
use crate::sidecar::process::{CommandLauncher, LaunchSpec, ProcessHandle, ProcessLauncher};
use crate::sidecar::state::{Phase, StatusMessage, StatusSnapshot, SupervisorState};

enum StartAction {
    Launch(u64),
    AlreadyRunning,
    Wait(Phase),
}

enum StopAction {
    NothingToStop,
    Wait,
    Terminate(u64, Option<ProcessHandle>),
}

/// Owns the sidecar process, its port and its lifecycle.
///
/// `start()` and `stop()` are idempotent and safe to call concurrently from
/// independent callers: a caller that finds an operation in flight waits for
/// its outcome instead of starting a conflicting one.
///
/// A start runs on its own task. Dropping a `start()` future only stops the
/// caller from waiting; the run still ends in Running, Failed or Stopped.
pub struct SidecarSupervisor {
    inner: Arc<Lifecycle>,
}

/// State shared between the supervisor and the task driving a start.
struct Lifecycle {
    config: SidecarConfig,
    state: Arc<watch::Sender<SupervisorState>>,
    launcher: Arc<dyn ProcessLauncher>,
    health: HealthMonitor,
}

impl SidecarSupervisor {
    /// Create a supervisor that launches the configured executable.
    pub fn new(config: SidecarConfig) -> Self {
        Self::with_launcher(config, Arc::new(CommandLauncher::default()))
    }

    /// Create a supervisor with a custom process launcher.
    pub fn with_launcher(config: SidecarConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let (state, _) = watch::channel(SupervisorState::default());
        let health = HealthMonitor::new(&config);
        Self {
            inner: Arc::new(Lifecycle {
                config,
                state: Arc::new(state),
                launcher,
                health,
            }),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SidecarConfig {
        &self.inner.config
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.borrow().phase()
    }

    /// Snapshot of the current state. Never waits on an in-flight operation.
    pub fn status(&self) -> StatusSnapshot {
        self.inner.state.borrow().snapshot()
    }

    /// Read-only view of the state for consumers such as the API bridge.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.inner.state.subscribe()
    }

    /// Endpoint of the sidecar while it is Running.
    pub fn endpoint(&self) -> Option<SidecarEndpoint> {
        self.inner.endpoint()
    }

    /// Start the sidecar and wait until it is Running or Failed.
    ///
    /// If a start is already in flight, attaches to its outcome. If the
    /// sidecar is already Running, returns immediately.
    pub async fn start(&self) -> Result<StatusMessage> {
        let inner = &self.inner;
        let mut rx = inner.state.subscribe();
        loop {
            let mut action = StartAction::AlreadyRunning;
            inner.state.send_if_modified(|s| match s.phase {
                Phase::Running => false,
                Phase::Starting | Phase::Stopping => {
                    action = StartAction::Wait(s.phase);
                    false
                }
                Phase::Stopped | Phase::Failed => {
                    action = StartAction::Launch(s.begin_start());
                    true
                }
            });

            match action {
                StartAction::Launch(run) => {
                    let lifecycle = Arc::clone(inner);
                    let task = tokio::spawn(async move { lifecycle.run_start(run).await });
                    return match task.await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!("Sidecar start task ended abnormally: {}", e);
                            let process = inner.process_of(run);
                            Err(inner.abort_start(run, process).await)
                        }
                    };
                }
                StartAction::AlreadyRunning => {
                    return Ok(inner.message("Sidecar is already running"));
                }
                StartAction::Wait(Phase::Starting) => {
                    tracing::debug!("Start already in flight, waiting for its outcome");
                    let settled = inner.settle(&mut rx).await;
                    match settled.phase {
                        Phase::Running => return Ok(inner.started_message()),
                        Phase::Failed => {
                            return Err(settled
                                .last_error
                                .unwrap_or(SupervisorError::StartAborted));
                        }
                        Phase::Stopped => return Err(SupervisorError::StartAborted),
                        Phase::Starting | Phase::Stopping => continue,
                    }
                }
                StartAction::Wait(_) => {
                    tracing::debug!("Stop in flight, starting once it completes");
                    inner.settle(&mut rx).await;
                }
            }
        }
    }

    /// Stop the sidecar and wait until it is Stopped.
    ///
    /// Stopping a Stopped or Failed supervisor is a no-op. A stop issued while
    /// Starting is honored once the current readiness attempt completes.
    pub async fn stop(&self) -> Result<StatusMessage> {
        let inner = &self.inner;
        let mut rx = inner.state.subscribe();
        let mut waited = false;
        loop {
            let mut action = StopAction::NothingToStop;
            inner.state.send_if_modified(|s| match s.phase {
                Phase::Stopped | Phase::Failed => false,
                Phase::Starting => {
                    action = StopAction::Wait;
                    !std::mem::replace(&mut s.stop_requested, true)
                }
                Phase::Stopping => {
                    action = StopAction::Wait;
                    false
                }
                Phase::Running => {
                    action = StopAction::Terminate(s.run, s.begin_stop());
                    true
                }
            });

            match action {
                StopAction::NothingToStop if waited => {
                    return Ok(inner.message("Sidecar stopped"));
                }
                StopAction::NothingToStop => return Ok(inner.message("Sidecar is not running")),
                StopAction::Wait => {
                    waited = true;
                    inner.settle(&mut rx).await;
                }
                StopAction::Terminate(run, process) => {
                    inner.terminate_run(run, process).await;
                    return Ok(inner.message("Sidecar stopped"));
                }
            }
        }
    }

    /// Stop, then start again on a freshly resolved port.
    pub async fn restart(&self) -> Result<StatusMessage> {
        self.stop().await?;
        self.start().await
    }

    /// Best-effort stop for host shutdown.
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop().await {
            tracing::warn!("Sidecar shutdown failed: {}", e);
        }
    }
}

impl Lifecycle {
    async fn run_start(&self, run: u64) -> Result<StatusMessage> {
        tracing::info!("Starting sidecar: {}", self.config.executable.display());

        let resolved = match port::resolve(&self.config.host, self.config.preferred_port) {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.fail(run, e)),
        };
        if resolved.preferred_busy
            && let Some(preferred) = self.config.preferred_port
        {
            self.probe_orphan(preferred).await;
        }

        let spec = LaunchSpec::for_port(&self.config, resolved.port);
        let process = match self.launcher.launch(&spec).await {
            Ok(process) => process,
            Err(e) => return Err(self.fail(run, e)),
        };
        self.state
            .send_if_modified(|s| s.attach(run, resolved.port, process.clone()));
        self.watch_for_crash(run, process.clone());

        let readiness = self
            .health
            .await_ready(resolved.port, self.config.startup_timeout, || {
                if self.state.borrow().stop_requested {
                    return Some(Interrupt::StopRequested);
                }
                process
                    .exit_info()
                    .map(|info| Interrupt::Exited(info.description))
            })
            .await;

        match readiness {
            Readiness::Ready { attempts, elapsed } => {
                let mut outcome = Ok(());
                self.state.send_if_modified(|s| {
                    if s.run != run {
                        return false;
                    }
                    if s.stop_requested {
                        outcome = Err(Interrupt::StopRequested);
                        return false;
                    }
                    if let Some(info) = process.exit_info() {
                        outcome = Err(Interrupt::Exited(info.description));
                        return false;
                    }
                    s.mark_running();
                    true
                });
                match outcome {
                    Ok(()) => {
                        tracing::info!(
                            "Sidecar ready at {} after {:?} ({} attempts)",
                            self.config.endpoint(resolved.port),
                            elapsed,
                            attempts
                        );
                        Ok(self.started_message())
                    }
                    Err(Interrupt::StopRequested) => {
                        Err(self.abort_start(run, Some(process)).await)
                    }
                    Err(Interrupt::Exited(status)) => {
                        Err(self.fail(run, SupervisorError::ProcessCrashed { status }))
                    }
                }
            }
            Readiness::TimedOut { attempts, last } => {
                tracing::warn!(
                    "Sidecar not ready on port {} within {:?}, terminating",
                    resolved.port,
                    self.config.startup_timeout
                );
                process.terminate(self.config.shutdown_grace).await;
                Err(self.fail(
                    run,
                    SupervisorError::HealthCheckTimedOut {
                        port: resolved.port,
                        timeout: self.config.startup_timeout,
                        attempts,
                        last: last.to_string(),
                    },
                ))
            }
            Readiness::Interrupted(Interrupt::StopRequested) => {
                Err(self.abort_start(run, Some(process)).await)
            }
            Readiness::Interrupted(Interrupt::Exited(status)) => {
                Err(self.fail(run, SupervisorError::ProcessCrashed { status }))
            }
        }
    }

    /// The process attached to `run`, if that run is still current.
    fn process_of(&self, run: u64) -> Option<ProcessHandle> {
        let state = self.state.borrow();
        if state.run != run {
            return None;
        }
        state.process.clone()
    }

    /// Starting -> Stopping -> Stopped after a stop request.
    async fn abort_start(&self, run: u64, process: Option<ProcessHandle>) -> SupervisorError {
        tracing::info!("Stop requested while starting, terminating sidecar");
        self.state.send_if_modified(|s| {
            if s.run != run || s.phase != Phase::Starting {
                return false;
            }
            s.begin_stop();
            true
        });
        self.terminate_run(run, process).await;
        SupervisorError::StartAborted
    }

    async fn terminate_run(&self, run: u64, process: Option<ProcessHandle>) {
        if let Some(process) = process {
            tracing::info!("Stopping sidecar (pid {:?})", process.pid());
            let exit = process.terminate(self.config.shutdown_grace).await;
            tracing::debug!("Sidecar exited: {}", exit);
        }
        self.state.send_if_modified(|s| {
            if s.run != run || s.phase != Phase::Stopping {
                return false;
            }
            s.mark_stopped();
            true
        });
        tracing::info!("Sidecar stopped");
    }

    /// Move the current run to Failed and hand the error back to the caller.
    fn fail(&self, run: u64, error: SupervisorError) -> SupervisorError {
        tracing::error!("Sidecar start failed: {}", error);
        self.state.send_if_modified(|s| {
            if s.run != run {
                return false;
            }
            s.mark_failed(error.clone());
            true
        });
        error
    }

    /// Flag a Running sidecar as Failed when its process exits on its own.
    fn watch_for_crash(&self, run: u64, process: ProcessHandle) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let exit = process.wait_exit().await;
            let crashed = state.send_if_modified(|s| {
                if s.run != run || s.phase != Phase::Running {
                    return false;
                }
                s.mark_failed(SupervisorError::ProcessCrashed {
                    status: exit.description.clone(),
                });
                true
            });
            if crashed {
                tracing::error!("Sidecar process exited unexpectedly: {}", exit);
            }
        });
    }

    /// Log what occupies the preferred port if it looks like one of ours.
    async fn probe_orphan(&self, port: u16) {
        match self.health.probe(port).await {
            Probe::Ready => tracing::warn!(
                "A ready sidecar already answers on preferred port {}; it was not started \
                 by this host (possibly orphaned by an earlier run) and will be left alone",
                port
            ),
            other => {
                tracing::debug!("Preferred port {} is held by another process ({})", port, other)
            }
        }
    }

    /// Wait, bounded, until no operation is in flight.
    async fn settle(&self, rx: &mut watch::Receiver<SupervisorState>) -> SupervisorState {
        let bound = self.config.transition_bound();
        let settled = match tokio::time::timeout(bound, rx.wait_for(|s| !s.phase.is_transitional()))
            .await
        {
            Ok(Ok(state)) => Some(state.clone()),
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::warn!("In-flight sidecar operation still running after {:?}", bound);
                None
            }
        };
        settled.unwrap_or_else(|| self.state.borrow().clone())
    }

    fn endpoint(&self) -> Option<SidecarEndpoint> {
        let state = self.state.borrow();
        match (state.phase(), state.port()) {
            (Phase::Running, Some(port)) => Some(self.config.endpoint(port)),
            _ => None,
        }
    }

    fn message(&self, text: &str) -> StatusMessage {
        let state = self.state.borrow();
        StatusMessage {
            message: text.to_string(),
            phase: state.phase(),
            port: state.port(),
        }
    }

    fn started_message(&self) -> StatusMessage {
        let text = match self.endpoint() {
            Some(endpoint) => format!("Sidecar started on {}", endpoint.http_url()),
            None => "Sidecar started".to_string(),
        };
        self.message(&text)
    }
}

impl Drop for SidecarSupervisor {
    fn drop(&mut self) {
        let state = &self.inner.state;
        // An in-flight start outlives the supervisor; make it stand down.
        state.send_if_modified(|s| {
            s.phase == Phase::Starting && !std::mem::replace(&mut s.stop_requested, true)
        });
        if let Some(process) = state.borrow().process.as_ref().filter(|p| !p.has_exited()) {
            tracing::warn!(
                "SidecarSupervisor dropped without shutdown(), killing pid {:?}",
                process.pid()
            );
            process.force_kill();
        }
    }
}
