//! Spawning and terminating the sidecar child process.
//!
//! A spawned child is owned by a reaper task that waits on it and publishes
//! the exit status. [`ProcessHandle`] is a cloneable view of that task: it
//! can observe the exit, request a cooperative stop, or force a kill.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

use crate::sidecar::config::SidecarConfig;
use crate::sidecar::error::{Result, SupervisorError};

/// How long to wait for the OS to reap a force-killed child.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Destination for the child's output lines.
pub trait OutputSink: Send + Sync {
    /// Receive one line (without its trailing newline).
    fn line(&self, stream: OutputStream, line: &str);
}

/// Re-emits child output as tracing events under `sidecar::output`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => tracing::info!(target: "sidecar::output", "{}", line),
            OutputStream::Stderr => tracing::warn!(target: "sidecar::output", "{}", line),
        }
    }
}

/// Everything needed to spawn one sidecar run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Build the spec for a run on `port`, injecting the port variable.
    pub fn for_port(config: &SidecarConfig, port: u16) -> Self {
        let mut env = config.env.clone();
        env.push((config.port_env.clone(), port.to_string()));
        Self {
            executable: config.executable.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            env,
        }
    }
}

/// Spawns sidecar processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the process described by `spec`.
    async fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle>;
}

/// Launches the sidecar with `tokio::process`, piping output to a sink.
pub struct CommandLauncher {
    sink: Arc<dyn OutputSink>,
}

impl CommandLauncher {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }
}

impl Default for CommandLauncher {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            executable: spec.executable.display().to_string(),
            reason: e.to_string(),
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, OutputStream::Stdout, Arc::clone(&self.sink));
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, OutputStream::Stderr, Arc::clone(&self.sink));
        }

        let handle = ProcessHandle::from_child(child);
        tracing::debug!(
            "Spawned {} (pid {:?})",
            spec.executable.display(),
            handle.pid()
        );
        Ok(handle)
    }
}

fn forward_lines<R>(reader: R, stream: OutputStream, sink: Arc<dyn OutputSink>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink.line(stream, &line);
        }
    });
}

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Human-readable status (e.g. "exit status: 1", "signal: 9 (SIGKILL)").
    pub description: String,
}

impl ExitInfo {
    fn unknown(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            description: reason.into(),
        }
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            description: status.to_string(),
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description)
    }
}

/// Identity of a spawned sidecar and the means to end it.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    /// Take ownership of a spawned child and start reaping it.
    pub fn from_child(mut child: Child) -> Self {
        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Some(()) = kill_rx.recv() => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!("Kill of pid {:?} failed: {}", pid, e);
                    }
                    child.wait().await
                }
            };
            let info = match status {
                Ok(status) => ExitInfo::from(status),
                Err(e) => ExitInfo::unknown(format!("wait failed: {e}")),
            };
            let _ = exit_tx.send(Some(info));
        });

        Self {
            pid,
            exit: exit_rx,
            kill_tx,
        }
    }

    /// OS process id, if the child had one when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has exited and been reaped.
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Exit information, once the process has exited.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.borrow().clone()
    }

    /// Wait until the process exits.
    pub async fn wait_exit(&self) -> ExitInfo {
        let mut rx = self.exit.clone();
        let info = match rx.wait_for(Option::is_some).await {
            Ok(info) => info.clone(),
            Err(_) => None,
        };
        info.unwrap_or_else(|| ExitInfo::unknown("reaper task ended without a status"))
    }

    /// Request an immediate kill without waiting.
    pub fn force_kill(&self) {
        let _ = self.kill_tx.try_send(());
    }

    /// Stop the process: cooperative signal, bounded grace period, then kill.
    ///
    /// Terminating an already-exited process returns its exit info.
    pub async fn terminate(&self, grace: Duration) -> ExitInfo {
        if let Some(info) = self.exit_info() {
            return info;
        }

        if self.signal_graceful() {
            if let Ok(info) = tokio::time::timeout(grace, self.wait_exit()).await {
                return info;
            }
            tracing::warn!(
                "Sidecar pid {:?} did not exit within {:?}, killing",
                self.pid,
                grace
            );
        }

        self.force_kill();
        match tokio::time::timeout(KILL_WAIT, self.wait_exit()).await {
            Ok(info) => info,
            Err(_) => {
                tracing::error!("Sidecar pid {:?} still alive after kill", self.pid);
                ExitInfo::unknown("did not exit after kill")
            }
        }
    }

    #[cfg(unix)]
    fn signal_graceful(&self) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return false;
        };
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => true,
            Err(e) => {
                tracing::debug!("SIGTERM to pid {} failed: {}", pid, e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_graceful(&self) -> bool {
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::testing::CaptureSink;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec {
            executable: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: None,
            env: Vec::new(),
        }
    }

    #[test]
    fn test_launch_spec_injects_port() {
        let config = SidecarConfig {
            env: vec![("NODE_ENV".to_string(), "production".to_string())],
            ..SidecarConfig::for_executable("/opt/sidecar")
        };

        let spec = LaunchSpec::for_port(&config, 3100);
        assert_eq!(spec.executable, PathBuf::from("/opt/sidecar"));
        assert_eq!(
            spec.env,
            vec![
                ("NODE_ENV".to_string(), "production".to_string()),
                ("PORT".to_string(), "3100".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_output_goes_to_sink() {
        let sink = Arc::new(CaptureSink::default());
        let launcher = CommandLauncher::new(sink.clone());

        let handle = launcher
            .launch(&sh("echo hello; echo oops >&2"))
            .await
            .unwrap();
        let info = handle.wait_exit().await;
        assert_eq!(info.code, Some(0));

        sink.wait_for_line("oops", Duration::from_secs(5)).await;
        assert!(sink.contains(OutputStream::Stdout, "hello"));
        assert!(sink.contains(OutputStream::Stderr, "oops"));
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CaptureSink::default());
        let launcher = CommandLauncher::new(sink.clone());

        let mut spec = sh("echo \"$PORT $(pwd)\"");
        spec.env.push(("PORT".to_string(), "4321".to_string()));
        spec.working_dir = Some(dir.path().to_path_buf());

        let handle = launcher.launch(&spec).await.unwrap();
        handle.wait_exit().await;

        sink.wait_for_line("4321", Duration::from_secs(5)).await;
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(sink.contains(OutputStream::Stdout, &dir_name));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failed() {
        let launcher = CommandLauncher::default();
        let spec = LaunchSpec {
            executable: PathBuf::from("/definitely/not/a/sidecar"),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        };

        let err = launcher.launch(&spec).await.unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_terminate_is_graceful_and_idempotent() {
        let launcher = CommandLauncher::default();
        let handle = launcher.launch(&sh("exec sleep 30")).await.unwrap();
        assert!(handle.pid().is_some());
        assert!(!handle.has_exited());

        let info = handle.terminate(Duration::from_secs(5)).await;
        assert!(handle.has_exited());
        assert_eq!(info.code, None, "terminated by signal: {info}");

        let again = handle.terminate(Duration::from_secs(5)).await;
        assert_eq!(again, info);
    }

    #[tokio::test]
    async fn test_terminate_escalates_after_grace() {
        let launcher = CommandLauncher::default();
        let handle = launcher
            .launch(&sh("trap '' TERM; exec sleep 30"))
            .await
            .unwrap();
        // Give the shell time to install the trap before signalling.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let grace = Duration::from_millis(300);
        handle.terminate(grace).await;

        assert!(started.elapsed() >= grace);
        assert!(handle.has_exited());
    }
}
