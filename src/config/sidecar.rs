use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::config::helpers::{EnvVars, optional_env, parse_bool_env, parse_optional_env};
use crate::error::ConfigError;

/// Prefix for variables forwarded into the child's environment.
pub const CHILD_ENV_PREFIX: &str = "SIDECAR_ENV_";

/// Sidecar configuration as read from the environment.
///
/// Converted into the runtime [`crate::sidecar::SidecarConfig`] with
/// [`SidecarConfig::to_supervisor_config`].
#[derive(Debug, Clone, Serialize)]
pub struct SidecarConfig {
    /// Path to the sidecar executable artifact.
    pub executable: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
    /// Extra child environment, from `SIDECAR_ENV_<NAME>`.
    pub env: Vec<(String, String)>,
    /// Preferred port, used when free.
    pub port: Option<u16>,
    /// Env var carrying the port to the child.
    pub port_env: String,
    pub host: String,
    /// `http` or `tcp`.
    pub health_check: String,
    pub health_path: String,
    pub startup_timeout_secs: u64,
    pub health_poll_interval_ms: u64,
    pub health_attempt_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub shutdown_grace_ms: u64,
    /// Start the sidecar when the host loads.
    pub autostart: bool,
    pub autostart_delay_ms: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::new(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            port: None,
            port_env: "PORT".to_string(),
            host: "127.0.0.1".to_string(),
            health_check: "http".to_string(),
            health_path: "/api/health".to_string(),
            startup_timeout_secs: 20,
            health_poll_interval_ms: 250,
            health_attempt_timeout_ms: 1000,
            request_timeout_secs: 30,
            shutdown_grace_ms: 3000,
            autostart: true,
            autostart_delay_ms: 1000,
        }
    }
}

fn positive(key: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

impl SidecarConfig {
    pub(crate) fn resolve(env: &EnvVars) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let executable = optional_env(env, "SIDECAR_EXECUTABLE")?
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "SIDECAR_EXECUTABLE".to_string(),
                hint: "Set SIDECAR_EXECUTABLE to the path of the sidecar server binary".to_string(),
            })?;

        let args = optional_env(env, "SIDECAR_ARGS")?
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let working_dir = optional_env(env, "SIDECAR_WORKING_DIR")?.map(PathBuf::from);
        if let Some(ref dir) = working_dir
            && !dir.is_dir()
        {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_WORKING_DIR".to_string(),
                message: format!("'{}' is not a directory", dir.display()),
            });
        }

        let port = optional_env(env, "SIDECAR_PORT")?
            .map(|s| s.parse::<u16>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "SIDECAR_PORT".to_string(),
                message: format!("must be a port number: {e}"),
            })?;
        if port == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_PORT".to_string(),
                message: "must be between 1 and 65535".to_string(),
            });
        }

        let health_check = optional_env(env, "SIDECAR_HEALTH_CHECK")?
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or(defaults.health_check);
        if health_check != "http" && health_check != "tcp" {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_HEALTH_CHECK".to_string(),
                message: format!("must be 'http' or 'tcp', got '{health_check}'"),
            });
        }

        let health_path = optional_env(env, "SIDECAR_HEALTH_PATH")?.unwrap_or(defaults.health_path);
        if !health_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_HEALTH_PATH".to_string(),
                message: "must start with '/'".to_string(),
            });
        }

        Ok(Self {
            executable,
            args,
            working_dir,
            env: env.with_prefix(CHILD_ENV_PREFIX),
            port,
            port_env: optional_env(env, "SIDECAR_PORT_ENV")?.unwrap_or(defaults.port_env),
            host: optional_env(env, "SIDECAR_HOST")?.unwrap_or(defaults.host),
            health_check,
            health_path,
            startup_timeout_secs: positive(
                "SIDECAR_STARTUP_TIMEOUT_SECS",
                parse_optional_env(
                    env,
                    "SIDECAR_STARTUP_TIMEOUT_SECS",
                    defaults.startup_timeout_secs,
                )?,
            )?,
            health_poll_interval_ms: positive(
                "SIDECAR_HEALTH_POLL_INTERVAL_MS",
                parse_optional_env(
                    env,
                    "SIDECAR_HEALTH_POLL_INTERVAL_MS",
                    defaults.health_poll_interval_ms,
                )?,
            )?,
            health_attempt_timeout_ms: positive(
                "SIDECAR_HEALTH_ATTEMPT_TIMEOUT_MS",
                parse_optional_env(
                    env,
                    "SIDECAR_HEALTH_ATTEMPT_TIMEOUT_MS",
                    defaults.health_attempt_timeout_ms,
                )?,
            )?,
            request_timeout_secs: positive(
                "SIDECAR_REQUEST_TIMEOUT_SECS",
                parse_optional_env(
                    env,
                    "SIDECAR_REQUEST_TIMEOUT_SECS",
                    defaults.request_timeout_secs,
                )?,
            )?,
            shutdown_grace_ms: parse_optional_env(
                env,
                "SIDECAR_SHUTDOWN_GRACE_MS",
                defaults.shutdown_grace_ms,
            )?,
            autostart: parse_bool_env(env, "SIDECAR_AUTOSTART", defaults.autostart)?,
            autostart_delay_ms: parse_optional_env(
                env,
                "SIDECAR_AUTOSTART_DELAY_MS",
                defaults.autostart_delay_ms,
            )?,
        })
    }

    /// Delay before the automatic start on host load.
    pub fn autostart_delay(&self) -> Duration {
        Duration::from_millis(self.autostart_delay_ms)
    }

    /// Create the runtime supervisor configuration.
    pub fn to_supervisor_config(&self) -> crate::sidecar::SidecarConfig {
        let health_check = if self.health_check == "tcp" {
            crate::sidecar::HealthCheck::Tcp
        } else {
            crate::sidecar::HealthCheck::Http {
                path: self.health_path.clone(),
            }
        };

        crate::sidecar::SidecarConfig {
            executable: self.executable.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            preferred_port: self.port,
            port_env: self.port_env.clone(),
            host: self.host.clone(),
            health_check,
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            health_poll_interval: Duration::from_millis(self.health_poll_interval_ms),
            health_attempt_timeout: Duration::from_millis(self.health_attempt_timeout_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvVars {
        EnvVars::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_defaults_with_only_executable() {
        let config =
            SidecarConfig::resolve(&env(&[("SIDECAR_EXECUTABLE", "./binaries/server")])).unwrap();

        assert_eq!(config.executable, PathBuf::from("./binaries/server"));
        assert_eq!(config.port, None);
        assert_eq!(config.port_env, "PORT");
        assert!(config.autostart);

        let runtime = config.to_supervisor_config();
        assert_eq!(runtime.startup_timeout, Duration::from_secs(20));
        assert_eq!(runtime.health_poll_interval, Duration::from_millis(250));
        assert_eq!(runtime.shutdown_grace, Duration::from_secs(3));
        assert_eq!(
            runtime.health_check,
            crate::sidecar::HealthCheck::Http {
                path: "/api/health".to_string()
            }
        );
    }

    #[test]
    fn test_missing_executable() {
        let err = SidecarConfig::resolve(&env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "SIDECAR_EXECUTABLE"));
    }

    #[test]
    fn test_full_environment() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();
        let config = SidecarConfig::resolve(&env(&[
            ("SIDECAR_EXECUTABLE", "/opt/app/server"),
            ("SIDECAR_ARGS", "--quiet  --mode prod"),
            ("SIDECAR_WORKING_DIR", dir_str),
            ("SIDECAR_PORT", "3001"),
            ("SIDECAR_PORT_ENV", "APP_PORT"),
            ("SIDECAR_HEALTH_CHECK", "TCP"),
            ("SIDECAR_STARTUP_TIMEOUT_SECS", "5"),
            ("SIDECAR_AUTOSTART", "false"),
            ("SIDECAR_ENV_NODE_ENV", "production"),
        ]))
        .unwrap();

        assert_eq!(config.args, vec!["--quiet", "--mode", "prod"]);
        assert_eq!(config.working_dir.as_deref(), Some(dir.path()));
        assert!(!config.autostart);

        let runtime = config.to_supervisor_config();
        assert_eq!(runtime.preferred_port, Some(3001));
        assert_eq!(runtime.port_env, "APP_PORT");
        assert_eq!(runtime.health_check, crate::sidecar::HealthCheck::Tcp);
        assert_eq!(runtime.startup_timeout, Duration::from_secs(5));
        assert_eq!(
            runtime.env,
            vec![("NODE_ENV".to_string(), "production".to_string())]
        );
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            ("SIDECAR_PORT", "0"),
            ("SIDECAR_PORT", "70000"),
            ("SIDECAR_HEALTH_CHECK", "grpc"),
            ("SIDECAR_HEALTH_PATH", "health"),
            ("SIDECAR_HEALTH_POLL_INTERVAL_MS", "0"),
            ("SIDECAR_AUTOSTART", "sometimes"),
            ("SIDECAR_WORKING_DIR", "/definitely/not/a/dir"),
        ];
        for (key, value) in cases {
            let err = SidecarConfig::resolve(&env(&[("SIDECAR_EXECUTABLE", "x"), (key, value)]))
                .unwrap_err();
            assert_eq!(err.key(), key, "{key}={value}");
        }
    }
}
