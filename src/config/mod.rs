//! Configuration for the host, loaded from environment variables.

mod helpers;
mod sidecar;

pub use helpers::EnvVars;
pub use sidecar::{CHILD_ENV_PREFIX, SidecarConfig};

use serde::Serialize;

use crate::error::ConfigError;

/// Main configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub sidecar: SidecarConfig,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&EnvVars::from_process())
    }

    /// Load configuration from an explicit snapshot.
    pub fn from_vars(env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            sidecar: SidecarConfig::resolve(env)?,
        })
    }
}
