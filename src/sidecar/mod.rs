//! Local HTTP sidecar supervision.
//!
//! Runs an auxiliary HTTP server as a child process of the host and lets the
//! host start, stop, health-check and proxy requests into it without ever
//! touching the process or a socket directly.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          SidecarSupervisor                                 │
//! │                                                                            │
//! │   start()                                                                  │
//! │     │                                                                      │
//! │     ▼                                                                      │
//! │   ┌──────────────┐     ┌──────────────┐     ┌──────────────────────────┐   │
//! │   │ Resolve Port │────▶│ Spawn Child  │────▶│ Poll Readiness Endpoint  │   │
//! │   │              │     │ (PORT=<n>)   │     │ until ready / deadline   │   │
//! │   └──────────────┘     └──────────────┘     └──────────────────────────┘   │
//! │                              │                     │                       │
//! │                              ▼                     ▼                       │
//! │                       ┌──────────────┐     ┌──────────────────────────┐    │
//! │                       │ Exit Watcher │     │ Running (port recorded)  │    │
//! │                       │ (crash)      │     │                          │    │
//! │                       └──────────────┘     └──────────────────────────┘    │
//! │                                                    │                       │
//! │                                                    ▼                       │
//! │                                            ┌──────────────────────────┐    │
//! │                                            │ ApiBridge::forward()     │    │
//! │                                            │ http://host:<port><path> │    │
//! │                                            └──────────────────────────┘    │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sidecar_supervisor::sidecar::{ApiBridge, ApiRequest, SidecarConfig, SidecarSupervisor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SidecarConfig {
//!     preferred_port: Some(3001),
//!     ..SidecarConfig::for_executable("./binaries/nextjs-server")
//! };
//!
//! let supervisor = SidecarSupervisor::new(config);
//! let bridge = ApiBridge::new(&supervisor);
//!
//! supervisor.start().await?;
//! let body = bridge.forward(&ApiRequest::get("/api/data")).await?;
//! println!("{body}");
//!
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod port;
pub mod process;
pub mod state;

pub use bridge::{ApiBridge, ApiRequest};
pub use config::{HealthCheck, SidecarConfig, SidecarEndpoint};
pub use error::{BridgeError, Result, SupervisorError};
pub use manager::SidecarSupervisor;
pub use process::{CommandLauncher, OutputSink, OutputStream, ProcessHandle, ProcessLauncher};
pub use state::{Phase, StatusMessage, StatusSnapshot};
