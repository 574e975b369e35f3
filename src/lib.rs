//! Supervise a local HTTP sidecar process and proxy host calls into it.
//!
//! The core lives in [`sidecar`]; [`commands`] is the surface a host UI
//! binds to, and [`config`] loads everything from the environment.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod sidecar;
pub mod testing;
