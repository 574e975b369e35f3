//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the interactive host console (`run`)
//! - Forwarding one request to a freshly started sidecar (`call`)
//! - Inspecting configuration (`config list`, `config get`, `config json`)

mod config;
mod console;

pub use config::{ConfigCommand, run_config_command, settings};
pub use console::{ConsoleCommand, execute, run_console};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sidecar-supervisor")]
#[command(about = "Run a local HTTP sidecar and forward requests into it")]
#[command(
    long_about = "Supervises a sidecar HTTP server as a child process. Configure it with SIDECAR_* environment variables.\nExamples:\n  sidecar-supervisor run  # Interactive console\n  sidecar-supervisor call /api/data  # One-shot request"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the interactive console (default if no subcommand given)
    #[command(
        about = "Run the host console",
        long_about = "Starts the console, optionally auto-starting the sidecar.\nExample: sidecar-supervisor run --no-autostart"
    )]
    Run {
        /// Do not start the sidecar automatically
        #[arg(long)]
        no_autostart: bool,
    },

    /// Start the sidecar, forward one request, print the body, stop
    #[command(
        about = "Forward one request",
        long_about = "Starts the sidecar, sends one request, prints the raw body and stops.\nExample: sidecar-supervisor call /api/greet -X POST -d '{\"name\":\"Ada\"}'"
    )]
    Call {
        /// Endpoint path (e.g., "/api/data")
        path: String,

        /// HTTP method
        #[arg(short = 'X', long)]
        method: Option<String>,

        /// Request body (sent as JSON)
        #[arg(short = 'd', long)]
        body: Option<String>,
    },

    /// Inspect configuration
    #[command(
        subcommand,
        about = "Show resolved config",
        long_about = "Lists configuration resolved from the environment.\nExample: sidecar-supervisor config list"
    )]
    Config(ConfigCommand),
}

impl Cli {
    /// Whether to run the console (default behavior or explicit `run`).
    pub fn should_run_console(&self) -> bool {
        matches!(self.command, None | Some(Command::Run { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_version() {
        let cmd = Cli::command();
        assert_eq!(
            cmd.get_version().unwrap_or("unknown"),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_is_console() {
        let cli = Cli::try_parse_from(["sidecar-supervisor"]).unwrap();
        assert!(cli.should_run_console());

        let cli = Cli::try_parse_from(["sidecar-supervisor", "run", "--no-autostart"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Run { no_autostart: true })));
    }

    #[test]
    fn test_call_arguments() {
        let cli = Cli::try_parse_from([
            "sidecar-supervisor",
            "call",
            "/api/greet",
            "-X",
            "POST",
            "--body",
            r#"{"name":"Ada"}"#,
        ])
        .unwrap();
        assert!(!cli.should_run_console());
        match cli.command {
            Some(Command::Call { path, method, body }) => {
                assert_eq!(path, "/api/greet");
                assert_eq!(method.as_deref(), Some("POST"));
                assert_eq!(body.as_deref(), Some(r#"{"name":"Ada"}"#));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
