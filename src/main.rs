//! Sidecar supervisor - main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sidecar_supervisor::{
    cli::{Cli, Command, run_config_command, run_console},
    commands::{self, HostState},
    config::Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    // Config commands only print, keep logging quiet
    if let Some(Command::Config(config_cmd)) = &cli.command {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();

        return run_config_command(config_cmd.clone());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sidecar_supervisor=info,sidecar::output=info"));

    // Logs go to stderr; stdout carries command results
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Loaded sidecar configuration for {}",
        config.sidecar.executable.display()
    );

    let state = HostState::new(config.sidecar.to_supervisor_config());

    if cli.should_run_console() {
        let no_autostart = matches!(cli.command, Some(Command::Run { no_autostart: true }));
        let autostart = (config.sidecar.autostart && !no_autostart)
            .then(|| config.sidecar.autostart_delay());
        return run_console(state, autostart).await;
    }

    if let Some(Command::Call { path, method, body }) = cli.command {
        let result = match commands::start_server(&state).await {
            Ok(_) => commands::call_api(&state, &path, method.as_deref(), body.as_deref())
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        state.shutdown().await;
        println!("{}", result?);
    }
    Ok(())
}
