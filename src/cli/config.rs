//! Configuration inspection CLI commands.
//!
//! Shows the configuration resolved from the environment (and `.env`).

use clap::Subcommand;
use serde_json::Value;

use crate::config::Config;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// List all resolved settings and their values
    List {
        /// Show only settings matching this prefix (e.g., "sidecar.health")
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Get a specific setting value
    Get {
        /// Setting path (e.g., "sidecar.port")
        path: String,
    },

    /// Print the resolved configuration as JSON
    Json,
}

/// Run a config command.
pub fn run_config_command(cmd: ConfigCommand) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    match cmd {
        ConfigCommand::List { filter } => list_settings(&config, filter.as_deref()),
        ConfigCommand::Get { path } => get_setting(&config, &path),
        ConfigCommand::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Flatten the configuration into `(dotted.path, display value)` pairs.
pub fn settings(config: &Config) -> anyhow::Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    flatten("", &serde_json::to_value(config)?, &mut out);
    Ok(out)
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, value, out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Null => out.push((prefix.to_string(), "(unset)".to_string())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

fn list_settings(config: &Config, filter: Option<&str>) -> anyhow::Result<()> {
    let all = settings(config)?;
    let max_key_len = all.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    println!("Settings (source: environment):");
    println!();

    for (key, value) in all {
        if let Some(f) = filter
            && !key.starts_with(f)
        {
            continue;
        }
        println!("  {:width$}  {}", key, value, width = max_key_len);
    }

    Ok(())
}

fn get_setting(config: &Config, path: &str) -> anyhow::Result<()> {
    match settings(config)?.into_iter().find(|(k, _)| k == path) {
        Some((_, value)) => {
            println!("{}", value);
            Ok(())
        }
        None => anyhow::bail!("Setting not found: {}", path),
    }
}
