//! Interactive console: the host "UI" for a supervised sidecar.
//!
//! Reads one command per line from stdin and prints one JSON value per
//! result. An optional delayed automatic start runs alongside manual
//! commands.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::commands::{self, HostState};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Restart,
    Status,
    Call {
        path: String,
        method: Option<String>,
        body: Option<String>,
    },
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse a line. Blank lines parse to `None`.
    ///
    /// `call <path> [METHOD] [BODY]`: everything after the method is the body,
    /// so JSON bodies may contain spaces.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let Some(word) = line.split_whitespace().next() else {
            return Ok(None);
        };
        let rest = line[word.len()..].trim_start();

        let command = match word.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "restart" => Self::Restart,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "call" => {
                let (path, rest) = split_word(rest);
                if path.is_empty() {
                    return Err("usage: call <path> [METHOD] [BODY]".to_string());
                }
                let (method, body) = split_word(rest);
                Self::Call {
                    path: path.to_string(),
                    method: Some(method).filter(|m| !m.is_empty()).map(str::to_string),
                    body: Some(body).filter(|b| !b.is_empty()).map(str::to_string),
                }
            }
            other => return Err(format!("unknown command '{other}', try 'help'")),
        };
        Ok(Some(command))
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

const HELP: &str = "commands: start | stop | restart | status | call <path> [METHOD] [BODY] | quit";

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn outcome<T: Serialize, E: Serialize>(result: &Result<T, E>) -> Value {
    match result {
        Ok(value) => json!({ "ok": to_json(value) }),
        Err(error) => json!({ "error": to_json(error) }),
    }
}

/// Run one command and render its result.
///
/// `Help` and `Quit` are handled by the caller and render as `null`.
pub async fn execute(state: &HostState, command: ConsoleCommand) -> Value {
    match command {
        ConsoleCommand::Start => outcome(&commands::start_server(state).await),
        ConsoleCommand::Stop => outcome(&commands::stop_server(state).await),
        ConsoleCommand::Restart => outcome(&commands::restart_server(state).await),
        ConsoleCommand::Status => to_json(&commands::get_status(state)),
        ConsoleCommand::Call { path, method, body } => {
            let result =
                commands::call_api(state, &path, method.as_deref(), body.as_deref()).await;
            // The bridge hands back raw text; decode it here when it is JSON.
            let decoded = result
                .map(|raw| serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw)));
            outcome(&decoded)
        }
        ConsoleCommand::Help | ConsoleCommand::Quit => Value::Null,
    }
}

/// Read commands from stdin until `quit`, EOF or Ctrl-C, then stop the sidecar.
pub async fn run_console(state: HostState, autostart: Option<Duration>) -> anyhow::Result<()> {
    let autostart = autostart.map(|delay| commands::spawn_autostart(&state, delay));

    println!("{HELP}");
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let result = read_commands(&state, BufReader::new(tokio::io::stdin()), interrupt).await;

    // Only the delay or the wait is cancelled; an in-flight start is ended by shutdown.
    if let Some(task) = autostart {
        task.abort();
    }
    state.shutdown().await;
    result
}

/// Execute commands line by line until `quit`, EOF or `interrupt` completes.
///
/// `interrupt` is observed while a command runs as well as between lines.
async fn read_commands<R, I>(state: &HostState, reader: R, interrupt: I) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = ()>,
{
    let mut lines = reader.lines();
    tokio::pin!(interrupt);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut interrupt => {
                tracing::info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match ConsoleCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
            Ok(Some(ConsoleCommand::Help)) => println!("{HELP}"),
            Ok(Some(command)) => tokio::select! {
                rendered = execute(state, command) => println!("{rendered}"),
                _ = &mut interrupt => {
                    tracing::info!("Interrupted");
                    return Ok(());
                }
            },
            Err(message) => eprintln!("{message}"),
        }
    }
}
