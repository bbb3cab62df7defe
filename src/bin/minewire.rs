//! Minewire engine process
//!
//! Runs the tunnel engine as a child process of the desktop app, driven
//! over newline-delimited JSON on stdin/stdout: request
//! `{id, method, args}`, response `{id, success, error?, data?}`. Logs go
//! to stderr so they never pollute the protocol stream.

use anyhow::{Context, Result};
use clap::Parser;
use minewire::{config::ProxyType, link, Config, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Minewire tunnel engine - IPC child process for the desktop app
#[derive(Parser, Debug)]
#[command(name = "minewire")]
#[command(about = "Minewire tunnel engine - carries traffic disguised as a Minecraft session")]
#[command(version)]
struct Args {
    /// Configuration file path; when it has a [tunnel] section the engine
    /// starts immediately
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Deserialize)]
struct Command {
    #[serde(default)]
    id: String,
    method: String,
    #[serde(default)]
    args: CommandArgs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CommandArgs {
    local_port: String,
    server_address: String,
    password: String,
    proxy_type: String,
    link: String,
    /// Comma-separated paths to split-tunnel rule files
    rules: String,
}

#[derive(Debug, Serialize)]
struct Response {
    id: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl Response {
    fn ok(id: String, data: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            error: None,
            data,
        }
    }

    fn err(id: String, error: String) -> Self {
        Self {
            id,
            success: false,
            error: Some(error),
            data: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.as_str())
        .with_writer(std::io::stderr)
        .init();

    info!("Minewire engine v{}", minewire::VERSION);

    let engine = Arc::new(Engine::new());

    if let Some(path) = &args.config {
        let config = Config::load(path).context("Failed to load configuration")?;
        if let Some(tunnel) = config.tunnel {
            info!(server = %tunnel.server, "starting from config file");
            if let Err(e) = engine.start(
                &tunnel.local_port,
                &tunnel.server,
                &tunnel.password,
                tunnel.proxy_type,
            ) {
                warn!("config-file start failed: {e}");
            }
        }
    }

    // Clean shutdown on ctrl-c / SIGTERM: stop the tunnel, exit 0.
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            engine.stop();
            std::process::exit(0);
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command: Command = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(e) => {
                respond(&Response::err(String::new(), format!("Parse error: {e}")));
                continue;
            }
        };
        respond(&handle_command(&engine, command).await);
    }

    // Parent closed stdin; shut everything down.
    engine.stop();
    Ok(())
}

async fn handle_command(engine: &Arc<Engine>, command: Command) -> Response {
    match command.method.as_str() {
        "start" => {
            let proxy_type = ProxyType::from_name(&command.args.proxy_type);
            match engine.start(
                &command.args.local_port,
                &command.args.server_address,
                &command.args.password,
                proxy_type,
            ) {
                Ok(()) => Response::ok(command.id, None),
                Err(e) => {
                    error!("start failed: {e}");
                    Response::err(command.id, e.to_string())
                }
            }
        }
        "stop" => {
            engine.stop();
            Response::ok(command.id, None)
        }
        "isActive" => Response::ok(command.id, Some(engine.is_active().into())),
        "ping" => {
            let latency = Engine::ping(&command.args.server_address).await;
            Response::ok(command.id, Some(latency.into()))
        }
        "parseLink" => match link::parse_link(&command.args.link) {
            Ok(parsed) => Response::ok(
                command.id,
                Some(json!({
                    "name": parsed.name,
                    "server": parsed.server,
                    "password": parsed.password,
                })),
            ),
            Err(e) => Response::ok(command.id, Some(json!({ "error": e.to_string() }))),
        },
        "updateConfig" => {
            engine.update_split_rules(&command.args.rules);
            Response::ok(command.id, None)
        }
        "getStats" => {
            let (tx_bytes, rx_bytes) = engine.stats();
            Response::ok(
                command.id,
                Some(json!({ "txBytes": tx_bytes, "rxBytes": rx_bytes })),
            )
        }
        _ => Response::err(command.id, "Unknown method".to_string()),
    }
}

fn respond(response: &Response) {
    match serde_json::to_string(response) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("failed to serialize response: {e}"),
    }
}
