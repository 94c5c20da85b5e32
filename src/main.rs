// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! marvin main entry point - manager, stub worker and config commands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use marvin::config::{self, CliOptions};
use marvin::manager::{Manager, MessageType, WorkerClient, DEFAULT_PORT};
use marvin::manager::types::DEFAULT_HOST;
use marvin::telemetry::{init_telemetry, log_file_path, TelemetryConfig};

/// marvin version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// marvin - supervisor for a fleet of chat-bot workers.
#[derive(Parser)]
#[command(name = "marvin")]
#[command(author, version, about = "Supervisor for a fleet of chat-bot workers", long_about = None)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options for running the manager.
#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Config file (default: search the working directory)
    #[arg(short, long, env = "MARVIN_CONFIG")]
    config: Option<PathBuf>,

    /// Host to listen on
    #[arg(long, env = "MARVIN_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MARVIN_PORT")]
    port: Option<u16>,

    /// Workers to start, comma separated
    #[arg(short, long, value_delimiter = ',')]
    startup: Option<Vec<String>>,

    /// Alert webhook URL
    #[arg(long, env = "MARVIN_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Disable the health loop
    #[arg(long)]
    no_metrics: bool,

    /// Register startup workers without spawning them
    #[arg(long)]
    no_spawn: bool,

    /// Directory for log files
    #[arg(long, env = "MARVIN_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Show debug output
    #[arg(long)]
    debug: bool,
}

impl RunArgs {
    fn cli_options(&self) -> CliOptions {
        CliOptions {
            host: self.host.clone(),
            port: self.port,
            startup: self.startup.clone(),
            webhook_url: self.webhook_url.clone(),
            no_metrics: self.no_metrics.then_some(true),
            spawn_workers: self.no_spawn.then_some(false),
        }
    }
}

/// Subcommands for marvin.
#[derive(Subcommand)]
enum Commands {
    /// Run the manager (default)
    Run(RunArgs),

    /// Run a stub worker that connects to the manager
    Worker {
        /// Worker name, sent as identity
        name: String,

        /// Manager host
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Manager port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Directory for log files
        #[arg(long, env = "MARVIN_LOG_DIR")]
        log_dir: Option<PathBuf>,

        /// Show debug output
        #[arg(long)]
        debug: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration
    Show {
        /// Config file (default: search the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write an example marvin.yaml
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run_manager(cli.run).await,
        Some(Commands::Run(args)) => run_manager(args).await,
        Some(Commands::Worker {
            name,
            host,
            port,
            log_dir,
            debug,
        }) => {
            init_tracing(debug, log_dir.as_ref(), &name)?;
            run_worker(&name, &format!("{}:{}", host, port)).await
        }
        Some(Commands::Config { action }) => handle_config_command(action),
        Some(Commands::Version) => {
            println!("marvin {}", VERSION);
            Ok(())
        }
    }
}

fn init_tracing(debug: bool, log_dir: Option<&PathBuf>, name: &str) -> anyhow::Result<()> {
    let mut telemetry = if debug {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::default()
    };
    if let Some(dir) = log_dir {
        telemetry = telemetry.with_log_file(log_file_path(dir, name));
    }
    init_telemetry(&telemetry)?;
    Ok(())
}

async fn run_manager(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.debug, args.log_dir.as_ref(), "manager")?;

    let config = match &args.config {
        Some(path) => config::load_config_from(path, args.cli_options())?,
        None => config::load_config(&std::env::current_dir()?, args.cli_options())?,
    };
    info!(
        addr = %config.bind_addr(),
        startup = ?config.startup,
        "Starting marvin {}",
        VERSION
    );

    let manager = Manager::new(config)?;
    if let Err(e) = manager.run().await {
        error!("Manager shutdown failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// A worker with no chat-platform side: it keeps its connection to the
/// manager, answers pings and exits when asked to close.
async fn run_worker(name: &str, addr: &str) -> anyhow::Result<()> {
    let mut client = WorkerClient::new(addr, name);
    client.connect().await?;
    info!(worker = %name, "Connected to manager at {}", addr);

    let Some(mut inbox) = client.take_inbox() else {
        anyhow::bail!("worker inbox already taken");
    };

    loop {
        tokio::select! {
            received = inbox.recv() => {
                let Some(msg) = received else {
                    warn!(worker = %name, "Manager connection closed");
                    break;
                };
                if msg.kind == MessageType::ActionReq
                    && msg.details.get(0).and_then(Value::as_str) == Some("closeBot")
                {
                    info!(worker = %name, "Close requested by manager");
                    break;
                }
                if matches!(msg.kind, MessageType::ActionReq | MessageType::DataReq) {
                    let mut extra = Map::new();
                    extra.insert("error".to_string(), Value::from("unsupported request"));
                    if let Err(e) = client.respond(&msg, false, extra).await {
                        warn!(worker = %name, "Failed to respond: {}", e);
                    }
                } else {
                    info!(worker = %name, from = %msg.from, kind = %msg.kind, "Ignoring message");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(worker = %name, "Interrupted");
                break;
            }
        }
    }

    client.close().await?;
    Ok(())
}

fn handle_config_command(action: Option<ConfigAction>) -> anyhow::Result<()> {
    let workspace_root = std::env::current_dir()?;
    match action {
        Some(ConfigAction::Show { config: path }) => show_config(path)?,
        None => show_config(None)?,
        Some(ConfigAction::Init) => {
            let path = config::init_config(&workspace_root)?;
            println!("{} {}", "Created config file:".green(), path.display());
        }
    }
    Ok(())
}

fn show_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let source = match &path {
        Some(path) => Some(path.clone()),
        None => config::find_workspace_config(&std::env::current_dir()?),
    };
    let resolved = match &path {
        Some(path) => config::load_config_from(path, CliOptions::default())?,
        None => config::load_config(&std::env::current_dir()?, CliOptions::default())?,
    };

    match source {
        Some(source) => println!("{} {}", "Config file:".bright_blue().bold(), source.display()),
        None => println!("{}", "No config file found, using defaults".yellow()),
    }
    println!("{}", serde_yaml::to_string(&resolved)?);
    Ok(())
}
