//! Walls CLI
//!
//! Single binary for the Walls command hub:
//! - Hub daemon (`serve`) hosting the built-in control app
//! - Client commands (`send`, `commands`, `status`)
//! - Config, port reservation and tool-server management

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use walls::commands::{self, CliContext};
use walls::logging;
use walls::output::print_error;
use walls_core::config::{self, HubConfig};

#[derive(Parser)]
#[command(name = "walls")]
#[command(author, version, about = "Shared command hub for local applications")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "WALLS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for port reservations, the PID file and tool-server logs
    #[arg(long, global = true, env = "WALLS_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub daemon in the foreground
    /// Alias: start
    #[command(alias = "start")]
    Serve,

    /// Stop a running hub daemon
    Stop,

    /// Show the daemon, apps and tool servers
    Status,

    /// Send a command to an app
    Send {
        /// Target app
        app: String,
        /// Command name
        command: String,
        /// Arguments as key=value; bare words become arg0, arg1, ...
        args: Vec<String>,
        /// Seconds to wait for the response (default: server.timeout)
        #[arg(short, long, value_parser = parse_seconds)]
        timeout: Option<Duration>,
        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// List the commands an app accepts
    Commands {
        /// Target app
        app: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Reserve a port for an app before it starts
    Reserve {
        app: String,
    },

    /// Drop an app's port reservation
    Release {
        app: String,
    },

    /// Manage tool servers
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show {
        /// Only show this app's entry
        #[arg(long)]
        app: Option<String>,
    },
    /// Set an app's port or enabled flag
    Set {
        #[arg(long)]
        app: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, action = clap::ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
        enabled: Option<bool>,
    },
    /// Remove an app entry
    Remove {
        #[arg(long)]
        app: String,
    },
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[derive(Subcommand)]
enum McpAction {
    /// List configured tool servers
    List,
    /// Show tool-server status
    Status {
        /// Tool server name (default: all)
        name: Option<String>,
    },
    /// Start a tool server, or `all`
    Start { name: String },
    /// Stop a tool server, or `all`
    Stop { name: String },
    /// Restart a tool server, or `all`
    Restart { name: String },
    /// Include a tool server in `all` operations
    Enable { name: String },
    /// Exclude a tool server from `all` operations
    Disable { name: String },
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.parse().map_err(|_| format!("invalid number: {}", raw))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("timeout must be a positive number of seconds".to_string());
    }
    Ok(Duration::from_secs_f64(secs))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let state_dir = cli.state_dir.clone().unwrap_or_else(config::default_state_dir);

    // Logging settings come from the document; a broken one is reported by
    // the command itself
    let logging_settings = config::load_config(&config_path)
        .map(|c| c.logging)
        .unwrap_or_else(|_| HubConfig::default().logging);
    if let Err(e) = logging::init(cli.quiet, cli.verbose, &logging_settings) {
        eprintln!("warning: {:#}", e);
    }

    let ctx = CliContext::new(config_path, state_dir);
    match run(cli.command, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Option<Commands>, ctx: &CliContext) -> Result<()> {
    let Some(command) = command else {
        return commands::status_command(ctx).await;
    };

    match command {
        Commands::Serve => commands::serve_command(ctx).await,
        Commands::Stop => commands::stop_command(ctx).await,
        Commands::Status => commands::status_command(ctx).await,
        Commands::Send {
            app,
            command,
            args,
            timeout,
            json,
        } => commands::send_command(ctx, &app, &command, &args, timeout, json).await,
        Commands::Commands { app } => commands::commands_command(ctx, &app).await,
        Commands::Config { action } => match action {
            ConfigAction::Show { app } => commands::config_show(ctx, app.as_deref()),
            ConfigAction::Set { app, port, enabled } => {
                commands::config_set(ctx, &app, port, enabled)
            }
            ConfigAction::Remove { app } => commands::config_remove(ctx, &app),
            ConfigAction::Reset => commands::config_reset(ctx),
            ConfigAction::Path => {
                println!("{}", ctx.config_path.display());
                Ok(())
            }
        },
        Commands::Reserve { app } => commands::reserve_command(ctx, &app),
        Commands::Release { app } => commands::release_command(ctx, &app),
        Commands::Mcp { action } => match action {
            McpAction::List => commands::mcp_list(ctx),
            McpAction::Status { name } => commands::mcp_status(ctx, name.as_deref()).await,
            McpAction::Start { name } => commands::mcp_start(ctx, &name).await,
            McpAction::Stop { name } => commands::mcp_stop(ctx, &name).await,
            McpAction::Restart { name } => commands::mcp_restart(ctx, &name).await,
            McpAction::Enable { name } => commands::mcp_enable(ctx, &name),
            McpAction::Disable { name } => commands::mcp_disable(ctx, &name),
        },
    }
}
