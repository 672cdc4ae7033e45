//! Huddle CLI - command-line interface for the Huddle client stack.
//!
//! Exercises the network layer from a terminal: authenticated API requests
//! with dedup/retry, the realtime connection lifecycle, and the offline
//! telemetry queue. Useful for headless debugging against a Huddle server.

mod commands;

use clap::{Parser, Subcommand};
use tracing::info;

use hd_core::config::{AppConfig, ConfigHandle};
use hd_core::error::HdResult;
use hd_core::logging;

/// Huddle client CLI.
#[derive(Parser)]
#[command(
    name = "huddle",
    version,
    about = "Huddle client CLI",
    long_about = "A command-line interface for the Huddle client network stack.\n\
                   Talk to a Huddle server, watch the realtime connection, and inspect telemetry."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Store an auth token for subsequent requests.
    Login {
        /// The session token issued by the server.
        #[arg(short, long)]
        token: String,
    },
    /// Clear the stored auth token.
    Logout,
    /// Show server reachability, session, and telemetry queue state.
    Status,
    /// Issue an API request through the client (dedup, retry, auth).
    Request {
        /// HTTP method (get, post, put, delete).
        method: String,
        /// Request path, e.g. /api/v1/rooms.
        path: String,
        /// JSON request body.
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Connect the realtime socket and print incoming events.
    Listen {
        /// Event names to subscribe to.
        #[arg(short, long)]
        event: Vec<String>,
        /// Stop after this many seconds (0 = run until Ctrl-C).
        #[arg(short, long, default_value = "0")]
        duration: u64,
    },
    /// Emit a realtime event (best-effort).
    Emit {
        /// Event name, e.g. vote-extension.
        event: String,
        /// JSON payload.
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Record a telemetry event in the offline queue.
    Track {
        /// Event type, e.g. room_joined.
        event_type: String,
        /// JSON event data.
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Push queued telemetry events to the server.
    Flush,
    /// Set the analytics consent flag.
    Consent {
        /// "on" to allow tracking, "off" to disable it.
        state: String,
    },
}

#[tokio::main]
async fn main() -> HdResult<()> {
    let cli = Cli::parse();

    let config_path = cli.config.as_deref().map(std::path::Path::new);
    let config = if let Some(path) = config_path {
        AppConfig::load_from_file(path)?
    } else {
        AppConfig::load_default()?
    };

    let log_level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    let log_dir = config.effective_log_dir()?;
    let _guard = logging::init_logging(log_level, &log_dir, config.logging.json_output)?;

    let config_handle = ConfigHandle::new(config);
    info!("huddle cli v{}", hd_core::constants::APP_VERSION);

    match cli.command {
        Commands::Login { token } => commands::session::login(config_handle, &token).await,
        Commands::Logout => commands::session::logout(config_handle).await,
        Commands::Status => commands::status::run(config_handle, cli.format).await,
        Commands::Request { method, path, body } => {
            commands::request::run(config_handle, &method, &path, body.as_deref(), cli.format).await
        }
        Commands::Listen { event, duration } => {
            commands::listen::run(config_handle, event, duration).await
        }
        Commands::Emit { event, data } => {
            commands::listen::emit(config_handle, &event, data.as_deref()).await
        }
        Commands::Track { event_type, data } => {
            commands::telemetry::track(config_handle, &event_type, data.as_deref()).await
        }
        Commands::Flush => commands::telemetry::flush(config_handle).await,
        Commands::Consent { state } => commands::telemetry::consent(config_handle, &state).await,
    }
}
