//! Afina CLI, the main entry point.
//!
//! Commands:
//! - `serve`  start the HTTP API
//! - `chat`   run a single turn in-process and print its frames
//! - `init`   write a default config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "afina",
    about = "Afina: document-review chat assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to ~/.afina/config.toml)
    #[arg(short, long, global = true, env = "AFINA_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one message and print the streamed reply
    Chat {
        /// Conversation id; reuse it to keep uploaded files together
        #[arg(long)]
        chat_id: String,

        /// Message text
        #[arg(short, long)]
        message: String,

        /// Document to attach: a local path (uploaded first) or the name of
        /// a file already stored for this chat
        #[arg(short, long = "file")]
        files: Vec<String>,

        /// Print raw `{content, done}` frames as JSON lines
        #[arg(long)]
        raw: bool,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config_path = cli
        .config
        .unwrap_or_else(|| afina_config::AppConfig::config_dir().join("config.toml"));

    match cli.command {
        Commands::Serve { port } => commands::serve::run(&config_path, port).await?,
        Commands::Chat {
            chat_id,
            message,
            files,
            raw,
        } => commands::chat::run(&config_path, chat_id, message, files, raw).await?,
        Commands::Init { force } => commands::init::run(&config_path, force)?,
    }

    Ok(())
}
