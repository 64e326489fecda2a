//! Textserve CLI: HTTP inference server and one-shot command-line front end.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Textserve: serve text-processing models over HTTP
#[derive(Parser, Debug)]
#[command(name = "textserve", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Subcommand (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the HTTP inference server
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List cataloged models
    Models,
    /// Run a single inference request in-process and print the response
    Infer {
        /// Input text
        text: String,

        /// Model name (defaults to the configured default model)
        #[arg(short, long)]
        model: Option<String>,

        /// Model version
        #[arg(long)]
        model_version: Option<String>,

        /// Parameter override as `key=json`, repeatable (e.g. `max_length=60`)
        #[arg(long = "param", value_parser = commands::parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "textserve", "textserve")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "textserve.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = textserve_core::load_validated_config(Some(&workspace), cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => commands::serve(config, host, port).await,
        Commands::Models => commands::list_models(&config),
        Commands::Infer {
            text,
            model,
            model_version,
            params,
        } => commands::infer(config, text, model, model_version, params).await,
    }
}
