use clap::{Parser, Subcommand};
use tracing::Level;

use steampipe_cli::{CacheCommands, DepotCommands, commands};

#[derive(Parser)]
#[command(
    name = "steampipe",
    about = "SteamPipe depot tool: manifests, listings, verified downloads",
    version,
    long_about = "A command-line tool for working with SteamPipe content \
                  delivery: fetching and caching depot manifests, listing and \
                  diffing depot contents, and downloading files with chunk-level \
                  verification and resume."
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Cell id used for content-server discovery
    #[arg(long, global = true, default_value_t = 0)]
    cell_id: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect, list, download, and diff depot content
    #[command(subcommand)]
    Depot(DepotCommands),

    /// Maintain the local cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::from(cli.log_level))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Depot(cmd) => commands::depot::handle(cmd, cli.cell_id).await?,
        Commands::Cache(cmd) => commands::cache::handle(cmd, cli.cell_id).await?,
    }

    Ok(())
}
