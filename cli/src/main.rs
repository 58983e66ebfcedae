mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{bbox, clusters, filter, inspect, tile};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub async fn run() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match &cli.command {
        Commands::Inspect(args) => inspect::run(&cli, args),
        Commands::Bbox(args) => bbox::run(&cli, args).await,
        Commands::Tile(args) => tile::run(&cli, args).await,
        Commands::Clusters(args) => clusters::run(&cli, args).await,
        Commands::Filter(args) => filter::run(&cli, args).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> { run().await }
