use anyhow::Result;
use clap::Parser;

mod args;
mod handlers;
mod models;
mod server;
mod substrate;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => server::run(args).await,
    }
}
