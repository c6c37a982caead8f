mod auth;
mod cli;
mod config;
mod enrich;
mod error;
mod output;
mod pipeline;
mod providers;
mod sink;
mod transform;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting snowdrift change-management ETL");
    cli.execute().await
}
