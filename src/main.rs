// src/main.rs — delve entry point

use clap::Parser;

use delve::cli::run::run_research;
use delve::cli::Cli;
use delve::infra::config::Config;
use delve::infra::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Respects RUST_LOG
    logger::init_logging(cli.log_level());

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Falls back to defaults if no config.toml
    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!(?config, "Config loaded");

    run_research(&cli, config).await
}
