use anyhow::Result;
use clap::Parser;
use std::path::Path;

mod cli;

use cli::{Cli, Commands, LogFormat};
use desktop_bundle::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref().map(Path::new))?;

    // Initialize logging
    let log_level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let json = match cli.log_format {
        Some(format) => format == LogFormat::Json,
        None => config.logging.format.eq_ignore_ascii_case("json"),
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Package(args) => cli::package::run(args, &config).await,
        Commands::Containment(args) => cli::containment::run(args, &config).await,
        Commands::Paths => cli::paths::run(&config),
    }
}
