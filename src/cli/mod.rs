pub mod containment;
pub mod package;
pub mod paths;

use clap::{Parser, Subcommand, ValueEnum};

use desktop_bundle::process::CancelToken;

#[derive(Parser)]
#[command(name = "desktop-bundle")]
#[command(author, version, about = "Desktop bundle packager with sandboxed subprocess containment")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "DESKTOP_BUNDLE_CONFIG")]
    pub config: Option<String>,

    /// Log output format (overrides `logging.format`)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stage services, runtime and CLI helpers into <app>/bundle
    Package(package::PackageArgs),

    /// Containment provider status and sandboxed execution
    Containment(containment::ContainmentArgs),

    /// Show resolved directory paths
    Paths,
}

/// A token cancelled on the first Ctrl-C.
pub fn ctrl_c_token() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            handle.cancel();
        }
    });
    cancel
}
