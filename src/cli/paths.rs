//! CLI subcommand: `desktop-bundle paths`
//!
//! Prints resolved paths for debugging and scripting.

use anyhow::Result;

use desktop_bundle::config::{Config, RUNTIME_SOURCE_ENV};
use desktop_bundle::paths::Paths;

pub fn run(config: &Config) -> Result<()> {
    let paths = Paths::resolve()?;

    println!("desktop-bundle paths");
    println!("====================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    match config
        .packager
        .runtime_source_override(|key| std::env::var(key).ok())
    {
        Some(dir) => println!("Runtime source: {}", dir.display()),
        None => println!("Runtime source: (probed; set {} to override)", RUNTIME_SOURCE_ENV),
    }

    Ok(())
}
