use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use desktop_bundle::bundle::{PackageResult, Packager, RuntimeResolver};
use desktop_bundle::config::Config;
use desktop_bundle::process::SystemRunner;

use super::ctrl_c_token;

#[derive(Args)]
pub struct PackageArgs {
    /// Desktop app directory (contains package.json)
    #[arg(long)]
    pub app_path: PathBuf,

    /// Bundle manifest (bundle.json)
    #[arg(long)]
    pub manifest: PathBuf,

    /// Target platform; repeatable. Defaults to every declared platform
    #[arg(long = "platform", value_name = "PLATFORM")]
    pub platforms: Vec<String>,

    /// Print the completion record as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: PackageArgs, config: &Config) -> Result<()> {
    let resolver = RuntimeResolver::from_environment().with_override(
        config
            .packager
            .runtime_source_override(|key| std::env::var(key).ok()),
    );
    let packager = Packager::new(Arc::new(SystemRunner), resolver);
    let cancel = ctrl_c_token();

    let result = packager
        .package(&args.app_path, &args.manifest, &args.platforms, &cancel)
        .await
        .map_err(|err| {
            tracing::error!(kind = ?err.kind(), error = %err, "packaging failed");
            err
        })?;

    if args.json {
        let response = result.to_response(chrono::Utc::now());
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_summary(&result);
    }
    Ok(())
}

fn print_summary(result: &PackageResult) {
    println!("Bundle:     {}", result.bundle_dir.display());
    println!("Manifest:   {}", result.manifest_path.display());
    println!(
        "Size:       {} ({} bytes)",
        result.total_size_human, result.total_size_bytes
    );
    println!();
    println!("Runtime binaries:");
    for (key, path) in &result.runtime_binaries {
        println!("  {:<28} {}", key, path.display());
    }
    println!();
    println!("Artifacts ({}):", result.copied_artifacts.len());
    for artifact in &result.copied_artifacts {
        println!("  {}", artifact);
    }
    if let Some(warning) = &result.size_warning {
        println!();
        println!("Warning: {}", warning.message);
        for file in &warning.large_files {
            println!("  {:<10} {}", file.size_human, file.path);
        }
    }
}
