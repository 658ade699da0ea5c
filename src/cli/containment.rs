use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use desktop_bundle::config::Config;
use desktop_bundle::containment::{
    ExecutionConfig, Manager, ProviderType, SandboxError, prepare_sandboxed, run_prepared,
};
use desktop_bundle::process::{SystemLookup, SystemRunner};

use super::ctrl_c_token;

#[derive(Args)]
pub struct ContainmentArgs {
    #[command(subcommand)]
    pub command: ContainmentCommands,
}

#[derive(Subcommand)]
pub enum ContainmentCommands {
    /// Show the active provider, security level and warnings
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every provider and whether it is available
    Providers,

    /// Run a command under the best available provider
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Working directory (mounted read-write)
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Extra read-write path; repeatable
    #[arg(long = "allow", value_name = "PATH")]
    pub allowed_paths: Vec<PathBuf>,

    /// Extra read-only path; repeatable
    #[arg(long = "read-only", value_name = "PATH")]
    pub read_only_paths: Vec<PathBuf>,

    /// Environment variable as KEY=VALUE; repeatable
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Allow network access
    #[arg(long)]
    pub network: bool,

    /// Memory limit in MB (0 = configured default)
    #[arg(long, default_value_t = 0)]
    pub memory_mb: u32,

    /// Timeout in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Command and arguments
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

pub async fn run(args: ContainmentArgs, config: &Config) -> Result<()> {
    let manager = Manager::with_defaults(
        config.containment.clone(),
        Arc::new(SystemLookup),
        Arc::new(SystemRunner),
    );
    match args.command {
        ContainmentCommands::Status { json } => run_status(&manager, json).await,
        ContainmentCommands::Providers => run_providers(&manager).await,
        ContainmentCommands::Run(run_args) => run_command(&manager, run_args).await,
    }
}

async fn run_status(manager: &Manager, json: bool) -> Result<()> {
    let status = manager.status(&ctrl_c_token()).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let config = manager.config();
    println!("Containment:");
    println!("  Active provider: {}", status.active_provider);
    println!("  Security level:  {}/10", status.security_level);
    let available: Vec<&str> = status
        .available_providers
        .iter()
        .map(|p| p.as_str())
        .collect();
    println!("  Available:       {}", available.join(", "));
    println!();
    println!("Configuration:");
    println!("  Docker image:    {}", config.docker_image);
    println!("  Max memory:      {} MB", config.max_memory_mb);
    println!("  Max CPU:         {}%", config.max_cpu_percent);
    println!("  Probe timeout:   {}s", config.availability_timeout_seconds);
    println!("  Prefer Docker:   {}", config.prefer_docker);
    println!("  Allow fallback:  {}", config.allow_fallback);

    if !status.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &status.warnings {
            println!("  - {}", warning);
        }
    }
    Ok(())
}

async fn run_providers(manager: &Manager) -> Result<()> {
    for info in manager.list_providers(&ctrl_c_token()).await {
        println!("{} [{}] level {}/10", info.name, info.provider_type, info.security_level);
        println!("  {}", info.description);
        for req in &info.requirements {
            println!("  requires: {}", req);
        }
    }
    Ok(())
}

async fn run_command(manager: &Manager, args: RunArgs) -> Result<()> {
    let environment: BTreeMap<String, String> = args
        .env
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("Invalid --env '{}', expected KEY=VALUE", pair))
        })
        .collect::<Result<_>>()?;
    let workdir = match args.workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let exec = ExecutionConfig {
        working_dir: Some(workdir),
        allowed_paths: args.allowed_paths,
        read_only_paths: args.read_only_paths,
        environment,
        max_memory_mb: args.memory_mb,
        network_access: args.network,
        timeout_seconds: args.timeout,
        ..ExecutionConfig::new(args.command)
    };

    let cancel = ctrl_c_token();
    let prepared = match prepare_sandboxed(manager, &exec, &cancel).await {
        Ok(prepared) => prepared,
        Err(err) => {
            if let Some(failure) = err.failure() {
                eprintln!("{}", failure.message);
                eprintln!("  {}", failure.recovery_hint);
            }
            if let SandboxError::Aborted { reason, .. } = &err {
                bail!("{}", reason);
            }
            return Err(err.into());
        }
    };
    for warning in &prepared.warnings {
        eprintln!("warning: {}", warning);
    }
    if prepared.provider == ProviderType::None {
        eprintln!("warning: running without containment (security level 0/10)");
    }

    let output = run_prepared(&prepared.spec, &cancel).await?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    if output.exit_code != 0 {
        std::process::exit(output.exit_code);
    }
    Ok(())
}
