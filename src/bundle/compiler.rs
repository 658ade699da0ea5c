//! Per-platform compilation of services that ship without a prebuilt binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{IoResultExt, PackageError, Result};
use super::fsops::{copy_file, ensure_dir, resolve_under};
use super::manifest::{BuildConfig, Service};
use super::platform::{Platform, parse_key};
use crate::process::{CancelToken, CommandRunner, Invocation};

/// Toolchain families understood by [`ServiceCompiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    Go,
    Rust,
    Npm,
    Custom,
}

impl BuildType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "go" => Some(BuildType::Go),
            "rust" | "cargo" => Some(BuildType::Rust),
            "npm" | "node" => Some(BuildType::Npm),
            "custom" => Some(BuildType::Custom),
            _ => None,
        }
    }
}

/// Values substituted into `{{...}}` placeholders.
struct Placeholders<'a> {
    platform: &'a str,
    target: Platform,
    ext: &'a str,
    output: String,
}

impl Placeholders<'_> {
    fn apply(&self, template: &str) -> String {
        template
            .replace("{{platform}}", self.platform)
            .replace("{{goos}}", self.target.os.goos())
            .replace("{{goarch}}", self.target.arch.goarch())
            .replace("{{ext}}", self.ext)
            .replace("{{output}}", &self.output)
    }
}

/// Compiles services with their declared toolchain.
pub struct ServiceCompiler {
    runner: Arc<dyn CommandRunner>,
}

impl ServiceCompiler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Builds `service` for `platform` and returns the absolute output path.
    pub async fn compile(
        &self,
        service: &Service,
        platform: &str,
        manifest_root: &Path,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let build = service.build.as_ref().ok_or_else(|| PackageError::MissingArtifact {
            service: service.id.clone(),
            platform: platform.to_string(),
            detail: "no build configuration".into(),
        })?;

        let target = parse_key(platform)?;
        let source_dir = resolve_under(manifest_root, &build.source_dir)?;
        if !source_dir.is_dir() {
            return Err(PackageError::CompileFailed {
                service: service.id.clone(),
                platform: platform.to_string(),
                output: format!("source directory {} does not exist", source_dir.display()),
            });
        }

        let ext = target.os.exe_suffix();
        let default_output = format!("bin/{platform}/{}{ext}", service.id);
        let mut vars = Placeholders {
            platform,
            target,
            ext,
            output: default_output.clone(),
        };
        let output_rel = match &build.output_pattern {
            Some(pattern) if !pattern.trim().is_empty() => vars.apply(pattern),
            _ => default_output,
        };
        let output = resolve_under(manifest_root, &output_rel)?;
        vars.output = output.to_string_lossy().into_owned();

        if let Some(parent) = output.parent() {
            ensure_dir(parent).at(parent)?;
        }

        let build_type =
            BuildType::parse(&build.build_type).ok_or_else(|| PackageError::UnsupportedBuildType {
                service: service.id.clone(),
                build_type: build.build_type.clone(),
            })?;

        info!(
            service = %service.id,
            platform,
            build_type = %build.build_type,
            output = %output.display(),
            "compiling service"
        );

        let ctx = CompileContext {
            service,
            build,
            platform,
            target,
            source_dir: &source_dir,
            output: &output,
            vars: &vars,
            cancel,
        };
        match build_type {
            BuildType::Go => self.build_go(&ctx).await?,
            BuildType::Rust => self.build_rust(&ctx).await?,
            BuildType::Npm => self.build_npm(&ctx).await?,
            BuildType::Custom => self.build_custom(&ctx).await?,
        }
        Ok(output)
    }

    async fn build_go(&self, ctx: &CompileContext<'_>) -> Result<()> {
        let entry = ctx
            .build
            .entry_point
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| ".".to_string());
        let inv = Invocation::new("go")
            .args(["build", "-o"])
            .arg(ctx.output.to_string_lossy())
            .args(ctx.build.args.iter().map(|a| ctx.vars.apply(a)))
            .arg(entry)
            .current_dir(ctx.source_dir)
            .env("CGO_ENABLED", "0")
            .env("GOOS", ctx.target.os.goos())
            .env("GOARCH", ctx.target.arch.goarch());
        self.run(ctx, with_user_env(inv, ctx.build)).await
    }

    async fn build_rust(&self, ctx: &CompileContext<'_>) -> Result<()> {
        let triple = ctx.target.rust_triple();
        let inv = Invocation::new("cargo")
            .args(["build", "--release", "--target", triple])
            .args(ctx.build.args.iter().cloned())
            .current_dir(ctx.source_dir);
        self.run(ctx, with_user_env(inv, ctx.build)).await?;

        let name = ctx
            .build
            .entry_point
            .as_deref()
            .and_then(|e| Path::new(e).file_name())
            .or_else(|| ctx.source_dir.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ctx.service.id.clone());
        let built = ctx
            .source_dir
            .join("target")
            .join(triple)
            .join("release")
            .join(format!("{name}{}", ctx.target.os.exe_suffix()));
        if !built.is_file() {
            return Err(self.missing_output(ctx, &built));
        }
        copy_file(&built, ctx.output)
    }

    async fn build_npm(&self, ctx: &CompileContext<'_>) -> Result<()> {
        let install = Invocation::new("npm")
            .arg("install")
            .current_dir(ctx.source_dir);
        self.run(ctx, self.target_env(install, ctx)).await?;

        let build_args: Vec<String> = if ctx.build.args.is_empty() {
            vec!["run".into(), "build".into()]
        } else {
            ctx.build.args.iter().map(|a| ctx.vars.apply(a)).collect()
        };
        let build = Invocation::new("npm")
            .args(build_args)
            .current_dir(ctx.source_dir);
        self.run(ctx, self.target_env(build, ctx)).await?;

        if !ctx.output.exists() {
            return Err(self.missing_output(ctx, ctx.output));
        }
        Ok(())
    }

    async fn build_custom(&self, ctx: &CompileContext<'_>) -> Result<()> {
        let Some((command, rest)) = ctx.build.args.split_first() else {
            return Err(PackageError::CompileFailed {
                service: ctx.service.id.clone(),
                platform: ctx.platform.to_string(),
                output: "custom build requires the command as the first argument".into(),
            });
        };
        let inv = Invocation::new(ctx.vars.apply(command))
            .args(rest.iter().map(|a| ctx.vars.apply(a)))
            .current_dir(ctx.source_dir)
            .env("TARGET_PLATFORM", ctx.platform)
            .env("OUTPUT_PATH", ctx.output.to_string_lossy());
        self.run(ctx, self.target_env(inv, ctx)).await?;

        if !ctx.output.exists() {
            return Err(self.missing_output(ctx, ctx.output));
        }
        Ok(())
    }

    fn target_env(&self, inv: Invocation, ctx: &CompileContext<'_>) -> Invocation {
        let inv = inv
            .env("TARGET_OS", ctx.target.os.goos())
            .env("TARGET_ARCH", ctx.target.arch.goarch());
        with_user_env(inv, ctx.build)
    }

    async fn run(&self, ctx: &CompileContext<'_>, inv: Invocation) -> Result<()> {
        debug!(program = %inv.program, args = ?inv.args, "invoking toolchain");
        self.runner
            .run(&inv, ctx.cancel)
            .await
            .map(|_| ())
            .map_err(|e| PackageError::compile(&ctx.service.id, ctx.platform, e))
    }

    fn missing_output(&self, ctx: &CompileContext<'_>, expected: &Path) -> PackageError {
        PackageError::CompileFailed {
            service: ctx.service.id.clone(),
            platform: ctx.platform.to_string(),
            output: format!("expected build output {} was not produced", expected.display()),
        }
    }
}

struct CompileContext<'a> {
    service: &'a Service,
    build: &'a BuildConfig,
    platform: &'a str,
    target: Platform,
    source_dir: &'a Path,
    output: &'a Path,
    vars: &'a Placeholders<'a>,
    cancel: &'a CancelToken,
}

fn with_user_env(inv: Invocation, build: &BuildConfig) -> Invocation {
    build
        .env
        .iter()
        .fold(inv, |inv, (k, v)| inv.env(k.clone(), v.clone()))
}
