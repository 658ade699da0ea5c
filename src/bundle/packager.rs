//! Bundle packager: turns a manifest plus a source tree into a staged
//! desktop bundle.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cli_stager::stage_cli_helpers;
use super::compiler::ServiceCompiler;
use super::descriptor::update_app_descriptor;
use super::error::{IoResultExt, PackageError, Result};
use super::fsops::{
    absolutize, copy_file, copy_path, ensure_dir, normalize_bundle_path, resolve_under,
};
use super::manifest::{Manifest, Service, load_manifest, resolve_path};
use super::platform::{
    normalize_runtime, parse_key, resolve_binary_for_platform, runtime_binary_name,
    runtimectl_binary_name,
};
use super::runtime::{RuntimeBuilder, RuntimeResolver, RuntimeTarget};
use super::size::{self, SizeWarning};
use crate::process::{CancelToken, CommandRunner};

/// Name of the staged bundle directory under the application path.
pub const BUNDLE_DIR_NAME: &str = "bundle";
/// Name of the manifest copy inside the bundle.
pub const BUNDLE_MANIFEST_NAME: &str = "bundle.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageResult {
    pub bundle_dir: PathBuf,
    pub manifest_path: PathBuf,
    /// Requested platform key → built runtime executable.
    pub runtime_binaries: BTreeMap<String, PathBuf>,
    /// Every file staged under the bundle, sorted, no duplicates.
    pub copied_artifacts: Vec<String>,
    pub total_size_bytes: u64,
    pub total_size_human: String,
    pub size_warning: Option<SizeWarning>,
}

/// Wire shape accepted by external callers. `store` and `enterprise` are
/// carried for compatibility and otherwise ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageRequest {
    #[serde(default)]
    pub app_path: String,
    #[serde(default)]
    pub bundle_manifest_path: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub store: Option<serde_json::Value>,
    #[serde(default)]
    pub enterprise: Option<bool>,
}

/// Wire shape returned to external callers.
#[derive(Debug, Clone, Serialize)]
pub struct PackageResponse {
    pub status: &'static str,
    pub bundle_dir: String,
    pub manifest: String,
    pub runtime_binaries: BTreeMap<String, String>,
    pub artifacts: Vec<String>,
    pub total_size_bytes: u64,
    pub total_size_human: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_warning: Option<SizeWarning>,
}

impl PackageResult {
    pub fn to_response(&self, now: DateTime<Utc>) -> PackageResponse {
        PackageResponse {
            status: "completed",
            bundle_dir: self.bundle_dir.display().to_string(),
            manifest: self.manifest_path.display().to_string(),
            runtime_binaries: self
                .runtime_binaries
                .iter()
                .map(|(k, v)| (k.clone(), v.display().to_string()))
                .collect(),
            artifacts: self.copied_artifacts.clone(),
            total_size_bytes: self.total_size_bytes,
            total_size_human: self.total_size_human.clone(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            size_warning: self.size_warning.clone(),
        }
    }
}

pub struct Packager {
    compiler: ServiceCompiler,
    runtime_builder: RuntimeBuilder,
    resolver: RuntimeResolver,
}

impl Packager {
    pub fn new(runner: Arc<dyn CommandRunner>, resolver: RuntimeResolver) -> Self {
        Self {
            compiler: ServiceCompiler::new(Arc::clone(&runner)),
            runtime_builder: RuntimeBuilder::new(runner),
            resolver,
        }
    }

    /// Validates a wire request and packages it.
    pub async fn package_request(
        &self,
        request: &PackageRequest,
        cancel: &CancelToken,
    ) -> Result<PackageResult> {
        self.package(
            Path::new(&request.app_path),
            Path::new(&request.bundle_manifest_path),
            &request.platforms,
            cancel,
        )
        .await
    }

    /// Stages a bundle under `<app_path>/bundle`.
    ///
    /// Fail-fast: the first error aborts the call and whatever was staged
    /// before it stays on disk. An empty `platforms` packages every platform
    /// any service declares.
    pub async fn package(
        &self,
        app_path: &Path,
        manifest_path: &Path,
        platforms: &[String],
        cancel: &CancelToken,
    ) -> Result<PackageResult> {
        let (app_path, manifest_path) = check_inputs(app_path, manifest_path)?;
        let manifest = load_manifest(&manifest_path)?;
        let manifest_root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| app_path.clone());

        let platforms: Vec<String> = if platforms.is_empty() {
            manifest.declared_platforms()
        } else {
            platforms.to_vec()
        };
        manifest.validate(&platforms, &manifest_root)?;

        info!(
            app = %app_path.display(),
            manifest = %manifest_path.display(),
            platforms = ?platforms,
            "packaging bundle"
        );

        let bundle_dir = app_path.join(BUNDLE_DIR_NAME);
        ensure_dir(&bundle_dir).at(&bundle_dir)?;
        let bundle_manifest = bundle_dir.join(BUNDLE_MANIFEST_NAME);
        copy_file(&manifest_path, &bundle_manifest)?;

        let mut artifacts = Artifacts::default();
        artifacts.add(&bundle_manifest);

        self.stage_services(
            &manifest,
            &platforms,
            &manifest_root,
            &bundle_dir,
            &mut artifacts,
            cancel,
        )
        .await?;

        for platform in &platforms {
            for path in stage_cli_helpers(&bundle_dir, &normalize_runtime(platform))? {
                artifacts.add(&path);
            }
        }

        let runtime_src = self.resolver.resolve()?;
        let runtime_binaries = self
            .build_runtimes(&runtime_src, &platforms, &bundle_dir, &mut artifacts, cancel)
            .await?;

        update_app_descriptor(&app_path)?;

        let (total, large_files) = size::calculate(&bundle_dir).at(&bundle_dir)?;
        let size_warning = size::check_warning(total, large_files);
        if let Some(w) = &size_warning {
            warn!(level = ?w.level, total = %w.total_human, "{}", w.message);
        }

        let result = PackageResult {
            bundle_dir,
            manifest_path: bundle_manifest,
            runtime_binaries,
            copied_artifacts: artifacts.into_sorted(),
            total_size_bytes: total,
            total_size_human: size::human_readable_size(total),
            size_warning,
        };
        info!(
            bundle = %result.bundle_dir.display(),
            artifacts = result.copied_artifacts.len(),
            size = %result.total_size_human,
            "bundle packaged"
        );
        Ok(result)
    }

    async fn stage_services(
        &self,
        manifest: &Manifest,
        platforms: &[String],
        manifest_root: &Path,
        bundle_dir: &Path,
        artifacts: &mut Artifacts,
        cancel: &CancelToken,
    ) -> Result<()> {
        for service in &manifest.services {
            for platform in platforms {
                if cancel.is_cancelled() {
                    return Err(PackageError::Cancelled);
                }
                let (source, rel) = self
                    .locate_binary(service, platform, manifest_root, cancel)
                    .await?;
                let dest = bundle_destination(bundle_dir, &rel)?;
                debug!(service = %service.id, platform = %platform, path = %dest.display(), "staging binary");
                copy_file(&source, &dest)?;
                artifacts.add(&dest);
            }

            for asset in &service.assets {
                let source = resolve_path(manifest_root, &asset.path)?;
                let dest = bundle_destination(bundle_dir, &asset.path)?;
                debug!(service = %service.id, path = %dest.display(), "staging asset");
                for written in copy_path(&source, &dest)? {
                    artifacts.add(&written);
                }
            }
        }
        Ok(())
    }

    /// Returns the file to stage and its manifest-relative path, compiling
    /// the service when no prebuilt binary is on disk.
    async fn locate_binary(
        &self,
        service: &Service,
        platform: &str,
        manifest_root: &Path,
        cancel: &CancelToken,
    ) -> Result<(PathBuf, String)> {
        let declared = match resolve_binary_for_platform(service, platform) {
            Some((_, binary)) => Some((
                resolve_path(manifest_root, &binary.path)?,
                binary.path.clone(),
            )),
            None => None,
        };

        if let Some((path, rel)) = &declared
            && path.is_file()
        {
            return Ok((path.clone(), rel.clone()));
        }

        if service.build.is_none() {
            return Err(PackageError::MissingArtifact {
                service: service.id.clone(),
                platform: platform.to_string(),
                detail: match &declared {
                    Some((path, _)) => format!("{} does not exist", path.display()),
                    None => "no binary entry for this platform".into(),
                },
            });
        }

        let output = self
            .compiler
            .compile(service, platform, manifest_root, cancel)
            .await?;
        let rel = match declared {
            Some((_, rel)) => rel,
            None => relative_to(manifest_root, &output),
        };
        Ok((output, rel))
    }

    async fn build_runtimes(
        &self,
        runtime_src: &Path,
        platforms: &[String],
        bundle_dir: &Path,
        artifacts: &mut Artifacts,
        cancel: &CancelToken,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let mut built = BTreeMap::new();
        for platform in platforms {
            let target = parse_key(platform)?;
            let out_dir = bundle_dir.join("runtime").join(normalize_runtime(platform));
            ensure_dir(&out_dir).at(&out_dir)?;

            let runtime = out_dir.join(runtime_binary_name(target.os));
            self.runtime_builder
                .build(
                    runtime_src,
                    &runtime,
                    target.os,
                    target.arch,
                    RuntimeTarget::Runtime,
                    cancel,
                )
                .await?;
            artifacts.add(&runtime);
            built.insert(platform.clone(), runtime);

            let ctl = out_dir.join(runtimectl_binary_name(target.os));
            match self
                .runtime_builder
                .build(
                    runtime_src,
                    &ctl,
                    target.os,
                    target.arch,
                    RuntimeTarget::RuntimeCtl,
                    cancel,
                )
                .await
            {
                Ok(()) => artifacts.add(&ctl),
                Err(PackageError::Cancelled) => return Err(PackageError::Cancelled),
                Err(e) => warn!(platform = %platform, error = %e, "runtimectl build failed; continuing without it"),
            }
        }
        Ok(built)
    }
}

fn check_inputs(app_path: &Path, manifest_path: &Path) -> Result<(PathBuf, PathBuf)> {
    if app_path.as_os_str().is_empty() {
        return Err(PackageError::InvalidInput("app path is required".into()));
    }
    if manifest_path.as_os_str().is_empty() {
        return Err(PackageError::InvalidInput("manifest path is required".into()));
    }
    let app = absolutize(app_path).at(app_path)?;
    let manifest = absolutize(manifest_path).at(manifest_path)?;
    if !app.is_dir() {
        return Err(PackageError::InvalidInput(format!(
            "app path {} is not a directory",
            app.display()
        )));
    }
    if !manifest.is_file() {
        return Err(PackageError::InvalidInput(format!(
            "manifest {} does not exist",
            manifest.display()
        )));
    }
    Ok((app, manifest))
}

/// Re-roots a manifest-relative path inside the bundle.
fn bundle_destination(bundle_dir: &Path, rel: &str) -> Result<PathBuf> {
    let normalized = normalize_bundle_path(rel);
    let dest = resolve_under(bundle_dir, &normalized)?;
    if dest == bundle_dir {
        return Err(PackageError::PathEscape {
            path: rel.to_string(),
            root: bundle_dir.to_path_buf(),
        });
    }
    Ok(dest)
}

fn relative_to(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sorted, deduplicated record of staged files.
#[derive(Debug, Default)]
struct Artifacts(BTreeSet<String>);

impl Artifacts {
    fn add(&mut self, path: &Path) {
        self.0.insert(path.display().to_string());
    }

    fn into_sorted(self) -> Vec<String> {
        self.0.into_iter().collect()
    }
}
