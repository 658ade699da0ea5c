//! Locates the runtime source tree and cross-compiles runtime companions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{PackageError, Result};
use super::fsops::absolutize;
use super::platform::{Arch, Os};
use crate::process::{CancelToken, CommandRunner, Invocation, ProcessError};

/// Probed relative to each base, shallowest first.
const CANDIDATES: [&str; 4] = [
    "runtime",
    "../runtime",
    "../../runtime",
    "../../../runtime",
];

/// Finds the runtime source directory.
#[derive(Debug, Clone)]
pub struct RuntimeResolver {
    bases: Vec<PathBuf>,
    override_dir: Option<PathBuf>,
}

impl RuntimeResolver {
    /// Probes the current directory, then the running executable's directory.
    pub fn from_environment() -> Self {
        let mut bases = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            bases.push(cwd);
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            bases.push(dir);
        }
        Self::with_bases(bases)
    }

    pub fn with_bases(bases: Vec<PathBuf>) -> Self {
        Self {
            bases,
            override_dir: None,
        }
    }

    /// Skips probing and uses `dir` when it is set.
    pub fn with_override(mut self, dir: Option<PathBuf>) -> Self {
        self.override_dir = dir;
        self
    }

    pub fn resolve(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.override_dir {
            if dir.is_dir() {
                return absolutize(dir).map_err(|source| PackageError::Io {
                    path: dir.clone(),
                    source,
                });
            }
            return Err(PackageError::RuntimeSourceNotFound {
                searched: vec![dir.display().to_string()],
            });
        }

        let mut searched = Vec::new();
        for base in &self.bases {
            for candidate in CANDIDATES {
                let path = base.join(candidate);
                let Ok(abs) = absolutize(&path) else {
                    continue;
                };
                debug!(path = %abs.display(), "probing runtime source");
                if abs.is_dir() {
                    return Ok(abs);
                }
                searched.push(abs.display().to_string());
            }
        }
        Err(PackageError::RuntimeSourceNotFound { searched })
    }
}

/// Which runtime binary to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeTarget {
    Runtime,
    RuntimeCtl,
}

impl RuntimeTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeTarget::Runtime => "runtime",
            RuntimeTarget::RuntimeCtl => "runtimectl",
        }
    }

    fn package(self) -> &'static str {
        match self {
            RuntimeTarget::Runtime => "./cmd/runtime",
            RuntimeTarget::RuntimeCtl => "./cmd/runtimectl",
        }
    }
}

impl fmt::Display for RuntimeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RuntimeBuilder {
    runner: Arc<dyn CommandRunner>,
}

impl RuntimeBuilder {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `go build -o <out_path> ./cmd/<target>` inside `src_dir`, cross-compiled
    /// for `os`/`arch` with cgo disabled.
    pub async fn build(
        &self,
        src_dir: &Path,
        out_path: &Path,
        os: Os,
        arch: Arch,
        target: RuntimeTarget,
        cancel: &CancelToken,
    ) -> Result<()> {
        let inv = Invocation::new("go")
            .args(["build", "-o"])
            .arg(out_path.to_string_lossy())
            .arg(target.package())
            .current_dir(src_dir)
            .env("CGO_ENABLED", "0")
            .env("GOOS", os.goos())
            .env("GOARCH", arch.goarch());

        info!(%target, goos = os.goos(), goarch = arch.goarch(), "building runtime binary");
        match self.runner.run(&inv, cancel).await {
            Ok(_) => Ok(()),
            Err(ProcessError::Cancelled) => Err(PackageError::Cancelled),
            Err(err) => Err(PackageError::RuntimeBuildFailed {
                target: target.to_string(),
                platform: format!("{}-{}", os.goos(), arch.goarch()),
                output: match err {
                    ProcessError::Failed { output, .. } => output,
                    other => other.to_string(),
                },
            }),
        }
    }
}
