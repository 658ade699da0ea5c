//! Error types for the bundle packager.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::platform::PlatformError;
use crate::process::ProcessError;

pub type Result<T> = std::result::Result<T, PackageError>;

/// Stable error codes exposed to callers of [`Packager::package`](super::Packager::package).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PackageErrorKind {
    InvalidInput,
    ManifestParse,
    ManifestInvalid,
    PathEscape,
    MissingArtifact,
    CompileFailed,
    RuntimeSourceNotFound,
    RuntimeBuildFailed,
    #[serde(rename = "IOFailure")]
    IoFailure,
    Cancelled,
}

/// Every variant is fatal to the packaging call.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to parse manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error(transparent)]
    InvalidPlatform(#[from] PlatformError),

    #[error("path '{path}' escapes {root}")]
    PathEscape { path: String, root: PathBuf },

    #[error("service '{service}' has no usable binary for platform '{platform}': {detail}")]
    MissingArtifact {
        service: String,
        platform: String,
        detail: String,
    },

    #[error("unsupported build type '{build_type}' for service '{service}'")]
    UnsupportedBuildType { service: String, build_type: String },

    #[error("failed to compile service '{service}' for {platform}: {output}")]
    CompileFailed {
        service: String,
        platform: String,
        output: String,
    },

    #[error("runtime source directory not found (searched: {})", .searched.join(", "))]
    RuntimeSourceNotFound { searched: Vec<String> },

    #[error("failed to build {target} for {platform}: {output}")]
    RuntimeBuildFailed {
        target: String,
        platform: String,
        output: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid app descriptor {path}: {reason}")]
    Descriptor { path: PathBuf, reason: String },

    #[error("packaging cancelled")]
    Cancelled,
}

impl PackageError {
    pub fn kind(&self) -> PackageErrorKind {
        match self {
            Self::InvalidInput(_) => PackageErrorKind::InvalidInput,
            Self::ManifestParse { .. } => PackageErrorKind::ManifestParse,
            Self::ManifestInvalid(_) | Self::InvalidPlatform(_) => {
                PackageErrorKind::ManifestInvalid
            }
            Self::PathEscape { .. } => PackageErrorKind::PathEscape,
            Self::MissingArtifact { .. } => PackageErrorKind::MissingArtifact,
            Self::UnsupportedBuildType { .. } | Self::CompileFailed { .. } => {
                PackageErrorKind::CompileFailed
            }
            Self::RuntimeSourceNotFound { .. } => PackageErrorKind::RuntimeSourceNotFound,
            Self::RuntimeBuildFailed { .. } => PackageErrorKind::RuntimeBuildFailed,
            Self::Io { .. } | Self::Descriptor { .. } => PackageErrorKind::IoFailure,
            Self::Cancelled => PackageErrorKind::Cancelled,
        }
    }

    pub(crate) fn compile(service: &str, platform: &str, err: ProcessError) -> Self {
        match err {
            ProcessError::Cancelled => Self::Cancelled,
            ProcessError::Failed { output, .. } => Self::CompileFailed {
                service: service.to_string(),
                platform: platform.to_string(),
                output,
            },
            other => Self::CompileFailed {
                service: service.to_string(),
                platform: platform.to_string(),
                output: other.to_string(),
            },
        }
    }
}

/// Attaches the offending path to an `io::Error`.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| PackageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            PackageError::InvalidInput("x".into()).kind(),
            PackageErrorKind::InvalidInput
        );
        assert_eq!(
            PackageError::compile("srv", "linux-amd64", ProcessError::Cancelled).kind(),
            PackageErrorKind::Cancelled
        );
        assert_eq!(
            PackageError::compile(
                "srv",
                "linux-amd64",
                ProcessError::NotFound("go".into())
            )
            .kind(),
            PackageErrorKind::CompileFailed
        );
        let io: Result<()> = Err(std::io::Error::other("boom")).at(Path::new("/tmp/x"));
        assert_eq!(io.unwrap_err().kind(), PackageErrorKind::IoFailure);
    }

    #[test]
    fn test_compile_failure_carries_output() {
        let err = PackageError::compile(
            "srv",
            "linux-amd64",
            ProcessError::Failed {
                program: "go".into(),
                status: 1,
                output: "main.go:3: undefined: foo".into(),
            },
        );
        assert!(err.to_string().contains("undefined: foo"));
    }

    #[test]
    fn test_kind_serializes_as_code() {
        let json = serde_json::to_string(&PackageErrorKind::IoFailure).unwrap();
        assert_eq!(json, "\"IOFailure\"");
        let json = serde_json::to_string(&PackageErrorKind::PathEscape).unwrap();
        assert_eq!(json, "\"PathEscape\"");
    }
}
