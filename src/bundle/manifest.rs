//! Bundle manifest model, loader and pre-flight validation.
//!
//! Only the fields the packager consumes are modelled; anything else in the
//! manifest is ignored on load and travels into the bundle verbatim through
//! the `bundle.json` copy.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{PackageError, Result};
use super::fsops::resolve_under;
use super::platform::{parse_key, resolve_binary_for_platform};

/// The only target the packager accepts.
pub const DESKTOP_TARGET: &str = "desktop";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: String,

    #[serde(default)]
    pub target: String,

    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,

    /// Platform key → prebuilt binary.
    #[serde(default)]
    pub binaries: BTreeMap<String, Binary>,

    #[serde(default)]
    pub assets: Vec<Asset>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    /// Manifest-relative path.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Manifest-relative path; also used as the bundle-relative destination.
    pub path: String,

    /// Free-form attributes (checksums, size hints, ...) the packager ignores.
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// `go`, `rust`, `npm` (or `node`), `custom`.
    #[serde(rename = "type")]
    pub build_type: String,

    pub source_dir: String,

    /// Output path template; supports `{{platform}}`, `{{goos}}`,
    /// `{{goarch}}`, `{{output}}` and `{{ext}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Reads and parses a manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path).map_err(|e| PackageError::ManifestParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| PackageError::ManifestParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Resolves a manifest-relative path to an absolute path under `root`.
pub fn resolve_path(root: &Path, rel: &str) -> Result<PathBuf> {
    resolve_under(root, rel)
}

impl Manifest {
    /// Every platform key declared by any service, sorted and deduplicated.
    pub fn declared_platforms(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .services
            .iter()
            .flat_map(|s| s.binaries.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Pre-flight checks run before anything is written into the bundle.
    ///
    /// Beyond the structural checks, every `(service, platform)` pair must
    /// either resolve to an existing binary under `manifest_root` or carry a
    /// build configuration, and every asset must resolve under the root.
    pub fn validate(&self, platforms: &[String], manifest_root: &Path) -> Result<()> {
        if self.schema_version.trim().is_empty() {
            return Err(PackageError::ManifestInvalid(
                "schema_version is required".into(),
            ));
        }
        if self.target != DESKTOP_TARGET {
            return Err(PackageError::ManifestInvalid(format!(
                "target must be '{DESKTOP_TARGET}', got '{}'",
                self.target
            )));
        }
        if self.services.is_empty() {
            return Err(PackageError::ManifestInvalid(
                "at least one service is required".into(),
            ));
        }
        if platforms.is_empty() {
            return Err(PackageError::ManifestInvalid(
                "no target platforms requested and none declared by services".into(),
            ));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            validate_service_id(&service.id)?;
            if !seen.insert(service.id.as_str()) {
                return Err(PackageError::ManifestInvalid(format!(
                    "duplicate service id '{}'",
                    service.id
                )));
            }
        }

        for platform in platforms {
            parse_key(platform)?;
        }

        for service in &self.services {
            for platform in platforms {
                check_coverage(service, platform, manifest_root)?;
            }
            for asset in &service.assets {
                resolve_path(manifest_root, &asset.path)?;
            }
        }
        Ok(())
    }
}

fn validate_service_id(id: &str) -> Result<()> {
    let valid_start = id.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid_start && valid_chars {
        Ok(())
    } else {
        Err(PackageError::ManifestInvalid(format!(
            "service id '{id}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'"
        )))
    }
}

fn check_coverage(service: &Service, platform: &str, manifest_root: &Path) -> Result<()> {
    let resolved = match resolve_binary_for_platform(service, platform) {
        Some((_, binary)) => Some(resolve_path(manifest_root, &binary.path)?),
        None => None,
    };

    if service.build.is_some() {
        return Ok(());
    }

    match resolved {
        Some(path) if path.is_file() => Ok(()),
        Some(path) => Err(PackageError::MissingArtifact {
            service: service.id.clone(),
            platform: platform.to_string(),
            detail: format!("{} does not exist", path.display()),
        }),
        None => Err(PackageError::MissingArtifact {
            service: service.id.clone(),
            platform: platform.to_string(),
            detail: "no binary entry for this platform".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::error::PackageErrorKind;

    fn manifest(json: serde_json::Value) -> Manifest {
        serde_json::from_value(json).unwrap()
    }

    fn basic() -> serde_json::Value {
        serde_json::json!({
            "schema_version": "1",
            "target": "desktop",
            "services": [{
                "id": "srv-a",
                "binaries": { "linux-amd64": { "path": "bin/linux-amd64/srv-a" } }
            }]
        })
    }

    #[test]
    fn test_parse_full_manifest() {
        let m = manifest(serde_json::json!({
            "schema_version": "1",
            "target": "desktop",
            "extra": { "ignored": true },
            "services": [{
                "id": "api",
                "binaries": { "win-x64": { "path": "bin/api.exe" } },
                "assets": [{ "path": "assets/config.json", "sha256": "abc" }],
                "build": {
                    "type": "go",
                    "source_dir": "./api",
                    "output_pattern": "dist/{{platform}}/api{{ext}}",
                    "env": { "FOO": "bar" }
                }
            }]
        }));
        let svc = &m.services[0];
        assert_eq!(svc.assets[0].path, "assets/config.json");
        assert_eq!(svc.assets[0].attributes["sha256"], "abc");
        let build = svc.build.as_ref().unwrap();
        assert_eq!(build.build_type, "go");
        assert_eq!(build.env["FOO"], "bar");
        assert!(build.args.is_empty());
    }

    #[test]
    fn test_declared_platforms_sorted_union() {
        let m = manifest(serde_json::json!({
            "schema_version": "1",
            "target": "desktop",
            "services": [
                { "id": "a", "binaries": { "win-x64": { "path": "a" }, "linux-amd64": { "path": "b" } } },
                { "id": "b", "binaries": { "linux-amd64": { "path": "c" }, "darwin-arm64": { "path": "d" } } }
            ]
        }));
        assert_eq!(
            m.declared_platforms(),
            vec!["darwin-arm64", "linux-amd64", "win-x64"]
        );
    }

    #[test]
    fn test_validate_structure() {
        let tmp = tempfile::tempdir().unwrap();
        let platforms = vec!["linux-amd64".to_string()];

        let mut m = manifest(basic());
        m.target = "web".into();
        let err = m.validate(&platforms, tmp.path()).unwrap_err();
        assert_eq!(err.kind(), PackageErrorKind::ManifestInvalid);

        let mut m = manifest(basic());
        m.schema_version = " ".into();
        assert!(m.validate(&platforms, tmp.path()).is_err());

        let mut m = manifest(basic());
        m.services.clear();
        assert!(m.validate(&platforms, tmp.path()).is_err());

        let mut m = manifest(basic());
        let dup = m.services[0].clone();
        m.services.push(dup);
        let err = m.validate(&platforms, tmp.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let mut m = manifest(basic());
        m.services[0].id = "../evil".into();
        assert!(m.validate(&platforms, tmp.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_invalid_platform() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manifest(basic());
        let err = m
            .validate(&["linux-386".to_string()], tmp.path())
            .unwrap_err();
        assert_eq!(err.kind(), PackageErrorKind::ManifestInvalid);
    }

    #[test]
    fn test_validate_missing_artifact_without_build() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manifest(basic());
        let err = m
            .validate(&["linux-amd64".to_string()], tmp.path())
            .unwrap_err();
        assert_eq!(err.kind(), PackageErrorKind::MissingArtifact);

        let err = m
            .validate(&["darwin-arm64".to_string()], tmp.path())
            .unwrap_err();
        assert_eq!(err.kind(), PackageErrorKind::MissingArtifact);
    }

    #[test]
    fn test_validate_accepts_existing_binary_or_build() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin/linux-amd64/srv-a");
        fs::create_dir_all(bin.parent().unwrap()).unwrap();
        fs::write(&bin, "x").unwrap();

        let m = manifest(basic());
        m.validate(&["linux-amd64".to_string()], tmp.path()).unwrap();

        let mut m = manifest(basic());
        m.services[0].binaries.clear();
        m.services[0].build = Some(BuildConfig {
            build_type: "go".into(),
            source_dir: "./cmd/srv-a".into(),
            ..BuildConfig::default()
        });
        m.validate(&["darwin-arm64".to_string()], tmp.path())
            .unwrap();
    }

    #[test]
    fn test_validate_rejects_asset_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manifest(basic());
        m.services[0].build = Some(BuildConfig::default());
        m.services[0].assets.push(Asset {
            path: "../../../etc/passwd".into(),
            attributes: Default::default(),
        });
        let err = m
            .validate(&["linux-amd64".to_string()], tmp.path())
            .unwrap_err();
        assert_eq!(err.kind(), PackageErrorKind::PathEscape);
    }

    #[test]
    fn test_load_manifest_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bundle.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_manifest(&path).unwrap_err();
        assert_eq!(err.kind(), PackageErrorKind::ManifestParse);
    }
}
