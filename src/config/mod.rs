use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Paths;

/// Env var that overrides `packager.runtime_source_dir`.
pub const RUNTIME_SOURCE_ENV: &str = "DESKTOP_BUNDLE_RUNTIME_SOURCE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub containment: ContainmentConfig,

    #[serde(default)]
    pub packager: PackagerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sandbox settings shared by the containment manager and every provider.
/// Immutable once the manager is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentConfig {
    #[serde(default = "default_docker_image")]
    pub docker_image: String,

    /// Clamped to [256, 16384].
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u32,

    /// 100 = one core. Clamped to [50, 800].
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: u32,

    /// Clamped to [1, 30].
    #[serde(default = "default_availability_timeout")]
    pub availability_timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub prefer_docker: bool,

    /// When false, running without a real sandbox is an error.
    #[serde(default = "default_true")]
    pub allow_fallback: bool,

    #[serde(default = "default_true")]
    pub drop_all_capabilities: bool,

    #[serde(default = "default_true")]
    pub no_new_privileges: bool,

    /// Off by default: agents need a writable working directory.
    #[serde(default)]
    pub read_only_root_fs: bool,

    /// Appended verbatim to every `docker run`.
    #[serde(default)]
    pub extra_docker_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagerConfig {
    /// Runtime source tree; empty means probe the usual locations.
    #[serde(default)]
    pub runtime_source_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "human" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

pub const MEMORY_MB_RANGE: (i64, i64) = (256, 16384);
pub const CPU_PERCENT_RANGE: (i64, i64) = (50, 800);
pub const AVAILABILITY_TIMEOUT_RANGE: (i64, i64) = (1, 30);

// Default value functions
fn default_docker_image() -> String {
    "ubuntu:22.04".into()
}
fn default_max_memory_mb() -> u32 {
    2048
}
fn default_max_cpu_percent() -> u32 {
    200
}
fn default_availability_timeout() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

impl Default for ContainmentConfig {
    fn default() -> Self {
        Self {
            docker_image: default_docker_image(),
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
            availability_timeout_seconds: default_availability_timeout(),
            prefer_docker: true,
            allow_fallback: true,
            drop_all_capabilities: true,
            no_new_privileges: true,
            read_only_root_fs: false,
            extra_docker_args: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ContainmentConfig {
    /// Defaults overlaid with the `CONTAINMENT_*` environment, clamped.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok());
        config
    }

    /// Overlays `CONTAINMENT_*` variables looked up through `env_fn`, then
    /// clamps. Unparseable values fall back to the built-in default.
    pub fn apply_env_with<F>(&mut self, env_fn: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        if let Some(image) = env_fn("CONTAINMENT_DOCKER_IMAGE").filter(|v| !v.trim().is_empty()) {
            self.docker_image = image.trim().to_string();
        }
        if let Some(v) = env_fn("CONTAINMENT_MAX_MEMORY_MB") {
            self.max_memory_mb =
                parse_clamped(&v, MEMORY_MB_RANGE, defaults.max_memory_mb as i64) as u32;
        }
        if let Some(v) = env_fn("CONTAINMENT_MAX_CPU_PERCENT") {
            self.max_cpu_percent =
                parse_clamped(&v, CPU_PERCENT_RANGE, defaults.max_cpu_percent as i64) as u32;
        }
        if let Some(v) = env_fn("CONTAINMENT_AVAILABILITY_TIMEOUT_SECONDS") {
            self.availability_timeout_seconds = parse_clamped(
                &v,
                AVAILABILITY_TIMEOUT_RANGE,
                defaults.availability_timeout_seconds as i64,
            ) as u64;
        }

        let flags: [(&str, &mut bool, bool); 5] = [
            ("CONTAINMENT_PREFER_DOCKER", &mut self.prefer_docker, defaults.prefer_docker),
            ("CONTAINMENT_ALLOW_FALLBACK", &mut self.allow_fallback, defaults.allow_fallback),
            (
                "CONTAINMENT_DROP_ALL_CAPABILITIES",
                &mut self.drop_all_capabilities,
                defaults.drop_all_capabilities,
            ),
            (
                "CONTAINMENT_NO_NEW_PRIVILEGES",
                &mut self.no_new_privileges,
                defaults.no_new_privileges,
            ),
            (
                "CONTAINMENT_READ_ONLY_ROOT_FS",
                &mut self.read_only_root_fs,
                defaults.read_only_root_fs,
            ),
        ];
        for (key, field, default) in flags {
            if let Some(v) = env_fn(key) {
                *field = parse_bool(&v).unwrap_or(default);
            }
        }

        self.clamp();
    }

    /// Forces every integer into its declared range.
    pub fn clamp(&mut self) {
        self.max_memory_mb = clamp_to(self.max_memory_mb as i64, MEMORY_MB_RANGE) as u32;
        self.max_cpu_percent = clamp_to(self.max_cpu_percent as i64, CPU_PERCENT_RANGE) as u32;
        self.availability_timeout_seconds =
            clamp_to(self.availability_timeout_seconds as i64, AVAILABILITY_TIMEOUT_RANGE) as u64;
    }

    /// Non-fatal configuration smells.
    pub fn validate_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        match image_tag(&self.docker_image) {
            Some("latest") => warnings.push(format!(
                "docker image '{}' uses the 'latest' tag; pin a version for reproducible sandboxes",
                self.docker_image
            )),
            None => warnings.push(format!(
                "docker image '{}' has no tag and resolves to 'latest'; pin a version for reproducible sandboxes",
                self.docker_image
            )),
            Some(_) => {}
        }
        warnings
    }
}

impl PackagerConfig {
    /// Explicit runtime source tree, env first, then config.
    pub fn runtime_source_override<F>(&self, env_fn: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        env_fn(RUNTIME_SOURCE_ENV)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| Some(self.runtime_source_dir.clone()).filter(|v| !v.trim().is_empty()))
            .map(|v| PathBuf::from(shellexpand::tilde(v.trim()).into_owned()))
    }
}

impl Config {
    /// Loads `path` (or the default config file) and overlays the
    /// environment. A missing file yields defaults; nothing is written.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned()),
            None => Paths::resolve()?.config_file(),
        };
        Self::load_with_env(&path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(path: &Path, env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            Config::default()
        };

        config.containment.apply_env_with(&env_fn);
        Ok(config)
    }
}

fn parse_clamped(value: &str, range: (i64, i64), default: i64) -> i64 {
    let parsed = value.trim().parse::<i64>().unwrap_or(default);
    clamp_to(parsed, range)
}

fn clamp_to(value: i64, (min, max): (i64, i64)) -> i64 {
    value.clamp(min, max)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Tag of an image reference, `None` when untagged. Digests count as pinned.
fn image_tag(image: &str) -> Option<&str> {
    if image.contains('@') {
        return Some("digest");
    }
    let last = image.rsplit('/').next().unwrap_or(image);
    last.split_once(':').map(|(_, tag)| tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = ContainmentConfig::default();
        assert_eq!(c.docker_image, "ubuntu:22.04");
        assert_eq!(c.max_memory_mb, 2048);
        assert_eq!(c.max_cpu_percent, 200);
        assert_eq!(c.availability_timeout_seconds, 5);
        assert!(c.prefer_docker && c.allow_fallback);
        assert!(c.drop_all_capabilities && c.no_new_privileges);
        assert!(!c.read_only_root_fs);
        assert!(c.validate_warnings().is_empty());
    }

    #[test]
    fn test_env_overlay_and_clamping() {
        let mut c = ContainmentConfig::default();
        c.apply_env_with(env(&[
            ("CONTAINMENT_DOCKER_IMAGE", "alpine:3.20"),
            ("CONTAINMENT_MAX_MEMORY_MB", "99999"),
            ("CONTAINMENT_MAX_CPU_PERCENT", "10"),
            ("CONTAINMENT_AVAILABILITY_TIMEOUT_SECONDS", "-4"),
            ("CONTAINMENT_ALLOW_FALLBACK", "false"),
            ("CONTAINMENT_READ_ONLY_ROOT_FS", "YES"),
        ]));
        assert_eq!(c.docker_image, "alpine:3.20");
        assert_eq!(c.max_memory_mb, 16384);
        assert_eq!(c.max_cpu_percent, 50);
        assert_eq!(c.availability_timeout_seconds, 1);
        assert!(!c.allow_fallback);
        assert!(c.read_only_root_fs);
    }

    #[test]
    fn test_unparseable_values_fall_back_to_defaults() {
        let mut c = ContainmentConfig {
            max_memory_mb: 4096,
            prefer_docker: false,
            ..ContainmentConfig::default()
        };
        c.apply_env_with(env(&[
            ("CONTAINMENT_MAX_MEMORY_MB", "lots"),
            ("CONTAINMENT_PREFER_DOCKER", "maybe"),
        ]));
        assert_eq!(c.max_memory_mb, 2048);
        assert!(c.prefer_docker);
    }

    #[test]
    fn test_latest_tag_warning() {
        for image in ["ubuntu:latest", "ubuntu", "registry:5000/team/img"] {
            let c = ContainmentConfig {
                docker_image: image.into(),
                ..ContainmentConfig::default()
            };
            assert_eq!(c.validate_warnings().len(), 1, "{image}");
        }
        for image in ["registry:5000/team/img:1.2", "ubuntu@sha256:abcd"] {
            let c = ContainmentConfig {
                docker_image: image.into(),
                ..ContainmentConfig::default()
            };
            assert!(c.validate_warnings().is_empty(), "{image}");
        }
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let config = Config::load_with_env(&path, env(&[])).unwrap();
        assert_eq!(config.containment, ContainmentConfig::default());
        assert_eq!(config.logging.level, "info");
        assert!(!path.exists());
    }

    #[test]
    fn test_load_file_then_env_then_clamp() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            r#"
[containment]
docker_image = "debian:12"
max_memory_mb = 100
prefer_docker = false
extra_docker_args = ["--pids-limit=256"]

[packager]
runtime_source_dir = "/opt/runtime"
"#,
        )
        .unwrap();

        let config =
            Config::load_with_env(&path, env(&[("CONTAINMENT_PREFER_DOCKER", "on")])).unwrap();
        assert_eq!(config.containment.docker_image, "debian:12");
        assert_eq!(config.containment.max_memory_mb, 256);
        assert!(config.containment.prefer_docker);
        assert_eq!(config.containment.extra_docker_args, vec!["--pids-limit=256"]);
        assert_eq!(
            config.packager.runtime_source_override(env(&[])),
            Some(PathBuf::from("/opt/runtime"))
        );
    }

    #[test]
    fn test_runtime_source_env_wins() {
        let packager = PackagerConfig {
            runtime_source_dir: "/opt/runtime".into(),
        };
        assert_eq!(
            packager.runtime_source_override(env(&[(RUNTIME_SOURCE_ENV, "/src/runtime")])),
            Some(PathBuf::from("/src/runtime"))
        );
        assert_eq!(PackagerConfig::default().runtime_source_override(env(&[])), None);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[containment\n").unwrap();
        assert!(Config::load_with_env(&path, env(&[])).is_err());
    }
}
