//! Platform key parsing and alias resolution.
//!
//! Canonical keys are `<os>-<arch>`. Manifests in the wild also use the
//! Electron-style spellings (`win-x64`, `mac-arm64`) and single-word
//! shorthand (`linux`, `mac`, `win`), so every lookup goes through here.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::manifest::{Binary, Service};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid platform '{key}': {reason}")]
pub struct PlatformError {
    pub key: String,
    pub reason: String,
}

/// Target operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

/// Target CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Os {
    /// `GOOS` value.
    pub fn goos(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
        }
    }

    /// Every spelling accepted for this OS, preferred first.
    pub fn spellings(self) -> &'static [&'static str] {
        match self {
            Os::Linux => &["linux"],
            Os::Darwin => &["darwin", "mac"],
            Os::Windows => &["windows", "win"],
        }
    }

    /// OS segment of runtime staging keys (`linux`, `darwin`, `win`).
    pub fn runtime_name(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "win",
        }
    }

    pub fn exe_suffix(self) -> &'static str {
        match self {
            Os::Windows => ".exe",
            _ => "",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "linux" => Some(Os::Linux),
            "darwin" | "mac" | "macos" | "osx" => Some(Os::Darwin),
            "windows" | "win" | "win32" => Some(Os::Windows),
            _ => None,
        }
    }
}

impl Arch {
    /// `GOARCH` value.
    pub fn goarch(self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    pub fn spellings(self) -> &'static [&'static str] {
        match self {
            Arch::Amd64 => &["amd64", "x64"],
            Arch::Arm64 => &["arm64", "aarch64"],
        }
    }

    /// Architecture segment of runtime staging keys (`x64`, `arm64`).
    pub fn runtime_name(self) -> &'static str {
        match self {
            Arch::Amd64 => "x64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Architecture of the machine running the packager.
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else {
            Arch::Amd64
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "amd64" | "x64" | "x86_64" => Some(Arch::Amd64),
            "arm64" | "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.goos())
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.goarch())
    }
}

/// A parsed `(os, arch)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Canonical `<goos>-<goarch>` key.
    pub fn canonical_key(&self) -> String {
        format!("{}-{}", self.os.goos(), self.arch.goarch())
    }

    /// Runtime staging key, e.g. `linux-x64`, `win-arm64`.
    pub fn runtime_key(&self) -> String {
        format!("{}-{}", self.os.runtime_name(), self.arch.runtime_name())
    }

    /// Rust target triple used for `cargo build --target`.
    pub fn rust_triple(&self) -> &'static str {
        match (self.os, self.arch) {
            (Os::Linux, Arch::Amd64) => "x86_64-unknown-linux-gnu",
            (Os::Linux, Arch::Arm64) => "aarch64-unknown-linux-gnu",
            (Os::Darwin, Arch::Amd64) => "x86_64-apple-darwin",
            (Os::Darwin, Arch::Arm64) => "aarch64-apple-darwin",
            (Os::Windows, Arch::Amd64) => "x86_64-pc-windows-msvc",
            (Os::Windows, Arch::Arm64) => "aarch64-pc-windows-msvc",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

/// Parses a platform key in canonical, alias or shorthand form.
///
/// Shorthand (`linux`, `mac`, `win`) takes the host architecture.
pub fn parse_key(key: &str) -> Result<Platform, PlatformError> {
    let lowered = key.trim().to_ascii_lowercase();
    let invalid = |reason: &str| PlatformError {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let (os_part, arch_part) = match lowered.split_once('-') {
        Some((os, arch)) => (os, Some(arch)),
        None => (lowered.as_str(), None),
    };

    let os = Os::parse(os_part).ok_or_else(|| invalid("unknown operating system"))?;
    let arch = match arch_part {
        Some(a) => Arch::parse(a).ok_or_else(|| invalid("unknown architecture"))?,
        None => Arch::host(),
    };
    Ok(Platform::new(os, arch))
}

/// Maps a requested platform to its runtime staging key.
///
/// Shorthand maps to the x64 variant (`linux` → `linux-x64`, `mac` →
/// `darwin-x64`, `win` → `win-x64`). Parseable keys are rewritten into the
/// same `<os>-<x64|arm64>` form; anything else passes through unchanged.
pub fn normalize_runtime(platform: &str) -> String {
    match platform.trim().to_ascii_lowercase().as_str() {
        "linux" => return "linux-x64".to_string(),
        "mac" | "darwin" | "macos" => return "darwin-x64".to_string(),
        "win" | "windows" => return "win-x64".to_string(),
        _ => {}
    }
    match parse_key(platform) {
        Ok(parsed) => parsed.runtime_key(),
        Err(_) => platform.to_string(),
    }
}

pub fn runtime_binary_name(os: Os) -> String {
    format!("runtime{}", os.exe_suffix())
}

pub fn runtimectl_binary_name(os: Os) -> String {
    format!("runtimectl{}", os.exe_suffix())
}

/// Candidate manifest keys for `platform`, in lookup order: the exact key,
/// every alias spelling, then architecture-expanded shorthand keys.
pub fn lookup_keys(platform: &str) -> Vec<String> {
    let mut keys = vec![platform.to_string()];
    let Ok(parsed) = parse_key(platform) else {
        return keys;
    };

    let mut push = |k: String| {
        if !keys.contains(&k) {
            keys.push(k);
        }
    };

    for os in parsed.os.spellings() {
        for arch in parsed.arch.spellings() {
            push(format!("{os}-{arch}"));
        }
    }

    if !platform.contains('-') {
        for os in parsed.os.spellings() {
            for arch in [Arch::Amd64, Arch::Arm64] {
                for spelling in arch.spellings() {
                    push(format!("{os}-{spelling}"));
                }
            }
        }
    }
    keys
}

/// Finds the binary entry for `platform` using exact, alias, then
/// shorthand-expanded keys. Returns the matched key with the entry.
pub fn resolve_binary_for_platform<'a>(
    service: &'a Service,
    platform: &str,
) -> Option<(&'a str, &'a Binary)> {
    lookup_keys(platform).into_iter().find_map(|key| {
        service
            .binaries
            .get_key_value(key.as_str())
            .map(|(k, v)| (k.as_str(), v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn service_with(keys: &[&str]) -> Service {
        let binaries: BTreeMap<String, Binary> = keys
            .iter()
            .map(|k| {
                (
                    k.to_string(),
                    Binary {
                        path: format!("bin/{k}/srv"),
                    },
                )
            })
            .collect();
        Service {
            id: "srv".into(),
            binaries,
            assets: vec![],
            build: None,
        }
    }

    #[test]
    fn test_parse_canonical_and_alias() {
        assert_eq!(
            parse_key("mac-arm64").unwrap(),
            Platform::new(Os::Darwin, Arch::Arm64)
        );
        assert_eq!(
            parse_key("windows-amd64").unwrap(),
            Platform::new(Os::Windows, Arch::Amd64)
        );
        assert_eq!(
            parse_key("win-x64").unwrap(),
            Platform::new(Os::Windows, Arch::Amd64)
        );
        assert_eq!(
            parse_key("linux-aarch64").unwrap(),
            Platform::new(Os::Linux, Arch::Arm64)
        );
        assert_eq!(parse_key("mac-arm64").unwrap().canonical_key(), "darwin-arm64");
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_key("linux-386").is_err());
        assert!(parse_key("plan9-amd64").is_err());
        assert!(parse_key("").is_err());
    }

    #[test]
    fn test_shorthand_uses_host_arch() {
        let parsed = parse_key("linux").unwrap();
        assert_eq!(parsed.os, Os::Linux);
        assert_eq!(parsed.arch, Arch::host());
    }

    #[test]
    fn test_normalize_runtime() {
        assert_eq!(normalize_runtime("linux"), "linux-x64");
        assert_eq!(normalize_runtime("mac"), "darwin-x64");
        assert_eq!(normalize_runtime("win"), "win-x64");
        assert_eq!(normalize_runtime("linux-amd64"), "linux-x64");
        assert_eq!(normalize_runtime("darwin-arm64"), "darwin-arm64");
        assert_eq!(normalize_runtime("windows-amd64"), "win-x64");
        assert_eq!(normalize_runtime("linux-x64"), "linux-x64");
        assert_eq!(normalize_runtime("solaris-sparc"), "solaris-sparc");
    }

    #[test]
    fn test_runtime_binary_names() {
        assert_eq!(runtime_binary_name(Os::Linux), "runtime");
        assert_eq!(runtime_binary_name(Os::Windows), "runtime.exe");
        assert_eq!(runtimectl_binary_name(Os::Darwin), "runtimectl");
        assert_eq!(runtimectl_binary_name(Os::Windows), "runtimectl.exe");
    }

    #[test]
    fn test_rust_triples() {
        assert_eq!(
            Platform::new(Os::Linux, Arch::Amd64).rust_triple(),
            "x86_64-unknown-linux-gnu"
        );
        assert_eq!(
            Platform::new(Os::Windows, Arch::Arm64).rust_triple(),
            "aarch64-pc-windows-msvc"
        );
    }

    #[test]
    fn test_resolve_exact_before_alias() {
        let svc = service_with(&["win-x64", "windows-x64"]);
        let (key, _) = resolve_binary_for_platform(&svc, "win-x64").unwrap();
        assert_eq!(key, "win-x64");
    }

    #[test]
    fn test_resolve_alias() {
        let svc = service_with(&["windows-x64"]);
        let (key, _) = resolve_binary_for_platform(&svc, "win-x64").unwrap();
        assert_eq!(key, "windows-x64");

        let svc = service_with(&["darwin-arm64"]);
        let (key, _) = resolve_binary_for_platform(&svc, "mac-arm64").unwrap();
        assert_eq!(key, "darwin-arm64");
    }

    #[test]
    fn test_resolve_shorthand_expansion() {
        let other = match Arch::host() {
            Arch::Amd64 => "linux-aarch64",
            Arch::Arm64 => "linux-x64",
        };
        let svc = service_with(&[other]);
        let (key, _) = resolve_binary_for_platform(&svc, "linux").unwrap();
        assert_eq!(key, other);
    }

    #[test]
    fn test_resolve_not_found() {
        let svc = service_with(&["linux-amd64"]);
        assert!(resolve_binary_for_platform(&svc, "darwin-arm64").is_none());
        assert!(resolve_binary_for_platform(&svc, "bogus").is_none());
    }
}
