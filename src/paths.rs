//! XDG Base Directory path resolution.
//!
//! The config directory is resolved through a three-level fallback:
//! 1. `DESKTOP_BUNDLE_CONFIG_DIR`
//! 2. `XDG_CONFIG_HOME` via `etcetera`
//! 3. Platform default (`~/.config`)
//!
//! Relative paths from env vars are ignored per the XDG spec.

use anyhow::Result;
use std::path::PathBuf;

const APP_DIR: &str = "desktop-bundle";

/// Resolved directory paths. All paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// `config.toml` lives here.
    pub config_dir: PathBuf,
}

impl Paths {
    /// Resolve using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "DESKTOP_BUNDLE_CONFIG_DIR", || {
            strategy.config_dir().join(APP_DIR)
        });

        Ok(Self { config_dir })
    }

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| PathBuf::from(shellexpand::tilde(&v).into_owned()))
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_env(
        map: HashMap<&str, &str>,
    ) -> impl Fn(&str) -> std::result::Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn default_config_dir_is_xdg_compliant() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new())).unwrap();
        assert!(paths.config_dir.is_absolute());
        assert!(paths.config_dir.ends_with(APP_DIR));
        assert!(paths.config_file().ends_with("desktop-bundle/config.toml"));
    }

    #[test]
    fn env_var_overrides_xdg() {
        let env = HashMap::from([("DESKTOP_BUNDLE_CONFIG_DIR", "/custom/config")]);
        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/custom/config"));
    }

    #[test]
    fn relative_and_empty_values_are_ignored() {
        for value in ["relative/path", ""] {
            let env = HashMap::from([("DESKTOP_BUNDLE_CONFIG_DIR", value)]);
            let paths = Paths::resolve_with_env(make_env(env)).unwrap();
            assert!(paths.config_dir.is_absolute());
            assert!(paths.config_dir.ends_with(APP_DIR));
        }
    }
}
