//! Stages CLI helpers into `bundle/bin`.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::error::{IoResultExt, Result};
use super::fsops::{copy_file, ensure_dir};
use super::platform::{Os, parse_key};

/// Name of the shim written into `bin/` on non-Windows targets.
pub const SHIM_NAME: &str = "vrooli";

/// Selects the host's runtime directory at run time, so one shim serves
/// every non-Windows platform in the bundle. `runtimectl` is best-effort,
/// so the core `runtime` binary is used when it was not staged.
const SHIM_SCRIPT: &str = r#"#!/bin/sh
set -e
here="$(cd "$(dirname "$0")" && pwd)"
root="$(dirname "$here")"
case "$(uname -s)" in
  Darwin) os=darwin ;;
  *) os=linux ;;
esac
case "$(uname -m)" in
  arm64|aarch64) arch=arm64 ;;
  *) arch=x64 ;;
esac
dir="$root/runtime/$os-$arch"
if [ -x "$dir/runtimectl" ]; then
  exec "$dir/runtimectl" "$@"
fi
exec "$dir/runtime" "$@"
"#;

/// Copies executables from `<app>/cli` (the sibling of the bundle dir) into
/// `<bundle_root>/bin` and writes the shim unless `platform` targets
/// Windows. Returns every file written.
pub fn stage_cli_helpers(bundle_root: &Path, platform: &str) -> Result<Vec<PathBuf>> {
    let bin_dir = bundle_root.join("bin");
    ensure_dir(&bin_dir).at(&bin_dir)?;

    let mut written = Vec::new();
    if let Some(cli_dir) = bundle_root.parent().map(|p| p.join("cli"))
        && cli_dir.is_dir()
    {
        let mut entries = fs::read_dir(&cli_dir)
            .at(&cli_dir)?
            .collect::<std::io::Result<Vec<_>>>()
            .at(&cli_dir)?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if !crate::process::is_executable(&path) {
                debug!(path = %path.display(), "skipping non-executable cli entry");
                continue;
            }
            let dest = bin_dir.join(entry.file_name());
            copy_file(&path, &dest)?;
            written.push(dest);
        }
    }

    let windows = parse_key(platform).is_ok_and(|p| p.os == Os::Windows);
    if !windows {
        let shim = bin_dir.join(SHIM_NAME);
        fs::write(&shim, SHIM_SCRIPT).at(&shim)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&shim, fs::Permissions::from_mode(0o755)).at(&shim)?;
        }
        written.push(shim);
    }
    Ok(written)
}
