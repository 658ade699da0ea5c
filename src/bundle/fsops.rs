//! File copying and lexical path-safety helpers.
//!
//! All containment checks here are lexical: `..` and `.` components are
//! folded without touching the filesystem and symlinks are never followed.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::error::{PackageError, Result};

/// Folds `.` and `..` components without consulting the filesystem.
///
/// A `..` at the root of an absolute path is dropped; a leading `..` on a
/// relative path is kept.
pub fn lexical_clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Absolute, lexically cleaned form of `path` (relative paths are anchored
/// at the current directory).
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    Ok(lexical_clean(&std::path::absolute(path)?))
}

/// Whether `target` lies at or below `base` after lexical resolution.
pub fn within_base(base: &Path, target: &Path) -> bool {
    match (absolutize(base), absolutize(target)) {
        (Ok(base), Ok(target)) => target.starts_with(base),
        _ => false,
    }
}

/// Joins a manifest- or bundle-relative path onto `root`, refusing results
/// that escape it.
pub fn resolve_under(root: &Path, rel: &str) -> Result<PathBuf> {
    let joined = lexical_clean(&root.join(rel));
    if !within_base(root, &joined) {
        return Err(PackageError::PathEscape {
            path: rel.to_string(),
            root: root.to_path_buf(),
        });
    }
    Ok(joined)
}

/// Strips leading `../` segments so a manifest path can be re-rooted inside
/// the bundle. A lone `..` becomes the empty string.
pub fn normalize_bundle_path(rel: &str) -> String {
    let mut rest = rel;
    loop {
        if let Some(stripped) = rest
            .strip_prefix("../")
            .or_else(|| rest.strip_prefix("..\\"))
        {
            rest = stripped;
            continue;
        }
        if rest == ".." {
            return String::new();
        }
        return rest.to_string();
    }
}

/// `create_dir_all` with mode 0755 on Unix.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(path)
}

/// Copies a single file, creating parent directories first.
///
/// No-op when `src` and `dst` resolve to the same absolute path. Permission
/// bits (including the executable bit) are carried over.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    let abs_src = absolutize(src).map_err(|e| io_at(src, e))?;
    let abs_dst = absolutize(dst).map_err(|e| io_at(dst, e))?;
    if abs_src == abs_dst {
        debug!(path = %abs_src.display(), "copy source and destination are identical");
        return Ok(());
    }

    if let Some(parent) = abs_dst.parent() {
        ensure_dir(parent).map_err(|e| io_at(parent, e))?;
    }
    // fs::copy carries the permission bits over on every platform.
    fs::copy(&abs_src, &abs_dst).map_err(|e| io_at(&abs_src, e))?;
    Ok(())
}

/// Copies a file or a directory tree and returns every file written.
///
/// Directory walks stage regular files and directories only. Symlinks are
/// followed only when they resolve to a regular file inside the source tree;
/// devices, sockets and outward links are skipped.
pub fn copy_path(src: &Path, dst: &Path) -> Result<Vec<PathBuf>> {
    let meta = fs::symlink_metadata(src).map_err(|e| io_at(src, e))?;
    let mut written = Vec::new();
    if meta.is_dir() {
        let root = fs::canonicalize(src).map_err(|e| io_at(src, e))?;
        ensure_dir(dst).map_err(|e| io_at(dst, e))?;
        copy_tree(&root, src, dst, &mut written)?;
    } else if meta.is_file() {
        copy_file(src, dst)?;
        written.push(dst.to_path_buf());
    } else if meta.file_type().is_symlink() {
        let target = fs::metadata(src).map_err(|e| io_at(src, e))?;
        if target.is_file() {
            copy_file(src, dst)?;
            written.push(dst.to_path_buf());
        }
    }
    Ok(written)
}

fn copy_tree(root: &Path, src: &Path, dst: &Path, written: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(src)
        .map_err(|e| io_at(src, e))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| io_at(src, e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| io_at(&from, e))?;

        if file_type.is_dir() {
            ensure_dir(&to).map_err(|e| io_at(&to, e))?;
            copy_tree(root, &from, &to, written)?;
        } else if file_type.is_file() {
            copy_file(&from, &to)?;
            written.push(to);
        } else if file_type.is_symlink() {
            match fs::canonicalize(&from) {
                Ok(resolved) if resolved.starts_with(root) && resolved.is_file() => {
                    copy_file(&resolved, &to)?;
                    written.push(to);
                }
                _ => debug!(path = %from.display(), "skipping symlink outside tree"),
            }
        } else {
            debug!(path = %from.display(), "skipping special file");
        }
    }
    Ok(())
}

fn io_at(path: &Path, source: io::Error) -> PackageError {
    PackageError::Io {
        path: path.to_path_buf(),
        source,
    }
}
