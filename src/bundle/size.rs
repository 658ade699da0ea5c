//! Bundle size accounting and size warnings.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// A file at or above this size is reported as large.
pub const LARGE_FILE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;
/// Bundles at or above this size get a `warning`.
pub const WARNING_THRESHOLD_BYTES: u64 = 500 * 1024 * 1024;
/// Bundles at or above this size get a `critical` warning.
pub const CRITICAL_THRESHOLD_BYTES: u64 = 1024 * 1024 * 1024;
/// At most this many large files are reported.
pub const MAX_LARGE_FILES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeFile {
    /// Bundle-relative path with `/` separators.
    pub path: String,
    pub size_bytes: u64,
    pub size_human: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeWarningLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeWarning {
    pub level: SizeWarningLevel,
    pub message: String,
    pub total_bytes: u64,
    pub total_human: String,
    pub large_files: Vec<LargeFile>,
}

/// Sums regular-file sizes under `bundle_dir` and collects the largest
/// files (≥ 10 MiB, descending, at most ten).
pub fn calculate(bundle_dir: &Path) -> io::Result<(u64, Vec<LargeFile>)> {
    let mut total = 0u64;
    let mut large = Vec::new();
    walk(bundle_dir, bundle_dir, &mut total, &mut large)?;

    large.sort_by(|a: &LargeFile, b: &LargeFile| {
        b.size_bytes
            .cmp(&a.size_bytes)
            .then_with(|| a.path.cmp(&b.path))
    });
    large.truncate(MAX_LARGE_FILES);
    Ok((total, large))
}

fn walk(root: &Path, dir: &Path, total: &mut u64, large: &mut Vec<LargeFile>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            walk(root, &path, total, large)?;
        } else if file_type.is_file() {
            let size = entry.metadata()?.len();
            *total += size;
            if size >= LARGE_FILE_THRESHOLD_BYTES {
                large.push(LargeFile {
                    path: relative_display(root, &path),
                    size_bytes: size,
                    size_human: human_readable_size(size),
                });
            }
        }
    }
    Ok(())
}

fn relative_display(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Derives a size warning for a bundle of `total` bytes, if one is due.
pub fn check_warning(total: u64, large_files: Vec<LargeFile>) -> Option<SizeWarning> {
    let total_human = human_readable_size(total);
    let (level, message) = if total >= CRITICAL_THRESHOLD_BYTES {
        (
            SizeWarningLevel::Critical,
            format!(
                "Bundle size ({total_human}) exceeds the 1 GB threshold. Reduce bundled assets or ship delta updates to keep installers manageable."
            ),
        )
    } else if total >= WARNING_THRESHOLD_BYTES {
        (
            SizeWarningLevel::Warning,
            format!(
                "Bundle size ({total_human}) exceeds 500MB. Review the largest files to keep downloads manageable."
            ),
        )
    } else {
        return None;
    };

    let mut large_files = large_files;
    large_files.truncate(MAX_LARGE_FILES);
    Some(SizeWarning {
        level,
        message,
        total_bytes: total,
        total_human,
        large_files,
    })
}

/// Formats a byte count with binary prefixes: `500 B`, `1.5 KB`, `1.0 GB`.
pub fn human_readable_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    // Compare the value as printed so 1023.96 KB shows as 1.0 MB.
    while (value * 10.0).round() / 10.0 >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
