use color_eyre::Result;
use std::path::{Path, absolute};

/// Converts a path to a POSIX-style string, replacing backslashes with forward slashes.
#[must_use]
pub fn to_posix_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub trait MakeRelativePath {
    /// Path relative to `root`, as a POSIX string.
    fn make_relative(&self, root: &Path) -> Result<String>;
}

impl<P: AsRef<Path>> MakeRelativePath for P {
    fn make_relative(&self, root: &Path) -> Result<String> {
        let file_abs = absolute(self.as_ref())?;
        let root_abs = absolute(root)?;
        let relative_path = file_abs.strip_prefix(root_abs)?;
        Ok(to_posix_string(relative_path))
    }
}

/// Format bytes to a human readable size, e.g. `1.5 GB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PB")
}
