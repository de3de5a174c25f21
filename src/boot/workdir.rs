//! Working directory preparation.

use std::path::{Path, PathBuf};

use crate::error::BootError;

/// Subdirectories created under the work root.
pub const SUBDIRS: [&str; 2] = ["tmp", "public"];

/// Ensures `path` is a directory: created if absent, and replaced if a
/// non-directory entry occupies the name.
///
/// # Errors
///
/// Returns [`BootError::WorkDir`] on any I/O failure.
pub async fn ensure_dir(path: &Path) -> Result<(), BootError> {
    let wrap = |source| BootError::WorkDir {
        path: path.to_path_buf(),
        source,
    };
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "replacing non-directory entry");
            tokio::fs::remove_file(path).await.map_err(wrap)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(wrap(err)),
    }
    tokio::fs::create_dir_all(path).await.map_err(wrap)
}

/// Prepares the work root and its [`SUBDIRS`]. Returns the paths in
/// creation order.
///
/// # Errors
///
/// Returns [`BootError::WorkDir`] for the first directory that fails.
pub async fn prepare(root: &Path) -> Result<Vec<PathBuf>, BootError> {
    let mut dirs = vec![root.to_path_buf()];
    dirs.extend(SUBDIRS.iter().map(|sub| root.join(sub)));
    for dir in &dirs {
        ensure_dir(dir).await?;
    }
    Ok(dirs)
}
