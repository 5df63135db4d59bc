//! Path resolution across the local and secondary tiers.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Errno, FsResult};

#[derive(Debug, Clone)]
pub struct TierLayout {
    local_root: PathBuf,
    secondary_root: PathBuf,
}

impl TierLayout {
    pub fn new(local_root: impl Into<PathBuf>, secondary_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            secondary_root: secondary_root.into(),
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn secondary_root(&self) -> &Path {
        &self.secondary_root
    }

    pub fn local_path(&self, path: &str) -> PathBuf {
        join_under(&self.local_root, path)
    }

    pub fn secondary_path(&self, path: &str) -> PathBuf {
        join_under(&self.secondary_root, path)
    }

    /// Local location if anything exists there, else the secondary one.
    pub fn target_path(&self, path: &str) -> PathBuf {
        let local = self.local_path(path);
        if exists(&local) {
            local
        } else {
            self.secondary_path(path)
        }
    }

    pub fn exists_local(&self, path: &str) -> bool {
        exists(&self.local_path(path))
    }

    pub fn exists_secondary(&self, path: &str) -> bool {
        exists(&self.secondary_path(path))
    }

    /// Converts a native path under either root back into a namespace
    /// path. Paths outside both roots are returned unchanged.
    pub fn strip_root(&self, native: &Path) -> String {
        for root in [&self.local_root, &self.secondary_root] {
            if let Ok(rest) = native.strip_prefix(root) {
                return format!("/{}", rest.to_string_lossy());
            }
        }
        native.to_string_lossy().into_owned()
    }

    /// Namespace path of a native path under the local root.
    pub fn relative_to_local(&self, native: &Path) -> Option<String> {
        native
            .strip_prefix(&self.local_root)
            .ok()
            .map(|rest| format!("/{}", rest.to_string_lossy()))
    }
}

/// Rejects namespace paths with `..` segments, which could name files
/// outside both tier roots.
pub fn check_path(path: &str) -> FsResult<()> {
    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Errno::EINVAL);
    }
    Ok(())
}

/// Joins only the normal segments of `path`, so the result never leaves
/// `root`.
fn join_under(root: &Path, path: &str) -> PathBuf {
    let mut joined = root.to_path_buf();
    for component in Path::new(path).components() {
        if let Component::Normal(part) = component {
            joined.push(part);
        }
    }
    joined
}

/// `lstat` based existence, so dangling links still count.
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn is_dir(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

pub fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Copies a regular file, creating missing parent directories of `dst`.
pub fn copy_with_parents(src: &Path, dst: &Path) -> std::io::Result<u64> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)
}
