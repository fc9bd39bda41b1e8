//! Object key derivation.
//!
//! Keys mirror the layout of the watch directory under a fixed prefix:
//! `{prefix}{relative/path/with/forward/slashes}`. Path components are
//! joined with `/`; a Unix file name containing `\` stays one component.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors produced when a local path cannot be mapped to an object key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("{path} is not inside watch root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("{0} names the watch root itself, not a file below it")]
    EmptyRelative(PathBuf),

    #[error("path component of {0} is not valid UTF-8")]
    NonUtf8(PathBuf),
}

/// Map `local_path` (a descendant of `watch_root`) to its remote object key.
pub fn derive_key(local_path: &Path, watch_root: &Path, prefix: &str) -> Result<String, KeyError> {
    let relative = local_path
        .strip_prefix(watch_root)
        .map_err(|_| KeyError::OutsideRoot {
            path: local_path.to_path_buf(),
            root: watch_root.to_path_buf(),
        })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| KeyError::NonUtf8(local_path.to_path_buf()))?;
                parts.push(part);
            }
            Component::CurDir => {}
            // `..`, a drive prefix or a second root would escape the watch root
            _ => {
                return Err(KeyError::OutsideRoot {
                    path: local_path.to_path_buf(),
                    root: watch_root.to_path_buf(),
                })
            }
        }
    }

    if parts.is_empty() {
        return Err(KeyError::EmptyRelative(local_path.to_path_buf()));
    }

    Ok(format!("{}{}", prefix, parts.join("/")))
}

/// Get content type for a clip or snapshot extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}
