//! On-disk thumbnail cache.
//!
//! The cache root mirrors the local storage tree. Each gcode file owns at
//! most one artifact, found by swapping the file's extension for `.png`:
//!
//! ```text
//! uploads/                         thumbnails/
//! ├── benchy.gcode           →     ├── benchy.png
//! └── parts/                       └── parts/
//!     └── bracket.gco        →         └── bracket.png
//! ```
//!
//! Files point at their artifact through a `thumbnail` metadata URL:
//!
//! ```text
//! plugin/prusaslicerthumbnails/thumbnail/parts/bracket.png?20240301121500
//! └──────────── route prefix ───────────┘└─ cache path ─┘ └ timestamp ┘
//! ```
//!
//! The timestamp busts browser caches when a file is re-uploaded under the
//! same name.

use chrono::NaiveDateTime;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Extension of every cached artifact.
pub const ARTIFACT_EXTENSION: &str = "png";

/// Timestamp format of the cache-busting query.
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Artifact path relative to the cache root for a storage-relative gcode path.
///
/// `parts/bracket.gcode` → `parts/bracket.png`.
pub fn relative_artifact_path(source: &str) -> String {
    Path::new(source.trim_start_matches('/'))
        .with_extension(ARTIFACT_EXTENSION)
        .to_string_lossy()
        .into_owned()
}

/// `relative` as a path below the cache root, or `None` if it is empty or
/// has any component other than a plain name.
fn contained(relative: &str) -> Option<&Path> {
    let path = Path::new(relative.trim_start_matches('/'));
    let plain = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    (plain && path.components().next().is_some()).then_some(path)
}

/// The thumbnail cache directory and the URL prefix it is served under.
#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    root: PathBuf,
    route_prefix: String,
}

impl ThumbnailCache {
    pub fn new(root: impl Into<PathBuf>, route_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            route_prefix: route_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    /// Whether a storage-relative path stays inside the cache root. The
    /// storage root itself (`""` or `/`) counts as inside.
    pub fn contains(&self, source: &str) -> bool {
        let trimmed = source.trim_matches('/');
        trimmed.is_empty() || contained(trimmed).is_some()
    }

    /// Absolute artifact path for a storage-relative gcode path.
    ///
    /// `None` when the path would leave the cache root (`..`, `.`).
    pub fn artifact_path(&self, source: &str) -> Option<PathBuf> {
        contained(&relative_artifact_path(source))
            .map(|relative| self.root.join(relative))
    }

    /// Delete the artifact owned by `source`.
    ///
    /// Returns `Ok(false)` when there was nothing to delete. Paths leaving the
    /// cache root are refused and also report `Ok(false)`.
    pub fn remove_artifact(&self, source: &str) -> io::Result<bool> {
        let Some(path) = self.artifact_path(source) else {
            warn!(path = source, "refusing to remove artifact outside the cache");
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed artifact");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete the cache subtree mirroring a storage folder.
    ///
    /// Errors are ignored: the subtree may never have existed. The cache root
    /// itself is never removed, nor is anything outside it.
    pub fn remove_folder(&self, folder: &str) {
        let trimmed = folder.trim_matches('/');
        if trimmed.is_empty() {
            return;
        }
        let Some(relative) = contained(trimmed) else {
            warn!(path = folder, "refusing to remove folder outside the cache");
            return;
        };
        let path = self.root.join(relative);
        if fs::remove_dir_all(&path).is_ok() {
            debug!(path = %path.display(), "removed artifact folder");
        }
    }

    /// Metadata URL for the artifact of `source`, stamped with `at`.
    pub fn thumbnail_url(&self, source: &str, at: NaiveDateTime) -> String {
        format!(
            "{}{}?{}",
            self.route_prefix,
            relative_artifact_path(source),
            at.format(TIMESTAMP_FORMAT)
        )
        .replace("//", "/")
    }

    /// The on-disk file a `thumbnail` URL refers to.
    ///
    /// URLs under this cache's route prefix resolve into the cache root;
    /// anything else is taken as a plain path.
    pub fn url_target(&self, url: &str) -> PathBuf {
        let path = url.split('?').next().unwrap_or_default();
        match path.strip_prefix(&self.route_prefix) {
            Some(relative) => self.root.join(relative),
            None => PathBuf::from(path),
        }
    }

    /// Resolve a request path (below the route prefix) to a cached file.
    ///
    /// Rejects absolute paths, `..`, and hidden components, and returns
    /// `None` for anything that is not an existing file.
    pub fn served_path(&self, request: &str) -> Option<PathBuf> {
        let relative = Path::new(request.split('?').next().unwrap_or_default());
        let safe = relative.components().all(|component| match component {
            Component::Normal(name) => !name.to_string_lossy().starts_with('.'),
            _ => false,
        });
        if !safe {
            return None;
        }
        let path = self.root.join(relative);
        path.is_file().then_some(path)
    }
}
