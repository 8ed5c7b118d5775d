//! Lifecycle synchronizer: keeps the thumbnail cache and file metadata in
//! step with the files in storage.
//!
//! ## Event handling
//!
//! | Event | Condition | Effect |
//! |---|---|---|
//! | `FileAdded` | gcode | drop stale artifact → extract → write `thumbnail` + `thumbnail_src` (or clear both when nothing is found) |
//! | `FileRemoved` | gcode | drop artifact, clear `thumbnail` + `thumbnail_src` |
//! | `FolderRemoved` | any | drop the mirrored cache subtree |
//! | `FolderAdded` | any | backfill crawl over the new folder |
//!
//! Only events for the `local` storage are honored; everything else is
//! ignored, as is any path that would resolve outside the cache. Events are handled one at a time, to completion. Within a
//! `FileAdded` the old artifact is always gone before extraction starts and
//! metadata is written only after the new artifact is on disk.
//!
//! ## Backfill crawl
//!
//! [`Synchronizer::crawl`] walks a listing depth-first. A machine-code file
//! whose `thumbnail` is missing, or points at a file that no longer exists,
//! goes through the `FileAdded` path and is reported under `no_thumbnail`.
//! A file whose `thumbnail` came from this subsystem but lacks
//! `thumbnail_src` gets the attribution written and is reported under
//! `no_thumbnail_src`. Failures are logged per file and never stop the walk.

use crate::cache::ThumbnailCache;
use crate::config::Config;
use crate::extract::{self, ExtractError};
use crate::storage::{
    Entry, FileKind, FileManager, LOCAL, LocalStorage, Metadata, StorageError,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Metadata key holding the thumbnail URL.
pub const THUMBNAIL_KEY: &str = "thumbnail";

/// Metadata key naming the subsystem that produced the thumbnail.
pub const THUMBNAIL_SRC_KEY: &str = "thumbnail_src";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Insufficient rights")]
    AccessDenied,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    FileAdded,
    FileRemoved,
    FolderAdded,
    FolderRemoved,
}

/// A storage notification.
///
/// Deserializes from the host's payload shape:
///
/// ```json
/// {"event": "FileAdded", "storage": "local", "path": "a/b.gcode", "type": ["machinecode", "gcode"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub storage: String,
    pub path: String,
    #[serde(default, rename = "type")]
    pub type_tags: Vec<String>,
}

impl Event {
    /// A `local` storage event. File events are tagged as gcode.
    pub fn local(kind: EventKind, path: impl Into<String>) -> Self {
        let type_tags = match kind {
            EventKind::FileAdded | EventKind::FileRemoved => {
                vec!["machinecode".to_string(), "gcode".to_string()]
            }
            EventKind::FolderAdded | EventKind::FolderRemoved => Vec::new(),
        };
        Self {
            kind,
            storage: LOCAL.to_string(),
            path: path.into(),
            type_tags,
        }
    }

    pub fn is_gcode(&self) -> bool {
        self.type_tags.iter().any(|t| t == "gcode")
    }
}

/// Result of one crawl: paths that needed extraction, and paths that only
/// needed attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub no_thumbnail: Vec<String>,
    pub no_thumbnail_src: Vec<String>,
}

impl CrawlReport {
    pub fn is_empty(&self) -> bool {
        self.no_thumbnail.is_empty() && self.no_thumbnail_src.is_empty()
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} without thumbnail, {} without source",
            self.no_thumbnail.len(),
            self.no_thumbnail_src.len()
        )
    }
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ignored,
    Extracted { url: String },
    NoThumbnail,
    Removed { existed: bool },
    FolderPurged,
    Crawled(CrawlReport),
}

/// Capability check guarding the crawl command.
pub trait Authorize {
    fn may_crawl(&self) -> bool;
}

/// The operator at the local command line, who holds every capability.
pub struct LocalOperator;

impl Authorize for LocalOperator {
    fn may_crawl(&self) -> bool {
        true
    }
}

pub struct Synchronizer<F> {
    files: F,
    cache: ThumbnailCache,
    identifier: String,
}

impl Synchronizer<LocalStorage> {
    /// Open the local storage and cache laid out under `data_dir`.
    pub fn open(data_dir: &Path, config: &Config) -> Result<Self, SyncError> {
        let files = LocalStorage::open(
            config.uploads_path(data_dir),
            config.machine_code_extensions.clone(),
        )?;
        let cache = ThumbnailCache::new(config.cache_path(data_dir), config.route_prefix.clone());
        Ok(Self::new(files, cache, config.identifier.clone()))
    }
}

impl<F: FileManager> Synchronizer<F> {
    /// `identifier` is written as `thumbnail_src` and recognizes URLs this
    /// subsystem produced.
    pub fn new(files: F, cache: ThumbnailCache, identifier: impl Into<String>) -> Self {
        Self {
            files,
            cache,
            identifier: identifier.into(),
        }
    }

    pub fn files(&self) -> &F {
        &self.files
    }

    pub fn cache(&self) -> &ThumbnailCache {
        &self.cache
    }

    pub fn handle(&mut self, event: &Event) -> Result<Outcome, SyncError> {
        if event.storage != LOCAL {
            return Ok(Outcome::Ignored);
        }
        if !self.cache.contains(&event.path) {
            warn!(path = %event.path, "ignoring event for a path outside the cache");
            return Ok(Outcome::Ignored);
        }
        match event.kind {
            EventKind::FileAdded if event.is_gcode() => self.file_added(&event.path),
            EventKind::FileRemoved if event.is_gcode() => {
                let existed = self.remove_stale(&event.path);
                self.clear_thumbnail_metadata(&event.path);
                Ok(Outcome::Removed { existed })
            }
            EventKind::FolderRemoved => {
                self.cache.remove_folder(&event.path);
                Ok(Outcome::FolderPurged)
            }
            EventKind::FolderAdded => {
                let entries = self.files.list_entries(&event.path, true)?;
                let report = self.crawl(&entries);
                debug!(path = %event.path, %report, "folder crawl finished");
                Ok(Outcome::Crawled(report))
            }
            EventKind::FileAdded | EventKind::FileRemoved => Ok(Outcome::Ignored),
        }
    }

    /// Crawl the whole storage on behalf of `caller`.
    pub fn crawl_command(&mut self, caller: &impl Authorize) -> Result<CrawlReport, SyncError> {
        if !caller.may_crawl() {
            return Err(SyncError::AccessDenied);
        }
        let entries = self.files.list_entries("", true)?;
        let report = self.crawl(&entries);
        info!(%report, "crawl finished");
        Ok(report)
    }

    /// Reconcile every machine-code file in `entries` and their descendants.
    pub fn crawl(&mut self, entries: &[Entry]) -> CrawlReport {
        let mut report = CrawlReport::default();
        self.crawl_into(entries, &mut report);
        report
    }

    fn crawl_into(&mut self, entries: &[Entry], report: &mut CrawlReport) {
        for entry in entries {
            match entry {
                Entry::Folder { children, .. } => self.crawl_into(children, report),
                Entry::File {
                    path,
                    kind: FileKind::MachineCode,
                    metadata,
                } => self.reconcile(path, metadata, report),
                Entry::File { .. } => {}
            }
        }
    }

    fn reconcile(&mut self, path: &str, metadata: &Metadata, report: &mut CrawlReport) {
        let thumbnail = metadata
            .get(THUMBNAIL_KEY)
            .filter(|url| self.cache.url_target(url).exists());

        match thumbnail {
            None => {
                debug!(path, "no thumbnail, attempting extraction");
                report.no_thumbnail.push(path.to_string());
                if let Err(e) = self.file_added(path) {
                    warn!(path, error = %e, "thumbnail extraction failed");
                }
            }
            Some(url)
                if url.contains(&self.identifier)
                    && metadata
                        .get(THUMBNAIL_SRC_KEY)
                        .is_none_or(|src| src.is_empty()) =>
            {
                debug!(path, "no thumbnail source, adding");
                report.no_thumbnail_src.push(path.to_string());
                if let Err(e) =
                    self.files
                        .set_metadata(LOCAL, path, THUMBNAIL_SRC_KEY, &self.identifier, true)
                {
                    warn!(path, error = %e, "failed to write thumbnail source");
                }
            }
            Some(_) => {}
        }
    }

    fn file_added(&mut self, path: &str) -> Result<Outcome, SyncError> {
        let Some(target) = self.cache.artifact_path(path) else {
            warn!(path, "refusing to extract to a path outside the cache");
            return Ok(Outcome::Ignored);
        };
        self.remove_stale(path);

        let gcode = self.files.resolve_absolute_path(LOCAL, path)?;
        if extract::extract(&gcode, &target)?.is_none() {
            self.clear_thumbnail_metadata(path);
            return Ok(Outcome::NoThumbnail);
        }

        let url = self.cache.thumbnail_url(path, Local::now().naive_local());
        self.files
            .set_metadata(LOCAL, path, THUMBNAIL_KEY, &url, true)?;
        self.files
            .set_metadata(LOCAL, path, THUMBNAIL_SRC_KEY, &self.identifier, true)?;
        info!(path, "thumbnail extracted");
        Ok(Outcome::Extracted { url })
    }

    /// Drop `thumbnail` and `thumbnail_src` once their artifact is gone.
    fn clear_thumbnail_metadata(&mut self, path: &str) {
        for key in [THUMBNAIL_KEY, THUMBNAIL_SRC_KEY] {
            if let Err(e) = self.files.remove_metadata(LOCAL, path, key) {
                warn!(path, key, error = %e, "failed to clear thumbnail metadata");
            }
        }
    }

    /// Best-effort removal of the artifact owned by `path`.
    fn remove_stale(&self, path: &str) -> bool {
        match self.cache.remove_artifact(path) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(path, error = %e, "failed to remove stale thumbnail");
                false
            }
        }
    }
}
