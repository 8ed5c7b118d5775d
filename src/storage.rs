//! File storage collaborator.
//!
//! The synchronizer only needs a few things from whatever owns the gcode
//! files: where a file lives on disk, a listing of files and folders with
//! their metadata, and a way to write and remove metadata values. [`FileManager`] is
//! that seam. [`LocalStorage`] implements it over a plain directory.
//!
//! ## Listings
//!
//! Listings are a typed tree rather than nested maps:
//!
//! ```text
//! Folder "parts"
//! ├── File "parts/bracket.gcode" (machinecode, {thumbnail: ...})
//! └── Folder "parts/deep"
//!     └── File "parts/deep/clip.gcode" (machinecode, {})
//! ```
//!
//! ## Metadata store
//!
//! [`LocalStorage`] keeps file metadata in `<root>/.metadata.json`, keyed by
//! storage-relative path. A missing, corrupt, or outdated store loads as
//! empty, and records of files that have since disappeared are pruned on
//! open. Hidden entries (leading `.`) never appear in listings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Name of the only storage backend events are honored for.
pub const LOCAL: &str = "local";

/// Name of the metadata store file within the storage root.
const METADATA_FILENAME: &str = ".metadata.json";

/// Version of the metadata store format.
const METADATA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Unknown storage: {0}")]
    UnknownStorage(String),
    #[error("Path escapes the storage root: {0}")]
    OutsideRoot(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Content type of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    MachineCode,
    Model,
    Other,
}

/// Additional metadata attached to a stored file.
pub type Metadata = BTreeMap<String, String>;

/// A node in a storage listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    File {
        path: String,
        kind: FileKind,
        metadata: Metadata,
    },
    Folder {
        path: String,
        children: Vec<Entry>,
    },
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::File { path, .. } | Entry::Folder { path, .. } => path,
        }
    }
}

/// Operations the synchronizer needs from file storage.
pub trait FileManager {
    /// Absolute on-disk location of a storage-relative path.
    fn resolve_absolute_path(&self, storage: &str, path: &str) -> Result<PathBuf, StorageError>;

    /// Entries under `path` (empty for the storage root). Folders carry
    /// their children only when `recursive` is set.
    fn list_entries(&self, path: &str, recursive: bool) -> Result<Vec<Entry>, StorageError>;

    /// Set one metadata value on a file. With `overwrite` unset an existing
    /// value is kept.
    fn set_metadata(
        &mut self,
        storage: &str,
        path: &str,
        key: &str,
        value: &str,
        overwrite: bool,
    ) -> Result<(), StorageError>;

    /// Remove one metadata value. Absent values, and files that no longer
    /// exist, are not an error.
    fn remove_metadata(&mut self, storage: &str, path: &str, key: &str)
        -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataStore {
    version: u32,
    files: BTreeMap<String, Metadata>,
}

impl MetadataStore {
    fn empty() -> Self {
        Self {
            version: METADATA_VERSION,
            files: BTreeMap::new(),
        }
    }

    fn load(root: &Path) -> Self {
        let content = match fs::read_to_string(root.join(METADATA_FILENAME)) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(store) if store.version == METADATA_VERSION => store,
            _ => Self::empty(),
        }
    }

    fn save(&self, root: &Path) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(root.join(METADATA_FILENAME), json)?;
        Ok(())
    }
}

/// [`FileManager`] over a local directory.
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
    machine_code_extensions: Vec<String>,
    store: MetadataStore,
}

impl LocalStorage {
    /// Open a storage root, creating it if needed.
    ///
    /// Metadata records of files that no longer exist are dropped.
    pub fn open(
        root: impl Into<PathBuf>,
        machine_code_extensions: Vec<String>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut store = MetadataStore::load(&root);

        let before = store.files.len();
        store.files.retain(|path, _| root.join(path).is_file());
        if store.files.len() != before {
            debug!(pruned = before - store.files.len(), "dropped metadata of missing files");
            store.save(&root)?;
        }

        Ok(Self {
            root,
            machine_code_extensions,
            store,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata recorded for a file, if any.
    pub fn metadata(&self, path: &str) -> Option<&Metadata> {
        self.store.files.get(path)
    }

    fn classify(&self, path: &Path) -> FileKind {
        let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            return FileKind::Other;
        };
        if self.machine_code_extensions.iter().any(|m| *m == ext) {
            FileKind::MachineCode
        } else if matches!(ext.as_str(), "stl" | "3mf" | "obj") {
            FileKind::Model
        } else {
            FileKind::Other
        }
    }

    /// Join a storage-relative path onto the root, rejecting escapes.
    fn checked_join(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StorageError::OutsideRoot(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn relative(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .unwrap_or(absolute)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn collect(&self, dir: &Path, recursive: bool) -> Result<Vec<Entry>, StorageError> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = self.relative(entry.path());
            if entry.file_type().is_dir() {
                let children = if recursive {
                    self.collect(entry.path(), true)?
                } else {
                    Vec::new()
                };
                entries.push(Entry::Folder { path, children });
            } else if entry.file_type().is_file() {
                let metadata = self.store.files.get(&path).cloned().unwrap_or_default();
                entries.push(Entry::File {
                    kind: self.classify(entry.path()),
                    path,
                    metadata,
                });
            }
        }

        Ok(entries)
    }
}

fn require_local(storage: &str) -> Result<(), StorageError> {
    if storage == LOCAL {
        Ok(())
    } else {
        Err(StorageError::UnknownStorage(storage.to_string()))
    }
}

impl FileManager for LocalStorage {
    fn resolve_absolute_path(&self, storage: &str, path: &str) -> Result<PathBuf, StorageError> {
        require_local(storage)?;
        self.checked_join(path)
    }

    fn list_entries(&self, path: &str, recursive: bool) -> Result<Vec<Entry>, StorageError> {
        let dir = self.checked_join(path)?;
        if !dir.is_dir() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        self.collect(&dir, recursive)
    }

    fn set_metadata(
        &mut self,
        storage: &str,
        path: &str,
        key: &str,
        value: &str,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        require_local(storage)?;
        if !self.checked_join(path)?.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        let metadata = self.store.files.entry(path.to_string()).or_default();
        if overwrite || !metadata.contains_key(key) {
            metadata.insert(key.to_string(), value.to_string());
            self.store.save(&self.root)?;
        }
        Ok(())
    }

    fn remove_metadata(
        &mut self,
        storage: &str,
        path: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        require_local(storage)?;
        self.checked_join(path)?;

        let Some(metadata) = self.store.files.get_mut(path) else {
            return Ok(());
        };
        if metadata.remove(key).is_none() {
            return Ok(());
        }
        if metadata.is_empty() {
            self.store.files.remove(path);
        }
        self.store.save(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use tempfile::TempDir;

    fn storage(tmp: &TempDir) -> LocalStorage {
        LocalStorage::open(tmp.path(), vec!["gcode".into(), "gco".into(), "g".into()]).unwrap()
    }

    fn paths(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(Entry::path).collect()
    }

    // =========================================================================
    // Listings
    // =========================================================================

    #[test]
    fn lists_sorted_entries_without_hidden_files() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "b.gcode", "");
        write_file(tmp.path(), "a.stl", "");
        write_file(tmp.path(), ".hidden.gcode", "");
        fs::create_dir_all(tmp.path().join("c")).unwrap();

        let entries = storage(&tmp).list_entries("", false).unwrap();
        assert_eq!(paths(&entries), vec!["a.stl", "b.gcode", "c"]);
    }

    #[test]
    fn files_are_classified_by_extension() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.GCODE", "");
        write_file(tmp.path(), "b.stl", "");
        write_file(tmp.path(), "c.txt", "");

        let kinds: Vec<FileKind> = storage(&tmp)
            .list_entries("", false)
            .unwrap()
            .into_iter()
            .map(|e| match e {
                Entry::File { kind, .. } => kind,
                Entry::Folder { .. } => panic!("unexpected folder"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![FileKind::MachineCode, FileKind::Model, FileKind::Other]
        );
    }

    #[test]
    fn recursive_listing_nests_children() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "parts/deep/clip.gcode", "");
        write_file(tmp.path(), "parts/bracket.gcode", "");

        let entries = storage(&tmp).list_entries("", true).unwrap();
        let Entry::Folder { path, children } = &entries[0] else {
            panic!("expected folder, got {:?}", entries[0]);
        };
        assert_eq!(path, "parts");
        assert_eq!(paths(children), vec!["parts/bracket.gcode", "parts/deep"]);
        let Entry::Folder { children: deep, .. } = &children[1] else {
            panic!("expected nested folder");
        };
        assert_eq!(paths(deep), vec!["parts/deep/clip.gcode"]);
    }

    #[test]
    fn shallow_listing_leaves_folders_empty() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "parts/a.gcode", "");

        let entries = storage(&tmp).list_entries("", false).unwrap();
        assert_eq!(
            entries,
            vec![Entry::Folder {
                path: "parts".into(),
                children: vec![]
            }]
        );
    }

    #[test]
    fn listing_a_subfolder_uses_root_relative_paths() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "parts/a.gcode", "");

        let entries = storage(&tmp).list_entries("parts", true).unwrap();
        assert_eq!(paths(&entries), vec!["parts/a.gcode"]);
    }

    #[test]
    fn listing_missing_folder_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let result = storage(&tmp).list_entries("nope", true);
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    // =========================================================================
    // Paths
    // =========================================================================

    #[test]
    fn resolves_local_paths_under_root() {
        let tmp = TempDir::new().unwrap();
        let path = storage(&tmp)
            .resolve_absolute_path(LOCAL, "parts/a.gcode")
            .unwrap();
        assert_eq!(path, tmp.path().join("parts/a.gcode"));
    }

    #[test]
    fn rejects_other_storages_and_escapes() {
        let tmp = TempDir::new().unwrap();
        let s = storage(&tmp);
        assert!(matches!(
            s.resolve_absolute_path("sdcard", "a.gcode"),
            Err(StorageError::UnknownStorage(_))
        ));
        assert!(matches!(
            s.resolve_absolute_path(LOCAL, "../a.gcode"),
            Err(StorageError::OutsideRoot(_))
        ));
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    #[test]
    fn metadata_is_persisted_and_listed() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.gcode", "");
        let mut s = storage(&tmp);
        s.set_metadata(LOCAL, "a.gcode", "thumbnail", "url", true)
            .unwrap();

        let reopened = storage(&tmp);
        assert_eq!(
            reopened.metadata("a.gcode").unwrap().get("thumbnail"),
            Some(&"url".to_string())
        );
        let entries = reopened.list_entries("", false).unwrap();
        let Entry::File { metadata, .. } = &entries[0] else {
            panic!("expected file");
        };
        assert_eq!(metadata.get("thumbnail").map(String::as_str), Some("url"));
    }

    #[test]
    fn overwrite_flag_controls_replacement() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.gcode", "");
        let mut s = storage(&tmp);
        s.set_metadata(LOCAL, "a.gcode", "k", "first", false).unwrap();
        s.set_metadata(LOCAL, "a.gcode", "k", "second", false).unwrap();
        assert_eq!(s.metadata("a.gcode").unwrap()["k"], "first");

        s.set_metadata(LOCAL, "a.gcode", "k", "third", true).unwrap();
        assert_eq!(s.metadata("a.gcode").unwrap()["k"], "third");
    }

    #[test]
    fn remove_metadata_drops_key_then_record() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.gcode", "");
        let mut s = storage(&tmp);
        s.set_metadata(LOCAL, "a.gcode", "thumbnail", "url", true).unwrap();
        s.set_metadata(LOCAL, "a.gcode", "other", "kept", true).unwrap();

        s.remove_metadata(LOCAL, "a.gcode", "thumbnail").unwrap();
        assert_eq!(s.metadata("a.gcode").unwrap().get("thumbnail"), None);
        assert_eq!(s.metadata("a.gcode").unwrap()["other"], "kept");

        s.remove_metadata(LOCAL, "a.gcode", "other").unwrap();
        assert!(s.metadata("a.gcode").is_none());
        assert!(storage(&tmp).metadata("a.gcode").is_none());
    }

    #[test]
    fn remove_metadata_of_missing_file_is_silent() {
        let tmp = TempDir::new().unwrap();
        let mut s = storage(&tmp);
        s.remove_metadata(LOCAL, "ghost.gcode", "thumbnail").unwrap();
        assert!(matches!(
            s.remove_metadata(LOCAL, "../ghost.gcode", "thumbnail"),
            Err(StorageError::OutsideRoot(_))
        ));
    }

    #[test]
    fn records_of_deleted_files_are_pruned_on_open() {
        let tmp = TempDir::new().unwrap();
        let gcode = write_file(tmp.path(), "a.gcode", "");
        write_file(tmp.path(), "b.gcode", "");
        let mut s = storage(&tmp);
        s.set_metadata(LOCAL, "a.gcode", "thumbnail", "url", true).unwrap();
        s.set_metadata(LOCAL, "b.gcode", "thumbnail", "url", true).unwrap();

        fs::remove_file(gcode).unwrap();
        let reopened = storage(&tmp);
        assert!(reopened.metadata("a.gcode").is_none());
        assert!(reopened.metadata("b.gcode").is_some());

        // a re-upload under the same name starts without the old record
        write_file(tmp.path(), "a.gcode", "");
        assert!(storage(&tmp).metadata("a.gcode").is_none());
    }

    #[test]
    fn metadata_for_missing_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let result = storage(&tmp).set_metadata(LOCAL, "ghost.gcode", "k", "v", true);
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn corrupt_store_loads_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(METADATA_FILENAME), "not json").unwrap();
        assert!(storage(&tmp).metadata("a.gcode").is_none());
    }

    #[test]
    fn store_file_is_hidden_from_listings() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.gcode", "");
        let mut s = storage(&tmp);
        s.set_metadata(LOCAL, "a.gcode", "k", "v", true).unwrap();

        assert_eq!(paths(&s.list_entries("", false).unwrap()), vec!["a.gcode"]);
    }
}
