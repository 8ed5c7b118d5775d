//! Shared test utilities for the slicer-thumbs test suite.
//!
//! Provides gcode fixture builders for both thumbnail encodings, a file
//! writer, and [`MemoryFiles`], an in-memory [`FileManager`] that records
//! every metadata change.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_file(tmp.path(), "a.gcode", &base64_block(16, 16));
//!
//! let files = MemoryFiles::new(tmp.path(), vec![file("a.gcode", &[])]);
//! // ... drive a Synchronizer over `files` ...
//! assert!(files.operations().is_empty());
//! ```

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgb, RgbImage};

use crate::scanner::MKS_SENTINEL;
use crate::storage::{Entry, FileKind, FileManager, Metadata, StorageError};

// =========================================================================
// Gcode fixtures
// =========================================================================

/// A PNG of the given size filled with noise, so its encoded size grows
/// with its pixel count.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9 ^ (width << 16) ^ height;
    let image = RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        };
        Rgb([next(), next(), next()])
    });
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Base64 of `bytes` as `; `-prefixed comment lines, each ending in `\n`.
pub fn comment_wrapped_base64(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    encoded
        .as_bytes()
        .chunks(78)
        .map(|chunk| format!("; {}\n", String::from_utf8_lossy(chunk)))
        .collect()
}

/// A complete `; thumbnail begin` … `; thumbnail end` block around a noisy
/// PNG of the given size.
pub fn base64_block(width: u32, height: u32) -> String {
    let png = png_bytes(width, height);
    let declared_len = STANDARD.encode(&png).len();
    format!(
        "; thumbnail begin {width}x{height} {declared_len}\n{}; thumbnail end\n",
        comment_wrapped_base64(&png)
    )
}

/// An MKS span of `side` rows of `side` pixels, every pixel `color`.
///
/// The first row follows `marker` on its line; later rows each sit behind a
/// `M10086 ;` prefix, and a bare `M10086 ;` line closes the span.
pub fn mks_block(marker: &str, side: u32, color: u16) -> String {
    let row = hex::encode(color.to_le_bytes().repeat(side as usize));
    let mut out = format!("{marker}{row}\n");
    for _ in 1..side {
        out.push_str(MKS_SENTINEL);
        out.push_str(&row);
        out.push('\n');
    }
    out.push_str(MKS_SENTINEL);
    out.push('\n');
    out
}

/// Write `content` to `dir/rel`, creating parent directories.
pub fn write_file(dir: &Path, rel: &str, content: &str) -> PathBuf {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

// =========================================================================
// Listing builders
// =========================================================================

/// A machine-code file entry carrying `metadata`.
pub fn file(path: &str, metadata: &[(&str, &str)]) -> Entry {
    Entry::File {
        path: path.to_string(),
        kind: FileKind::MachineCode,
        metadata: metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn folder(path: &str, children: Vec<Entry>) -> Entry {
    Entry::Folder {
        path: path.to_string(),
        children,
    }
}

// =========================================================================
// In-memory file manager
// =========================================================================

/// A metadata change seen by [`MemoryFiles`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOp {
    SetMetadata {
        path: String,
        key: String,
        value: String,
        overwrite: bool,
    },
    RemoveMetadata {
        path: String,
        key: String,
    },
}

/// A [`FileManager`] over a fixed listing. Paths resolve under `root`, so
/// gcode content lives on disk while metadata lives in memory.
pub struct MemoryFiles {
    root: PathBuf,
    tree: Vec<Entry>,
    ops: Vec<RecordedOp>,
}

impl MemoryFiles {
    pub fn new(root: impl Into<PathBuf>, tree: Vec<Entry>) -> Self {
        Self {
            root: root.into(),
            tree,
            ops: Vec::new(),
        }
    }

    pub fn operations(&self) -> Vec<RecordedOp> {
        self.ops.clone()
    }
}

fn find_folder<'a>(entries: &'a [Entry], path: &str) -> Option<&'a [Entry]> {
    entries.iter().find_map(|entry| match entry {
        Entry::Folder { path: p, children } if p == path => Some(children.as_slice()),
        Entry::Folder { children, .. } => find_folder(children, path),
        Entry::File { .. } => None,
    })
}

fn find_metadata<'a>(entries: &'a mut [Entry], path: &str) -> Option<&'a mut Metadata> {
    entries.iter_mut().find_map(|entry| match entry {
        Entry::File {
            path: p, metadata, ..
        } if p == path => Some(metadata),
        Entry::Folder { children, .. } => find_metadata(children, path),
        Entry::File { .. } => None,
    })
}

fn shallow(entry: &Entry) -> Entry {
    match entry {
        Entry::Folder { path, .. } => folder(path, Vec::new()),
        file => file.clone(),
    }
}

impl FileManager for MemoryFiles {
    fn resolve_absolute_path(&self, _storage: &str, path: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(path))
    }

    fn list_entries(&self, path: &str, recursive: bool) -> Result<Vec<Entry>, StorageError> {
        let entries = if path.is_empty() {
            self.tree.as_slice()
        } else {
            find_folder(&self.tree, path).ok_or_else(|| StorageError::NotFound(path.to_string()))?
        };
        Ok(if recursive {
            entries.to_vec()
        } else {
            entries.iter().map(shallow).collect()
        })
    }

    fn set_metadata(
        &mut self,
        _storage: &str,
        path: &str,
        key: &str,
        value: &str,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        self.ops.push(RecordedOp::SetMetadata {
            path: path.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            overwrite,
        });
        let metadata = find_metadata(&mut self.tree, path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        if overwrite || !metadata.contains_key(key) {
            metadata.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_metadata(
        &mut self,
        _storage: &str,
        path: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        self.ops.push(RecordedOp::RemoveMetadata {
            path: path.to_string(),
            key: key.to_string(),
        });
        if let Some(metadata) = find_metadata(&mut self.tree, path) {
            metadata.remove(key);
        }
        Ok(())
    }
}
