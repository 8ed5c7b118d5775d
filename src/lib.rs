//! # slicer-thumbs
//!
//! Extracts the preview images slicers embed in gcode and keeps a thumbnail
//! cache, plus per-file metadata pointing at it, in step with the files in
//! storage.
//!
//! # Architecture: Scan → Decode → Sync
//!
//! ```text
//! 1. Scan      gcode header  →  candidate blocks   (no decoding)
//! 2. Decode    best block    →  PNG bytes          (base64 verbatim, MKS re-encoded)
//! 3. Sync      storage event →  cache + metadata   (extract, delete, crawl)
//! ```
//!
//! Two embedding formats are understood:
//!
//! - **embedded_base64**: `; thumbnail begin WxH LEN` … `; thumbnail end`
//!   blocks of base64 PNG, as written by PrusaSlicer, SuperSlicer, and Cura
//!   plugins. A file may carry several sizes; the largest payload wins.
//! - **mks_hex**: `;simage:` (100×100) and `;;gimage:` (200×200) hex dumps
//!   of 16-bit pixels for MKS TFT screens, each row continued behind
//!   `M10086 ;`.
//!
//! Only the comment header is read. Scanning stops at the first extruding
//! move, so even very large gcode files cost only their header.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scanner`] | Reads the gcode header and locates thumbnail candidates |
//! | [`decoder`] | Turns one candidate into PNG bytes |
//! | [`extract`] | Scan, select, decode, and write one artifact |
//! | [`cache`] | Cache layout, artifact paths, thumbnail URLs |
//! | [`storage`] | `FileManager` seam and the local directory backend |
//! | [`sync`] | Lifecycle events and the backfill crawl |
//! | [`config`] | `config.toml` loading, validation, and merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## One Artifact Per File
//!
//! The cache mirrors the storage tree and each gcode file owns exactly one
//! `.png` at its mirrored path. Deleting a file or folder is a path
//! computation, not a lookup, and a crawl can always tell whether an
//! artifact exists.
//!
//! ## Single-Threaded Event Handling
//!
//! Events are handled one at a time, to completion. Within a `FileAdded` the
//! stale artifact is removed before extraction and metadata is written only
//! after the new artifact is on disk, so a `thumbnail` URL never points at a
//! half-written file.
//!
//! ## Decode Failures Are Not Errors
//!
//! A corrupt or truncated block is logged and treated like a file without a
//! thumbnail. Only I/O failures surface as errors.

pub mod cache;
pub mod config;
pub mod decoder;
pub mod extract;
pub mod output;
pub mod scanner;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_helpers;
