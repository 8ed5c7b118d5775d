//! Extraction engine: scan → select → decode → write, for one gcode file.
//!
//! Selection rules:
//!
//! - `embedded_base64` candidates: the longest raw payload wins, ties go to
//!   the first in file order.
//! - `mks_hex` candidates: `;;gimage:` over `;simage:`, regardless of size
//!   (see [`decoder::best_mks_block`]).
//!
//! The engine never touches file metadata. When nothing can be decoded no
//! file is written; removing a stale artifact beforehand is the caller's job.

use crate::decoder::{self, DecodeError};
use crate::scanner::{self, Encoding, ScanError, ThumbnailBlock};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to read gcode: {0}")]
    Scan(#[from] ScanError),
    #[error("Failed to write thumbnail {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A decoded thumbnail written to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailArtifact {
    pub path: PathBuf,
    pub encoding: Encoding,
    pub bytes: Vec<u8>,
}

/// Extract the thumbnail embedded in `gcode_path` into `target`.
///
/// Returns `Ok(None)` when the file has no usable thumbnail, including when
/// the chosen block fails to decode. Missing parent directories are created
/// and an existing file at `target` is overwritten.
pub fn extract(gcode_path: &Path, target: &Path) -> Result<Option<ThumbnailArtifact>, ExtractError> {
    let blocks = scanner::scan_file(gcode_path)?;

    let Some((encoding, bytes)) = decode_best(&blocks) else {
        debug!(path = %gcode_path.display(), "no thumbnail extracted");
        return Ok(None);
    };

    write_artifact(target, &bytes)?;
    debug!(
        path = %gcode_path.display(),
        target = %target.display(),
        %encoding,
        bytes = bytes.len(),
        "thumbnail written"
    );

    Ok(Some(ThumbnailArtifact {
        path: target.to_path_buf(),
        encoding,
        bytes,
    }))
}

/// Choose among scanned candidates and decode the winner.
///
/// Decode failures are logged and reported as `None`.
pub fn decode_best(blocks: &[ThumbnailBlock]) -> Option<(Encoding, Vec<u8>)> {
    let first = blocks.first()?;
    let result: Result<Vec<u8>, DecodeError> = match first.encoding {
        Encoding::EmbeddedBase64 => {
            let best = select_largest(blocks)?;
            decoder::decode_base64(&best.payload)
        }
        Encoding::MksHex => decoder::decode_mks(blocks),
    };

    match result {
        Ok(bytes) => Some((first.encoding, bytes)),
        Err(e) => {
            warn!(encoding = %first.encoding, error = %e, "thumbnail decode failed");
            None
        }
    }
}

/// The candidate with the longest payload; the earliest one on ties.
pub fn select_largest(blocks: &[ThumbnailBlock]) -> Option<&ThumbnailBlock> {
    blocks.iter().fold(None, |best, block| match best {
        Some(current) if current.payload_len() >= block.payload_len() => Some(current),
        _ => Some(block),
    })
}

/// Write through a sibling temp file so a failed write never leaves a
/// truncated artifact at `target`.
fn write_artifact(target: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
    let cache_err = |source| ExtractError::CacheIo {
        path: target.to_path_buf(),
        source,
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(cache_err)?;
    }
    let mut partial = target.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    fs::write(&partial, bytes).map_err(cache_err)?;
    fs::rename(&partial, target).map_err(|e| {
        let _ = fs::remove_file(&partial);
        cache_err(e)
    })
}
