//! Embedded thumbnail block scanning.
//!
//! Slicers store preview images as text inside gcode comments. Two encodings
//! are recognized:
//!
//! ## `embedded_base64` (PrusaSlicer, SuperSlicer, Cura plugins)
//!
//! ```text
//! ; thumbnail begin 220x124 5948
//! ; iVBORw0KGgoAAAANSUhEUgAAANwAAAB8CAYAAAD...
//! ; ...
//! ; thumbnail end
//! ```
//!
//! The payload is a base64 PNG split across comment lines. A file may carry
//! several blocks at different resolutions.
//!
//! ## `mks_hex` (MKS / Lottmaxx firmware)
//!
//! ```text
//! ;simage:<hex row 0>
//! M10086 ;<hex row 1>
//! ...
//! M10086 ;
//! ```
//!
//! Raw RGB565 pixel rows as hex text. `;simage:` marks a 100×100 image,
//! `;;gimage:` a 200×200 one. The block ends at the first `M10086 ;` that
//! closes a line.
//!
//! ## Bounded reads
//!
//! Thumbnails live in the file header. Reading stops at the first `G1` move
//! with a nonzero `E` word, so the toolpath body is never scanned no matter
//! how large the file is.
//!
//! ## Stages
//!
//! 1. [`read_header`]: collect comment, blank, and `M10086 ;` lines up to the
//!    first extruding move.
//! 2. [`normalize`]: unify line endings, separate adjacent bare `;` lines.
//! 3. [`find_base64_blocks`], falling back to [`find_mks_blocks`] only when
//!    no base64 block was found.

use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Line prefix that opens an `embedded_base64` block.
const BASE64_BEGIN: &str = "; thumbnail begin ";

/// Line prefix that closes an `embedded_base64` block.
const BASE64_END: &str = "; thumbnail end";

/// Sentinel used by MKS firmware as row prefix and block terminator.
pub const MKS_SENTINEL: &str = "M10086 ;";

/// Marker of a 200×200 `mks_hex` image.
pub const GIMAGE_MARKER: &str = ";;gimage:";

/// Marker of a 100×100 `mks_hex` image.
pub const SIMAGE_MARKER: &str = ";simage:";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Thumbnail encoding family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    EmbeddedBase64,
    MksHex,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::EmbeddedBase64 => "embedded_base64",
            Encoding::MksHex => "mks_hex",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel dimensions declared by a block's marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A candidate thumbnail located in a gcode header.
///
/// For `embedded_base64` the payload is the captured content lines (markers
/// excluded, `; ` prefixes kept). For `mks_hex` it is the whole matched span,
/// marker and terminating sentinel included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailBlock {
    pub encoding: Encoding,
    pub payload: String,
    /// Informational for `embedded_base64` (the PNG carries its own size);
    /// authoritative for `mks_hex`.
    pub declared: Option<Dimensions>,
}

impl ThumbnailBlock {
    /// Raw payload length, the size heuristic used to pick among candidates.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Scan a gcode file on disk.
pub fn scan_file(path: &Path) -> Result<Vec<ThumbnailBlock>, ScanError> {
    let file = File::open(path)?;
    scan(BufReader::new(file))
}

/// Scan a gcode stream for thumbnail candidates.
///
/// Returns `embedded_base64` blocks when there are any, otherwise `mks_hex`
/// blocks. An empty result means the file has no thumbnail.
pub fn scan<R: BufRead>(reader: R) -> Result<Vec<ThumbnailBlock>, ScanError> {
    let header = normalize(&read_header(reader)?);

    let blocks = find_base64_blocks(&header);
    if !blocks.is_empty() {
        debug!(count = blocks.len(), "found embedded_base64 candidates");
        return Ok(blocks);
    }

    let blocks = find_mks_blocks(&header);
    debug!(count = blocks.len(), "found mks_hex candidates");
    Ok(blocks)
}

/// Collect the header lines that may hold thumbnail data.
///
/// Lines are decoded permissively: invalid UTF-8 sequences are dropped.
/// Reading stops at the first extruding move; that line and everything after
/// it is left unread.
pub fn read_header<R: BufRead>(mut reader: R) -> Result<String, ScanError> {
    let mut collected = String::new();
    let mut buf = Vec::new();
    let mut line_num = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_num += 1;

        let line: String = buf.utf8_chunks().map(|chunk| chunk.valid()).collect();
        if is_extruding_move(&line) {
            debug!(line = line_num, "detected first extrusion, header complete");
            break;
        }
        if is_header_line(&line) {
            collected.push_str(&line);
        }
    }

    Ok(collected)
}

fn is_header_line(line: &str) -> bool {
    line.starts_with(';')
        || line.starts_with('\n')
        || line.starts_with("\r\n")
        || line.starts_with(MKS_SENTINEL)
}

/// Whether a gcode line is a `G1` move carrying a nonzero `E` word.
///
/// Handles both spaced (`G1 X10 E0.4`) and packed (`G1X10E0.4`) forms, an
/// optional `N` line number, and trailing comments.
pub fn is_extruding_move(line: &str) -> bool {
    let code = line.split(';').next().unwrap_or_default();
    let words = gcode_words(code);

    let mut commands = words.iter().filter(|(letter, _)| *letter != 'N');
    let is_g1 = commands
        .next()
        .is_some_and(|(letter, number)| *letter == 'G' && number.parse::<u32>() == Ok(1));
    if !is_g1 {
        return false;
    }

    words.iter().any(|(letter, value)| {
        *letter == 'E' && value.parse::<f64>().is_ok_and(|amount| amount != 0.0)
    })
}

/// Split the code part of a gcode line into `(letter, number)` words.
fn gcode_words(code: &str) -> Vec<(char, &str)> {
    let mut words = Vec::new();
    let mut rest = code.trim_start();

    while let Some(letter) = rest.chars().next() {
        let after = &rest[letter.len_utf8()..];
        let end = after
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+')))
            .unwrap_or(after.len());
        if letter.is_ascii_alphabetic() {
            words.push((letter.to_ascii_uppercase(), &after[..end]));
        }
        rest = after[end..].trim_start();
    }

    words
}

/// Unify line endings and separate directly adjacent bare `;` lines.
///
/// The blank line inserted between `;` pairs keeps a begin/end marker pair
/// that slicers emit back to back from being read as one block's content.
pub fn normalize(header: &str) -> String {
    header
        .replace("\r\n", "\n")
        .replace(";\n;\n", ";\n\n;\n")
}

enum Base64State<'a> {
    Searching,
    InBlock {
        declared: Dimensions,
        lines: Vec<&'a str>,
    },
}

/// Find every `embedded_base64` block in normalized header text.
///
/// A block needs at least one non-empty content line between its markers.
/// A blank line inside a block abandons it; a new begin marker restarts it.
pub fn find_base64_blocks(text: &str) -> Vec<ThumbnailBlock> {
    let mut blocks = Vec::new();
    let mut state = Base64State::Searching;

    for line in text.split('\n') {
        state = match state {
            Base64State::Searching => match parse_begin(line) {
                Some(declared) => Base64State::InBlock {
                    declared,
                    lines: Vec::new(),
                },
                None => Base64State::Searching,
            },
            Base64State::InBlock {
                declared,
                mut lines,
            } => {
                if let Some(restart) = parse_begin(line) {
                    Base64State::InBlock {
                        declared: restart,
                        lines: Vec::new(),
                    }
                } else if line.starts_with(BASE64_END) {
                    if !lines.is_empty() {
                        blocks.push(base64_candidate(declared, &lines));
                    }
                    Base64State::Searching
                } else if line.is_empty() {
                    Base64State::Searching
                } else {
                    lines.push(line);
                    Base64State::InBlock { declared, lines }
                }
            }
        };
    }

    blocks
}

fn base64_candidate(declared: Dimensions, lines: &[&str]) -> ThumbnailBlock {
    let mut payload = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        payload.push_str(line);
        payload.push('\n');
    }
    ThumbnailBlock {
        encoding: Encoding::EmbeddedBase64,
        payload,
        declared: Some(declared),
    }
}

/// Parse `; thumbnail begin WxH SIZE` (or `W H SIZE`).
fn parse_begin(line: &str) -> Option<Dimensions> {
    let rest = line.trim_end_matches('\r').strip_prefix(BASE64_BEGIN)?;
    let (dimensions, size) = rest.rsplit_once(' ')?;
    let (width, height) = dimensions.split_once(['x', ' '])?;
    decimal::<u64>(size)?;
    Some(Dimensions {
        width: decimal(width)?,
        height: decimal(height)?,
    })
}

fn decimal<T: std::str::FromStr>(field: &str) -> Option<T> {
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Find every `mks_hex` span in normalized header text.
///
/// A span starts at `;simage:` or `;;gimage:` anywhere on a line and runs,
/// possibly across lines, to the first `M10086 ;` followed by a line break.
/// An unterminated span is discarded.
pub fn find_mks_blocks(text: &str) -> Vec<ThumbnailBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for piece in text.split_inclusive('\n') {
        let mut rest = piece;
        loop {
            match current.as_mut() {
                None => {
                    let Some(start) = find_mks_marker(rest) else {
                        break;
                    };
                    current = Some(String::new());
                    rest = &rest[start..];
                }
                Some(span) => match find_sentinel_end(rest) {
                    Some(end) => {
                        span.push_str(&rest[..end]);
                        let span = std::mem::take(span);
                        blocks.push(mks_candidate(span));
                        current = None;
                        rest = &rest[end..];
                    }
                    None => {
                        span.push_str(rest);
                        break;
                    }
                },
            }
        }
    }

    blocks
}

fn mks_candidate(payload: String) -> ThumbnailBlock {
    let side = if payload.starts_with(GIMAGE_MARKER) {
        200
    } else {
        100
    };
    ThumbnailBlock {
        encoding: Encoding::MksHex,
        payload,
        declared: Some(Dimensions::square(side)),
    }
}

/// Byte offset of the earliest mks marker in `s`.
fn find_mks_marker(s: &str) -> Option<usize> {
    [s.find(GIMAGE_MARKER), s.find(SIMAGE_MARKER)]
        .into_iter()
        .flatten()
        .min()
}

/// Byte offset just past the first `M10086 ;` that is followed by a line break.
fn find_sentinel_end(s: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = s[offset..].find(MKS_SENTINEL) {
        let after = offset + pos + MKS_SENTINEL.len();
        if matches!(s.as_bytes().get(after), Some(b'\r' | b'\n')) {
            return Some(after + 1);
        }
        offset = after;
    }
    None
}
