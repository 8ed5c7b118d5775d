//! CLI output formatting for every command.
//!
//! # Output Format
//!
//! ## Scan
//!
//! ```text
//! benchy.gcode (2 candidates)
//!     001 embedded_base64 16x16 (1280 chars)
//!     002 embedded_base64 300x300 (45312 chars)
//! ```
//!
//! ## Extract
//!
//! ```text
//! benchy.gcode → thumbnails/benchy.png (embedded_base64, 31524 bytes)
//! plain.gcode: no thumbnail
//! ```
//!
//! ## Events
//!
//! ```text
//! FileAdded parts/bracket.gcode → plugin/prusaslicerthumbnails/thumbnail/parts/bracket.png?20240301121500
//! FileRemoved parts/bracket.gcode: artifact removed
//! FolderAdded new: 2 without thumbnail, 0 without source
//! ```
//!
//! ## Crawl
//!
//! ```text
//! No thumbnail (2)
//!     fresh.gcode
//!     parts/bracket.gcode
//! No thumbnail source (0)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::extract::ThumbnailArtifact;
use crate::scanner::ThumbnailBlock;
use crate::sync::{CrawlReport, Event, EventKind, Outcome};
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

// ============================================================================
// Scan
// ============================================================================

/// Format the thumbnail candidates found in one gcode file.
pub fn format_scan_output(gcode: &Path, blocks: &[ThumbnailBlock]) -> Vec<String> {
    let mut lines = vec![format!(
        "{} ({})",
        gcode.display(),
        plural(blocks.len(), "candidate", "candidates")
    )];
    for (i, block) in blocks.iter().enumerate() {
        let size = block
            .declared
            .map(|d| d.to_string())
            .unwrap_or_else(|| "?".to_string());
        lines.push(format!(
            "{}{} {} {} ({} chars)",
            indent(1),
            format_index(i + 1),
            block.encoding,
            size,
            block.payload_len()
        ));
    }
    lines
}

pub fn print_scan_output(gcode: &Path, blocks: &[ThumbnailBlock]) {
    for line in format_scan_output(gcode, blocks) {
        println!("{}", line);
    }
}

// ============================================================================
// Extract
// ============================================================================

pub fn format_extract_output(gcode: &Path, artifact: Option<&ThumbnailArtifact>) -> Vec<String> {
    match artifact {
        Some(artifact) => vec![format!(
            "{} \u{2192} {} ({}, {} bytes)",
            gcode.display(),
            artifact.path.display(),
            artifact.encoding,
            artifact.bytes.len()
        )],
        None => vec![format!("{}: no thumbnail", gcode.display())],
    }
}

pub fn print_extract_output(gcode: &Path, artifact: Option<&ThumbnailArtifact>) {
    for line in format_extract_output(gcode, artifact) {
        println!("{}", line);
    }
}

// ============================================================================
// Events
// ============================================================================

fn event_label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::FileAdded => "FileAdded",
        EventKind::FileRemoved => "FileRemoved",
        EventKind::FolderAdded => "FolderAdded",
        EventKind::FolderRemoved => "FolderRemoved",
    }
}

/// Format the outcome of one delivered event as a single line.
pub fn format_event_outcome(event: &Event, outcome: &Outcome) -> String {
    let head = format!("{} {}", event_label(event.kind), event.path);
    match outcome {
        Outcome::Ignored => format!("{head}: ignored"),
        Outcome::Extracted { url } => format!("{head} \u{2192} {url}"),
        Outcome::NoThumbnail => format!("{head}: no thumbnail"),
        Outcome::Removed { existed: true } => format!("{head}: artifact removed"),
        Outcome::Removed { existed: false } => format!("{head}: no artifact"),
        Outcome::FolderPurged => format!("{head}: cache folder removed"),
        Outcome::Crawled(report) => format!("{head}: {report}"),
    }
}

pub fn print_event_outcome(event: &Event, outcome: &Outcome) {
    println!("{}", format_event_outcome(event, outcome));
}

// ============================================================================
// Crawl
// ============================================================================

pub fn format_crawl_report(report: &CrawlReport) -> Vec<String> {
    let mut lines = Vec::new();
    for (title, paths) in [
        ("No thumbnail", &report.no_thumbnail),
        ("No thumbnail source", &report.no_thumbnail_src),
    ] {
        lines.push(format!("{} ({})", title, paths.len()));
        lines.extend(paths.iter().map(|p| format!("{}{}", indent(1), p)));
    }
    lines
}

pub fn print_crawl_report(report: &CrawlReport) {
    for line in format_crawl_report(report) {
        println!("{}", line);
    }
}
