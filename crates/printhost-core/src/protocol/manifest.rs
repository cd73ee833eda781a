//! Parser for the `SYMLINKS.txt` manifest inside the bootstrap archive.
//!
//! Zip archives cannot carry symbolic links portably, so the bootstrap
//! archive lists them in a text file instead, one link per line:
//!
//! ```text
//! busybox←./bin/sh
//! ../lib/libandroid-support.so←./usr/lib/libfoo.so
//! ```
//!
//! The left side is the link target written verbatim into the symlink; the
//! right side is the link's own path relative to the installation root.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// File name of the symlink manifest at the archive root.
pub const SYMLINK_MANIFEST_NAME: &str = "SYMLINKS.txt";

/// Separator between target and link path on each manifest line.
pub const SYMLINK_SEPARATOR: char = '←';

/// Errors produced while parsing the symlink manifest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// The line does not split into exactly two non-empty halves.
    #[error("malformed symlink line {line_no}: {line:?}")]
    MalformedLine { line_no: usize, line: String },

    /// The link path is absolute or climbs out of the installation root.
    #[error("symlink path escapes the installation root on line {line_no}: {path:?}")]
    EscapingPath { line_no: usize, path: String },
}

/// One symbolic link to create after extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkEntry {
    /// What the link points at, stored verbatim.
    pub target: String,
    /// Where the link lives, relative to the installation root.
    pub link: PathBuf,
}

/// Parses the full manifest text.
///
/// Blank lines are skipped.  `.` components in the link path (the archive
/// writes paths as `./bin/sh`) are removed.
///
/// # Errors
///
/// Returns [`ManifestError`] on the first malformed or escaping line.
///
/// # Examples
///
/// ```rust
/// use printhost_core::protocol::manifest::parse_symlink_manifest;
///
/// let links = parse_symlink_manifest("busybox←./bin/sh\n").unwrap();
/// assert_eq!(links[0].target, "busybox");
/// assert_eq!(links[0].link, std::path::Path::new("bin/sh"));
/// ```
pub fn parse_symlink_manifest(text: &str) -> Result<Vec<SymlinkEntry>, ManifestError> {
    let mut entries = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(SYMLINK_SEPARATOR).collect();
        let (target, link) = match parts.as_slice() {
            [target, link] if !target.is_empty() && !link.is_empty() => (*target, *link),
            _ => {
                return Err(ManifestError::MalformedLine {
                    line_no,
                    line: line.to_string(),
                })
            }
        };

        let link = normalize_link(link).ok_or_else(|| ManifestError::EscapingPath {
            line_no,
            path: link.to_string(),
        })?;

        entries.push(SymlinkEntry {
            target: target.to_string(),
            link,
        });
    }

    Ok(entries)
}

/// Drops `.` components and rejects anything that is not a plain relative
/// path.
fn normalize_link(raw: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
