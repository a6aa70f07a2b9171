//! Pristine snapshots of a segment's tree and change detection against the live tree.
//!
//! The snapshot lives next to `rootfs` as `rootfs_original` and is written once.
//! Change detection compares file sets, then sizes, then SHA-256 digests for
//! files whose sizes agree.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::workspace::WorkspaceLayout;

/// Files above this size are not rendered as text diffs.
pub const MAX_DIFF_BYTES: u64 = 512 * 1024;

/// Copy `rootfs` to `rootfs_original` unless the snapshot already exists.
///
/// Returns the snapshot path. Symbolic links are copied as links. The copy is
/// staged under a temporary name so an interrupted copy never looks complete.
pub fn snapshot(segment_dir: &Path) -> WorkbenchResult<PathBuf> {
    let layout = WorkspaceLayout::new(segment_dir);
    if layout.snapshot_dir.exists() {
        debug!("Snapshot already present at {}", layout.snapshot_dir.display());
        return Ok(layout.snapshot_dir);
    }
    if !layout.rootfs_dir.is_dir() {
        return Err(WorkbenchError::MissingPrerequisite(format!(
            "no rootfs to snapshot at {}",
            layout.rootfs_dir.display()
        )));
    }

    let staging = segment_dir.join(".rootfs_original.partial");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    copy_tree(&layout.rootfs_dir, &staging)?;
    fs::rename(&staging, &layout.snapshot_dir)?;
    info!("Snapshot created at {}", layout.snapshot_dir.display());
    Ok(layout.snapshot_dir)
}

/// Recursively copy `src` to `dst`, preserving symbolic links.
pub fn copy_tree(src: &Path, dst: &Path) -> WorkbenchResult<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry.path().strip_prefix(src).map_err(|_| {
            WorkbenchError::MissingPrerequisite(format!(
                "walked outside of {}: {}",
                src.display(),
                entry.path().display()
            ))
        })?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            // Device nodes, fifos and sockets cannot be copied without privileges.
            warn!("Skipping special file {}", entry.path().display());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::metadata(src) {
        Ok(meta) if meta.is_file() => fs::copy(src, dst).map(|_| ()),
        _ => Ok(()),
    }
}

/// Relative paths of every non-directory entry under `dir`.
///
/// Empty directories are not tracked. A missing `dir` yields an empty set.
pub fn list_files(dir: &Path) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if !dir.exists() {
        return out;
    }
    for entry in WalkDir::new(dir).follow_links(false).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(dir) {
            out.insert(relative_string(rel));
        }
    }
    out
}

fn relative_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Kind of change for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl ChangeKind {
    pub fn marker(&self) -> &'static str {
        match self {
            ChangeKind::Added => "[A]",
            ChangeKind::Removed => "[R]",
            ChangeKind::Modified => "[M]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub kind: ChangeKind,
    pub path: String,
}

/// Set differences between the snapshot and the live tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub modified: BTreeSet<String>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// All entries: added, then removed, then modified, each sorted by path.
    pub fn entries(&self) -> Vec<DiffEntry> {
        let tag = |kind: ChangeKind, set: &BTreeSet<String>| {
            set.iter().map(move |p| DiffEntry { kind, path: p.clone() }).collect::<Vec<_>>()
        };
        let mut out = tag(ChangeKind::Added, &self.added);
        out.extend(tag(ChangeKind::Removed, &self.removed));
        out.extend(tag(ChangeKind::Modified, &self.modified));
        out
    }

    pub fn counts_line(&self) -> String {
        format!(
            "Added: {} | Removed: {} | Modified: {}",
            self.added.len(),
            self.removed.len(),
            self.modified.len()
        )
    }
}

/// Compare two trees.
///
/// A path present in both is modified when its size differs or, for equal
/// sizes, when its SHA-256 digest differs. Paths that vanish during the
/// comparison are skipped.
pub fn summarize_changes(original_dir: &Path, current_dir: &Path) -> ChangeSummary {
    let original = list_files(original_dir);
    let current = list_files(current_dir);

    let added = current.difference(&original).cloned().collect();
    let removed = original.difference(&current).cloned().collect();
    let mut modified = BTreeSet::new();

    for rel in original.intersection(&current) {
        match entry_differs(&original_dir.join(rel), &current_dir.join(rel)) {
            Ok(true) => {
                modified.insert(rel.clone());
            }
            Ok(false) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} vanished during comparison", rel);
            }
            Err(e) => warn!("Could not compare {}: {}", rel, e),
        }
    }

    ChangeSummary { added, removed, modified }
}

fn entry_differs(a: &Path, b: &Path) -> io::Result<bool> {
    let meta_a = fs::symlink_metadata(a)?;
    let meta_b = fs::symlink_metadata(b)?;

    let (link_a, link_b) = (meta_a.file_type().is_symlink(), meta_b.file_type().is_symlink());
    if link_a || link_b {
        if link_a != link_b {
            return Ok(true);
        }
        return Ok(fs::read_link(a)? != fs::read_link(b)?);
    }
    if !meta_a.is_file() || !meta_b.is_file() {
        return Ok(meta_a.file_type() != meta_b.file_type());
    }
    if meta_a.len() != meta_b.len() {
        return Ok(true);
    }
    Ok(sha256_file(a)? != sha256_file(b)?)
}

/// Compute the SHA-256 hash of a file and return it as a hex string.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn validate_relative(rel: &str) -> WorkbenchResult<&Path> {
    let path = Path::new(rel);
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if rel.is_empty() || escapes {
        return Err(WorkbenchError::MissingPrerequisite(format!(
            "not a path inside the tree: {rel}"
        )));
    }
    Ok(path)
}

fn read_text(path: &Path) -> Result<String, String> {
    let meta = fs::metadata(path).map_err(|e| format!("Read error: {e}"))?;
    if meta.len() > MAX_DIFF_BYTES {
        return Err("File too large for diff view".to_string());
    }
    let bytes = fs::read(path).map_err(|e| format!("Read error: {e}"))?;
    String::from_utf8(bytes).map_err(|_| "Binary / non-UTF8".to_string())
}

/// Unified diff of one file between the snapshot and the live tree.
///
/// Files present on one side only are reported as new or removed. Files that
/// are too large or not UTF-8 produce a single explanatory line.
pub fn diff(original_dir: &Path, current_dir: &Path, rel: &str) -> WorkbenchResult<Vec<String>> {
    let rel_path = validate_relative(rel)?;
    let a = original_dir.join(rel_path);
    let b = current_dir.join(rel_path);
    let (in_a, in_b) = (fs::symlink_metadata(&a).is_ok(), fs::symlink_metadata(&b).is_ok());

    match (in_a, in_b) {
        (false, false) => return Ok(vec![format!("(not present in either tree: {rel})")]),
        (false, true) => return Ok(vec![format!("(new file: {rel})")]),
        (true, false) => return Ok(vec![format!("(removed: {rel})")]),
        (true, true) => {}
    }

    let (a_text, b_text) = match (read_text(&a), read_text(&b)) {
        (Ok(a_text), Ok(b_text)) => (a_text, b_text),
        (a_res, b_res) => {
            let orig = a_res.err().unwrap_or_else(|| "ok".to_string());
            let new = b_res.err().unwrap_or_else(|| "ok".to_string());
            return Ok(vec![format!("Binary/Unsupported diff: orig={orig} new={new}")]);
        }
    };

    let text_diff = TextDiff::from_lines(&a_text, &b_text);
    let rendered = text_diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("orig/{rel}"), &format!("new/{rel}"))
        .to_string();
    let lines: Vec<String> = rendered.lines().map(str::to_string).collect();
    if lines.is_empty() {
        return Ok(vec!["(no textual differences)".to_string()]);
    }
    Ok(lines)
}

/// Default export file name for a diff, e.g. `etc_shadow.diff`.
pub fn default_export_name(rel: &str) -> String {
    format!("{}.diff", rel.replace('/', "_"))
}

/// Write the diff of `rel` to `dest`.
pub fn export_diff(
    original_dir: &Path,
    current_dir: &Path,
    rel: &str,
    dest: &Path,
) -> WorkbenchResult<()> {
    let lines = diff(original_dir, current_dir, rel)?;
    fs::write(dest, lines.join("\n"))?;
    Ok(())
}
