//! Per-turn change tracking.
//!
//! Before the agent writes a file for the first time in a turn, its current
//! content is copied into a turn-scoped scratch directory. At turn close the
//! tracked files are copied again and the two snapshots are diffed line by
//! line. Failures here are logged and degrade to a zero diff; they never abort
//! the turn.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use tracing::{debug, warn};

/// Added/removed line counts for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
}

/// One entry of the per-turn change report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifiedFileInfo {
    pub path: String,
    pub abs_path: PathBuf,
    pub before_path: Option<PathBuf>,
    pub after_path: Option<PathBuf>,
    pub diff_summary: DiffSummary,
}

#[derive(Debug, Clone)]
struct TrackedFile {
    path: String,
    before_path: Option<PathBuf>,
    /// First seen after it was written; diffed against an empty file
    created: bool,
}

/// Scratch state for the turn in progress.
#[derive(Debug)]
pub struct ChangeTracker {
    scratch_root: PathBuf,
    before_dir: Option<PathBuf>,
    files: Vec<TrackedFile>,
}

impl ChangeTracker {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            before_dir: None,
            files: Vec::new(),
        }
    }

    /// Forget the previous turn and allocate a fresh before-directory.
    pub fn begin_turn(&mut self) {
        self.files.clear();
        self.before_dir = match make_scratch_dir(&self.scratch_root, "before-") {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!(
                    "[tracker] failed to create before-snapshot dir under {}: {e}",
                    self.scratch_root.display()
                );
                None
            }
        };
    }

    /// Called right before the agent writes `path`. Only the first call per
    /// path in a turn takes a snapshot.
    pub fn record_write(&mut self, path: &str) {
        if self.files.iter().any(|f| f.path == path) {
            return;
        }
        let before_path = self
            .before_dir
            .as_deref()
            .and_then(|dir| snapshot_into(Path::new(path), dir));
        debug!(
            "[tracker] tracking {path} (snapshot: {})",
            before_path.is_some()
        );
        self.files.push(TrackedFile {
            path: path.to_string(),
            before_path,
            created: false,
        });
    }

    /// Called after the agent wrote `path` without a prior `record_write`.
    /// The file has no before-snapshot and counts as new.
    pub fn record_created(&mut self, path: &str) {
        if self.files.iter().any(|f| f.path == path) {
            return;
        }
        debug!("[tracker] tracking {path} (created during turn)");
        self.files.push(TrackedFile {
            path: path.to_string(),
            before_path: None,
            created: true,
        });
    }

    pub fn tracked_paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Snapshot the current state of every tracked file and diff it against
    /// its before-snapshot. Entries come back in first-write order.
    pub fn finish(&self, abs_path: impl Fn(&str) -> PathBuf) -> Vec<ModifiedFileInfo> {
        if self.files.is_empty() {
            return Vec::new();
        }

        let after_dir = match make_scratch_dir(&self.scratch_root, "after-") {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!("[tracker] failed to create after-snapshot dir: {e}");
                None
            }
        };

        self.files
            .iter()
            .map(|file| {
                let after_path = after_dir
                    .as_deref()
                    .and_then(|dir| snapshot_into(Path::new(&file.path), dir));
                let diff_summary = if file.created {
                    created_summary(after_path.as_deref())
                } else {
                    diff_summary(file.before_path.as_deref(), after_path.as_deref())
                };
                ModifiedFileInfo {
                    path: file.path.clone(),
                    abs_path: abs_path(&file.path),
                    before_path: file.before_path.clone(),
                    after_path,
                    diff_summary,
                }
            })
            .collect()
    }
}

fn make_scratch_dir(root: &Path, prefix: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(root)?;
    // Scratch directories outlive the turn; cleanup is left to the operator.
    #[allow(deprecated)]
    let path = dir.into_path();
    Ok(path)
}

/// Copy `path` into `dir` under its flattened snapshot name.
fn snapshot_into(path: &Path, dir: &Path) -> Option<PathBuf> {
    if !path.is_file() {
        debug!("[tracker] no snapshot for {}: not a file", path.display());
        return None;
    }
    let dest = dir.join(snapshot_name(&path.to_string_lossy()));
    match fs::copy(path, &dest) {
        Ok(_) => Some(dest),
        Err(e) => {
            warn!("[tracker] failed to snapshot {}: {e}", path.display());
            None
        }
    }
}

/// Flatten a path into a single file name.
///
/// `%` is always escaped, so the mapping is injective: distinct paths never
/// share a snapshot name.
pub fn snapshot_name(path: &str) -> String {
    let mut name = String::with_capacity(path.len() + 8);
    for ch in path.chars() {
        match ch {
            '%' => name.push_str("%25"),
            '/' => name.push_str("%2F"),
            '\\' => name.push_str("%5C"),
            ' ' => name.push_str("%20"),
            ':' => name.push_str("%3A"),
            _ => name.push(ch),
        }
    }
    match name.as_str() {
        "" => "%00".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => name,
    }
}

/// Every line of a created file counts as added.
fn created_summary(after: Option<&Path>) -> DiffSummary {
    let Some(after) = after else {
        return DiffSummary::default();
    };
    match fs::read(after) {
        Ok(new) => count_line_changes("", &String::from_utf8_lossy(&new)),
        Err(e) => {
            warn!("[tracker] failed to read {}: {e}", after.display());
            DiffSummary::default()
        }
    }
}

/// Line diff between two snapshots. Missing or unreadable snapshots count as
/// no change.
pub fn diff_summary(before: Option<&Path>, after: Option<&Path>) -> DiffSummary {
    let (Some(before), Some(after)) = (before, after) else {
        debug!("[tracker] diff skipped: missing snapshot");
        return DiffSummary::default();
    };

    match (fs::read(before), fs::read(after)) {
        (Ok(old), Ok(new)) => count_line_changes(
            &String::from_utf8_lossy(&old),
            &String::from_utf8_lossy(&new),
        ),
        (Err(e), _) | (_, Err(e)) => {
            warn!(
                "[tracker] diff failed for {} -> {}: {e}",
                before.display(),
                after.display()
            );
            DiffSummary::default()
        }
    }
}

pub fn count_line_changes(old: &str, new: &str) -> DiffSummary {
    let diff = TextDiff::from_lines(old, new);
    let mut summary = DiffSummary::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => summary.added += 1,
            ChangeTag::Delete => summary.removed += 1,
            ChangeTag::Equal => {}
        }
    }
    summary
}
