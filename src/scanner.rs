//! Local discovery: which projects are materialized on disk right now.
//!
//! Two modes. FAST trusts the latest update-history snapshot as the
//! candidate list and only verifies each candidate still has a readable
//! descriptor; if any is gone the scan transparently upgrades to FULL.
//! FULL walks the workspace looking for the engine's per-project
//! metadata directory.
//!
//! A full scan does not descend below a discovered project unless that
//! project is history-limited or the caller's hints (the desired
//! project paths of the current run) say a nested project lives there.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use walkdir::WalkDir;

use crate::error::Result;
use crate::manifest::{Manifest, Projects};
use crate::metadata;
use crate::workspace::{Workspace, PROJECT_META_DIR, ROOT_META_DIR};

/// How thoroughly to look for local projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Trust the latest snapshot; fall back to Full when it lies.
    Fast,
    /// Walk the workspace tree.
    Full,
}

/// Discover the projects currently on disk, with their local
/// configuration loaded.
pub fn local_projects(ws: &Workspace, mode: ScanMode) -> Result<Projects> {
    local_projects_with_hints(ws, mode, &BTreeSet::new())
}

/// Like [`local_projects`], with a set of paths where the caller expects
/// nested projects; a full scan descends into checkouts that contain one
/// of these paths.
pub fn local_projects_with_hints(
    ws: &Workspace,
    mode: ScanMode,
    nested_hints: &BTreeSet<PathBuf>,
) -> Result<Projects> {
    if mode == ScanMode::Fast {
        if let Some(projects) = fast_scan(ws)? {
            return Ok(projects);
        }
        debug!("fast scan stale; falling back to full scan");
    }
    full_scan(ws, nested_hints)
}

/// Candidate list from the latest snapshot, or `None` when the snapshot
/// is missing or any candidate no longer checks out.
fn fast_scan(ws: &Workspace) -> Result<Option<Projects>> {
    let latest = ws.update_history_latest();
    if !latest.exists() {
        return Ok(None);
    }
    let snapshot = match Manifest::from_file(&latest, ws.root()) {
        Ok(m) => m,
        Err(e) => {
            warn!("unreadable snapshot {}: {e}", latest.display());
            return Ok(None);
        }
    };

    let mut projects = Projects::new();
    for candidate in &snapshot.projects {
        if !metadata::is_project_dir(&candidate.path) {
            return Ok(None);
        }
        let project = metadata::read_project(&candidate.path)?;
        projects.insert(project.key(), project);
    }
    Ok(Some(projects))
}

fn full_scan(ws: &Workspace, nested_hints: &BTreeSet<PathBuf>) -> Result<Projects> {
    let mut projects = Projects::new();
    let mut walker = WalkDir::new(ws.root())
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("workspace walk failed: {e}"))
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name == ".git" || name == PROJECT_META_DIR || name == ROOT_META_DIR {
            walker.skip_current_dir();
            continue;
        }
        let dir = entry.path();
        if metadata::is_project_dir(dir) {
            let project = metadata::read_project(dir)?;
            let descend = project.history_depth != 0 || hosts_nested(dir, nested_hints);
            projects.insert(project.key(), project);
            if !descend {
                walker.skip_current_dir();
            }
        }
    }
    Ok(projects)
}

fn hosts_nested(dir: &Path, nested_hints: &BTreeSet<PathBuf>) -> bool {
    nested_hints
        .iter()
        .any(|hint| hint != dir && hint.starts_with(dir))
}
