//! Snapshots: the consolidated manifest frozen at the commits actually
//! on disk.
//!
//! A snapshot is just a manifest whose projects all carry a pinned
//! revision, which is the point: feeding it back in reproduces the
//! workspace deterministically. Every successful update appends one to
//! `.jiri_root/update_history/` under an RFC3339 name and repoints the
//! `latest` link, which is also what gives the scanner its fast path.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use log::info;
use url::Url;

use crate::error::{Error, Result};
use crate::loader::Resolved;
use crate::manifest::Manifest;
use crate::vcs::Vcs;
use crate::workspace::Workspace;

/// Pin the consolidated manifest to the commits currently checked out.
pub fn pinned_manifest(resolved: &Resolved, vcs: &dyn Vcs) -> Result<Manifest> {
    let mut manifest = Manifest::default();
    for project in resolved.projects.values() {
        let mut pinned = project.clone();
        pinned.revision = vcs.current_revision(&project.path)?;
        manifest.projects.push(pinned);
    }
    manifest.hooks = resolved.hooks.values().cloned().collect();
    Ok(manifest)
}

/// Write the pinned consolidated manifest to `path`.
pub fn create_snapshot(
    ws: &Workspace,
    resolved: &Resolved,
    vcs: &dyn Vcs,
    path: &Path,
) -> Result<()> {
    let manifest = pinned_manifest(resolved, vcs)?;
    manifest.to_file(path, ws.root())?;
    info!("wrote snapshot {}", path.display());
    Ok(())
}

/// Append a timestamped snapshot to the update history and repoint the
/// `latest` link at it.
pub fn write_update_history_snapshot(
    ws: &Workspace,
    resolved: &Resolved,
    vcs: &dyn Vcs,
) -> Result<PathBuf> {
    let dir = ws.update_history_dir();
    fs::create_dir_all(&dir)?;
    let name = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let path = dir.join(&name);
    create_snapshot(ws, resolved, vcs, &path)?;

    let latest = ws.update_history_latest();
    if latest.exists() || latest.is_symlink() {
        fs::remove_file(&latest)?;
    }
    std::os::unix::fs::symlink(&name, &latest)?;
    Ok(path)
}

/// Read a snapshot manifest from a filesystem path or an http(s) URL.
pub fn read_snapshot(ws: &Workspace, source: &str) -> Result<Manifest> {
    let text = match Url::parse(source) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            let response = reqwest::blocking::get(url.clone())?;
            if !response.status().is_success() {
                return Err(Error::Snapshot {
                    message: format!("{url} returned {}", response.status()),
                });
            }
            response.text()?
        }
        _ => fs::read_to_string(source)?,
    };
    let mut manifest = Manifest::parse(&text, source)?;
    manifest.normalize(ws.root());
    Ok(manifest)
}
