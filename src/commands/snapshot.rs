//! Snapshot command - freeze the current workspace state to a file.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use jiri::cache::RepoCache;
use jiri::loader::{self, Resolved};
use jiri::scanner::{self, ScanMode};
use jiri::snapshot::create_snapshot;

use super::WorkspaceArgs;

/// Write a snapshot of the current workspace state
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,

    /// Where to write the snapshot
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

pub fn execute(args: SnapshotArgs) -> Result<()> {
    let ws = args.workspace.workspace()?;
    let vcs = super::git_vcs();
    let cache = RepoCache::new(ws.cache_root(), vcs.clone());

    // A snapshot freezes what is on disk; the manifest contributes the
    // hooks and tells the scanner where nested checkouts live.
    let resolved = loader::load(&ws, &cache).context("manifest load failed")?;
    let hints: BTreeSet<PathBuf> = resolved.projects.values().map(|p| p.path.clone()).collect();
    let local = scanner::local_projects_with_hints(&ws, ScanMode::Full, &hints)
        .context("workspace scan failed")?;
    let on_disk = Resolved {
        projects: local,
        hooks: resolved.hooks,
    };

    create_snapshot(&ws, &on_disk, vcs.as_ref(), &args.path).context("snapshot failed")?;
    println!("Snapshot written to {}.", args.path.display());
    Ok(())
}
