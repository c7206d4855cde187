//! The top-level reconciliation sequence: load, scan, plan, execute,
//! hooks, snapshot.
//!
//! Each stage is a hard barrier. Load-time and plan-time errors abort
//! before anything on disk changes; executor failures surface in
//! aggregate after every project had its chance; hook failures stop the
//! run but never undo completed project operations; and the history
//! snapshot is written only once everything else succeeded, which is
//! exactly what makes it trustworthy as the fast-scan candidate list.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};

use crate::cache::RepoCache;
use crate::error::Result;
use crate::executor::{Executor, UpdateOptions};
use crate::hooks;
use crate::loader::{self, Resolved};
use crate::planner;
use crate::scanner::{self, ScanMode};
use crate::snapshot;
use crate::vcs::Vcs;
use crate::workspace::Workspace;

/// Reconcile the workspace against its root manifest.
///
/// Returns the non-fatal per-project warnings (rebase conflicts, skipped
/// advances) accumulated during execution.
pub fn update_universe(
    ws: &Workspace,
    vcs: Arc<dyn Vcs>,
    opts: &UpdateOptions,
) -> Result<Vec<String>> {
    let cache = RepoCache::new(ws.cache_root(), vcs.clone());
    let resolved = loader::load(ws, &cache)?;
    info!(
        "manifest resolved: {} projects, {} hooks",
        resolved.projects.len(),
        resolved.hooks.len()
    );
    reconcile(ws, vcs, &cache, &resolved, opts)
}

/// Reconcile the workspace against a snapshot (from a filesystem path or
/// an http(s) URL), every project pinned to its snapshot revision.
pub fn checkout_snapshot(
    ws: &Workspace,
    vcs: Arc<dyn Vcs>,
    source: &str,
    opts: &UpdateOptions,
) -> Result<Vec<String>> {
    let cache = RepoCache::new(ws.cache_root(), vcs.clone());
    let manifest = snapshot::read_snapshot(ws, source)?;
    let resolved = loader::consolidate(ws, &manifest)?;
    info!(
        "snapshot {} resolved: {} projects",
        source,
        resolved.projects.len()
    );
    reconcile(ws, vcs, &cache, &resolved, opts)
}

fn reconcile(
    ws: &Workspace,
    vcs: Arc<dyn Vcs>,
    cache: &RepoCache,
    resolved: &Resolved,
    opts: &UpdateOptions,
) -> Result<Vec<String>> {
    let hints: BTreeSet<PathBuf> = resolved
        .projects
        .values()
        .map(|p| p.path.clone())
        .collect();
    let local = scanner::local_projects_with_hints(ws, ScanMode::Fast, &hints)?;
    debug!("found {} local projects", local.len());

    let executor = Executor::new(ws, vcs.clone(), cache, opts)?;
    let states = executor.project_states(&local)?;
    let plan = planner::plan(&resolved.projects, &local, &states, opts.gc);
    if plan.is_noop() {
        debug!("workspace already matches the manifest");
    }

    let warnings = executor.execute(&plan)?;

    if opts.run_hooks && !resolved.hooks.is_empty() {
        hooks::run_hooks(resolved, opts.hook_timeout)?;
    }

    // The history snapshot records what is actually on disk now, not
    // just what the manifest asked for: projects kept despite leaving
    // the manifest (gc off, ignored, dirty) must stay visible to the
    // next run's fast scan or they could never be collected.
    let mut final_hints = hints;
    final_hints.extend(local.values().map(|p| p.path.clone()));
    let final_local = scanner::local_projects_with_hints(ws, ScanMode::Full, &final_hints)?;
    let on_disk = Resolved {
        projects: final_local,
        hooks: resolved.hooks.clone(),
    };
    snapshot::write_update_history_snapshot(ws, &on_disk, vcs.as_ref())?;
    Ok(warnings)
}
