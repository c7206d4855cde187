//! Plan execution: the part of the engine that actually touches disk.
//!
//! Deletes and moves are ordered operations and run sequentially (the
//! plan already sorted them child-before-parent and parent-before-child
//! respectively). Creates run level by level down the path tree,
//! everything at one nesting depth in parallel, so a nested checkout is
//! always cloned into an already-materialized parent. In-place updates
//! have no ordering constraints at all and fan out across the whole
//! bounded pool.
//!
//! Every per-project failure is collected rather than aborting the run;
//! the engine never rolls back completed work. Rebase conflicts are
//! softer still: the rebase is aborted, the branch stays where it was,
//! and the project is tagged with a warning while the run continues.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::cache::RepoCache;
use crate::error::{Error, Result};
use crate::hooks;
use crate::manifest::{Project, ProjectKey};
use crate::metadata;
use crate::planner::{Operation, Plan};
use crate::state::{self, BranchState};
use crate::vcs::{CloneOptions, FetchOptions, RebaseOutcome, Vcs};
use crate::workspace::Workspace;

/// Knobs for one reconciliation run.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Delete projects that are no longer in the manifest.
    pub gc: bool,
    /// Rebase the current tracking branch even when it has diverged from
    /// its tracking target (fast-forwards happen regardless).
    pub rebase_tracked: bool,
    /// With `rebase_all`, also rebase branches that track nothing onto
    /// the project's target.
    pub rebase_untracked: bool,
    /// Rebase every local branch with a tracking ref, not just the
    /// current one.
    pub rebase_all: bool,
    /// Run post-update hooks after a fully successful execution.
    pub run_hooks: bool,
    /// Per-hook wall-clock budget.
    pub hook_timeout: Duration,
    /// Cooperative cancellation: set to true to stop scheduling further
    /// project operations. Projects already in flight finish their
    /// current VCS command and are reported as incomplete.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            gc: false,
            rebase_tracked: false,
            rebase_untracked: false,
            rebase_all: false,
            run_hooks: true,
            hook_timeout: hooks::DEFAULT_HOOK_TIMEOUT,
            cancel: None,
        }
    }
}

/// Executes a [`Plan`] against the workspace.
pub struct Executor<'a> {
    ws: &'a Workspace,
    vcs: Arc<dyn Vcs>,
    cache: &'a RepoCache,
    opts: &'a UpdateOptions,
    pool: rayon::ThreadPool,
}

impl<'a> Executor<'a> {
    pub fn new(
        ws: &'a Workspace,
        vcs: Arc<dyn Vcs>,
        cache: &'a RepoCache,
        opts: &'a UpdateOptions,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ws.jobs())
            .thread_name(|i| format!("jiri-worker-{i}"))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        Ok(Self {
            ws,
            vcs,
            cache,
            opts,
            pool,
        })
    }

    /// Run the plan. Returns the per-project warnings (rebase conflicts,
    /// skipped advances) accumulated along the way; fails with
    /// [`Error::PartialUpdate`] when any project could not be brought to
    /// its desired state.
    pub fn execute(&self, plan: &Plan) -> Result<Vec<String>> {
        let warnings: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let mut failures: Vec<(ProjectKey, Error)> = Vec::new();
        let mut total = 0usize;

        // Ordered, sequential phases: deletes (deepest first), then
        // moves (shallowest first).
        for op in &plan.ops {
            match op {
                Operation::Delete { local } => {
                    total += 1;
                    if self.cancelled() {
                        continue;
                    }
                    info!("deleting {} ({})", local.name, local.path.display());
                    if let Err(e) = self.delete_project(local) {
                        failures.push((op.key(), e));
                    }
                }
                Operation::Move { project, from, .. } => {
                    // Counted with the update that follows below.
                    if self.cancelled() {
                        continue;
                    }
                    info!(
                        "moving {} from {} to {}",
                        project.name,
                        from.display(),
                        project.path.display()
                    );
                    if let Err(e) = self.move_project(project, from) {
                        failures.push((op.key(), e));
                    }
                }
                Operation::Null { key, reason } => {
                    debug!("{key}: no-op ({reason})");
                }
                _ => {}
            }
        }
        let moved_failed: Vec<ProjectKey> = failures.iter().map(|(k, _)| k.clone()).collect();

        // In-place updates, including the post-move ones; no ordering
        // constraints among themselves, full fan-out. These run before
        // creates so a checkout whose tracked subdirectory just became a
        // nested project vacates the path first.
        let mut updates: Vec<(&Project, &Project)> = Vec::new();
        for op in &plan.ops {
            match op {
                Operation::Update { project, local } => {
                    total += 1;
                    updates.push((project, local));
                }
                Operation::Move { project, local, .. } => {
                    total += 1;
                    // A failed rename already marked this project.
                    if !moved_failed.contains(&project.key()) {
                        updates.push((project, local));
                    }
                }
                _ => {}
            }
        }
        let results: Vec<(ProjectKey, Result<()>)> = self.pool.install(|| {
            updates
                .par_iter()
                .map(|&(project, local)| {
                    if self.cancelled() {
                        return (project.key(), Ok(()));
                    }
                    (project.key(), self.update_project(project, local, &warnings))
                })
                .collect()
        });
        failures.extend(
            results
                .into_iter()
                .filter_map(|(k, r)| r.err().map(|e| (k, e))),
        );

        // Creates, level by level down the path tree so outer checkouts
        // exist before anything is cloned inside them; parallel within a
        // level.
        let mut levels: BTreeMap<usize, Vec<&Project>> = BTreeMap::new();
        for op in &plan.ops {
            if let Operation::Create { project } = op {
                total += 1;
                levels
                    .entry(project.path.components().count())
                    .or_default()
                    .push(project);
            }
        }
        for level in levels.values() {
            let results: Vec<(ProjectKey, Result<()>)> = self.pool.install(|| {
                level
                    .par_iter()
                    .map(|&project| {
                        if self.cancelled() {
                            return (project.key(), Ok(()));
                        }
                        info!("creating {} at {}", project.name, project.path.display());
                        (project.key(), self.create_project(project, &warnings))
                    })
                    .collect()
            });
            failures.extend(
                results
                    .into_iter()
                    .filter_map(|(k, r)| r.err().map(|e| (k, e))),
            );
        }

        let warnings = warnings.into_inner().unwrap_or_default();
        for warning in &warnings {
            warn!("{warning}");
        }
        if failures.is_empty() {
            Ok(warnings)
        } else {
            let details = failures
                .iter()
                .map(|(key, e)| format!("{key}: {e}"))
                .collect::<Vec<_>>()
                .join("\n");
            Err(Error::PartialUpdate {
                failed: failures.len(),
                total,
                details,
            })
        }
    }

    /// Collect per-project VCS states on this executor's bounded pool.
    pub fn project_states(
        &self,
        projects: &crate::manifest::Projects,
    ) -> Result<BTreeMap<ProjectKey, state::ProjectState>> {
        self.pool
            .install(|| state::project_states(projects, self.vcs.as_ref(), true))
    }

    fn cancelled(&self) -> bool {
        self.opts
            .cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Materialize a project that exists only in the manifest.
    fn create_project(&self, project: &Project, warnings: &Mutex<Vec<String>>) -> Result<()> {
        let cache_dir = self.cache.ensure_and_fetch(&project.remote)?;
        let path = project.path.as_path();

        if path.exists() {
            if metadata::is_project_dir(path) {
                let local = metadata::read_project(path)?;
                if local.remote == project.remote {
                    // Discovery missed it (stale snapshot) or the
                    // project was renamed in place; treat as update.
                    return self.update_project(project, &local, warnings);
                }
                // A different project's clean checkout occupies the
                // path (the planner refused its delete only because
                // this project is replacing it); reclone from scratch.
                fs::remove_dir_all(path)?;
            } else if path.read_dir()?.next().is_some() {
                return Err(Error::MoveConflict {
                    name: project.name.clone(),
                    message: format!("{} exists and is not empty", path.display()),
                });
            } else {
                fs::remove_dir(path)?;
            }
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Alternates against the cache unless the project is shallow and
        // sharing was not requested; shallow projects get an independent
        // clone with truncated history.
        let use_alternates = self.ws.shared_cache() || project.history_depth == 0;
        self.vcs.clone_repo(&CloneOptions {
            remote: project.remote.clone(),
            dest: path.to_path_buf(),
            bare: false,
            reference: use_alternates.then(|| cache_dir.clone()),
            depth: (project.history_depth > 0).then_some(project.history_depth),
            no_checkout: true,
        })?;

        // A fresh checkout is detached at the target with no local
        // branches: branches here belong to the user, not the engine.
        let target = self.vcs.resolve_ref(path, &project.target_ref())?;
        self.vcs.checkout_detached(path, &target)?;
        for branch in self.vcs.branches(path)? {
            self.vcs.delete_branch(path, &branch.name)?;
        }
        self.finish_project(project)
    }

    /// The per-project update procedure for an existing checkout.
    fn update_project(
        &self,
        project: &Project,
        local: &Project,
        warnings: &Mutex<Vec<String>>,
    ) -> Result<()> {
        let path = project.path.as_path();

        // The cache is fetched even for no-update projects; their
        // working tree is simply never advanced.
        self.cache.ensure_and_fetch(&project.remote)?;
        if local.local_config.no_update {
            debug!("{}: no-update set; cache refreshed only", project.name);
            metadata::ensure_metadata_excluded(path)?;
            return Ok(());
        }

        self.vcs.fetch(
            path,
            &FetchOptions {
                refspec: None,
                depth: (project.history_depth > 0).then_some(project.history_depth),
            },
        )?;

        if self.vcs.operation_in_progress(path) {
            return Err(Error::MoveConflict {
                name: project.name.clone(),
                message: "a rebase, merge, or cherry-pick is in progress".to_string(),
            });
        }

        let target = self.vcs.resolve_ref(path, &project.target_ref())?;
        let state = state::project_state(project, self.vcs.as_ref(), true)?;
        let no_rebase = local.local_config.no_rebase;

        if state.is_detached() || !project.revision.is_empty() {
            // Detached checkouts track the target directly; so do pinned
            // projects, detaching from whatever branch was checked out,
            // which is what makes a snapshot checkout land exactly on
            // its pins.
            if state.current_branch.reference.revision != target {
                if state.has_uncommitted {
                    push_warning(
                        warnings,
                        format!(
                            "{}: uncommitted changes; working tree left at {}",
                            project.name, state.current_branch.reference.revision
                        ),
                    );
                } else if state.is_detached() {
                    // Untracked files survive a hard reset; nothing is
                    // ever cleaned.
                    self.vcs.reset_hard(path, &target)?;
                } else {
                    self.vcs.checkout_detached(path, &target)?;
                }
            }
        } else {
            self.advance_branch(
                project,
                &state.current_branch,
                &target,
                self.opts.rebase_tracked,
                no_rebase,
                state.has_uncommitted,
                warnings,
            )?;
        }

        if self.opts.rebase_all && !no_rebase {
            self.rebase_other_branches(project, &state, &target, warnings)?;
        }

        self.finish_project(project)
    }

    /// Advance one branch toward its tracking target, assuming it is
    /// currently checked out. Fast-forwards are always taken; a diverged
    /// branch is rebased only when asked, and a conflicted rebase is
    /// aborted and tagged.
    #[allow(clippy::too_many_arguments)]
    fn advance_branch(
        &self,
        project: &Project,
        branch: &BranchState,
        project_target: &str,
        rebase_diverged: bool,
        no_rebase: bool,
        has_uncommitted: bool,
        warnings: &Mutex<Vec<String>>,
    ) -> Result<()> {
        let path = project.path.as_path();
        let name = &branch.reference.name;

        let target = match &branch.tracking {
            Some(tracking) => tracking.revision.clone(),
            None if self.opts.rebase_all && self.opts.rebase_untracked => {
                project_target.to_string()
            }
            None => return Ok(()),
        };
        if target == branch.reference.revision {
            return Ok(());
        }
        if no_rebase {
            debug!("{}: no-rebase set; branch {name} left alone", project.name);
            return Ok(());
        }
        if has_uncommitted {
            push_warning(
                warnings,
                format!(
                    "{}: uncommitted changes; branch {name} not advanced",
                    project.name
                ),
            );
            return Ok(());
        }

        let fast_forward = self
            .vcs
            .is_ancestor(path, &branch.reference.revision, &target)?;
        if !fast_forward && !rebase_diverged {
            debug!(
                "{}: branch {name} diverged from its tracking target; leaving it",
                project.name
            );
            return Ok(());
        }
        match self.vcs.rebase(path, &target)? {
            RebaseOutcome::Success => Ok(()),
            RebaseOutcome::Conflict => {
                push_warning(
                    warnings,
                    Error::RebaseConflict {
                        project: project.name.clone(),
                        branch: name.clone(),
                    }
                    .to_string(),
                );
                Ok(())
            }
        }
    }

    /// The rebase-all pass: visit every other local branch, advance it,
    /// and put the checkout back the way it was.
    fn rebase_other_branches(
        &self,
        project: &Project,
        state: &state::ProjectState,
        target: &str,
        warnings: &Mutex<Vec<String>>,
    ) -> Result<()> {
        let path = project.path.as_path();
        if state.has_uncommitted {
            push_warning(
                warnings,
                format!(
                    "{}: uncommitted changes; skipping rebase of local branches",
                    project.name
                ),
            );
            return Ok(());
        }

        let current = &state.current_branch.reference.name;
        let mut touched = false;
        for branch in &state.branches {
            if branch.reference.name == *current {
                continue;
            }
            if branch.tracking.is_none() && !self.opts.rebase_untracked {
                continue;
            }
            let up_to_date = branch
                .tracking
                .as_ref()
                .map(|t| t.revision == branch.reference.revision)
                .unwrap_or(false);
            if up_to_date {
                continue;
            }
            self.vcs.checkout_branch(path, &branch.reference.name)?;
            touched = true;
            self.advance_branch(project, branch, target, true, false, false, warnings)?;
        }

        if touched {
            // Restore the original disposition.
            if current.is_empty() {
                self.vcs.checkout_detached(path, target)?;
            } else {
                self.vcs.checkout_branch(path, current)?;
            }
        }
        Ok(())
    }

    /// Relocate a checkout. The plan runs parent moves first, so a child
    /// may find itself already at its destination; that counts as done
    /// once its descriptor checks out.
    fn move_project(&self, project: &Project, from: &Path) -> Result<()> {
        let to = project.path.as_path();
        if !from.exists() {
            if metadata::is_project_dir(to) && metadata::read_project(to)?.key() == project.key() {
                debug!(
                    "{}: carried to {} by an ancestor move",
                    project.name,
                    to.display()
                );
                return Ok(());
            }
            return Err(Error::ProjectNotFound {
                name: project.name.clone(),
                path: from.display().to_string(),
            });
        }
        if to.exists() {
            if to.read_dir()?.next().is_some() {
                return Err(Error::MoveConflict {
                    name: project.name.clone(),
                    message: format!("destination {} exists and is not empty", to.display()),
                });
            }
            fs::remove_dir(to)?;
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)?;
        if !metadata::is_project_dir(to) {
            return Err(Error::MoveConflict {
                name: project.name.clone(),
                message: format!("no project descriptor at {} after move", to.display()),
            });
        }
        Ok(())
    }

    fn delete_project(&self, local: &Project) -> Result<()> {
        fs::remove_dir_all(&local.path)?;
        Ok(())
    }

    /// Post-update bookkeeping: descriptor, git hooks, the exclude
    /// entry, and the two sentinel files.
    fn finish_project(&self, project: &Project) -> Result<()> {
        let path = project.path.as_path();
        metadata::write_project(project, self.ws.root())?;
        metadata::ensure_metadata_excluded(path)?;
        self.install_git_hooks(project)?;
        let base = self.vcs.current_revision(path)?;
        metadata::write_update_sentinels(path, &project.target_ref(), &base)?;
        Ok(())
    }

    /// Copy manifest-declared hook scripts into the checkout's
    /// `.git/hooks`.
    fn install_git_hooks(&self, project: &Project) -> Result<()> {
        let Some(source) = &project.git_hooks else {
            return Ok(());
        };
        let source = if source.is_absolute() {
            source.clone()
        } else {
            self.ws.root().join(source)
        };
        if !source.is_dir() {
            return Ok(());
        }
        let hooks_dir = metadata::git_dir(&project.path).join("hooks");
        fs::create_dir_all(&hooks_dir)?;
        for entry in fs::read_dir(&source)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), hooks_dir.join(entry.file_name()))?;
            }
        }
        Ok(())
    }
}

fn push_warning(warnings: &Mutex<Vec<String>>, message: String) {
    if let Ok(mut warnings) = warnings.lock() {
        warnings.push(message);
    }
}
