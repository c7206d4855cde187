//! Operation planning: the diff between what the manifest wants and what
//! the workspace holds.
//!
//! Desired and local projects are joined by [`ProjectKey`]; each key
//! yields exactly one operation. The plan's order encodes the engine's
//! nesting constraints: deletes run deepest-first, then moves and
//! creates shallowest-first, then in-place updates (which have no
//! ordering needs of their own and run in parallel).
//!
//! Local-config filters are applied here, not in the executor, so a
//! plan is a complete statement of what a run will do: an `ignore`
//! project plans to Null no matter what the diff says, and a delete
//! whose subtree holds uncommitted work (or a project the manifest still
//! wants) is downgraded to Null rather than discarding state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::manifest::{Project, ProjectKey, Projects};
use crate::state::ProjectState;

/// One per-project reconciliation step.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Materialize a project that exists only in the manifest.
    Create { project: Project },
    /// Bring an existing checkout up to date in place.
    Update { project: Project, local: Project },
    /// Relocate a checkout, then bring it up to date.
    Move {
        project: Project,
        local: Project,
        from: PathBuf,
    },
    /// Remove a checkout the manifest no longer wants.
    Delete { local: Project },
    /// Deliberately do nothing, with the reason recorded.
    Null { key: ProjectKey, reason: NullReason },
}

impl Operation {
    pub fn key(&self) -> ProjectKey {
        match self {
            Operation::Create { project } => project.key(),
            Operation::Update { project, .. } => project.key(),
            Operation::Move { project, .. } => project.key(),
            Operation::Delete { local } => local.key(),
            Operation::Null { key, .. } => key.clone(),
        }
    }
}

/// Why a project planned to Null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullReason {
    /// Local config freezes the project.
    Ignored,
    /// Absent from the manifest, but garbage collection is off.
    GcDisabled,
    /// Slated for deletion, but the subtree holds uncommitted or
    /// untracked work.
    Dirty,
    /// Slated for deletion, but a project the manifest still wants
    /// lives underneath it.
    HostsLiveProject,
}

impl fmt::Display for NullReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NullReason::Ignored => write!(f, "ignored by local config"),
            NullReason::GcDisabled => write!(f, "not in manifest (gc disabled)"),
            NullReason::Dirty => write!(f, "delete refused: uncommitted work in subtree"),
            NullReason::HostsLiveProject => {
                write!(f, "delete refused: manifest projects nested underneath")
            }
        }
    }
}

/// An ordered list of operations, safe to execute front to back.
#[derive(Debug, Default)]
pub struct Plan {
    pub ops: Vec<Operation>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, Operation::Null { .. }))
    }
}

/// Compute the plan for one reconciliation run.
///
/// `states` must cover every project in `local` (dirty information
/// drives the delete policy); `gc` enables deletion of projects absent
/// from the manifest.
pub fn plan(
    desired: &Projects,
    local: &Projects,
    states: &BTreeMap<ProjectKey, ProjectState>,
    gc: bool,
) -> Plan {
    // Paths that must not be deleted out from under anyone: dirty
    // subtrees, ignored checkouts, and everything the manifest wants.
    let dirty_paths: BTreeSet<&Path> = states
        .values()
        .filter(|s| s.is_dirty())
        .map(|s| s.project.path.as_path())
        .collect();
    let ignored_paths: BTreeSet<&Path> = local
        .values()
        .filter(|p| p.local_config.ignore)
        .map(|p| p.path.as_path())
        .collect();
    let desired_paths: BTreeSet<&Path> = desired.values().map(|p| p.path.as_path()).collect();

    let mut creates = Vec::new();
    let mut moves = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    let mut nulls = Vec::new();

    let keys: BTreeSet<&ProjectKey> = desired.keys().chain(local.keys()).collect();
    for key in keys {
        match (desired.get(key), local.get(key)) {
            (Some(project), None) => creates.push(Operation::Create {
                project: project.clone(),
            }),
            (Some(project), Some(found)) => {
                if found.local_config.ignore {
                    nulls.push(Operation::Null {
                        key: key.clone(),
                        reason: NullReason::Ignored,
                    });
                } else if project.path == found.path {
                    updates.push(Operation::Update {
                        project: project.clone(),
                        local: found.clone(),
                    });
                } else {
                    moves.push(Operation::Move {
                        project: project.clone(),
                        from: found.path.clone(),
                        local: found.clone(),
                    });
                }
            }
            (None, Some(found)) => {
                let reason = if found.local_config.ignore {
                    Some(NullReason::Ignored)
                } else if !gc {
                    Some(NullReason::GcDisabled)
                } else if subtree_intersects(&found.path, &dirty_paths)
                    || subtree_intersects_strict(&found.path, &ignored_paths)
                {
                    Some(NullReason::Dirty)
                } else if subtree_intersects(&found.path, &desired_paths) {
                    Some(NullReason::HostsLiveProject)
                } else {
                    None
                };
                match reason {
                    Some(reason) => {
                        debug!("{key}: {reason}");
                        nulls.push(Operation::Null {
                            key: key.clone(),
                            reason,
                        });
                    }
                    None => deletes.push(Operation::Delete {
                        local: found.clone(),
                    }),
                }
            }
            (None, None) => unreachable!("key came from one of the two maps"),
        }
    }

    // Deepest-first so children vanish before their parents.
    deletes.sort_by(|a, b| depth_of(b).cmp(&depth_of(a)).then(path_of(b).cmp(path_of(a))));
    // Shallowest-first so parents exist (and have moved) before their
    // children are placed inside them.
    moves.sort_by(|a, b| depth_of(a).cmp(&depth_of(b)).then(path_of(a).cmp(path_of(b))));
    creates.sort_by(|a, b| depth_of(a).cmp(&depth_of(b)).then(path_of(a).cmp(path_of(b))));

    let mut ops = deletes;
    ops.append(&mut moves);
    ops.append(&mut creates);
    ops.append(&mut updates);
    ops.append(&mut nulls);
    Plan { ops }
}

/// Does `protected` contain `root` itself or anything beneath it?
fn subtree_intersects(root: &Path, protected: &BTreeSet<&Path>) -> bool {
    protected.iter().any(|p| p.starts_with(root))
}

/// Like [`subtree_intersects`], but only for strictly nested paths.
fn subtree_intersects_strict(root: &Path, protected: &BTreeSet<&Path>) -> bool {
    protected.iter().any(|p| *p != root && p.starts_with(root))
}

fn path_of(op: &Operation) -> &Path {
    match op {
        Operation::Create { project } => &project.path,
        Operation::Update { project, .. } => &project.path,
        Operation::Move { project, .. } => &project.path,
        Operation::Delete { local } => &local.path,
        Operation::Null { .. } => Path::new(""),
    }
}

fn depth_of(op: &Operation) -> usize {
    path_of(op).components().count()
}
