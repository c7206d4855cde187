//! Inspection of per-project version-control state: branches, tracking
//! targets, the current checkout disposition, and working-tree dirt.
//!
//! State collection fans out across projects on the caller's rayon pool;
//! each project is read by exactly one worker through the VCS port.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::error::Result;
use crate::manifest::{Project, ProjectKey, Projects};
use crate::vcs::Vcs;

/// A named reference and the commit it points at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceState {
    pub name: String,
    pub revision: String,
}

/// A local branch, with the remote-tracking reference it follows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchState {
    pub reference: ReferenceState,
    pub tracking: Option<ReferenceState>,
}

/// Everything the engine needs to know about one checkout.
#[derive(Debug, Clone)]
pub struct ProjectState {
    pub branches: Vec<BranchState>,
    /// The checked-out branch; an empty name means detached HEAD, with
    /// the revision still filled in.
    pub current_branch: BranchState,
    pub has_uncommitted: bool,
    pub has_untracked: bool,
    pub project: Project,
}

impl ProjectState {
    pub fn is_detached(&self) -> bool {
        self.current_branch.reference.name.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.has_uncommitted || self.has_untracked
    }
}

/// Read the state of a single checkout.
pub fn project_state(project: &Project, vcs: &dyn Vcs, check_dirty: bool) -> Result<ProjectState> {
    let dir = project.path.as_path();

    let mut branches = Vec::new();
    let mut current_branch = BranchState::default();
    for info in vcs.branches(dir)? {
        let branch = BranchState {
            reference: ReferenceState {
                name: info.name,
                revision: info.revision,
            },
            tracking: info.tracking.map(|t| ReferenceState {
                name: t.name,
                revision: t.revision,
            }),
        };
        if info.is_head {
            current_branch = branch.clone();
        }
        branches.push(branch);
    }
    if current_branch.reference.name.is_empty() {
        current_branch.reference.revision = vcs.current_revision(dir)?;
    }

    let (has_uncommitted, has_untracked) = if check_dirty {
        (vcs.has_uncommitted(dir)?, vcs.has_untracked(dir)?)
    } else {
        (false, false)
    };

    Ok(ProjectState {
        branches,
        current_branch,
        has_uncommitted,
        has_untracked,
        project: project.clone(),
    })
}

/// Read the states of many checkouts in parallel on the current rayon
/// pool. Fails on the first project whose state cannot be read.
pub fn project_states(
    projects: &Projects,
    vcs: &dyn Vcs,
    check_dirty: bool,
) -> Result<BTreeMap<ProjectKey, ProjectState>> {
    projects
        .par_iter()
        .map(|(key, project)| Ok((key.clone(), project_state(project, vcs, check_dirty)?)))
        .collect()
}
