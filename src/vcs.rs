//! The VCS port: the abstract set of version-control operations the
//! engine needs, and the git-backed implementation of it.
//!
//! Keeping the engine behind this trait means a fake implementation can
//! drive planner and executor logic in tests without a `git` binary, and
//! the real one stays a thin delegation onto [`crate::git::Git`].

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::git::Git;

/// Options for creating a clone.
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub remote: String,
    pub dest: PathBuf,
    /// No working tree; used for cache repositories.
    pub bare: bool,
    /// Alternates link to a cache repository's object store.
    pub reference: Option<PathBuf>,
    /// Shallow clone depth; `None` for full history.
    pub depth: Option<u32>,
    /// Leave the working tree unpopulated for a later detached checkout.
    pub no_checkout: bool,
}

/// Options for a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Explicit refspec (cache repositories mirror `refs/heads`).
    pub refspec: Option<String>,
    pub depth: Option<u32>,
}

/// One local branch with its tracking information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub revision: String,
    pub tracking: Option<TrackingInfo>,
    pub is_head: bool,
}

/// The remote-tracking ref a branch follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingInfo {
    pub name: String,
    pub revision: String,
}

/// Outcome of a rebase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    Success,
    /// The rebase hit conflicts and was aborted; the branch is where it
    /// was.
    Conflict,
}

/// Abstract interface to a distributed version-control system. All
/// repository mutation performed by the engine flows through this trait.
pub trait Vcs: Send + Sync {
    fn clone_repo(&self, opts: &CloneOptions) -> Result<()>;
    fn fetch(&self, dir: &Path, opts: &FetchOptions) -> Result<()>;
    fn branches(&self, dir: &Path) -> Result<Vec<BranchInfo>>;
    fn current_branch(&self, dir: &Path) -> Result<Option<String>>;
    fn current_revision(&self, dir: &Path) -> Result<String>;
    fn resolve_ref(&self, dir: &Path, reference: &str) -> Result<String>;
    fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<()>;
    fn checkout_detached(&self, dir: &Path, revision: &str) -> Result<()>;
    fn delete_branch(&self, dir: &Path, branch: &str) -> Result<()>;
    fn reset_hard(&self, dir: &Path, revision: &str) -> Result<()>;
    fn rebase(&self, dir: &Path, upstream: &str) -> Result<RebaseOutcome>;
    fn is_ancestor(&self, dir: &Path, ancestor: &str, descendant: &str) -> Result<bool>;
    fn operation_in_progress(&self, dir: &Path) -> bool;
    fn has_uncommitted(&self, dir: &Path) -> Result<bool>;
    fn has_untracked(&self, dir: &Path) -> Result<bool>;
    fn show_file(&self, dir: &Path, revision: &str, path: &str) -> Result<String>;
}

/// The production implementation: a `git` subprocess per operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitVcs;

impl Vcs for GitVcs {
    fn clone_repo(&self, opts: &CloneOptions) -> Result<()> {
        Git::clone(
            &opts.remote,
            &opts.dest,
            opts.bare,
            opts.reference.as_deref(),
            opts.depth,
            opts.no_checkout,
        )
    }

    fn fetch(&self, dir: &Path, opts: &FetchOptions) -> Result<()> {
        Git::new(dir).fetch(opts.refspec.as_deref(), opts.depth)
    }

    fn branches(&self, dir: &Path) -> Result<Vec<BranchInfo>> {
        let git = Git::new(dir);
        let mut branches = Vec::new();
        for record in git.branches()? {
            let tracking = match record.upstream {
                Some(name) => {
                    // The upstream ref may be gone after a pruning fetch;
                    // treat that the same as no tracking at all.
                    match git.resolve_ref(&name) {
                        Ok(revision) => Some(TrackingInfo { name, revision }),
                        Err(_) => None,
                    }
                }
                None => None,
            };
            branches.push(BranchInfo {
                name: record.name,
                revision: record.revision,
                tracking,
                is_head: record.is_head,
            });
        }
        Ok(branches)
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
        Git::new(dir).current_branch()
    }

    fn current_revision(&self, dir: &Path) -> Result<String> {
        Git::new(dir).current_revision()
    }

    fn resolve_ref(&self, dir: &Path, reference: &str) -> Result<String> {
        Git::new(dir).resolve_ref(reference)
    }

    fn checkout_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        Git::new(dir).checkout_branch(branch)
    }

    fn checkout_detached(&self, dir: &Path, revision: &str) -> Result<()> {
        Git::new(dir).checkout_detached(revision)
    }

    fn delete_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        Git::new(dir).delete_branch(branch)
    }

    fn reset_hard(&self, dir: &Path, revision: &str) -> Result<()> {
        Git::new(dir).reset_hard(revision)
    }

    fn rebase(&self, dir: &Path, upstream: &str) -> Result<RebaseOutcome> {
        if Git::new(dir).rebase(upstream)? {
            Ok(RebaseOutcome::Success)
        } else {
            Ok(RebaseOutcome::Conflict)
        }
    }

    fn is_ancestor(&self, dir: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
        Git::new(dir).is_ancestor(ancestor, descendant)
    }

    fn operation_in_progress(&self, dir: &Path) -> bool {
        Git::new(dir).operation_in_progress()
    }

    fn has_uncommitted(&self, dir: &Path) -> Result<bool> {
        Git::new(dir).has_uncommitted()
    }

    fn has_untracked(&self, dir: &Path) -> Result<bool> {
        Git::new(dir).has_untracked()
    }

    fn show_file(&self, dir: &Path, revision: &str, path: &str) -> Result<String> {
        Git::new(dir).show_file(revision, path)
    }
}
