//! Low-level git driver: every repository mutation in the engine flows
//! through a subprocess invocation built here.
//!
//! The driver is intentionally dumb. It knows how to run `git`, capture
//! stderr into an [`Error::Git`], and parse the handful of plumbing
//! formats the engine needs (`for-each-ref` records, `status
//! --porcelain`). Policy (what to fetch, when to rebase, what counts as
//! dirty enough to skip) lives in the executor.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{Error, Result};
use crate::metadata;

/// A handle onto one git repository (working clone or bare cache repo).
#[derive(Debug)]
pub struct Git {
    dir: PathBuf,
}

/// One local branch as reported by `for-each-ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRecord {
    pub name: String,
    pub revision: String,
    /// Short name of the upstream ref, when the branch tracks one.
    pub upstream: Option<String>,
    pub is_head: bool,
}

impl Git {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Initialize a new repository at `dir`.
    pub fn init(dir: &Path) -> Result<()> {
        run_git(None, &["init", "--quiet", &dir.to_string_lossy()])?;
        Ok(())
    }

    /// Clone `remote` to `dest`. `reference` links the new clone's object
    /// store to another repository via alternates; `depth` produces a
    /// shallow clone; `no_checkout` leaves the working tree empty for a
    /// later detached checkout.
    pub fn clone(
        remote: &str,
        dest: &Path,
        bare: bool,
        reference: Option<&Path>,
        depth: Option<u32>,
        no_checkout: bool,
    ) -> Result<()> {
        let mut args: Vec<String> = vec!["clone".into(), "--quiet".into()];
        if bare {
            args.push("--bare".into());
        }
        if no_checkout {
            args.push("--no-checkout".into());
        }
        if let Some(reference) = reference {
            args.push("--reference".into());
            args.push(reference.to_string_lossy().into_owned());
        }
        if let Some(depth) = depth {
            args.push(format!("--depth={depth}"));
        }
        args.push(remote.into());
        args.push(dest.to_string_lossy().into_owned());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_git(None, &args)?;
        Ok(())
    }

    /// Fetch from `origin` with pruning. An explicit refspec is used for
    /// bare cache repositories to keep their `refs/heads` mirrored.
    pub fn fetch(&self, refspec: Option<&str>, depth: Option<u32>) -> Result<()> {
        let mut args: Vec<String> = vec!["fetch".into(), "--quiet".into(), "--prune".into()];
        if let Some(depth) = depth {
            args.push(format!("--depth={depth}"));
        }
        args.push("origin".into());
        if let Some(refspec) = refspec {
            args.push(refspec.into());
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args)?;
        Ok(())
    }

    /// All local branches with their revisions, upstreams, and which one
    /// HEAD is on.
    pub fn branches(&self) -> Result<Vec<BranchRecord>> {
        let output = self.run(&[
            "for-each-ref",
            "refs/heads",
            "--format=%(HEAD)%00%(refname:short)%00%(objectname)%00%(upstream:short)",
        ])?;
        Ok(parse_branch_records(&stdout_str(&output)))
    }

    /// Short name of the checked-out branch, or `None` when detached.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let output = self.run_unchecked(&["symbolic-ref", "--short", "-q", "HEAD"])?;
        if output.status.success() {
            Ok(Some(stdout_str(&output).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// The commit the working tree is at.
    pub fn current_revision(&self) -> Result<String> {
        let output = self.run(&["rev-parse", "HEAD"])?;
        Ok(stdout_str(&output).trim().to_string())
    }

    /// Resolve any reference to a commit hash.
    pub fn resolve_ref(&self, reference: &str) -> Result<String> {
        let spec = format!("{reference}^{{commit}}");
        let output = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(stdout_str(&output).trim().to_string())
    }

    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", branch])?;
        Ok(())
    }

    pub fn checkout_detached(&self, revision: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", "--detach", revision])?;
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Point the working tree at `revision`. Untracked files survive:
    /// there is deliberately no `clean` anywhere in the engine.
    pub fn reset_hard(&self, revision: &str) -> Result<()> {
        self.run(&["reset", "--hard", "--quiet", revision])?;
        Ok(())
    }

    /// Rebase the current branch onto `upstream`. Returns false on
    /// conflict, after aborting so the branch is left where it was.
    pub fn rebase(&self, upstream: &str) -> Result<bool> {
        let output = self.run_unchecked(&["rebase", "--quiet", upstream])?;
        if output.status.success() {
            return Ok(true);
        }
        // Leave no half-finished rebase behind.
        let _ = self.run_unchecked(&["rebase", "--abort"]);
        Ok(false)
    }

    /// True when `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self.run_unchecked(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        Ok(output.status.success())
    }

    /// True when a rebase, merge, or cherry-pick is mid-flight; the
    /// engine refuses to touch such a tree.
    pub fn operation_in_progress(&self) -> bool {
        let git_dir = metadata::git_dir(&self.dir);
        git_dir.join("rebase-apply").exists()
            || git_dir.join("rebase-merge").exists()
            || git_dir.join("CHERRY_PICK_HEAD").exists()
            || git_dir.join("MERGE_HEAD").exists()
    }

    /// Staged or unstaged modifications to tracked files.
    pub fn has_uncommitted(&self) -> Result<bool> {
        let (uncommitted, _) = self.status()?;
        Ok(uncommitted)
    }

    /// Files git does not know about (and does not ignore).
    pub fn has_untracked(&self) -> Result<bool> {
        let (_, untracked) = self.status()?;
        Ok(untracked)
    }

    /// (has uncommitted, has untracked) in one porcelain call.
    pub fn status(&self) -> Result<(bool, bool)> {
        let output = self.run(&["status", "--porcelain"])?;
        Ok(parse_porcelain_status(&stdout_str(&output)))
    }

    /// Contents of `path` as of `revision`, without touching a working
    /// tree. Works on bare repositories, which is how manifests are read
    /// out of the cache.
    pub fn show_file(&self, revision: &str, path: &str) -> Result<String> {
        let spec = format!("{revision}:{path}");
        let output = self.run(&["show", &spec])?;
        Ok(stdout_str(&output))
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        run_git(Some(&self.dir), args)
    }

    /// Run without turning a nonzero exit into an error; callers inspect
    /// the status themselves.
    fn run_unchecked(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(args)
            .output()
            .map_err(|e| Error::Git {
                command: args.join(" "),
                stderr: e.to_string(),
            })?;
        Ok(output)
    }
}

fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<Output> {
    let mut command = Command::new("git");
    if let Some(dir) = dir {
        command.arg("-C").arg(dir);
    }
    let output = command.args(args).output().map_err(|e| Error::Git {
        command: args.join(" "),
        stderr: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(Error::Git {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

fn stdout_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn parse_branch_records(text: &str) -> Vec<BranchRecord> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\0').collect();
            if fields.len() != 4 || fields[1].is_empty() {
                return None;
            }
            Some(BranchRecord {
                is_head: fields[0] == "*",
                name: fields[1].to_string(),
                revision: fields[2].to_string(),
                upstream: if fields[3].is_empty() {
                    None
                } else {
                    Some(fields[3].to_string())
                },
            })
        })
        .collect()
}

fn parse_porcelain_status(text: &str) -> (bool, bool) {
    let mut uncommitted = false;
    let mut untracked = false;
    for line in text.lines() {
        if line.starts_with("??") {
            untracked = true;
        } else if !line.trim().is_empty() {
            uncommitted = true;
        }
    }
    (uncommitted, untracked)
}
