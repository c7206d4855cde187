//! Per-remote clone cache.
//!
//! The cache holds one bare repository per unique remote URL under a
//! configurable root. It is append-only: fetches add objects and move
//! refs, nothing is ever checked out there. Working clones link to it
//! with `--reference` (alternates) so objects are shared, or copy from
//! it when alternates are not permitted for the project.
//!
//! Fetches into the same cache repository are serialized by a per-remote
//! lock; fetches to distinct remotes proceed in parallel, and reads
//! (clone-from-cache) after a completed fetch need no lock at all.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::{Error, Result};
use crate::vcs::{CloneOptions, FetchOptions, Vcs};

/// Refspec keeping a bare cache repository's `refs/heads` a mirror of
/// its remote.
const CACHE_REFSPEC: &str = "+refs/heads/*:refs/heads/*";

/// A directory of bare repositories, one per remote URL, with
/// single-writer fetch discipline per remote.
pub struct RepoCache {
    root: PathBuf,
    vcs: Arc<dyn Vcs>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepoCache {
    pub fn new(root: impl Into<PathBuf>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            root: root.into(),
            vcs,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The cache directory for `remote`, whether or not it exists yet.
    ///
    /// The name keeps a recognizable suffix of the URL for debuggability
    /// and appends a hash of the whole URL so distinct remotes never
    /// collide.
    pub fn repo_dir(&self, remote: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        remote.hash(&mut hasher);
        let digest = format!("{:x}", hasher.finish());

        let safe: String = remote
            .trim_end_matches('/')
            .chars()
            .rev()
            .take(40)
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        self.root.join(format!("{}-{digest}", safe.trim_matches('-')))
    }

    /// Make sure the cache repository for `remote` exists and is fresh:
    /// clone it bare on first use, fetch (with pruning) otherwise.
    /// Serialized per remote; safe to call from many workers at once.
    pub fn ensure_and_fetch(&self, remote: &str) -> Result<PathBuf> {
        let lock = self.lock_for(remote)?;
        let _guard = lock.lock().map_err(|_| Error::LockPoisoned {
            context: format!("cache repository for {remote}"),
        })?;

        let dir = self.repo_dir(remote);
        if dir.is_dir() {
            debug!("fetching cache for {remote}");
            self.vcs.fetch(
                &dir,
                &FetchOptions {
                    refspec: Some(CACHE_REFSPEC.to_string()),
                    depth: None,
                },
            )?;
        } else {
            debug!("creating cache for {remote}");
            fs::create_dir_all(&self.root)?;
            let result = self.vcs.clone_repo(&CloneOptions {
                remote: remote.to_string(),
                dest: dir.clone(),
                bare: true,
                ..CloneOptions::default()
            });
            if let Err(e) = result {
                // A half-created cache repo would wedge every later run.
                let _ = fs::remove_dir_all(&dir);
                return Err(e);
            }
        }
        Ok(dir)
    }

    /// Read one file out of the cached copy of `remote` at `branch`,
    /// without materializing a working tree. The cache repository must
    /// have been ensured first.
    pub fn read_file(&self, remote: &str, branch: &str, path: &str) -> Result<String> {
        let dir = self.repo_dir(remote);
        let reference = format!("refs/heads/{branch}");
        self.vcs.show_file(&dir, &reference, path)
    }

    fn lock_for(&self, remote: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| Error::LockPoisoned {
            context: "cache lock table".to_string(),
        })?;
        Ok(locks.entry(remote.to_string()).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts operations instead of running git.
    #[derive(Default)]
    struct CountingVcs {
        clones: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl Vcs for CountingVcs {
        fn clone_repo(&self, opts: &CloneOptions) -> Result<()> {
            assert!(opts.bare);
            self.clones.fetch_add(1, Ordering::SeqCst);
            fs::create_dir_all(&opts.dest)?;
            Ok(())
        }
        fn fetch(&self, _dir: &Path, opts: &FetchOptions) -> Result<()> {
            assert_eq!(opts.refspec.as_deref(), Some(CACHE_REFSPEC));
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn branches(&self, _: &Path) -> Result<Vec<crate::vcs::BranchInfo>> {
            Ok(Vec::new())
        }
        fn current_branch(&self, _: &Path) -> Result<Option<String>> {
            Ok(None)
        }
        fn current_revision(&self, _: &Path) -> Result<String> {
            Ok(String::new())
        }
        fn resolve_ref(&self, _: &Path, _: &str) -> Result<String> {
            Ok(String::new())
        }
        fn checkout_branch(&self, _: &Path, _: &str) -> Result<()> {
            Ok(())
        }
        fn checkout_detached(&self, _: &Path, _: &str) -> Result<()> {
            Ok(())
        }
        fn delete_branch(&self, _: &Path, _: &str) -> Result<()> {
            Ok(())
        }
        fn reset_hard(&self, _: &Path, _: &str) -> Result<()> {
            Ok(())
        }
        fn rebase(&self, _: &Path, _: &str) -> Result<crate::vcs::RebaseOutcome> {
            Ok(crate::vcs::RebaseOutcome::Success)
        }
        fn is_ancestor(&self, _: &Path, _: &str, _: &str) -> Result<bool> {
            Ok(true)
        }
        fn operation_in_progress(&self, _: &Path) -> bool {
            false
        }
        fn has_uncommitted(&self, _: &Path) -> Result<bool> {
            Ok(false)
        }
        fn has_untracked(&self, _: &Path) -> Result<bool> {
            Ok(false)
        }
        fn show_file(&self, _: &Path, _: &str, _: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn repo_dir_is_stable_and_collision_free() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = RepoCache::new(tmp.path(), Arc::new(CountingVcs::default()));

        let a = cache.repo_dir("https://example.com/team/alpha.git");
        let b = cache.repo_dir("https://example.com/team/beta.git");
        let a_again = cache.repo_dir("https://example.com/team/alpha.git");
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert!(a.starts_with(tmp.path()));
        // Recognizable suffix survives sanitization.
        assert!(a.file_name().unwrap().to_string_lossy().contains("alpha.git"));
    }

    #[test]
    fn first_use_clones_then_fetches() {
        let tmp = tempfile::tempdir().unwrap();
        let vcs = Arc::new(CountingVcs::default());
        let cache = RepoCache::new(tmp.path(), vcs.clone());

        cache.ensure_and_fetch("https://example.com/r.git").unwrap();
        assert_eq!(vcs.clones.load(Ordering::SeqCst), 1);
        assert_eq!(vcs.fetches.load(Ordering::SeqCst), 0);

        cache.ensure_and_fetch("https://example.com/r.git").unwrap();
        assert_eq!(vcs.clones.load(Ordering::SeqCst), 1);
        assert_eq!(vcs.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_clone_leaves_no_partial_cache() {
        struct FailingVcs(CountingVcs);
        impl Vcs for FailingVcs {
            fn clone_repo(&self, opts: &CloneOptions) -> Result<()> {
                fs::create_dir_all(&opts.dest)?;
                Err(Error::Git {
                    command: "clone".into(),
                    stderr: "network down".into(),
                })
            }
            fn fetch(&self, d: &Path, o: &FetchOptions) -> Result<()> {
                self.0.fetch(d, o)
            }
            fn branches(&self, d: &Path) -> Result<Vec<crate::vcs::BranchInfo>> {
                self.0.branches(d)
            }
            fn current_branch(&self, d: &Path) -> Result<Option<String>> {
                self.0.current_branch(d)
            }
            fn current_revision(&self, d: &Path) -> Result<String> {
                self.0.current_revision(d)
            }
            fn resolve_ref(&self, d: &Path, r: &str) -> Result<String> {
                self.0.resolve_ref(d, r)
            }
            fn checkout_branch(&self, d: &Path, b: &str) -> Result<()> {
                self.0.checkout_branch(d, b)
            }
            fn checkout_detached(&self, d: &Path, r: &str) -> Result<()> {
                self.0.checkout_detached(d, r)
            }
            fn delete_branch(&self, d: &Path, b: &str) -> Result<()> {
                self.0.delete_branch(d, b)
            }
            fn reset_hard(&self, d: &Path, r: &str) -> Result<()> {
                self.0.reset_hard(d, r)
            }
            fn rebase(&self, d: &Path, u: &str) -> Result<crate::vcs::RebaseOutcome> {
                self.0.rebase(d, u)
            }
            fn is_ancestor(&self, d: &Path, a: &str, b: &str) -> Result<bool> {
                self.0.is_ancestor(d, a, b)
            }
            fn operation_in_progress(&self, d: &Path) -> bool {
                self.0.operation_in_progress(d)
            }
            fn has_uncommitted(&self, d: &Path) -> Result<bool> {
                self.0.has_uncommitted(d)
            }
            fn has_untracked(&self, d: &Path) -> Result<bool> {
                self.0.has_untracked(d)
            }
            fn show_file(&self, d: &Path, r: &str, p: &str) -> Result<String> {
                self.0.show_file(d, r, p)
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let cache = RepoCache::new(tmp.path(), Arc::new(FailingVcs(CountingVcs::default())));
        let remote = "https://example.com/r.git";
        assert!(cache.ensure_and_fetch(remote).is_err());
        assert!(!cache.repo_dir(remote).exists());
    }
}
