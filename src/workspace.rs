//! Workspace context: the root directory under which all projects live,
//! plus every path the engine derives from it.
//!
//! A [`Workspace`] is deliberately cheap to clone. Parallel workers each
//! receive their own copy; shared mutable state (the clone cache) lives
//! behind its own per-remote locks in the `cache` module.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the root manifest file at the top of every workspace.
pub const ROOT_MANIFEST: &str = ".jiri_manifest";

/// Name of the engine metadata directory at the top of every workspace.
pub const ROOT_META_DIR: &str = ".jiri_root";

/// Name of the per-project metadata subdirectory.
pub const PROJECT_META_DIR: &str = ".jiri";

/// Line added to every project's `.git/info/exclude`.
pub const PROJECT_META_EXCLUDE: &str = "/.jiri/";

/// Workspace context shared by every engine component.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    cache_root: PathBuf,
    shared_cache: bool,
    jobs: usize,
}

impl Workspace {
    /// Create a workspace rooted at `root`. The directory must exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root: PathBuf = root.into();
        let root = root.canonicalize()?;
        let cache_root = root.join(ROOT_META_DIR).join("cache");
        Ok(Self {
            root,
            cache_root,
            shared_cache: false,
            jobs: default_jobs(),
        })
    }

    /// Locate a workspace by walking up from `start` until a directory
    /// containing the root manifest is found.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        let start = start.as_ref().canonicalize()?;
        let mut dir = start.as_path();
        loop {
            if dir.join(ROOT_MANIFEST).is_file() {
                return Self::new(dir);
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => return Err(Error::NoWorkspaceRoot(ROOT_MANIFEST.to_string())),
            }
        }
    }

    /// Override the clone-cache root (default: `<root>/.jiri_root/cache`).
    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    /// Enable shared caching: every working clone references the cache's
    /// object store via alternates, including history-limited projects.
    pub fn with_shared_cache(mut self, shared: bool) -> Self {
        self.shared_cache = shared;
        self
    }

    /// Bound the per-project worker pool.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Absolute workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the root manifest file.
    pub fn root_manifest_file(&self) -> PathBuf {
        self.root.join(ROOT_MANIFEST)
    }

    /// Path of the engine metadata directory.
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(ROOT_META_DIR)
    }

    /// Directory holding timestamped update-history snapshots.
    pub fn update_history_dir(&self) -> PathBuf {
        self.meta_dir().join("update_history")
    }

    /// The "latest" pointer inside the update-history directory.
    pub fn update_history_latest(&self) -> PathBuf {
        self.update_history_dir().join("latest")
    }

    /// Root of the per-remote clone cache.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Whether shared caching is enabled.
    pub fn shared_cache(&self) -> bool {
        self.shared_cache
    }

    /// Bounded degree of per-project parallelism.
    pub fn jobs(&self) -> usize {
        self.jobs
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
