//! Subcommand implementations for the `jiri` CLI.

pub mod checkout;
pub mod snapshot;
pub mod update;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use jiri::vcs::{GitVcs, Vcs};
use jiri::workspace::Workspace;

/// Arguments shared by every workspace-touching subcommand.
#[derive(Args, Debug)]
pub struct WorkspaceArgs {
    /// Workspace root (default: walk up from the current directory)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Cache directory for remote repositories
    #[arg(long, value_name = "DIR", env = "JIRI_CACHE")]
    pub cache: Option<PathBuf>,

    /// Share cache objects with all working clones via alternates
    #[arg(long)]
    pub shared: bool,

    /// Number of parallel project workers (default: CPU count)
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,
}

impl WorkspaceArgs {
    pub fn workspace(&self) -> Result<Workspace> {
        let mut ws = match &self.root {
            Some(root) => Workspace::new(root)
                .with_context(|| format!("invalid workspace root {}", root.display()))?,
            None => Workspace::discover(".").context("no jiri workspace found")?,
        };
        if let Some(cache) = &self.cache {
            ws = ws.with_cache_root(cache);
        }
        if let Some(jobs) = self.jobs {
            ws = ws.with_jobs(jobs);
        }
        Ok(ws.with_shared_cache(self.shared))
    }
}

pub fn git_vcs() -> Arc<dyn Vcs> {
    Arc::new(GitVcs)
}
