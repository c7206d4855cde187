//! Validate command - load the manifest without touching the workspace.
//!
//! Every check the loader performs during an update runs here too: YAML
//! syntax, import cycles, hook references, and path conflicts. This is a
//! read-only operation apart from cache fetches needed to resolve
//! remote imports.

use anyhow::Result;
use clap::Args;

use jiri::cache::RepoCache;
use jiri::loader;

use super::WorkspaceArgs;

/// Load and validate the manifest without touching the workspace
#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let ws = args.workspace.workspace()?;
    let cache = RepoCache::new(ws.cache_root(), super::git_vcs());

    match loader::load(&ws, &cache) {
        Ok(resolved) => {
            println!(
                "Manifest OK: {} project(s), {} hook(s).",
                resolved.projects.len(),
                resolved.hooks.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Manifest invalid: {e}");
            Err(e.into())
        }
    }
}
