//! Update command - reconcile the workspace against its manifest.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use jiri::executor::UpdateOptions;
use jiri::hooks::DEFAULT_HOOK_TIMEOUT;
use jiri::update::update_universe;

use super::WorkspaceArgs;

/// Update all projects to match the manifest
#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,

    /// Garbage collect projects no longer in the manifest
    #[arg(long)]
    gc: bool,

    /// Rebase the current tracking branch even when it has diverged
    #[arg(long)]
    rebase_tracked: bool,

    /// With --rebase-all, also rebase branches without a tracking ref
    #[arg(long)]
    rebase_untracked: bool,

    /// Rebase every local branch with a tracking ref
    #[arg(long)]
    rebase_all: bool,

    /// Skip post-update hooks
    #[arg(long)]
    no_hooks: bool,

    /// Per-hook timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_HOOK_TIMEOUT.as_secs())]
    hook_timeout: u64,
}

pub fn execute(args: UpdateArgs) -> Result<()> {
    let ws = args.workspace.workspace()?;
    let opts = UpdateOptions {
        gc: args.gc,
        rebase_tracked: args.rebase_tracked,
        rebase_untracked: args.rebase_untracked,
        rebase_all: args.rebase_all,
        run_hooks: !args.no_hooks,
        hook_timeout: Duration::from_secs(args.hook_timeout),
        cancel: None,
    };

    let warnings = update_universe(&ws, super::git_vcs(), &opts).context("update failed")?;
    if warnings.is_empty() {
        println!("Workspace up to date.");
    } else {
        println!("Workspace updated with {} warning(s):", warnings.len());
        for warning in warnings {
            println!("  {warning}");
        }
    }
    Ok(())
}
