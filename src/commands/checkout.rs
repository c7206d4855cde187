//! Checkout command - reconcile the workspace against a snapshot.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use jiri::executor::UpdateOptions;
use jiri::hooks::DEFAULT_HOOK_TIMEOUT;
use jiri::update::checkout_snapshot;

use super::WorkspaceArgs;

/// Reconcile the workspace against a snapshot file or URL
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,

    /// Snapshot source: a filesystem path or an http(s) URL
    #[arg(value_name = "SOURCE")]
    source: String,

    /// Garbage collect projects not named by the snapshot
    #[arg(long)]
    gc: bool,

    /// Skip post-update hooks
    #[arg(long)]
    no_hooks: bool,

    /// Per-hook timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_HOOK_TIMEOUT.as_secs())]
    hook_timeout: u64,
}

pub fn execute(args: CheckoutArgs) -> Result<()> {
    let ws = args.workspace.workspace()?;
    let opts = UpdateOptions {
        gc: args.gc,
        run_hooks: !args.no_hooks,
        hook_timeout: Duration::from_secs(args.hook_timeout),
        ..UpdateOptions::default()
    };

    checkout_snapshot(&ws, super::git_vcs(), &args.source, &opts)
        .with_context(|| format!("checkout of {} failed", args.source))?;
    println!("Workspace now matches {}.", args.source);
    Ok(())
}
