//! Post-update hook execution.
//!
//! Hooks run only after every project operation in the plan has
//! completed. Each hook's action script resolves relative to its named
//! project's checkout and runs with that checkout as its working
//! directory, bounded by a per-hook timeout. The first failure (nonzero
//! exit, timeout, or unrunnable script) stops further hooks and fails
//! the run; completed project operations are never undone by it.

use std::process::{Command, Stdio};
use std::time::Duration;

use log::{debug, info};
use wait_timeout::ChildExt;

use crate::error::{Error, Result};
use crate::loader::{hook_project, Resolved};

/// Default per-hook wall-clock budget.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Run every hook in the consolidated manifest, in deterministic (key)
/// order.
///
/// Hook-to-project resolution was already validated at load time, so a
/// missing project here is a bug, not a user error; it still fails
/// cleanly.
pub fn run_hooks(resolved: &Resolved, timeout: Duration) -> Result<()> {
    for hook in resolved.hooks.values() {
        let project = hook_project(resolved, &hook.project).ok_or_else(|| Error::InvalidHook {
            name: hook.name.clone(),
            project: hook.project.clone(),
        })?;

        let script = project.path.join(&hook.action);
        info!("running hook {} ({})", hook.name, script.display());

        let mut child = Command::new(&script)
            .current_dir(&project.path)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::HookFailure {
                name: hook.name.clone(),
                message: format!("{}: {e}", script.display()),
            })?;

        match child.wait_timeout(timeout).map_err(|e| Error::HookFailure {
            name: hook.name.clone(),
            message: e.to_string(),
        })? {
            Some(status) if status.success() => {
                debug!("hook {} finished", hook.name);
            }
            Some(status) => {
                return Err(Error::HookFailure {
                    name: hook.name.clone(),
                    message: format!("exited with {status}"),
                });
            }
            None => {
                // Out of budget: kill it and report the timeout rather
                // than whatever exit code the kill produces.
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::HookFailure {
                    name: hook.name.clone(),
                    message: format!("timed out after {}s", timeout.as_secs()),
                });
            }
        }
    }
    Ok(())
}
