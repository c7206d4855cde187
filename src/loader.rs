//! Manifest loader: turns a root manifest plus its transitive imports
//! into one consolidated set of desired projects and hooks.
//!
//! Imports form a directed graph that is traversed, never retained: a
//! stack of in-progress frames doubles as the cycle detector. Frame
//! identity is the absolute file path for filesystem manifests and the
//! (remote, manifest path, branch) tuple for remote-hosted ones, so the
//! same manifest may be imported from several places (diamonds are fine)
//! but never from inside itself.
//!
//! Merging is last-wins: projects accumulate into a map keyed by
//! [`ProjectKey`], hooks by (name, project), and a later declaration of
//! the same key silently replaces the earlier one. That makes layered
//! setups (a base manifest plus overlays importing it) deterministic
//! given the depth-first declaration order.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::cache::RepoCache;
use crate::error::{Error, Result};
use crate::manifest::{Hooks, Import, Manifest, Projects};
use crate::workspace::Workspace;

/// Where a manifest file lives: on the local filesystem, or inside a
/// remote repository read through the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameId {
    File(PathBuf),
    Remote {
        remote: String,
        manifest: String,
        branch: String,
    },
}

impl FrameId {
    fn is_remote(&self) -> bool {
        matches!(self, FrameId::Remote { .. })
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameId::File(path) => write!(f, "{}", path.display()),
            FrameId::Remote {
                remote,
                manifest,
                branch,
            } => write!(f, "{remote}+{manifest}@{branch}"),
        }
    }
}

/// Consolidated result of a load.
#[derive(Debug, Default)]
pub struct Resolved {
    pub projects: Projects,
    pub hooks: Hooks,
}

/// Load the workspace's root manifest and everything it imports.
pub fn load(ws: &Workspace, cache: &RepoCache) -> Result<Resolved> {
    let mut loader = Loader {
        ws,
        cache,
        stack: Vec::new(),
        resolved: Resolved::default(),
    };
    loader.load_file(&ws.root_manifest_file(), Path::new(""))?;
    validate(&loader.resolved)?;
    Ok(loader.resolved)
}

/// Consolidate an already-materialized manifest (a snapshot) without
/// resolving imports: its projects and hooks are taken as-is.
pub fn consolidate(ws: &Workspace, manifest: &Manifest) -> Result<Resolved> {
    let mut normalized = manifest.clone();
    normalized.normalize(ws.root());
    let resolved = Resolved {
        projects: normalized.project_map(),
        hooks: normalized.hooks.iter().map(|h| (h.key(), h.clone())).collect(),
    };
    validate(&resolved)?;
    Ok(resolved)
}

struct Loader<'a> {
    ws: &'a Workspace,
    cache: &'a RepoCache,
    stack: Vec<FrameId>,
    resolved: Resolved,
}

impl Loader<'_> {
    fn load_file(&mut self, path: &Path, prefix: &Path) -> Result<()> {
        let path = match path.canonicalize() {
            Ok(p) => p,
            Err(_) => path.to_path_buf(),
        };
        self.push(FrameId::File(path.clone()))?;
        debug!("loading manifest {}", path.display());

        let text = fs::read_to_string(&path).map_err(|e| Error::ManifestSyntax {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let manifest = Manifest::parse(&text, &path.display().to_string())?;
        let base = path.parent().unwrap_or(Path::new("")).to_path_buf();
        self.merge(manifest, &LocalBase::Dir(base), prefix)?;

        self.stack.pop();
        Ok(())
    }

    fn load_remote(&mut self, import: &Import, prefix: &Path) -> Result<()> {
        self.fetch_remote_manifest(
            &import.remote,
            &import.remote_branch,
            &import.manifest,
            &import.name,
            &prefix.join(import.root.as_deref().unwrap_or(Path::new(""))),
        )
    }

    /// Load a manifest hosted inside a remote repository. Local imports
    /// declared there resolve to sibling files in the same repository.
    fn fetch_remote_manifest(
        &mut self,
        remote: &str,
        branch: &str,
        manifest_path: &str,
        import_name: &str,
        prefix: &Path,
    ) -> Result<()> {
        let id = FrameId::Remote {
            remote: remote.to_string(),
            manifest: manifest_path.to_string(),
            branch: branch.to_string(),
        };
        let origin = id.to_string();
        self.push(id)?;
        debug!("loading remote manifest {origin}");

        self.cache
            .ensure_and_fetch(remote)
            .map_err(|e| Error::ImportFetch {
                name: import_name.to_string(),
                remote: remote.to_string(),
                message: e.to_string(),
            })?;
        let text = self
            .cache
            .read_file(remote, branch, manifest_path)
            .map_err(|e| Error::ImportFetch {
                name: import_name.to_string(),
                remote: remote.to_string(),
                message: e.to_string(),
            })?;
        let manifest = Manifest::parse(&text, &origin)?;

        let base = LocalBase::Remote {
            remote: remote.to_string(),
            branch: branch.to_string(),
            dir: parent_in_repo(manifest_path),
        };
        self.merge(manifest, &base, prefix)?;

        self.stack.pop();
        Ok(())
    }

    /// Process one parsed manifest: imports in declaration order, then
    /// its own projects and hooks (so they override anything imported).
    fn merge(&mut self, manifest: Manifest, base: &LocalBase, prefix: &Path) -> Result<()> {
        for import in &manifest.imports {
            self.load_remote(import, prefix)?;
        }
        for local in &manifest.local_imports {
            match base {
                LocalBase::Dir(dir) => {
                    let file = dir.join(&local.file);
                    self.load_file(&file, prefix)?;
                }
                LocalBase::Remote {
                    remote,
                    branch,
                    dir,
                } => {
                    let file = join_in_repo(dir, &local.file);
                    self.fetch_remote_manifest(remote, branch, &file, &file, prefix)?;
                }
            }
        }
        let project_root = self.ws.root().join(prefix);
        for mut project in manifest.projects {
            project.normalize(&project_root);
            self.resolved.projects.insert(project.key(), project);
        }
        for hook in manifest.hooks {
            self.resolved.hooks.insert(hook.key(), hook);
        }
        Ok(())
    }

    fn push(&mut self, id: FrameId) -> Result<()> {
        if let Some(start) = self.stack.iter().position(|f| *f == id) {
            let mut cycle: Vec<&FrameId> = self.stack[start..].iter().collect();
            cycle.push(&id);
            let all_remote = cycle.iter().all(|f| f.is_remote());
            let all_local = cycle.iter().all(|f| !f.is_remote());
            let kind = if all_local {
                "local manifest files"
            } else if all_remote {
                "remote manifest imports"
            } else {
                "manifest imports"
            };
            return Err(Error::ImportCycle {
                kind: kind.to_string(),
                cycle: cycle
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(" -> "),
            });
        }
        self.stack.push(id);
        Ok(())
    }
}

/// Where a manifest's local imports resolve.
enum LocalBase {
    Dir(PathBuf),
    Remote {
        remote: String,
        branch: String,
        dir: String,
    },
}

fn parent_in_repo(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

fn join_in_repo(dir: &str, file: &Path) -> String {
    let file = file.to_string_lossy();
    if dir.is_empty() {
        file.into_owned()
    } else {
        format!("{dir}/{file}")
    }
}

fn validate(resolved: &Resolved) -> Result<()> {
    let mut paths: std::collections::BTreeMap<&Path, &crate::manifest::ProjectKey> =
        Default::default();
    for (key, project) in &resolved.projects {
        if project.name.is_empty() || project.remote.is_empty() {
            return Err(Error::ManifestSyntax {
                path: project.path.display().to_string(),
                message: "project must have a non-empty name and remote".to_string(),
            });
        }
        if let Some(first) = paths.insert(project.path.as_path(), key) {
            return Err(Error::ProjectPathConflict {
                path: project.path.display().to_string(),
                first: first.to_string(),
                second: key.to_string(),
            });
        }
    }
    for hook in resolved.hooks.values() {
        let known = resolved.projects.values().any(|p| p.name == hook.project);
        if !known {
            return Err(Error::InvalidHook {
                name: hook.name.clone(),
                project: hook.project.clone(),
            });
        }
    }
    Ok(())
}

/// The project a hook runs relative to, by manifest name.
pub fn hook_project<'a>(resolved: &'a Resolved, project_name: &str) -> Option<&'a crate::manifest::Project> {
    resolved.projects.values().find(|p| p.name == project_name)
}
