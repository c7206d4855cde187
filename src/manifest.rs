//! Manifest model and its textual representation.
//!
//! A manifest is a YAML document with a single `manifest` root element
//! holding four ordered collections: remote imports, local imports,
//! projects, and hooks. Serialization is round-trip stable: attributes
//! that carry their default value (remote branch `master`, revision
//! `HEAD`, empty collections, zero history depth) are elided on write and
//! supplied on read, so loading a manifest, writing it back, and loading
//! it again yields an equal value.
//!
//! Project paths are stored relative to the workspace root in the file
//! and held absolute in memory; [`Manifest::from_file`] and
//! [`Manifest::to_file`] perform the conversion.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metadata::LocalConfig;

/// The remote branch tracked when a project or import does not name one.
pub const DEFAULT_REMOTE_BRANCH: &str = "master";

/// Revision value meaning "track the tip of the remote branch".
/// Normalized to the empty string on read and elided on write.
pub const HEAD_REVISION: &str = "HEAD";

const KEY_SEPARATOR: &str = "=";

/// Canonical identity of a project: its name plus its remote URL.
///
/// Two projects differing only in path share a key (and collide during
/// import merging, last declaration winning); two projects with the same
/// name but different remotes do not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectKey(String);

impl ProjectKey {
    pub fn new(name: &str, remote: &str) -> Self {
        Self(format!("{name}{KEY_SEPARATOR}{remote}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The consolidated project set, ordered deterministically by key.
pub type Projects = BTreeMap<ProjectKey, Project>;

/// The consolidated hook set, keyed by (name, project).
pub type Hooks = BTreeMap<String, Hook>;

/// A single version-controlled project checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    pub name: String,

    /// Absolute in memory; relative to the workspace root in files.
    pub path: PathBuf,

    pub remote: String,

    #[serde(
        default = "default_remote_branch",
        skip_serializing_if = "is_default_remote_branch"
    )]
    pub remote_branch: String,

    /// Pinned commit, or empty to track the remote branch tip.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gerrit_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_hooks: Option<PathBuf>,

    /// Nonzero marks a shallow (history-limited) clone.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub history_depth: u32,

    /// Per-checkout flags; never serialized into manifests.
    #[serde(skip)]
    pub local_config: LocalConfig,
}

impl Project {
    /// Minimal project tracking the default remote branch.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            remote: remote.into(),
            remote_branch: default_remote_branch(),
            revision: String::new(),
            gerrit_host: None,
            git_hooks: None,
            history_depth: 0,
            local_config: LocalConfig::default(),
        }
    }

    pub fn key(&self) -> ProjectKey {
        ProjectKey::new(&self.name, &self.remote)
    }

    /// The reference string this project reconciles to: the literal
    /// pinned revision, or the remote-tracking ref of its branch.
    pub fn target_ref(&self) -> String {
        if self.revision.is_empty() {
            format!("refs/remotes/origin/{}", self.remote_branch)
        } else {
            self.revision.clone()
        }
    }

    /// Fill defaults and resolve the path against the workspace root.
    /// A literal `HEAD` revision means "track the branch tip" and is
    /// dropped here so it never survives a round-trip.
    pub fn normalize(&mut self, root: &Path) {
        if self.revision == HEAD_REVISION {
            self.revision.clear();
        }
        if self.remote_branch.is_empty() {
            self.remote_branch = default_remote_branch();
        }
        if self.path.is_relative() {
            self.path = root.join(&self.path);
        }
    }

    fn relativize(&mut self, root: &Path) {
        if let Ok(rel) = self.path.strip_prefix(root) {
            self.path = rel.to_path_buf();
        }
    }
}

/// A manifest hosted in a remote repository, pulled in by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Import {
    /// Path of the manifest file within the remote repository.
    pub manifest: String,

    pub name: String,

    pub remote: String,

    #[serde(
        default = "default_remote_branch",
        skip_serializing_if = "is_default_remote_branch"
    )]
    pub remote_branch: String,

    /// Path prefix applied to every project the import contributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// A manifest on the local filesystem, pulled in by relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalImport {
    /// Relative to the manifest file containing the import.
    pub file: PathBuf,
}

/// A script to run, relative to a named project, after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hook {
    pub name: String,

    /// Script path relative to the project checkout.
    pub action: String,

    pub project: String,
}

impl Hook {
    /// Composite key: two hooks collide only when both name and project
    /// match, later declarations winning.
    pub fn key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.name, self.project)
    }
}

/// A declarative description of desired projects and hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<Import>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_imports: Vec<LocalImport>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<Project>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
}

/// On-disk document: a single `manifest` root element.
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    manifest: Manifest,
}

impl Manifest {
    /// Parse a manifest from its textual form. Paths stay as written;
    /// call [`Manifest::normalize`] to resolve them against a root.
    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        let doc: Document = serde_yaml::from_str(text).map_err(|e| Error::ManifestSyntax {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        let mut manifest = doc.manifest;
        for project in &mut manifest.projects {
            if project.revision == HEAD_REVISION {
                project.revision.clear();
            }
        }
        Ok(manifest)
    }

    /// Serialize to the stable textual form. Assumes paths were already
    /// relativized (or were never absolute).
    pub fn to_text(&self) -> Result<String> {
        let doc = Document {
            manifest: self.clone(),
        };
        Ok(serde_yaml::to_string(&doc)?)
    }

    /// Read a manifest file and resolve project paths under `root`.
    pub fn from_file(path: &Path, root: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut manifest = Self::parse(&text, &path.display().to_string())?;
        manifest.normalize(root);
        Ok(manifest)
    }

    /// Write the manifest to `path`, storing project paths relative to
    /// `root`. Parent directories are created as needed.
    pub fn to_file(&self, path: &Path, root: &Path) -> Result<()> {
        let mut copy = self.clone();
        for project in &mut copy.projects {
            project.relativize(root);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, copy.to_text()?)?;
        Ok(())
    }

    /// Fill defaults and make every project path absolute under `root`.
    pub fn normalize(&mut self, root: &Path) {
        for project in &mut self.projects {
            project.normalize(root);
        }
    }

    /// Index the manifest's own projects by key, later entries winning.
    pub fn project_map(&self) -> Projects {
        self.projects
            .iter()
            .map(|p| (p.key(), p.clone()))
            .collect()
    }
}

fn default_remote_branch() -> String {
    DEFAULT_REMOTE_BRANCH.to_string()
}

fn is_default_remote_branch(branch: &str) -> bool {
    branch == DEFAULT_REMOTE_BRANCH
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> Manifest {
        Manifest {
            imports: vec![
                Import {
                    manifest: "manifest1".into(),
                    name: "remoteimport1".into(),
                    remote: "remote1".into(),
                    remote_branch: "master".into(),
                    root: None,
                },
                Import {
                    manifest: "manifest2".into(),
                    name: "remoteimport2".into(),
                    remote: "remote2".into(),
                    remote_branch: "branch2".into(),
                    root: None,
                },
            ],
            local_imports: vec![LocalImport {
                file: "fileimport".into(),
            }],
            projects: vec![
                Project {
                    gerrit_host: Some("https://test-review.example.com".into()),
                    git_hooks: Some("path/to/githooks".into()),
                    ..Project::new("project1", "path1", "remote1")
                },
                Project {
                    remote_branch: "branch2".into(),
                    revision: "rev2".into(),
                    ..Project::new("project2", "path2", "remote2")
                },
            ],
            hooks: vec![Hook {
                name: "testhook".into(),
                action: "action.sh".into(),
                project: "project1".into(),
            }],
        }
    }

    #[test]
    fn empty_round_trip() {
        let text = Manifest::default().to_text().unwrap();
        let parsed = Manifest::parse(&text, "test").unwrap();
        assert_eq!(parsed, Manifest::default());
    }

    #[test]
    fn full_round_trip() {
        let manifest = sample_manifest();
        let text = manifest.to_text().unwrap();
        let parsed = Manifest::parse(&text, "test").unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn defaults_elided_on_write() {
        let manifest = sample_manifest();
        let text = manifest.to_text().unwrap();
        // project1 tracks master at the branch tip: neither attribute
        // appears in the serialized form.
        assert!(!text.contains("remote_branch: master"));
        assert!(!text.contains("revision: ''"));
        assert!(text.contains("remote_branch: branch2"));
        assert!(text.contains("revision: rev2"));
    }

    #[test]
    fn head_revision_dropped_on_read() {
        let text = "\
manifest:
  projects:
    - name: p
      path: p
      remote: r
      revision: HEAD
";
        let parsed = Manifest::parse(text, "test").unwrap();
        assert_eq!(parsed.projects[0].revision, "");
        // And therefore never written back out.
        assert!(!parsed.to_text().unwrap().contains("revision"));
    }

    #[test]
    fn defaults_supplied_on_read() {
        let text = "\
manifest:
  projects:
    - name: p
      path: sub/p
      remote: https://example.com/p.git
";
        let parsed = Manifest::parse(text, "test").unwrap();
        let p = &parsed.projects[0];
        assert_eq!(p.remote_branch, "master");
        assert_eq!(p.revision, "");
        assert_eq!(p.history_depth, 0);
        assert!(p.gerrit_host.is_none());
    }

    #[test]
    fn syntax_error_reports_origin() {
        let err = Manifest::parse("manifest: [not, a, mapping]", "root.yaml").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("manifest syntax error"));
        assert!(msg.contains("root.yaml"));
    }

    #[test]
    fn paths_relativized_through_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let mut manifest = Manifest {
            projects: vec![Project::new("p", root.join("sub/p"), "remote")],
            ..Manifest::default()
        };
        manifest.normalize(&root);

        let file = root.join("m.yaml");
        manifest.to_file(&file, &root).unwrap();
        let text = fs::read_to_string(&file).unwrap();
        assert!(text.contains("path: sub/p"));

        let read_back = Manifest::from_file(&file, &root).unwrap();
        assert_eq!(read_back.projects[0].path, root.join("sub/p"));
    }

    #[test]
    fn key_distinguishes_remotes() {
        let a = Project::new("p", "x", "remote1");
        let b = Project::new("p", "y", "remote2");
        let c = Project::new("p", "z", "remote1");
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), c.key());
    }

    #[test]
    fn target_ref_prefers_pinned_revision() {
        let mut p = Project::new("p", "x", "remote");
        assert_eq!(p.target_ref(), "refs/remotes/origin/master");
        p.remote_branch = "release".into();
        assert_eq!(p.target_ref(), "refs/remotes/origin/release");
        p.revision = "abc123".into();
        assert_eq!(p.target_ref(), "abc123");
    }

    #[test]
    fn hook_key_is_name_and_project() {
        let h1 = Hook {
            name: "h".into(),
            action: "a.sh".into(),
            project: "p1".into(),
        };
        let h2 = Hook {
            name: "h".into(),
            action: "b.sh".into(),
            project: "p2".into(),
        };
        assert_ne!(h1.key(), h2.key());
    }
}
