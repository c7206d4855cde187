//! Shared test fixtures for the integration suite.
//!
//! `FakeWorkspace` builds a complete universe on disk: a workspace root
//! with a root manifest, plus a set of real git repositories standing in
//! for remotes. Tests edit the manifest and the remotes, run the engine,
//! and assert on the resulting checkouts.
//!
//! Everything here drives a real `git` binary; tests call
//! [`require_git`] first and skip themselves gracefully on machines
//! without one.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use jiri::error::Result;
use jiri::executor::UpdateOptions;
use jiri::git::Git;
use jiri::manifest::{Hook, Manifest, Project};
use jiri::update::update_universe;
use jiri::vcs::GitVcs;
use jiri::workspace::Workspace;

/// True when a usable `git` is on PATH. Callers return early otherwise.
pub fn require_git() -> bool {
    let found = Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !found {
        eprintln!("skipping: git binary not found on PATH");
    }
    found
}

/// Run git in `dir`, panicking with full output on failure. Identity and
/// signing are pinned so commits work in bare CI environments.
pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=Test User",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .output()
        .expect("failed to spawn git");
    assert!(
        output.status.success(),
        "git {:?} in {} failed:\n{}\n{}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );
}

/// Commit `content` to `file` inside `dir`.
pub fn commit_file(dir: &Path, file: &str, content: &str) {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "--quiet", "-m", &format!("add {file}")]);
}

/// Commit a README with the given content (the canonical test payload).
pub fn write_readme(dir: &Path, content: &str) {
    commit_file(dir, "README", content);
}

pub fn read_readme(project_path: &Path) -> String {
    fs::read_to_string(project_path.join("README"))
        .unwrap_or_else(|e| panic!("no README in {}: {e}", project_path.display()))
}

pub fn current_revision(dir: &Path) -> String {
    Git::new(dir).current_revision().unwrap()
}

/// A workspace plus the fake remotes its manifest points at.
pub struct FakeWorkspace {
    _tmp: TempDir,
    pub ws: Workspace,
    remotes_dir: PathBuf,
    pub remotes: BTreeMap<String, PathBuf>,
}

impl FakeWorkspace {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("workspace");
        let remotes_dir = tmp.path().join("remotes");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&remotes_dir).unwrap();

        let manifest = Manifest::default();
        let ws = Workspace::new(&root).unwrap().with_jobs(4);
        manifest
            .to_file(&ws.root_manifest_file(), ws.root())
            .unwrap();

        Self {
            _tmp: tmp,
            ws,
            remotes_dir,
            remotes: BTreeMap::new(),
        }
    }

    /// Create a fake remote: a real repository with one initial commit
    /// on `master`.
    pub fn create_remote_project(&mut self, name: &str) -> PathBuf {
        let dir = self.remotes_dir.join(name);
        fs::create_dir_all(&dir).unwrap();
        git(&dir, &["init", "--quiet"]);
        git(&dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        git(&dir, &["commit", "--quiet", "--allow-empty", "-m", "init"]);
        self.remotes.insert(name.to_string(), dir.clone());
        dir
    }

    pub fn remote(&self, name: &str) -> &Path {
        &self.remotes[name]
    }

    pub fn read_manifest(&self) -> Manifest {
        Manifest::from_file(&self.ws.root_manifest_file(), self.ws.root()).unwrap()
    }

    pub fn write_manifest(&self, manifest: &Manifest) {
        manifest
            .to_file(&self.ws.root_manifest_file(), self.ws.root())
            .unwrap();
    }

    pub fn add_project(&self, project: Project) {
        let mut manifest = self.read_manifest();
        manifest.projects.push(project);
        self.write_manifest(&manifest);
    }

    pub fn add_hook(&self, hook: Hook) {
        let mut manifest = self.read_manifest();
        manifest.hooks.push(hook);
        self.write_manifest(&manifest);
    }

    /// Edit the manifest entry for `name` in place.
    pub fn edit_project(&self, name: &str, edit: impl FnOnce(&mut Project)) {
        let mut manifest = self.read_manifest();
        let project = manifest
            .projects
            .iter_mut()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("no project {name} in manifest"));
        edit(project);
        self.write_manifest(&manifest);
    }

    /// Drop manifest entries by name.
    pub fn remove_projects(&self, names: &[&str]) {
        let mut manifest = self.read_manifest();
        manifest.projects.retain(|p| !names.contains(&p.name.as_str()));
        self.write_manifest(&manifest);
    }

    pub fn update(&self, gc: bool) -> Result<Vec<String>> {
        self.update_with(&UpdateOptions {
            gc,
            ..UpdateOptions::default()
        })
    }

    pub fn update_with(&self, opts: &UpdateOptions) -> Result<Vec<String>> {
        update_universe(&self.ws, Arc::new(GitVcs), opts)
    }
}

/// The canonical seven-project universe: every remote carries a README
/// saying "initial readme"; projects 3, 4, 5 nest under 2 (4 under 3),
/// 6 nests under 0, and project 2 is history-limited.
pub fn setup_universe() -> (Vec<Project>, FakeWorkspace) {
    let mut fake = FakeWorkspace::new();

    let mut projects = Vec::new();
    for i in 0..7 {
        let name = format!("project-{i}");
        let remote = fake.create_remote_project(&name);
        projects.push(Project::new(
            name,
            fake.ws.root().join(format!("path-{i}")),
            remote.to_string_lossy().into_owned(),
        ));
    }
    projects[2].history_depth = 1;
    projects[3].path = projects[2].path.join("path-3");
    projects[4].path = projects[3].path.join("path-4");
    projects[5].path = projects[2].path.join("path-5");
    projects[6].path = projects[0].path.join("path-6");

    for project in &projects {
        fake.add_project(project.clone());
    }

    // Initial content, plus gitignore entries so nested checkouts do not
    // read as untracked files of their hosts.
    for remote in fake.remotes.values() {
        write_readme(remote, "initial readme");
    }
    commit_file(fake.remote("project-2"), ".gitignore", "path-3/\npath-5/\n");
    commit_file(fake.remote("project-0"), ".gitignore", "path-6/\n");
    commit_file(fake.remote("project-3"), ".gitignore", "path-4/\n");

    (projects, fake)
}
