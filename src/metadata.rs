//! Per-project persisted state: the project descriptor, the local
//! configuration flags, the two update sentinel files, and the
//! `info/exclude` entry that keeps git from seeing any of it.
//!
//! Layout inside a project checkout:
//!
//! - `.jiri/metadata`: YAML descriptor of the project as last reconciled
//!   (what the scanner reads to recognize a checkout as a project).
//! - `.git/JIRI_HEAD`: the reference string the manifest pinned to.
//! - `.git/JIRI_LAST_BASE`: the commit the working tree was left at.
//! - `.git/jiri.config`: the user-owned local configuration flags.
//! - `.git/info/exclude`: gains a `/.jiri/` line so the descriptor
//!   directory never shows up as untracked.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::manifest::Project;
use crate::workspace::{PROJECT_META_DIR, PROJECT_META_EXCLUDE};

/// File name of the project descriptor inside `.jiri/`.
pub const METADATA_FILE: &str = "metadata";

/// Sentinel naming the reference the manifest pinned to.
pub const JIRI_HEAD_FILE: &str = "JIRI_HEAD";

/// Sentinel naming the commit the last update left the tree at.
pub const JIRI_LAST_BASE_FILE: &str = "JIRI_LAST_BASE";

/// Local configuration file inside the VCS metadata directory.
pub const LOCAL_CONFIG_FILE: &str = "jiri.config";

/// User-owned per-project flags, honored by the engine and never written
/// by it except through [`write_local_config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Freeze the project entirely: never create, move, update, rebase,
    /// or delete it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore: bool,

    /// Fetch into the cache but leave the working tree alone.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_update: bool,

    /// Never rebase local branches, even when their tracking target
    /// advanced.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_rebase: bool,
}

/// The VCS metadata directory of a checkout (`<project>/.git`, following
/// a gitfile indirection if the checkout is a linked worktree).
pub fn git_dir(project_path: &Path) -> PathBuf {
    let dot_git = project_path.join(".git");
    if dot_git.is_file() {
        if let Ok(contents) = fs::read_to_string(&dot_git) {
            if let Some(target) = contents.trim().strip_prefix("gitdir:") {
                let target = Path::new(target.trim());
                return if target.is_absolute() {
                    target.to_path_buf()
                } else {
                    project_path.join(target)
                };
            }
        }
    }
    dot_git
}

/// Directory holding the engine's per-project descriptor.
pub fn meta_dir(project_path: &Path) -> PathBuf {
    project_path.join(PROJECT_META_DIR)
}

/// Path of the project descriptor file, whether or not it exists.
pub fn metadata_file(project_path: &Path) -> PathBuf {
    meta_dir(project_path).join(METADATA_FILE)
}

/// True if `dir` is a project checkout (has a readable descriptor).
pub fn is_project_dir(dir: &Path) -> bool {
    metadata_file(dir).is_file()
}

/// Write the project descriptor, with the path stored relative to the
/// workspace root.
pub fn write_project(project: &Project, root: &Path) -> Result<()> {
    let mut stored = project.clone();
    stored.local_config = LocalConfig::default();
    if let Ok(rel) = stored.path.strip_prefix(root) {
        stored.path = rel.to_path_buf();
    }
    let dir = meta_dir(&project.path);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(METADATA_FILE), serde_yaml::to_string(&stored)?)?;
    Ok(())
}

/// Read the project descriptor of the checkout at `dir`.
///
/// The descriptor's recorded path is advisory; the checkout's actual
/// location on disk is authoritative, so the returned project's path is
/// always `dir` itself. The checkout's local configuration is loaded
/// alongside.
pub fn read_project(dir: &Path) -> Result<Project> {
    let text = fs::read_to_string(metadata_file(dir))?;
    let mut project: Project = serde_yaml::from_str(&text)?;
    project.path = dir.to_path_buf();
    project.local_config = read_local_config(dir)?;
    Ok(project)
}

/// Read the local configuration of the checkout at `project_path`.
/// A missing file means all flags off.
pub fn read_local_config(project_path: &Path) -> Result<LocalConfig> {
    let file = git_dir(project_path).join(LOCAL_CONFIG_FILE);
    if !file.is_file() {
        return Ok(LocalConfig::default());
    }
    let text = fs::read_to_string(file)?;
    Ok(serde_yaml::from_str(&text)?)
}

/// Persist the local configuration of the checkout at `project_path`.
pub fn write_local_config(project_path: &Path, config: &LocalConfig) -> Result<()> {
    let dir = git_dir(project_path);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(LOCAL_CONFIG_FILE), serde_yaml::to_string(config)?)?;
    Ok(())
}

/// Record the outcome of a successful update: the reference the manifest
/// pinned to and the commit the working tree was actually left at.
pub fn write_update_sentinels(project_path: &Path, target_ref: &str, base_rev: &str) -> Result<()> {
    let dir = git_dir(project_path);
    fs::write(dir.join(JIRI_HEAD_FILE), target_ref)?;
    fs::write(dir.join(JIRI_LAST_BASE_FILE), base_rev)?;
    Ok(())
}

/// The reference string the engine last reconciled this checkout to.
pub fn read_head_sentinel(project_path: &Path) -> Result<String> {
    Ok(fs::read_to_string(git_dir(project_path).join(JIRI_HEAD_FILE))?)
}

/// The commit the engine last left this working tree at.
pub fn read_base_sentinel(project_path: &Path) -> Result<String> {
    Ok(fs::read_to_string(
        git_dir(project_path).join(JIRI_LAST_BASE_FILE),
    )?)
}

/// Make sure `.git/info/exclude` lists the engine metadata directory.
/// Idempotent: the entry is appended only when missing, and an exclude
/// file deleted or truncated by the user is restored.
pub fn ensure_metadata_excluded(project_path: &Path) -> Result<()> {
    let info_dir = git_dir(project_path).join("info");
    fs::create_dir_all(&info_dir)?;
    let exclude = info_dir.join("exclude");
    let existing = match fs::read_to_string(&exclude) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing.lines().any(|line| line.trim() == PROJECT_META_EXCLUDE) {
        return Ok(());
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(&exclude)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{PROJECT_META_EXCLUDE}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_checkout(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.join(".git")).unwrap();
        path
    }

    #[test]
    fn local_config_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let checkout = fake_checkout(tmp.path(), "p");

        assert_eq!(read_local_config(&checkout).unwrap(), LocalConfig::default());

        let config = LocalConfig {
            ignore: true,
            ..LocalConfig::default()
        };
        write_local_config(&checkout, &config).unwrap();
        assert_eq!(read_local_config(&checkout).unwrap(), config);

        // Flags left at their defaults are elided from the file.
        let text = fs::read_to_string(git_dir(&checkout).join(LOCAL_CONFIG_FILE)).unwrap();
        assert!(text.contains("ignore"));
        assert!(!text.contains("no_update"));
    }

    #[test]
    fn descriptor_round_trip_uses_disk_location() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let checkout = fake_checkout(root, "some/dir");

        let project = Project::new("p", &checkout, "https://example.com/p.git");
        write_project(&project, root).unwrap();

        // Stored relative, read back as the actual location.
        let text = fs::read_to_string(metadata_file(&checkout)).unwrap();
        assert!(text.contains("path: some/dir"));
        let read = read_project(&checkout).unwrap();
        assert_eq!(read.path, checkout);
        assert_eq!(read.name, "p");
    }

    #[test]
    fn sentinels_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let checkout = fake_checkout(tmp.path(), "p");

        write_update_sentinels(&checkout, "refs/remotes/origin/master", "abc123").unwrap();
        assert_eq!(
            read_head_sentinel(&checkout).unwrap(),
            "refs/remotes/origin/master"
        );
        assert_eq!(read_base_sentinel(&checkout).unwrap(), "abc123");
    }

    #[test]
    fn exclude_entry_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let checkout = fake_checkout(tmp.path(), "p");

        ensure_metadata_excluded(&checkout).unwrap();
        ensure_metadata_excluded(&checkout).unwrap();
        let exclude = git_dir(&checkout).join("info/exclude");
        let text = fs::read_to_string(&exclude).unwrap();
        assert_eq!(text.matches(PROJECT_META_EXCLUDE).count(), 1);

        // A user-truncated exclude file is repaired on the next run.
        fs::write(&exclude, "target/\n").unwrap();
        ensure_metadata_excluded(&checkout).unwrap();
        let text = fs::read_to_string(&exclude).unwrap();
        assert!(text.contains("target/"));
        assert!(text.contains(PROJECT_META_EXCLUDE));
    }

    #[test]
    fn git_dir_follows_gitfile() {
        let tmp = tempfile::tempdir().unwrap();
        let checkout = tmp.path().join("wt");
        fs::create_dir_all(&checkout).unwrap();
        fs::write(checkout.join(".git"), "gitdir: ../real/.git/worktrees/wt\n").unwrap();
        assert_eq!(
            git_dir(&checkout),
            checkout.join("../real/.git/worktrees/wt")
        );
    }
}
