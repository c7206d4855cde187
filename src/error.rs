//! Error handling types for the jiri engine.

use thiserror::Error;

/// Main error type for jiri operations.
///
/// Load-time errors (`ManifestSyntax`, `ImportCycle`, `ImportFetch`,
/// `InvalidHook`, `ProjectPathConflict`) abort a run before any mutation.
/// Per-project errors are collected by the executor and surface in
/// aggregate as `PartialUpdate`; a rebase conflict is a non-fatal tag on
/// the affected project and never fails the run by itself.
#[derive(Error, Debug)]
pub enum Error {
    #[error("manifest syntax error in {path}: {message}")]
    ManifestSyntax { path: String, message: String },

    #[error("import cycle detected in {kind}: {cycle}")]
    ImportCycle { kind: String, cycle: String },

    #[error("failed to fetch import {name} from {remote}: {message}")]
    ImportFetch {
        name: String,
        remote: String,
        message: String,
    },

    #[error("invalid hook {name:?}: project {project:?} is not in the manifest")]
    InvalidHook { name: String, project: String },

    #[error("duplicate project path {path}: projects {first} and {second}")]
    ProjectPathConflict {
        path: String,
        first: String,
        second: String,
    },

    #[error("git command failed: git {command} - {stderr}")]
    Git { command: String, stderr: String },

    #[error("rebase of branch {branch:?} in {project} hit conflicts; rebase aborted, branch left unchanged")]
    RebaseConflict { project: String, branch: String },

    #[error("hook {name:?} failed: {message}")]
    HookFailure { name: String, message: String },

    #[error("{failed} of {total} projects failed to update:\n{details}")]
    PartialUpdate {
        failed: usize,
        total: usize,
        details: String,
    },

    #[error("project {name:?} not found on disk at {path}")]
    ProjectNotFound { name: String, path: String },

    #[error("cannot move project {name:?}: {message}")]
    MoveConflict { name: String, message: String },

    #[error("no workspace root found: no {0} in this directory or any parent")]
    NoWorkspaceRoot(String),

    #[error("snapshot error: {message}")]
    Snapshot { message: String },

    #[error("lock poisoned: {context}")]
    LockPoisoned { context: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for jiri operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that mark a single project as failed without
    /// aborting the rest of the run.
    pub fn is_per_project(&self) -> bool {
        matches!(self, Error::RebaseConflict { .. })
    }
}
