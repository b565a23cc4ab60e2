use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("invalid record identifier: {0}")]
    InvalidRecord(String),

    #[error("invalid subject id: {0}")]
    InvalidSubject(String),

    #[error("record set is empty")]
    EmptyRecordSet,

    #[error("missing ingest configuration at {0} (run `kira-ingest init` first)")]
    MissingConfig(PathBuf),

    #[error("ingest configuration already exists at {0} (use --force to overwrite)")]
    ConfigExists(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("git {command} failed: {message}")]
    Vcs { command: String, message: String },

    #[error("HEAD is detached; check out a branch before updating")]
    DetachedHead,

    #[error("cannot switch to {branch}: working tree is dirty")]
    DirtyTree { branch: String },

    #[error("not on branch {expected} (currently on {actual})")]
    WrongBranch { expected: String, actual: String },

    #[error("cannot find fetch tool {0} on the search path")]
    #[diagnostic(help("install the fetch tool or put its directory on PATH"))]
    FetchToolMissing(String),

    #[error("fetch tool failed without producing any file: {0}")]
    FetchFailed(String),

    #[error("fetch tool retrieved no files for {requested} requested record(s)")]
    FetchIncomplete { requested: usize },

    #[error("cannot lay out record {record}: {message}")]
    Layout { record: String, message: String },

    #[error("update cycle {status}: {message}")]
    CycleFailed { status: String, message: String },
}
