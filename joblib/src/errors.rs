use crate::delivery::DeliveryError;
use crate::types::UserId;
use std::{io, path::PathBuf, result};
use thiserror::Error;

/// Reasons a request is turned away before any job exists.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("user {0} already has an active job")]
    AlreadyActive(UserId),
    #[error("user {0} has no active job")]
    NotActive(UserId),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no novel URL given")]
    MissingUrl,
    #[error("`{0}` is not a URL")]
    Malformed(String),
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),
}

/// Terminal failures of an accepted job.
#[derive(Error, Debug)]
pub enum JobFailure {
    #[error("failed to prepare output directory {path:?}: {source}")]
    Workspace { path: PathBuf, source: io::Error },
    #[error("crawl tool `{program}` not found")]
    ToolNotFound { program: String },
    #[error("crawl tool failed (exit code {code:?})")]
    ProcessFailed { code: Option<i32>, stderr: String },
    #[error("job cancelled")]
    Cancelled,
    #[error("no EPUB artifact under {dir:?}")]
    ArtifactMissing { dir: PathBuf },
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

pub type Result<T> = result::Result<T, JobError>;
pub type JobResult = result::Result<PathBuf, JobFailure>;
