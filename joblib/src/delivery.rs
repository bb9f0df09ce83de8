use crate::errors::{JobFailure, JobResult};
use crate::events::Outcome;
use crate::runner::OUTPUT_FORMAT;
use crate::types::ChatId;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use tracing::{debug, info, warn};

pub type SendError = Box<dyn StdError + Send + Sync>;

/// Outbound side of the chat platform.
#[async_trait]
pub trait Messenger: Send + Sync + 'static {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<(), SendError>;

    async fn send_file(&self, chat: ChatId, path: &Path) -> Result<(), SendError>;
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to send {path:?}: {source}")]
    Send {
        path: PathBuf,
        #[source]
        source: SendError,
    },
    #[error("sending {path:?} did not finish within {after:?}")]
    TimedOut { path: PathBuf, after: Duration },
}

/// Upper bounds on a single outbound call. A messenger that stops answering
/// must not keep a job, and with it the user's slot, alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendLimits {
    pub text: Duration,
    pub file: Duration,
}

impl Default for SendLimits {
    fn default() -> Self {
        Self {
            text: Duration::from_secs(60),
            file: Duration::from_secs(10 * 60),
        }
    }
}

pub const CRAWLED: &str = "The novel has been successfully crawled and saved in EPUB format.";
pub const NO_ARTIFACT: &str = "No EPUB file found in the 'epub' folder.";
pub const TOOL_NOT_FOUND: &str = "Error: 'lncrawl' is not installed or not found in the system PATH.";
pub const CANCELLED: &str = "The crawling task was cancelled.";
pub const SEND_FAILED: &str = "The novel was crawled, but sending the EPUB file failed.";

/// Folder the crawl tool writes the packaged novel into.
pub fn artifact_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(OUTPUT_FORMAT)
}

/// First `.epub` file, by name, directly inside the artifact folder.
pub async fn locate_artifact(output_dir: &Path) -> Option<PathBuf> {
    let dir = artifact_dir(output_dir);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(?dir, error = %err, "cannot read artifact folder");
            }
            return None;
        }
    };

    let mut found = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                let is_epub = path.extension().map_or(false, |ext| ext == OUTPUT_FORMAT);
                if is_epub && tokio::fs::metadata(&path).await.map_or(false, |m| m.is_file()) {
                    found.push(path);
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(?dir, error = %err, "error while listing artifact folder");
                break;
            }
        }
    }
    found.sort();
    found.into_iter().next()
}

/// Send the artifact at `path` to `chat`, giving up after `limits.file`.
pub async fn deliver<M>(
    messenger: &M,
    limits: SendLimits,
    chat: ChatId,
    path: &Path,
) -> Result<(), DeliveryError>
where
    M: Messenger + ?Sized,
{
    match time::timeout(limits.file, messenger.send_file(chat, path)).await {
        Ok(sent) => sent.map_err(|source| DeliveryError::Send {
            path: path.to_path_buf(),
            source,
        }),
        Err(_) => Err(DeliveryError::TimedOut {
            path: path.to_path_buf(),
            after: limits.file,
        }),
    }
}

/// Best-effort text reply. A chat that cannot be reached, or does not answer
/// within `limits.text`, only gets logged.
pub async fn notify<M>(messenger: &M, limits: SendLimits, chat: ChatId, text: &str)
where
    M: Messenger + ?Sized,
{
    match time::timeout(limits.text, messenger.send_text(chat, text)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(chat, error = %err, "failed to send reply"),
        Err(_) => warn!(chat, after = ?limits.text, "reply timed out"),
    }
}

/// Turn a terminal outcome into what the requester sees, and into the job's result.
pub async fn report<M>(
    messenger: &M,
    limits: SendLimits,
    chat: ChatId,
    output_dir: &Path,
    outcome: Outcome,
) -> JobResult
where
    M: Messenger + ?Sized,
{
    match outcome {
        Outcome::Succeeded(mut result) => {
            debug!(stdout = %result.stdout_lossy(), stderr = %result.stderr_lossy(), "crawl tool output");
            notify(messenger, limits, chat, CRAWLED).await;

            result.artifact = locate_artifact(output_dir).await;
            let Some(path) = result.artifact else {
                warn!(?output_dir, "crawl tool succeeded without an artifact");
                notify(messenger, limits, chat, NO_ARTIFACT).await;
                return Err(JobFailure::ArtifactMissing {
                    dir: artifact_dir(output_dir),
                });
            };

            match deliver(messenger, limits, chat, &path).await {
                Ok(()) => {
                    info!(?path, "novel delivered");
                    Ok(path)
                }
                Err(err) => {
                    warn!(error = %err, "delivery failed");
                    notify(messenger, limits, chat, SEND_FAILED).await;
                    Err(err.into())
                }
            }
        }
        Outcome::ProcessFailed {
            code,
            signal,
            stderr,
        } => {
            warn!(?code, ?signal, %stderr, "crawl tool failed");
            notify(messenger, limits, chat, &failure_message(code, signal, &stderr)).await;
            Err(JobFailure::ProcessFailed { code, stderr })
        }
        Outcome::ToolNotFound { program } => {
            notify(messenger, limits, chat, TOOL_NOT_FOUND).await;
            Err(JobFailure::ToolNotFound { program })
        }
        Outcome::Cancelled => {
            notify(messenger, limits, chat, CANCELLED).await;
            Err(JobFailure::Cancelled)
        }
    }
}

fn failure_message(code: Option<i32>, signal: Option<i32>, stderr: &str) -> String {
    let mut message = match (code, signal) {
        (Some(code), _) => format!("Error: Command failed with return code {}", code),
        (None, Some(signal)) => format!("Error: Command was terminated by signal {}", signal),
        (None, None) => "Error: Command could not be run".to_string(),
    };
    if let Some(last) = stderr.lines().rev().find(|line| !line.trim().is_empty()) {
        message.push('\n');
        message.push_str(last.trim());
    }
    message
}
