use crate::types::OutputBlob;
use std::path::PathBuf;

/// What the crawl tool left behind after a clean run.
#[derive(Clone, Debug, Default)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: OutputBlob,
    pub stderr: OutputBlob,
    pub artifact: Option<PathBuf>,
}

impl ProcessResult {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Terminal state of a supervised job. Exactly one is produced per job.
#[derive(Clone, Debug)]
pub enum Outcome {
    Succeeded(ProcessResult),
    /// Non-zero exit, death by a signal nobody asked for, or a launch error
    /// other than a missing executable. `code` is `None` when there is no exit code.
    ProcessFailed {
        code: Option<i32>,
        signal: Option<i32>,
        stderr: String,
    },
    ToolNotFound {
        program: String,
    },
    Cancelled,
}

impl Outcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}
