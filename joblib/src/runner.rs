mod cancel;
mod supervisor;

pub use cancel::{CancelHandle, CancelRequest, CancelSignal};

use crate::events::Outcome;
use crate::types::{Args, JobId, Program};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::{process, task::JoinHandle};
use tracing::{error, info, warn};
use url::Url;

/// The single packaged format the crawl tool is asked for. It doubles as the
/// name of the subfolder the tool writes into.
pub const OUTPUT_FORMAT: &str = "epub";

pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(10);

/// How to invoke the crawl tool. `leading_args` go before the fixed argument template,
/// e.g. `python` with `["lncrawl"]` to run it as a module directory.
#[derive(Clone, Debug)]
pub struct ToolCommand {
    program: Program,
    leading_args: Args,
}

impl ToolCommand {
    pub fn new(program: impl Into<Program>) -> Self {
        Self {
            program: program.into(),
            leading_args: Args::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for ToolCommand {
    fn default() -> Self {
        Self::new("lncrawl")
    }
}

/// One crawl to perform.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub job_id: JobId,
    pub url: Url,
    pub output_dir: PathBuf,
}

/// Launches and supervises crawl tool processes.
#[derive(Clone, Debug)]
pub struct JobRunner {
    tool: ToolCommand,
    grace: Duration,
}

/// A job whose process is (or was) running under a supervisor task.
#[derive(Debug)]
pub struct RunningJob {
    job_id: JobId,
    supervisor: JoinHandle<Outcome>,
}

impl JobRunner {
    pub fn new(tool: ToolCommand) -> Self {
        Self {
            tool,
            grace: DEFAULT_TERMINATION_GRACE,
        }
    }

    /// How long a terminated tool gets to exit before it is killed outright.
    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Full argument list: leading args, then the fixed non-interactive template.
    pub fn arguments(&self, spec: &JobSpec) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.tool.leading_args.iter().map(OsString::from).collect();
        let template = [
            "--bot",
            "console",
            "-s",
            spec.url.as_str(),
            "--suppress",
            "--close-directly",
            "--all",
            "--single",
            "-f",
            "--format",
            OUTPUT_FORMAT,
            "-o",
        ];
        args.extend(template.into_iter().map(OsString::from));
        args.push(spec.output_dir.clone().into_os_string());
        args
    }

    /// Spawn the tool for `spec` and hand it to a supervisor task.
    ///
    /// Must be called from within a tokio runtime. Launch failures do not surface here;
    /// they become the job's outcome so every job ends through `await_completion`.
    pub fn start(&self, spec: &JobSpec, mut cancel: CancelSignal) -> RunningJob {
        let job_id = spec.job_id;
        if cancel.is_requested() {
            info!(%job_id, "job cancelled before launch");
            return RunningJob::finished(job_id, Outcome::Cancelled);
        }

        let mut command = process::Command::new(&self.tool.program);
        command
            .args(self.arguments(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // own process group, so a cancel reaches everything the tool forks
            .process_group(0)
            .kill_on_drop(true);

        match command.spawn() {
            Ok(child) => {
                info!(%job_id, pid = ?child.id(), url = %spec.url, "crawl tool started");
                let supervisor =
                    tokio::spawn(supervisor::supervise(job_id, child, cancel, self.grace));
                RunningJob { job_id, supervisor }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(%job_id, program = %self.tool.program, "crawl tool not found");
                RunningJob::finished(
                    job_id,
                    Outcome::ToolNotFound {
                        program: self.tool.program.clone(),
                    },
                )
            }
            Err(err) => {
                error!(%job_id, program = %self.tool.program, error = %err, "failed to launch crawl tool");
                RunningJob::finished(
                    job_id,
                    Outcome::ProcessFailed {
                        code: None,
                        signal: None,
                        stderr: err.to_string(),
                    },
                )
            }
        }
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(ToolCommand::default())
    }
}

impl RunningJob {
    fn finished(job_id: JobId, outcome: Outcome) -> Self {
        Self {
            job_id,
            supervisor: tokio::spawn(async move { outcome }),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the job's terminal outcome. This is the only suspending step of a job.
    pub async fn await_completion(self) -> Outcome {
        match self.supervisor.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(job_id = %self.job_id, error = %err, "job supervisor died");
                Outcome::ProcessFailed {
                    code: None,
                    signal: None,
                    stderr: format!("supervisor task failed: {}", err),
                }
            }
        }
    }
}
