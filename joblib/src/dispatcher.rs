use crate::delivery::{self, Messenger, SendLimits};
use crate::errors::{self, JobError, JobFailure, JobResult, ValidationError};
use crate::events::Outcome;
use crate::registry::{JobHandle, Registry};
use crate::runner::{CancelHandle, CancelRequest, CancelSignal, JobRunner, JobSpec};
use crate::types::{ChatId, JobId, Requester, UserId};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::{select, task::JoinHandle};
use tracing::{debug, info, info_span, Instrument};
use url::Url;

pub const WELCOME: &str = "Welcome to the LNCrawl bot! Send me a novel URL using /crawl <url>.";
pub const PROCESSING: &str = "Processing your request...";
pub const ALREADY_ACTIVE: &str = "You already have a crawl task in progress. Please wait for it to finish or cancel it using /cancel.";
pub const MISSING_URL: &str = "Please provide a novel URL after the /crawl command.";
pub const INVALID_URL: &str = "Invalid URL format. Please provide a valid URL.";
pub const CANCELLING: &str = "Cancelling your crawl task...";
pub const ALREADY_CANCELLING: &str = "Your crawl task is already being cancelled.";
pub const ALREADY_FINISHED: &str = "Your crawl task has already finished.";
pub const NOTHING_TO_CANCEL: &str = "You don't have any ongoing tasks to cancel.";
pub const WORKSPACE_FAILED: &str = "Error: could not prepare a folder for your novel.";

const SCHEMES: [&str; 2] = ["http", "https"];

/// A bot command, as typed by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Crawl(Option<String>),
    Cancel,
}

impl Command {
    /// Parse `/name[@bot] [args..]` without knowing our own username, so any
    /// `@bot` suffix is accepted. Anything that is not one of our commands is `None`.
    pub fn parse(text: &str) -> Option<Self> {
        Self::parse_addressed(text, None)
    }

    /// Like [`Command::parse`], but a command addressed to some other bot
    /// (`/crawl@OtherBot`) is `None`. Usernames compare case-insensitively.
    pub fn parse_addressed(text: &str, username: Option<&str>) -> Option<Self> {
        let mut words = text.split_whitespace();
        let head = words.next()?.strip_prefix('/')?;
        let (name, addressee) = match head.split_once('@') {
            Some((name, addressee)) => (name, Some(addressee)),
            None => (head, None),
        };
        if let (Some(addressee), Some(username)) = (addressee, username) {
            if !addressee.eq_ignore_ascii_case(username.trim_start_matches('@')) {
                return None;
            }
        }
        match name {
            "start" => Some(Command::Start),
            "crawl" => Some(Command::Crawl(words.next().map(str::to_string))),
            "cancel" => Some(Command::Cancel),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserState {
    Idle,
    Running,
    Cancelling,
}

/// An accepted job. Dropping it detaches the job, it keeps running.
#[derive(Debug)]
pub struct StartedJob {
    pub job_id: JobId,
    pub task: JoinHandle<JobResult>,
}

/// Accept a `/crawl` argument only if it is an absolute http(s) URL with a host.
pub fn validate_url(raw: Option<&str>) -> Result<Url, ValidationError> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty());
    let raw = raw.ok_or(ValidationError::MissingUrl)?;
    let url = Url::parse(raw).map_err(|_| ValidationError::Malformed(raw.to_string()))?;
    if !SCHEMES.contains(&url.scheme()) {
        return Err(ValidationError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        return Err(ValidationError::Malformed(raw.to_string()));
    }
    Ok(url)
}

/// Handles commands for every user: validates, guards with the registry, starts and
/// cancels jobs. Each accepted job runs in its own task.
pub struct Dispatcher<M> {
    registry: Arc<Registry>,
    runner: JobRunner,
    messenger: Arc<M>,
    limits: SendLimits,
    novels_dir: PathBuf,
}

impl<M: Messenger> Dispatcher<M> {
    pub fn new(runner: JobRunner, messenger: Arc<M>, novels_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            runner,
            messenger,
            limits: SendLimits::default(),
            novels_dir: novels_dir.into(),
        }
    }

    /// Bound every reply and upload this dispatcher makes.
    pub fn with_send_limits(mut self, limits: SendLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Per-user working directory. Never shared between users.
    pub fn output_dir(&self, user: UserId) -> PathBuf {
        self.novels_dir.join(user.to_string())
    }

    pub fn state(&self, user: UserId) -> UserState {
        match self.registry.get(user) {
            None => UserState::Idle,
            Some(handle) if handle.cancel.is_requested() => UserState::Cancelling,
            Some(_) => UserState::Running,
        }
    }

    /// Reply to one inbound command.
    pub async fn handle(&self, requester: Requester, command: Command) {
        debug!(user = requester.user, ?command, "command received");
        let reply = match command {
            Command::Start => WELCOME,
            Command::Crawl(url) => match self.start_request(requester, url.as_deref()) {
                // the job task says "processing" itself, ahead of its outcome
                Ok(_) => return,
                Err(err) => rejection(&err),
            },
            Command::Cancel => match self.cancel_request(requester.user) {
                Ok(CancelRequest::Requested) => CANCELLING,
                Ok(CancelRequest::AlreadyRequested) => ALREADY_CANCELLING,
                Ok(CancelRequest::Finished) => ALREADY_FINISHED,
                Err(err) => rejection(&err),
            },
        };
        delivery::notify(&*self.messenger, self.limits, requester.chat, reply).await;
    }

    /// Validate, claim the user's registry slot and launch the job.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_request(&self, requester: Requester, url: Option<&str>) -> errors::Result<StartedJob> {
        let Requester { user, chat } = requester;
        let url = validate_url(url)?;
        let job_id = uuid::Uuid::new_v4();
        let (cancel, signal) = CancelHandle::pair();
        let handle = JobHandle {
            job_id,
            user,
            url,
            output_dir: self.output_dir(user),
            cancel,
        };
        let spec = JobSpec {
            job_id,
            url: handle.url.clone(),
            output_dir: handle.output_dir.clone(),
        };

        if !self.registry.try_register(handle) {
            debug!(user, "start refused, job already active");
            return Err(JobError::AlreadyActive(user));
        }
        let registration = Registration {
            registry: self.registry.clone(),
            user,
        };
        info!(user, %job_id, url = %spec.url, "crawl job accepted");

        let runner = self.runner.clone();
        let messenger = self.messenger.clone();
        let limits = self.limits;
        let span = info_span!("job", user, %job_id);
        let task = tokio::spawn(
            async move {
                let _registration = registration;
                let result = run_job(&runner, &*messenger, limits, chat, spec, signal).await;
                match &result {
                    Ok(path) => info!(?path, "job finished"),
                    Err(failure) => info!(%failure, "job ended"),
                }
                result
            }
            .instrument(span),
        );
        Ok(StartedJob { job_id, task })
    }

    /// Ask the user's job to stop. Returns once the request is acknowledged; the job
    /// leaves the registry when its supervisor observes the termination.
    pub fn cancel_request(&self, user: UserId) -> errors::Result<CancelRequest> {
        let handle = self.registry.get(user).ok_or(JobError::NotActive(user))?;
        let request = handle.cancel.cancel();
        info!(user, job_id = %handle.job_id, ?request, "cancel requested");
        Ok(request)
    }
}

async fn run_job<M>(
    runner: &JobRunner,
    messenger: &M,
    limits: SendLimits,
    chat: ChatId,
    spec: JobSpec,
    mut signal: CancelSignal,
) -> JobResult
where
    M: Messenger + ?Sized,
{
    // nothing is spawned yet, so a cancel may cut the first reply short
    let prepared = select! {
        biased;
        _ = signal.requested() => None,
        prepared = async {
            delivery::notify(messenger, limits, chat, PROCESSING).await;
            prepare_output_dir(&spec).await
        } => Some(prepared),
    };

    let outcome = match prepared {
        None => {
            info!("job cancelled before launch");
            Outcome::Cancelled
        }
        Some(Err(source)) => {
            delivery::notify(messenger, limits, chat, WORKSPACE_FAILED).await;
            return Err(JobFailure::Workspace {
                path: spec.output_dir,
                source,
            });
        }
        Some(Ok(())) => runner.start(&spec, signal).await_completion().await,
    };
    delivery::report(messenger, limits, chat, &spec.output_dir, outcome).await
}

// a previous job's book must not be mistaken for this one's
async fn prepare_output_dir(spec: &JobSpec) -> io::Result<()> {
    tokio::fs::create_dir_all(&spec.output_dir).await?;
    match tokio::fs::remove_dir_all(delivery::artifact_dir(&spec.output_dir)).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn rejection(err: &JobError) -> &'static str {
    match err {
        JobError::Invalid(ValidationError::MissingUrl) => MISSING_URL,
        JobError::Invalid(_) => INVALID_URL,
        JobError::AlreadyActive(_) => ALREADY_ACTIVE,
        JobError::NotActive(_) => NOTHING_TO_CANCEL,
    }
}

/// Holds a user's registry slot for the lifetime of their job task. Dropping it,
/// on any path out of the task including a panic, releases the slot.
struct Registration {
    registry: Arc<Registry>,
    user: UserId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.user);
        debug!(user = self.user, "registry slot released");
    }
}
