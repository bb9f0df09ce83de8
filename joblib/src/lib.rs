pub mod delivery;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod registry;
pub mod runner;
pub mod types;

#[cfg(test)]
mod testing;

pub use delivery::{Messenger, SendLimits};
pub use dispatcher::{Command, Dispatcher, StartedJob, UserState};
pub use events::{Outcome, ProcessResult};
pub use registry::{JobHandle, Registry};
pub use runner::{CancelHandle, CancelRequest, JobRunner, JobSpec, RunningJob, ToolCommand};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_tool, RecordingMessenger};
    use crate::types::Requester;
    use std::sync::Arc;

    #[tokio::test]
    async fn basic() {
        let novels = tempfile::tempdir().expect("tempdir");
        let messenger = Arc::new(RecordingMessenger::default());
        let tool = fake_tool("mkdir -p \"$out/epub\"; printf 'hello world!' > \"$out/epub/novel.epub\"");
        let dispatcher = Dispatcher::new(JobRunner::new(tool), messenger.clone(), novels.path());

        let job = dispatcher
            .start_request(Requester { user: 9, chat: 9 }, Some("https://example.com/novel/1"))
            .expect("job start err");
        let artifact = job.task.await.expect("job task panicked").expect("job failed");

        assert_eq!(std::fs::read_to_string(&artifact).unwrap(), "hello world!");
        assert_eq!(messenger.files(9), [artifact]);
        assert!(dispatcher.registry().is_empty());
    }
}
