//! Test doubles shared by the unit tests.

use crate::delivery::{Messenger, SendError};
use crate::runner::ToolCommand;
use crate::types::ChatId;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Text(ChatId, String),
    File(ChatId, PathBuf),
}

/// Records everything it is asked to send.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    fail_files: bool,
}

impl RecordingMessenger {
    pub fn failing_files() -> Self {
        Self {
            fail_files: true,
            ..Self::default()
        }
    }

    pub fn texts(&self, chat: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|sent| match sent {
                Sent::Text(to, text) if *to == chat => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self, chat: ChatId) -> Vec<PathBuf> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|sent| match sent {
                Sent::File(to, path) if *to == chat => Some(path.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(Sent::Text(chat, text.to_string()));
        Ok(())
    }

    async fn send_file(&self, chat: ChatId, path: &Path) -> Result<(), SendError> {
        if self.fail_files {
            return Err("upload rejected".into());
        }
        // read it like a real transport would
        tokio::fs::metadata(path).await?;
        self.sent
            .lock()
            .unwrap()
            .push(Sent::File(chat, path.to_path_buf()));
        Ok(())
    }
}

/// A chat platform that accepts every call and never answers.
pub struct StallingMessenger;

#[async_trait]
impl Messenger for StallingMessenger {
    async fn send_text(&self, _: ChatId, _: &str) -> Result<(), SendError> {
        std::future::pending().await
    }

    async fn send_file(&self, _: ChatId, _: &Path) -> Result<(), SendError> {
        std::future::pending().await
    }
}

/// A stand-in for the crawl tool: a shell script that receives the real argument
/// template, with `$url` and `$out` pulled out of it before `body` runs.
pub fn fake_tool(body: &str) -> ToolCommand {
    let script = format!(
        r#"url=""
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -s) url="$2"; shift ;;
    -o) out="$2"; shift ;;
  esac
  shift
done
{}
"#,
        body
    );
    ToolCommand::new("sh").arg("-c").arg(script).arg("lncrawl")
}

pub async fn wait_for_file(path: &Path) {
    for _ in 0..250 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{:?} never appeared", path);
}
