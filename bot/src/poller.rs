use crate::telegram::{Message, TelegramClient, Update};
use joblib::types::Requester;
use joblib::{Command, Dispatcher};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tracing::{debug, info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Pull updates until `shutdown` resolves, handing each command to the dispatcher
/// on its own task so slow replies never hold up polling.
pub async fn run(
    client: TelegramClient,
    dispatcher: Arc<Dispatcher<TelegramClient>>,
    username: Option<String>,
    poll_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    let mut offset = None;
    loop {
        let updates = select! {
            _ = &mut shutdown => {
                info!("shutting down update loop");
                return;
            }
            updates = client.get_updates(offset, poll_timeout) => updates,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    if let Some((requester, command)) = route(update, username.as_deref()) {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move { dispatcher.handle(requester, command).await });
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "getUpdates failed, retrying in {:?}", RETRY_DELAY);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Extract who is asking for what. Non-command messages, and commands addressed
/// to a bot other than `username`, are skipped.
fn route(update: Update, username: Option<&str>) -> Option<(Requester, Command)> {
    let Message {
        from, chat, text, ..
    } = update.message?;
    let user = from?.id;
    let command = Command::parse_addressed(text.as_deref()?, username);
    if command.is_none() {
        debug!(user, update_id = update.update_id, "ignoring non-command message");
    }
    Some((
        Requester {
            user,
            chat: chat.id,
        },
        command?,
    ))
}
