use uuid::Uuid;

pub type Program = String;
pub type Args = Vec<String>;
pub type JobId = Uuid;
pub type UserId = i64;
pub type ChatId = i64;
pub type OutputBlob = bytes::Bytes;

/// Who asked for a job and where replies go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requester {
    pub user: UserId,
    pub chat: ChatId,
}
