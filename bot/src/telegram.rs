//! Minimal Telegram Bot API client: long polling plus the two outbound calls the bot needs.

use async_trait::async_trait;
use joblib::delivery::{Messenger, SendError};
use joblib::types::{ChatId, UserId};
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram rejected {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
    #[error("cannot read attachment: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TelegramError>;

/// Ceiling for ordinary calls. Long polls and uploads set their own.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Serialize)]
struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

/// The bot's own account, from `getMe`.
#[derive(Debug, Deserialize)]
pub struct Me {
    pub username: Option<String>,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    pub async fn get_me(&self) -> Result<Me> {
        let response = self.http.post(self.endpoint("getMe")).send().await?;
        unwrap_response("getMe", response).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let body = GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: &["message"],
        };
        let response = self
            .http
            .post(self.endpoint("getUpdates"))
            // leave the server room to answer before we give up
            .timeout(timeout + Duration::from_secs(10))
            .json(&body)
            .send()
            .await?;
        unwrap_response("getUpdates", response).await
    }

    pub async fn send_message(&self, chat: ChatId, text: &str) -> Result<()> {
        let body = json!({ "chat_id": chat, "text": text });
        let response = self
            .http
            .post(self.endpoint("sendMessage"))
            .json(&body)
            .send()
            .await?;
        unwrap_response::<serde_json::Value>("sendMessage", response).await?;
        Ok(())
    }

    pub async fn send_document(&self, chat: ChatId, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "novel.epub".to_string());
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let document = Part::stream_with_length(Body::from(file), length).file_name(file_name);
        let form = Form::new()
            .text("chat_id", chat.to_string())
            .part("document", document);
        let response = self
            .http
            .post(self.endpoint("sendDocument"))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        unwrap_response::<serde_json::Value>("sendDocument", response).await?;
        Ok(())
    }
}

async fn unwrap_response<T: DeserializeOwned>(
    method: &'static str,
    response: reqwest::Response,
) -> Result<T> {
    let envelope: ApiResponse<T> = response.json().await?;
    match envelope {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse { description, .. } => Err(TelegramError::Api {
            method,
            description: description.unwrap_or_else(|| "no description".to_string()),
        }),
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(&self, chat: ChatId, text: &str) -> std::result::Result<(), SendError> {
        Ok(self.send_message(chat, text).await?)
    }

    async fn send_file(&self, chat: ChatId, path: &Path) -> std::result::Result<(), SendError> {
        Ok(self.send_document(chat, path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_update_batch() {
        let raw = r#"{
            "ok": true,
            "result": [
                {
                    "update_id": 100,
                    "message": {
                        "message_id": 5,
                        "from": {"id": 42, "is_bot": false, "first_name": "A"},
                        "chat": {"id": 4242, "type": "private"},
                        "date": 1700000000,
                        "text": "/crawl https://example.com/novel/1"
                    }
                },
                {"update_id": 101}
            ]
        }"#;
        let envelope: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = envelope.result.unwrap();
        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.from.as_ref().unwrap().id, 42);
        assert_eq!(message.chat.id, 4242);
        assert_eq!(message.text.as_deref(), Some("/crawl https://example.com/novel/1"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn parses_api_error() {
        let raw = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        let envelope: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.description.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn parses_own_username() {
        let raw = r#"{"ok": true, "result": {"id": 7, "is_bot": true, "first_name": "L", "username": "LnCrawlBot"}}"#;
        let envelope: ApiResponse<Me> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.result.unwrap().username.as_deref(), Some("LnCrawlBot"));
    }

    #[tokio::test]
    async fn missing_attachment_fails_before_any_request() {
        // nothing listens on port 9; the file check must fail first
        let client = TelegramClient::new("http://127.0.0.1:9", "123:abc").unwrap();
        let err = client
            .send_document(1, Path::new("/nonexistent/lncrawl-bot/gone.epub"))
            .await
            .unwrap_err();
        assert!(matches!(err, TelegramError::Io(_)));
    }

    #[test]
    fn first_poll_omits_offset() {
        let body = GetUpdates {
            offset: None,
            timeout: 30,
            allowed_updates: &["message"],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"timeout": 30, "allowed_updates": ["message"]})
        );
    }

    #[test]
    fn endpoint_includes_token() {
        let client = TelegramClient::new("https://api.telegram.org/", "123:abc").unwrap();
        assert_eq!(
            client.endpoint("getUpdates"),
            "https://api.telegram.org/bot123:abc/getUpdates"
        );
    }
}
