//! Telegram Bot API client.
//!
//! Hand-rolled over `reqwest` so the bridge controls the retry ladder, the
//! connection-pool discipline and multipart uploads directly. All text and
//! captions go through the HTML contract in [`html`].
//!
//! Retry policy: transient network errors back off `base * 2^attempt`; pool
//! exhaustion backs off `base * 3^attempt` and discards the connection pool
//! before the next attempt; flood control sleeps a fixed 60 s (or the
//! server-provided `retry_after`); parameter errors fail immediately.
//! Four attempts total, then the original error propagates.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub mod html;
pub mod types;

pub use types::*;

/// Base URL for the Telegram Bot API.
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Total attempts before the original error propagates.
const MAX_ATTEMPTS: u32 = 4;

/// Base backoff delay in milliseconds.
const RETRY_BASE_MS: u64 = 1_000;

/// Fixed cooldown for flood control.
const FLOOD_COOLDOWN_SECS: u64 = 60;

/// Shared pool size across the bridge.
const POOL_SIZE: usize = 30;

/// Read/write timeout for Bot API operations.
const RW_TIMEOUT_SECS: u64 = 45;

/// Connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Idle-connection keepalive, standing in for the pool-wait budget.
const POOL_IDLE_TIMEOUT_SECS: u64 = 60;

/// Bot API client errors.
#[derive(Debug, Error)]
pub enum BotApiError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The API answered `ok:false`.
    #[error("Telegram API error {code}: {description}")]
    Api {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },
    /// Response body did not decode.
    #[error("unexpected Bot API response: {0}")]
    Parse(String),
    /// Local I/O while preparing an upload.
    #[error("upload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    RetryNetwork,
    RetryPoolExhausted,
    RetryFlood,
    Fatal,
}

impl BotApiError {
    fn disposition(&self) -> Disposition {
        match self {
            BotApiError::Http(e) => {
                let text = e.to_string().to_lowercase();
                if text.contains("pool timeout") || text.contains("connection pool") {
                    Disposition::RetryPoolExhausted
                } else if e.is_connect() || e.is_timeout() || e.is_request() {
                    Disposition::RetryNetwork
                } else {
                    Disposition::Fatal
                }
            }
            BotApiError::Api {
                code, description, ..
            } => {
                let text = description.to_lowercase();
                if *code == 429 || text.contains("flood control") || text.contains("too many requests")
                {
                    Disposition::RetryFlood
                } else {
                    Disposition::Fatal
                }
            }
            BotApiError::Parse(_) | BotApiError::Io(_) => Disposition::Fatal,
        }
    }

    /// True when the target chat is gone (deleted, deactivated, or the bot
    /// was removed) — the trigger for mirror re-provisioning.
    pub fn is_chat_gone(&self) -> bool {
        match self {
            BotApiError::Api { description, .. } => {
                let text = description.to_lowercase();
                text.contains("chat not found")
                    || text.contains("group chat was deleted")
                    || text.contains("group chat was deactivated")
                    || text.contains("bot was kicked")
                    || text.contains("not a member")
            }
            _ => false,
        }
    }
}

/// A file argument for upload-bearing methods.
#[derive(Debug, Clone)]
pub enum InputFile {
    /// Local file, read at send time.
    Path(PathBuf),
    /// In-memory bytes with a filename.
    Bytes { name: String, bytes: Vec<u8> },
    /// Remote URL, passed through to Telegram.
    Url(String),
    /// Re-send by Telegram file id.
    FileId(String),
}

impl InputFile {
    fn as_inline(&self) -> Option<&str> {
        match self {
            InputFile::Url(s) | InputFile::FileId(s) => Some(s),
            _ => None,
        }
    }
}

fn build_http() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_SIZE)
        .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
        .timeout(Duration::from_secs(RW_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build Bot API client with pool settings, using default");
            reqwest::Client::new()
        })
}

/// Bot API client. Cloning shares the token and the swappable pool.
#[derive(Clone)]
pub struct BotClient {
    token: String,
    http: Arc<RwLock<reqwest::Client>>,
}

impl BotClient {
    /// Create a client for `token`.
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_owned(),
            http: Arc::new(RwLock::new(build_http())),
        }
    }

    fn http(&self) -> reqwest::Client {
        self.http
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|_| build_http())
    }

    /// Discard the connection pool; the next attempt starts clean.
    fn recreate_pool(&self) {
        if let Ok(mut slot) = self.http.write() {
            *slot = build_http();
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{TELEGRAM_API_BASE}/bot{}/{method}", self.token)
    }

    // ── Core invocation with retry ──────────────────────────────

    async fn invoke<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        file: Option<(&str, &InputFile)>,
        request_timeout: Option<Duration>,
    ) -> Result<T, BotApiError> {
        let mut last_err: Option<BotApiError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            match self.attempt(method, &params, file, request_timeout).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let disposition = e.disposition();
                    match disposition {
                        Disposition::Fatal => return Err(e),
                        Disposition::RetryNetwork => {
                            let wait = RETRY_BASE_MS.saturating_mul(2_u64.saturating_pow(attempt));
                            warn!(method, attempt, wait_ms = wait, error = %e, "network error, backing off");
                            tokio::time::sleep(Duration::from_millis(wait)).await;
                        }
                        Disposition::RetryPoolExhausted => {
                            let wait = RETRY_BASE_MS.saturating_mul(3_u64.saturating_pow(attempt));
                            warn!(method, attempt, wait_ms = wait, "pool exhausted, discarding connections");
                            self.recreate_pool();
                            tokio::time::sleep(Duration::from_millis(wait)).await;
                        }
                        Disposition::RetryFlood => {
                            let wait = match &e {
                                BotApiError::Api {
                                    retry_after: Some(s),
                                    ..
                                } => *s,
                                _ => FLOOD_COOLDOWN_SECS,
                            };
                            warn!(method, wait_secs = wait, "flood control, cooling down");
                            tokio::time::sleep(Duration::from_secs(wait)).await;
                        }
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| BotApiError::Parse("no attempt was made".to_owned())))
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
        file: Option<(&str, &InputFile)>,
        request_timeout: Option<Duration>,
    ) -> Result<T, BotApiError> {
        let url = self.method_url(method);
        let client = self.http();
        let mut req = client.post(&url);
        if let Some(timeout) = request_timeout {
            req = req.timeout(timeout);
        }

        let needs_multipart = matches!(
            file,
            Some((_, InputFile::Path(_))) | Some((_, InputFile::Bytes { .. }))
        );

        if needs_multipart {
            let (field, input) = file.expect("checked above");
            let mut form = reqwest::multipart::Form::new();
            if let Some(map) = params.as_object() {
                for (key, value) in map {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    form = form.text(key.clone(), text);
                }
            }
            let part = match input {
                InputFile::Path(path) => {
                    let bytes = tokio::fs::read(path).await?;
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "file".to_owned());
                    reqwest::multipart::Part::bytes(bytes).file_name(name)
                }
                InputFile::Bytes { name, bytes } => {
                    reqwest::multipart::Part::bytes(bytes.clone()).file_name(name.clone())
                }
                _ => return Err(BotApiError::Parse("inline file in multipart path".to_owned())),
            };
            form = form.part(field.to_owned(), part);
            req = req.multipart(form);
        } else {
            let mut body = params.clone();
            if let (Some((field, input)), Some(map)) = (file, body.as_object_mut()) {
                if let Some(inline) = input.as_inline() {
                    map.insert(field.to_owned(), Value::String(inline.to_owned()));
                }
            }
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| BotApiError::Parse(e.to_string()))?;

        if !parsed.ok {
            return Err(BotApiError::Api {
                code: parsed.error_code.unwrap_or(0),
                description: parsed
                    .description
                    .unwrap_or_else(|| "unknown error".to_owned()),
                retry_after: parsed.parameters.and_then(|p| p.retry_after),
            });
        }
        parsed
            .result
            .ok_or_else(|| BotApiError::Parse("ok response without result".to_owned()))
    }

    // ── Messaging ───────────────────────────────────────────────

    /// Send an HTML-formatted text message.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<Message, BotApiError> {
        self.send_message_opts(chat_id, text, reply_to, None, false)
            .await
    }

    /// `sendMessage` with full options.
    pub async fn send_message_opts(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        reply_markup: Option<&InlineKeyboardMarkup>,
        disable_preview: bool,
    ) -> Result<Message, BotApiError> {
        let mut params = json!({
            "chat_id": chat_id,
            "text": html::format_html(text),
            "parse_mode": "HTML",
        });
        if let Some(id) = reply_to {
            params["reply_to_message_id"] = json!(id);
        }
        if let Some(markup) = reply_markup {
            params["reply_markup"] =
                serde_json::to_value(markup).map_err(|e| BotApiError::Parse(e.to_string()))?;
        }
        if disable_preview {
            params["disable_web_page_preview"] = json!(true);
        }
        self.invoke("sendMessage", params, None, None).await
    }

    async fn send_media(
        &self,
        method: &'static str,
        field: &'static str,
        chat_id: i64,
        file: &InputFile,
        caption: &str,
        reply_to: Option<i64>,
        extra: Value,
    ) -> Result<Message, BotApiError> {
        let mut params = json!({
            "chat_id": chat_id,
            "parse_mode": "HTML",
        });
        if !caption.is_empty() {
            params["caption"] = json!(html::format_html(caption));
        }
        if let Some(id) = reply_to {
            params["reply_to_message_id"] = json!(id);
        }
        if let Some(map) = extra.as_object() {
            for (k, v) in map {
                params[k.as_str()] = v.clone();
            }
        }
        self.invoke(method, params, Some((field, file)), None).await
    }

    /// `sendPhoto`.
    pub async fn send_photo(
        &self,
        chat_id: i64,
        photo: &InputFile,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Message, BotApiError> {
        self.send_media("sendPhoto", "photo", chat_id, photo, caption, reply_to, json!({}))
            .await
    }

    /// `sendDocument`.
    pub async fn send_document(
        &self,
        chat_id: i64,
        document: &InputFile,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Message, BotApiError> {
        self.send_media(
            "sendDocument",
            "document",
            chat_id,
            document,
            caption,
            reply_to,
            json!({}),
        )
        .await
    }

    /// `sendVideo`.
    pub async fn send_video(
        &self,
        chat_id: i64,
        video: &InputFile,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<Message, BotApiError> {
        self.send_media("sendVideo", "video", chat_id, video, caption, reply_to, json!({}))
            .await
    }

    /// `sendAudio`.
    pub async fn send_audio(
        &self,
        chat_id: i64,
        audio: &InputFile,
        caption: &str,
    ) -> Result<Message, BotApiError> {
        self.send_media("sendAudio", "audio", chat_id, audio, caption, None, json!({}))
            .await
    }

    /// `sendVoice` with duration in seconds.
    pub async fn send_voice(
        &self,
        chat_id: i64,
        voice: &InputFile,
        caption: &str,
        duration_secs: i64,
    ) -> Result<Message, BotApiError> {
        self.send_media(
            "sendVoice",
            "voice",
            chat_id,
            voice,
            caption,
            None,
            json!({ "duration": duration_secs }),
        )
        .await
    }

    /// `sendAnimation`.
    pub async fn send_animation(
        &self,
        chat_id: i64,
        animation: &InputFile,
        caption: &str,
    ) -> Result<Message, BotApiError> {
        self.send_media(
            "sendAnimation",
            "animation",
            chat_id,
            animation,
            caption,
            None,
            json!({}),
        )
        .await
    }

    /// `sendSticker`.
    pub async fn send_sticker(
        &self,
        chat_id: i64,
        sticker: &InputFile,
    ) -> Result<Message, BotApiError> {
        self.send_media("sendSticker", "sticker", chat_id, sticker, "", None, json!({}))
            .await
    }

    /// `sendMediaGroup` with inline (URL / file-id) media only.
    pub async fn send_media_group(
        &self,
        chat_id: i64,
        media: Vec<Value>,
    ) -> Result<Vec<Message>, BotApiError> {
        let params = json!({ "chat_id": chat_id, "media": media });
        self.invoke("sendMediaGroup", params, None, None).await
    }

    /// `sendLocation`.
    pub async fn send_location(
        &self,
        chat_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<Message, BotApiError> {
        let params = json!({
            "chat_id": chat_id,
            "latitude": latitude,
            "longitude": longitude,
        });
        self.invoke("sendLocation", params, None, None).await
    }

    /// `sendVenue` (location with a named place).
    pub async fn send_venue(
        &self,
        chat_id: i64,
        latitude: f64,
        longitude: f64,
        title: &str,
        address: &str,
    ) -> Result<Message, BotApiError> {
        let params = json!({
            "chat_id": chat_id,
            "latitude": latitude,
            "longitude": longitude,
            "title": title,
            "address": address,
        });
        self.invoke("sendVenue", params, None, None).await
    }

    // ── Edits and deletes ───────────────────────────────────────

    /// `editMessageText`.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<Message, BotApiError> {
        let params = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": html::format_html(text),
            "parse_mode": "HTML",
        });
        self.invoke("editMessageText", params, None, None).await
    }

    /// `editMessageCaption`.
    pub async fn edit_message_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        caption: &str,
    ) -> Result<Message, BotApiError> {
        let params = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "caption": html::format_html(caption),
            "parse_mode": "HTML",
        });
        self.invoke("editMessageCaption", params, None, None).await
    }

    /// `editMessageMedia`, uploading the replacement via `attach://`.
    pub async fn edit_message_media(
        &self,
        chat_id: i64,
        message_id: i64,
        media_type: &str,
        file: &InputFile,
        caption: &str,
    ) -> Result<Message, BotApiError> {
        let media_ref = match file.as_inline() {
            Some(inline) => inline.to_owned(),
            None => "attach://media".to_owned(),
        };
        let mut media = json!({ "type": media_type, "media": media_ref });
        if !caption.is_empty() {
            media["caption"] = json!(html::format_html(caption));
            media["parse_mode"] = json!("HTML");
        }
        let params = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "media": media.to_string(),
        });
        let file_arg = match file.as_inline() {
            Some(_) => None,
            None => Some(("media", file)),
        };
        self.invoke("editMessageMedia", params, file_arg, None).await
    }

    /// `deleteMessage`.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<bool, BotApiError> {
        let params = json!({ "chat_id": chat_id, "message_id": message_id });
        self.invoke("deleteMessage", params, None, None).await
    }

    // ── Files ───────────────────────────────────────────────────

    /// `getFile`.
    pub async fn get_file(&self, file_id: &str) -> Result<File, BotApiError> {
        self.invoke("getFile", json!({ "file_id": file_id }), None, None)
            .await
    }

    /// Fetch a file's bytes from the file endpoint.
    pub async fn download_file(&self, file: &File) -> Result<Vec<u8>, BotApiError> {
        let path = file
            .file_path
            .as_deref()
            .ok_or_else(|| BotApiError::Parse("file has no file_path".to_owned()))?;
        let url = format!("{TELEGRAM_API_BASE}/file/bot{}/{path}", self.token);
        let resp = self.http().get(&url).send().await?;
        let bytes = resp.bytes().await?;
        debug!(size = bytes.len(), "downloaded Telegram file");
        Ok(bytes.to_vec())
    }

    // ── Chat management ─────────────────────────────────────────

    /// `getChat`.
    pub async fn get_chat(&self, chat_id: i64) -> Result<Chat, BotApiError> {
        self.invoke("getChat", json!({ "chat_id": chat_id }), None, None)
            .await
    }

    /// `setChatTitle`.
    pub async fn set_chat_title(&self, chat_id: i64, title: &str) -> Result<bool, BotApiError> {
        let params = json!({ "chat_id": chat_id, "title": title });
        self.invoke("setChatTitle", params, None, None).await
    }

    /// `setChatPhoto` (always multipart).
    pub async fn set_chat_photo(&self, chat_id: i64, photo: &InputFile) -> Result<bool, BotApiError> {
        let params = json!({ "chat_id": chat_id });
        self.invoke("setChatPhoto", params, Some(("photo", photo)), None)
            .await
    }

    /// `setChatDescription`.
    pub async fn set_chat_description(
        &self,
        chat_id: i64,
        description: &str,
    ) -> Result<bool, BotApiError> {
        let params = json!({ "chat_id": chat_id, "description": description });
        self.invoke("setChatDescription", params, None, None).await
    }

    /// `deleteChatPhoto`.
    pub async fn delete_chat_photo(&self, chat_id: i64) -> Result<bool, BotApiError> {
        self.invoke("deleteChatPhoto", json!({ "chat_id": chat_id }), None, None)
            .await
    }

    // ── Updates and metadata ────────────────────────────────────

    /// Long-poll `getUpdates`. The HTTP timeout exceeds the poll timeout so
    /// the socket stays open while Telegram holds the request.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u32,
    ) -> Result<Vec<Update>, BotApiError> {
        let mut params = json!({ "timeout": timeout_secs });
        if let Some(offset) = offset {
            params["offset"] = json!(offset);
        }
        let http_timeout = Duration::from_secs(u64::from(timeout_secs).saturating_add(10));
        self.invoke("getUpdates", params, None, Some(http_timeout))
            .await
    }

    /// `setMyCommands`.
    pub async fn set_my_commands(&self, commands: &[(&str, &str)]) -> Result<bool, BotApiError> {
        let list: Vec<Value> = commands
            .iter()
            .map(|(cmd, desc)| json!({ "command": cmd, "description": desc }))
            .collect();
        self.invoke("setMyCommands", json!({ "commands": list }), None, None)
            .await
    }

    /// `answerCallbackQuery`.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<bool, BotApiError> {
        let mut params = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        self.invoke("answerCallbackQuery", params, None, None).await
    }

    /// `getMe`.
    pub async fn get_me(&self) -> Result<User, BotApiError> {
        self.invoke("getMe", json!({}), None, None).await
    }

    /// `setWebhook`.
    pub async fn set_webhook(&self, url: &str) -> Result<bool, BotApiError> {
        self.invoke("setWebhook", json!({ "url": url }), None, None)
            .await
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn api_err(code: i64, description: &str) -> BotApiError {
        BotApiError::Api {
            code,
            description: description.to_owned(),
            retry_after: None,
        }
    }

    #[test]
    fn flood_control_is_retryable() {
        assert_eq!(
            api_err(429, "Too Many Requests: retry after 5").disposition(),
            Disposition::RetryFlood
        );
        assert_eq!(
            api_err(400, "Flood control exceeded").disposition(),
            Disposition::RetryFlood
        );
    }

    #[test]
    fn parameter_errors_are_fatal() {
        for desc in [
            "Bad Request: invalid file HTTP URL specified",
            "Bad Request: unsupported URL protocol",
            "Bad Request: message text is empty",
        ] {
            assert_eq!(api_err(400, desc).disposition(), Disposition::Fatal);
        }
    }

    #[test]
    fn chat_gone_detection() {
        assert!(api_err(400, "Bad Request: chat not found").is_chat_gone());
        assert!(api_err(403, "Forbidden: bot was kicked from the group chat").is_chat_gone());
        assert!(api_err(400, "Bad Request: the group chat was deactivated").is_chat_gone());
        assert!(!api_err(400, "Bad Request: message text is empty").is_chat_gone());
    }

    #[test]
    fn parse_errors_are_fatal() {
        assert_eq!(
            BotApiError::Parse("x".to_owned()).disposition(),
            Disposition::Fatal
        );
    }

    #[test]
    fn inline_files_stay_out_of_multipart() {
        assert_eq!(
            InputFile::Url("https://e.com/a.png".to_owned()).as_inline(),
            Some("https://e.com/a.png")
        );
        assert_eq!(InputFile::FileId("CAAD".to_owned()).as_inline(), Some("CAAD"));
        assert!(InputFile::Path(PathBuf::from("/tmp/x")).as_inline().is_none());
        assert!(InputFile::Bytes {
            name: "x".to_owned(),
            bytes: vec![]
        }
        .as_inline()
        .is_none());
    }

    #[test]
    fn method_urls() {
        let client = BotClient::new("123:abc");
        assert_eq!(
            client.method_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn api_response_error_shape() {
        let json = r#"{"ok":false,"error_code":429,"description":"Too Many Requests","parameters":{"retry_after":17}}"#;
        let parsed: ApiResponse<Value> = serde_json::from_str(json).expect("parse");
        assert!(!parsed.ok);
        assert_eq!(parsed.parameters.and_then(|p| p.retry_after), Some(17));
    }
}
