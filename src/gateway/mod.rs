//! HTTP client for the WeChat protocol gateway.
//!
//! Every command is a JSON `POST` to `{BASE_URL}{path}`; a fixed alias table
//! maps short endpoint keys to URL segments. Responses use a
//! `{Success, Message, Data}` envelope; `Success:false` or HTTP >= 400
//! surface as [`GatewayError`] with the gateway's message captured.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

pub mod contacts;
pub mod download;

pub use contacts::{GroupMemberCache, UserInfo};

/// Total request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Endpoint alias table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    GetImage,
    GetImageCdn,
    GetVideo,
    GetFile,
    GetVoice,
    GetEmoji,
    SendText,
    SendImage,
    SendVideo,
    SendVoice,
    SendApp,
    SendEmoji,
    SendLocation,
    SendFile,
    UploadFile,
    Revoke,
    UserInfo,
    UserList,
    UserSearch,
    UserAdd,
    UserRemark,
    UserPass,
    GroupMember,
    GroupQuit,
    WecomAdd,
    WecomApply,
    MyMoment,
}

impl Endpoint {
    /// Concrete URL segment for this endpoint.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::GetImage => "/Tools/DownloadImg",
            Endpoint::GetImageCdn => "/Tools/CdnDownloadImg",
            Endpoint::GetVideo => "/Tools/DownloadVideo",
            Endpoint::GetFile => "/Tools/DownloadFile",
            Endpoint::GetVoice => "/Tools/DownloadVoice",
            Endpoint::GetEmoji => "/Tools/EmojiDownload",
            Endpoint::SendText => "/Msg/SendTxt",
            Endpoint::SendImage => "/Msg/UploadImg",
            Endpoint::SendVideo => "/Msg/SendVideo",
            Endpoint::SendVoice => "/Msg/SendVoice",
            Endpoint::SendApp => "/Msg/SendApp",
            Endpoint::SendEmoji => "/Msg/SendEmoji",
            Endpoint::SendLocation => "/Msg/ShareLocation",
            Endpoint::SendFile => "/Msg/SendCDNFile",
            Endpoint::UploadFile => "/Tools/UploadFile",
            Endpoint::Revoke => "/Msg/Revoke",
            Endpoint::UserInfo => "/Friend/GetContractDetail",
            Endpoint::UserList => "/Friend/GetContractList",
            Endpoint::UserSearch => "/Friend/Search",
            Endpoint::UserAdd => "/Friend/SendRequest",
            Endpoint::UserRemark => "/Friend/SetRemarks",
            Endpoint::UserPass => "/Friend/PassVerify",
            Endpoint::GroupMember => "/Group/GetChatRoomMemberDetail",
            Endpoint::GroupQuit => "/Group/Quit",
            Endpoint::WecomAdd => "/Wxapp/QWContact",
            Endpoint::WecomApply => "/Wxapp/QWApply",
            Endpoint::MyMoment => "/FriendCircle/GetList",
        }
    }
}

/// Gateway client errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-2xx HTTP status.
    #[error("gateway returned HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    /// `Success:false` envelope with the gateway's message.
    #[error("gateway error: {0}")]
    Gateway(String),
    /// Response shape did not match expectations.
    #[error("unexpected gateway response: {0}")]
    Decode(String),
    /// Media download pipeline failure.
    #[error("download failed: {0}")]
    Download(String),
}

/// Response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Success")]
    success: Option<bool>,
    #[serde(rename = "Message", default)]
    message: String,
    #[serde(rename = "Data", default)]
    data: Value,
}

/// Identifier triple returned by send endpoints, consumed by the correlator
/// and the revocation path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReceipt {
    pub new_msg_id: i64,
    pub client_msg_id: i64,
    pub create_time: i64,
    pub to_user_name: String,
}

impl SendReceipt {
    /// Probe a send response's `Data` for the identifier triple. Different
    /// endpoints nest it differently (bare, `List[0]`, or camel-case).
    pub fn from_data(data: &Value) -> Self {
        let slot = if data.get("List").map_or(false, |l| l.is_array()) {
            data.get("List")
                .and_then(|l| l.get(0))
                .unwrap_or(&Value::Null)
        } else {
            data
        };
        let int = |keys: &[&str]| -> i64 {
            keys.iter()
                .find_map(|k| slot.get(k))
                .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                .unwrap_or_default()
        };
        let text = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|k| slot.get(k))
                .map(|v| {
                    v.as_str()
                        .map(str::to_owned)
                        .or_else(|| v.get("string").and_then(Value::as_str).map(str::to_owned))
                        .unwrap_or_default()
                })
                .unwrap_or_default()
        };
        Self {
            new_msg_id: int(&["NewMsgId", "Newmsgid", "newMsgId"]),
            client_msg_id: int(&["ClientMsgid", "ClientMsgId", "clientmsgid"]),
            create_time: int(&["Createtime", "CreateTime", "createTime"]),
            to_user_name: text(&["ToUserName", "ToUsetName", "toUserName"]),
        }
    }
}

/// Arguments for the revocation endpoint.
#[derive(Debug, Clone)]
pub struct RevokeParams {
    pub client_msg_id: i64,
    pub create_time: i64,
    pub new_msg_id: i64,
    pub to_user_name: String,
}

/// WeChat gateway client. Cheap to clone; the inner pool is shared.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    my_wxid: String,
}

impl GatewayClient {
    /// Create a client against `base_url`, stamping `my_wxid` on every call.
    pub fn new(base_url: &str, my_wxid: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to build gateway HTTP client, using default");
                reqwest::Client::new()
            });
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            my_wxid: my_wxid.to_owned(),
        }
    }

    /// The bridged identity this client stamps on requests.
    pub fn my_wxid(&self) -> &str {
        &self.my_wxid
    }

    /// POST a JSON body to an aliased endpoint and return `Data`.
    pub async fn call(&self, endpoint: Endpoint, body: Value) -> Result<Value, GatewayError> {
        self.call_path(endpoint.path(), Some(body), &[]).await
    }

    /// POST with query parameters only (login-family endpoints).
    pub async fn call_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, GatewayError> {
        self.call_path(path, None, query).await
    }

    async fn call_path(
        &self,
        path: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.post(&url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = &body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.as_u16() >= 400 {
            let body = resp.text().await.unwrap_or_default();
            error!(%url, status = status.as_u16(), "gateway call failed");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        if envelope.success == Some(false) {
            debug!(%url, message = %envelope.message, "gateway reported failure");
            return Err(GatewayError::Gateway(envelope.message));
        }
        Ok(envelope.data)
    }

    // ── Send operations ─────────────────────────────────────────

    /// Send plain text.
    pub async fn send_text(
        &self,
        to_wxid: &str,
        content: &str,
    ) -> Result<SendReceipt, GatewayError> {
        let data = self
            .call(
                Endpoint::SendText,
                json!({
                    "At": "",
                    "Content": content,
                    "ToWxid": to_wxid,
                    "Type": 1,
                    "Wxid": self.my_wxid,
                }),
            )
            .await?;
        Ok(SendReceipt::from_data(&data))
    }

    /// Send an app message (link, quote, ...) as raw `<appmsg>` XML.
    pub async fn send_app(
        &self,
        to_wxid: &str,
        xml: &str,
        app_type: i64,
    ) -> Result<SendReceipt, GatewayError> {
        let data = self
            .call(
                Endpoint::SendApp,
                json!({
                    "ToWxid": to_wxid,
                    "Type": app_type,
                    "Wxid": self.my_wxid,
                    "Xml": xml,
                }),
            )
            .await?;
        Ok(SendReceipt::from_data(&data))
    }

    /// Send a base64-encoded image.
    pub async fn send_image(
        &self,
        to_wxid: &str,
        base64: &str,
    ) -> Result<SendReceipt, GatewayError> {
        let data = self
            .call(
                Endpoint::SendImage,
                json!({
                    "Base64": base64,
                    "ToWxid": to_wxid,
                    "Wxid": self.my_wxid,
                }),
            )
            .await?;
        Ok(SendReceipt::from_data(&data))
    }

    /// Send a base64-encoded video with its thumbnail and play length in
    /// seconds.
    pub async fn send_video(
        &self,
        to_wxid: &str,
        base64: &str,
        thumb_base64: &str,
        play_length_secs: i64,
    ) -> Result<SendReceipt, GatewayError> {
        let data = self
            .call(
                Endpoint::SendVideo,
                json!({
                    "Base64": base64,
                    "ImageBase64": thumb_base64,
                    "PlayLength": play_length_secs,
                    "ToWxid": to_wxid,
                    "Wxid": self.my_wxid,
                }),
            )
            .await?;
        Ok(SendReceipt::from_data(&data))
    }

    /// Send base64-encoded SILK voice data with its duration in
    /// milliseconds.
    pub async fn send_voice(
        &self,
        to_wxid: &str,
        base64: &str,
        voice_time_ms: i64,
    ) -> Result<SendReceipt, GatewayError> {
        let data = self
            .call(
                Endpoint::SendVoice,
                json!({
                    "Base64": base64,
                    "ToWxid": to_wxid,
                    "Type": 4,
                    "VoiceTime": voice_time_ms,
                    "Wxid": self.my_wxid,
                }),
            )
            .await?;
        Ok(SendReceipt::from_data(&data))
    }

    /// Send a custom emoji by md5 + size. `md5` may be empty together with a
    /// fresh upload; the gateway indexes it server-side.
    pub async fn send_emoji(
        &self,
        to_wxid: &str,
        md5: &str,
        total_len: u64,
    ) -> Result<SendReceipt, GatewayError> {
        let data = self
            .call(
                Endpoint::SendEmoji,
                json!({
                    "Md5": md5,
                    "TotalLen": total_len,
                    "ToWxid": to_wxid,
                    "Wxid": self.my_wxid,
                }),
            )
            .await?;
        Ok(SendReceipt::from_data(&data))
    }

    /// Share a location.
    pub async fn send_location(
        &self,
        to_wxid: &str,
        latitude: f64,
        longitude: f64,
        label: &str,
        poi_name: &str,
    ) -> Result<SendReceipt, GatewayError> {
        let data = self
            .call(
                Endpoint::SendLocation,
                json!({
                    "Infourl": "",
                    "Label": label,
                    "Poiname": poi_name,
                    "Scale": 0,
                    "X": latitude,
                    "Y": longitude,
                    "ToWxid": to_wxid,
                    "Wxid": self.my_wxid,
                }),
            )
            .await?;
        Ok(SendReceipt::from_data(&data))
    }

    /// Upload a file as base64 and deliver it to a peer.
    pub async fn upload_file(
        &self,
        to_wxid: &str,
        base64: &str,
        file_name: &str,
    ) -> Result<SendReceipt, GatewayError> {
        let data = self
            .call(
                Endpoint::UploadFile,
                json!({
                    "Base64": base64,
                    "FileName": file_name,
                    "ToWxid": to_wxid,
                    "Wxid": self.my_wxid,
                }),
            )
            .await?;
        Ok(SendReceipt::from_data(&data))
    }

    /// Revoke a previously sent message.
    pub async fn revoke(&self, params: &RevokeParams) -> Result<(), GatewayError> {
        self.call(
            Endpoint::Revoke,
            json!({
                "ClientMsgId": params.client_msg_id,
                "CreateTime": params.create_time,
                "NewMsgId": params.new_msg_id,
                "ToUserName": params.to_user_name,
                "Wxid": self.my_wxid,
            }),
        )
        .await?;
        Ok(())
    }

    /// Leave a WeChat group chat.
    pub async fn group_quit(&self, chatroom_id: &str) -> Result<(), GatewayError> {
        self.call(
            Endpoint::GroupQuit,
            json!({ "QID": chatroom_id, "Wxid": self.my_wxid }),
        )
        .await?;
        Ok(())
    }

    // ── Login family (query-parameter endpoints) ────────────────

    /// Gateway heartbeat.
    pub async fn heartbeat(&self) -> Result<Value, GatewayError> {
        self.call_query("/Login/HeartBeat", &[("wxid", self.my_wxid.as_str())])
            .await
    }

    /// Own profile; `Data: null` means the session is logged out.
    pub async fn get_profile(&self) -> Result<Value, GatewayError> {
        self.call_query(
            "/User/GetContractProfile",
            &[("wxid", self.my_wxid.as_str())],
        )
        .await
    }

    /// Trigger a secondary login. Returns the gateway's message line.
    pub async fn twice_login(&self) -> Result<bool, GatewayError> {
        // The success signal for this endpoint lives in Message, not Data.
        let url = format!("{}/Login/LoginTwiceAutoAuth", self.base_url);
        let resp = self
            .http
            .post(&url)
            .query(&[("wxid", &self.my_wxid)])
            .send()
            .await?;
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(envelope.message == "登录成功")
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths_cover_send_and_download() {
        assert_eq!(Endpoint::SendText.path(), "/Msg/SendTxt");
        assert_eq!(Endpoint::GetImage.path(), "/Tools/DownloadImg");
        assert_eq!(Endpoint::GetImageCdn.path(), "/Tools/CdnDownloadImg");
        assert_eq!(Endpoint::Revoke.path(), "/Msg/Revoke");
        assert_eq!(Endpoint::GroupMember.path(), "/Group/GetChatRoomMemberDetail");
    }

    #[test]
    fn receipt_from_flat_data() {
        let data = json!({
            "NewMsgId": 1001_i64,
            "ClientMsgid": 42,
            "Createtime": 1_700_000_000_i64,
            "ToUserName": "u1"
        });
        let receipt = SendReceipt::from_data(&data);
        assert_eq!(receipt.new_msg_id, 1001);
        assert_eq!(receipt.client_msg_id, 42);
        assert_eq!(receipt.create_time, 1_700_000_000);
        assert_eq!(receipt.to_user_name, "u1");
    }

    #[test]
    fn receipt_from_list_slot() {
        let data = json!({
            "List": [{
                "NewMsgId": "2002",
                "ClientMsgId": 7,
                "CreateTime": 1_700_000_001_i64,
                "ToUserName": {"string": "u2"}
            }]
        });
        let receipt = SendReceipt::from_data(&data);
        assert_eq!(receipt.new_msg_id, 2002);
        assert_eq!(receipt.client_msg_id, 7);
        assert_eq!(receipt.to_user_name, "u2");
    }

    #[test]
    fn receipt_tolerates_missing_fields() {
        assert_eq!(SendReceipt::from_data(&json!({})), SendReceipt::default());
    }

    #[test]
    fn envelope_failure_detected() {
        let envelope: Envelope =
            serde_json::from_value(json!({"Success": false, "Message": "已退出"}))
                .expect("should parse");
        assert_eq!(envelope.success, Some(false));
        assert_eq!(envelope.message, "已退出");
    }

    #[test]
    fn base_url_trailing_slash_normalised() {
        let client = GatewayClient::new("http://gw:8058/api/", "me");
        assert_eq!(client.base_url, "http://gw:8058/api");
    }
}
