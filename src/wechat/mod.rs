//! WeChat gateway message model.
//!
//! The gateway delivers sync payloads whose `AddMsgs` entries wrap most
//! string fields in `{"string": "..."}` envelopes. This module flattens one
//! entry into [`AddMsg`] and classifies its content into [`Content`] exactly
//! once at ingress; everything downstream dispatches on the enum.

use serde::Deserialize;

pub mod emoji;
pub mod xml;

pub use xml::{AppContent, Content, SysContent};

/// Wire form of a string field: either bare or `{"string": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringField {
    /// Bare string.
    Plain(String),
    /// Enveloped string.
    Wrapped {
        /// The wrapped value.
        string: String,
    },
}

impl StringField {
    /// The contained string.
    pub fn as_str(&self) -> &str {
        match self {
            StringField::Plain(s) => s,
            StringField::Wrapped { string } => string,
        }
    }
}

impl Default for StringField {
    fn default() -> Self {
        StringField::Plain(String::new())
    }
}

/// One element of the gateway callback's message list, as received.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAddMsg {
    /// Per-session message id (dedup key).
    #[serde(rename = "MsgId")]
    pub msg_id: i64,
    /// Server-wide 64-bit message id (correlation key).
    #[serde(rename = "NewMsgId", default)]
    pub new_msg_id: i64,
    /// Conversation id the message arrived from.
    #[serde(rename = "FromUserName", default)]
    pub from_user_name: StringField,
    /// Conversation id the message was addressed to.
    #[serde(rename = "ToUserName", default)]
    pub to_user_name: StringField,
    /// Wire message type.
    #[serde(rename = "MsgType")]
    pub msg_type: i64,
    /// Raw content: plain text or XML depending on type.
    #[serde(rename = "Content", default)]
    pub content: StringField,
    /// Push notification line, e.g. `"Alice : hello"`.
    #[serde(rename = "PushContent", default)]
    pub push_content: String,
    /// Message creation time (epoch seconds).
    #[serde(rename = "CreateTime", default)]
    pub create_time: i64,
}

/// Callback/queue sync payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncPayload {
    /// Gateway status line; `"成功"` carries messages.
    #[serde(rename = "Message", default)]
    pub message: String,
    /// Message container.
    #[serde(rename = "Data", default)]
    pub data: Option<SyncData>,
}

/// `Data` member of a sync payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncData {
    /// New messages.
    #[serde(rename = "AddMsgs", default)]
    pub add_msgs: Vec<RawAddMsg>,
}

/// A flattened, classified inbound message.
#[derive(Debug, Clone)]
pub struct AddMsg {
    pub msg_id: i64,
    pub new_msg_id: i64,
    pub from_wxid: String,
    pub to_wxid: String,
    pub msg_type: i64,
    /// Raw content after chatroom sender-prefix stripping.
    pub raw_content: String,
    pub push_content: String,
    pub create_time: i64,
    /// Sender wxid inside a chatroom, when recoverable.
    pub sender_wxid: String,
    /// Decoded content variant.
    pub content: Content,
}

impl AddMsg {
    /// Flatten and classify one raw entry.
    ///
    /// Chat-room content arrives as `"<sender_wxid>:\n<body>"`; the prefix is
    /// stripped and kept as the sender. Messages the bridge sent itself
    /// (`from == my_wxid`) are re-routed to the peer conversation.
    pub fn from_raw(raw: RawAddMsg, my_wxid: &str) -> Self {
        let mut from_wxid = raw.from_user_name.as_str().to_owned();
        let to_wxid = raw.to_user_name.as_str().to_owned();

        // Self-sent: mirror into the peer's group.
        if from_wxid == my_wxid {
            from_wxid = to_wxid.clone();
        }

        let mut content = raw.content.as_str().to_owned();
        let sender_wxid = if from_wxid.ends_with("@chatroom") {
            match content.split_once(":\n") {
                Some((sender, body)) => {
                    let sender = sender.trim_end_matches(':').to_owned();
                    content = body.to_owned();
                    sender
                }
                None if raw.from_user_name.as_str() == my_wxid => my_wxid.to_owned(),
                None => String::new(),
            }
        } else {
            from_wxid.clone()
        };

        let decoded = Content::decode(raw.msg_type, &content);

        Self {
            msg_id: raw.msg_id,
            new_msg_id: raw.new_msg_id,
            from_wxid,
            to_wxid,
            msg_type: raw.msg_type,
            raw_content: content,
            push_content: raw.push_content,
            create_time: raw.create_time,
            sender_wxid,
            content: decoded,
        }
    }

    /// True when this conversation is a WeChat group chat.
    pub fn is_chatroom(&self) -> bool {
        self.from_wxid.ends_with("@chatroom")
    }
}

/// Peer kind derived from the wxid shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    /// Ordinary friend.
    Friend,
    /// Group chat (`@chatroom` suffix).
    Chatroom,
    /// Official account (`gh_` prefix).
    Official,
    /// Enterprise contact (`@openim` suffix).
    Enterprise,
}

/// Classify a wxid.
pub fn peer_kind(wxid: &str) -> PeerKind {
    if wxid.ends_with("@chatroom") {
        PeerKind::Chatroom
    } else if wxid.starts_with("gh_") {
        PeerKind::Official
    } else if wxid.ends_with("@openim") {
        PeerKind::Enterprise
    } else {
        PeerKind::Friend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(msg_type: i64, from: &str, content: &str) -> RawAddMsg {
        RawAddMsg {
            msg_id: 10,
            new_msg_id: 1001,
            from_user_name: StringField::Wrapped {
                string: from.to_owned(),
            },
            to_user_name: StringField::Wrapped {
                string: "me".to_owned(),
            },
            msg_type,
            content: StringField::Plain(content.to_owned()),
            push_content: String::new(),
            create_time: 1_700_000_000,
        }
    }

    #[test]
    fn parses_wrapped_string_fields() {
        let json = r#"{
            "MsgId": 10,
            "NewMsgId": 1001,
            "FromUserName": {"string": "u1"},
            "ToUserName": {"string": "me"},
            "MsgType": 1,
            "Content": {"string": "hello"},
            "CreateTime": 1700000000
        }"#;
        let raw: RawAddMsg = serde_json::from_str(json).expect("should parse");
        assert_eq!(raw.from_user_name.as_str(), "u1");
        assert_eq!(raw.content.as_str(), "hello");
    }

    #[test]
    fn plain_text_classified() {
        let msg = AddMsg::from_raw(raw(1, "u1", "hello"), "me");
        assert!(matches!(msg.content, Content::Text(ref t) if t == "hello"));
        assert_eq!(msg.sender_wxid, "u1");
        assert!(!msg.is_chatroom());
    }

    #[test]
    fn chatroom_sender_prefix_stripped() {
        let msg = AddMsg::from_raw(raw(1, "123@chatroom", "wxid_alice:\nhi all"), "me");
        assert_eq!(msg.sender_wxid, "wxid_alice");
        assert_eq!(msg.raw_content, "hi all");
        assert!(msg.is_chatroom());
    }

    #[test]
    fn chatroom_without_prefix_has_empty_sender() {
        let msg = AddMsg::from_raw(raw(10002, "123@chatroom", "<sysmsg type=\"pat\"/>"), "me");
        assert_eq!(msg.sender_wxid, "");
    }

    #[test]
    fn self_sent_routes_to_peer() {
        let mut r = raw(1, "me", "note");
        r.to_user_name = StringField::Plain("u2".to_owned());
        let msg = AddMsg::from_raw(r, "me");
        assert_eq!(msg.from_wxid, "u2");
    }

    #[test]
    fn peer_kinds() {
        assert_eq!(peer_kind("wxid_abc"), PeerKind::Friend);
        assert_eq!(peer_kind("123@chatroom"), PeerKind::Chatroom);
        assert_eq!(peer_kind("gh_news"), PeerKind::Official);
        assert_eq!(peer_kind("abc@openim"), PeerKind::Enterprise);
    }

    #[test]
    fn sync_payload_shapes() {
        let json = r#"{"Message":"成功","Data":{"AddMsgs":[{"MsgId":1,"MsgType":1}]}}"#;
        let payload: SyncPayload = serde_json::from_str(json).expect("should parse");
        assert_eq!(payload.message, "成功");
        assert_eq!(payload.data.expect("data").add_msgs.len(), 1);

        let empty: SyncPayload =
            serde_json::from_str(r#"{"Message":"用户可能退出"}"#).expect("should parse");
        assert!(empty.data.is_none());
    }
}
