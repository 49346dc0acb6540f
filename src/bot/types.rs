//! Bot API wire types (the subset the bridge touches).

use serde::{Deserialize, Serialize};

/// Generic Bot API response wrapper.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
    pub parameters: Option<ResponseParameters>,
}

/// Extra error parameters (flood-control wait time).
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

/// Telegram `Update`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

/// Telegram `Message` (subset of fields the bridge reads).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    #[serde(default)]
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    pub photo: Option<Vec<PhotoSize>>,
    pub video: Option<Video>,
    pub voice: Option<Voice>,
    pub audio: Option<Audio>,
    pub sticker: Option<Sticker>,
    pub document: Option<Document>,
    pub animation: Option<Animation>,
    pub location: Option<Location>,
    pub venue: Option<Venue>,
    pub reply_to_message: Option<Box<Message>>,
    // Administrative chat events; their presence suppresses translation.
    pub new_chat_members: Option<Vec<User>>,
    pub left_chat_member: Option<User>,
    pub new_chat_title: Option<String>,
    pub new_chat_photo: Option<Vec<PhotoSize>>,
    pub pinned_message: Option<Box<Message>>,
}

impl Message {
    /// True when the message is an administrative chat event rather than
    /// user content.
    pub fn is_chat_event(&self) -> bool {
        self.new_chat_members.is_some()
            || self.left_chat_member.is_some()
            || self.new_chat_title.is_some()
            || self.new_chat_photo.is_some()
            || self.pinned_message.is_some()
    }

    /// First entity of the given type, if any.
    pub fn first_entity(&self, kind: &str) -> Option<&MessageEntity> {
        self.entities.iter().find(|e| e.entity_type == kind)
    }
}

/// Telegram `User`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

/// Telegram `Chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub chat_type: String,
    pub title: Option<String>,
}

/// Telegram `MessageEntity`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub offset: i64,
    pub length: i64,
    pub url: Option<String>,
}

/// Telegram `PhotoSize`.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

/// Telegram `Video`.
#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub duration: i64,
    pub thumbnail: Option<PhotoSize>,
}

/// Telegram `Voice`.
#[derive(Debug, Clone, Deserialize)]
pub struct Voice {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub duration: i64,
}

/// Telegram `Audio`.
#[derive(Debug, Clone, Deserialize)]
pub struct Audio {
    pub file_id: String,
    pub file_name: Option<String>,
}

/// Telegram `Sticker`.
#[derive(Debug, Clone, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_video: bool,
    pub emoji: Option<String>,
    pub set_name: Option<String>,
}

/// Telegram `Document`.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

/// Telegram `Animation`.
#[derive(Debug, Clone, Deserialize)]
pub struct Animation {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
    pub file_name: Option<String>,
}

/// Telegram `Location`.
#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Telegram `Venue`.
#[derive(Debug, Clone, Deserialize)]
pub struct Venue {
    pub location: Location,
    pub title: String,
    pub address: String,
}

/// Telegram `CallbackQuery`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
    pub message: Option<Message>,
}

/// Telegram `File` as returned by `getFile`.
#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub file_id: String,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
}

/// Inline keyboard markup.
#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// A single inline keyboard button.
#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardMarkup {
    /// One-row keyboard.
    pub fn single_row(buttons: Vec<InlineKeyboardButton>) -> Self {
        Self {
            inline_keyboard: vec![buttons],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_event_detection() {
        let plain = Message::default();
        assert!(!plain.is_chat_event());

        let joined = Message {
            new_chat_members: Some(vec![User::default()]),
            ..Message::default()
        };
        assert!(joined.is_chat_event());

        let pinned = Message {
            pinned_message: Some(Box::default()),
            ..Message::default()
        };
        assert!(pinned.is_chat_event());
    }

    #[test]
    fn first_entity_by_type() {
        let msg = Message {
            entities: vec![
                MessageEntity {
                    entity_type: "bold".to_owned(),
                    offset: 0,
                    length: 2,
                    url: None,
                },
                MessageEntity {
                    entity_type: "text_link".to_owned(),
                    offset: 3,
                    length: 4,
                    url: Some("https://e.com".to_owned()),
                },
            ],
            ..Message::default()
        };
        assert!(msg.first_entity("text_link").is_some());
        assert!(msg.first_entity("code").is_none());
    }

    #[test]
    fn update_parses_from_wire_json() {
        let json = r#"{
            "update_id": 5,
            "message": {
                "message_id": 42,
                "from": {"id": 1, "is_bot": false, "first_name": "A"},
                "chat": {"id": -100123, "type": "group", "title": "Mirror"},
                "date": 1700000000,
                "text": "hello"
            }
        }"#;
        let update: Update = serde_json::from_str(json).expect("should parse");
        let msg = update.message.expect("message");
        assert_eq!(msg.chat.id, -100_123);
        assert_eq!(msg.text.as_deref(), Some("hello"));
    }
}
