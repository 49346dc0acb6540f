//! Telegram → WeChat translation.
//!
//! One Telegram update in, one gateway call out, with the returned
//! identifier triple recorded in the correlator. Bot-API updates are the
//! canonical input; messages observed on the user session convert into the
//! same shape through [`TgToWx::handle_session_message`].

use std::sync::Arc;

use base64::Engine;
use tracing::{debug, error, info, warn};

use crate::bot::{BotClient, Message};
use crate::config::Config;
use crate::correlator::{Correlator, MsgMapping};
use crate::gateway::{GatewayClient, SendReceipt};
use crate::media;
use crate::registry::{ContactRegistry, StickerIndex};
use crate::user_client::{SessionMessage, UserClientHandle};
use crate::wechat::emoji;

/// Seconds of tolerance for the user-session send-time match.
const SESSION_MATCH_WINDOW_SECS: i64 = 2;

/// Messages walked when matching a send on the user session.
const SESSION_MATCH_SCAN: usize = 5;

/// The outbound translator.
pub struct TgToWx {
    config: Arc<Config>,
    gateway: GatewayClient,
    bot: BotClient,
    registry: ContactRegistry,
    stickers: Arc<StickerIndex>,
    correlator: Arc<Correlator>,
    user: Option<UserClientHandle>,
}

impl TgToWx {
    pub fn new(
        config: Arc<Config>,
        gateway: GatewayClient,
        bot: BotClient,
        registry: ContactRegistry,
        stickers: Arc<StickerIndex>,
        correlator: Arc<Correlator>,
        user: Option<UserClientHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway,
            bot,
            registry,
            stickers,
            correlator,
            user,
        })
    }

    /// Translate one Bot-API message. Commands must be filtered out by the
    /// caller; bot-originated and administrative messages are dropped here.
    pub async fn handle_bot_message(&self, msg: Message) {
        if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(true) {
            return;
        }
        if msg.is_chat_event() {
            return;
        }
        if msg
            .text
            .as_deref()
            .map(|t| t.starts_with('/'))
            .unwrap_or(false)
        {
            return;
        }

        let Some(contact) = self.lookup_contact(msg.chat.id).await else {
            return;
        };

        if let Err(e) = self.translate(&msg, &contact.wxid).await {
            error!(chat_id = msg.chat.id, error = %e, "outbound translation failed");
        }
    }

    /// Translate a message observed on the user session.
    ///
    /// The session adapter is thin: only text survives (session media has no
    /// Bot-API file ids to download through). The session message id itself
    /// is stored for delete-event correlation.
    pub async fn handle_session_message(&self, session_msg: SessionMessage) {
        if session_msg.text.is_empty() {
            debug!(chat_id = session_msg.chat_id, "session media message skipped");
            return;
        }
        if session_msg.text.starts_with('/') {
            return;
        }
        let Some(contact) = self.lookup_contact(session_msg.chat_id).await else {
            return;
        };

        let text = prepare_outbound_text(&session_msg.text);
        match self.gateway.send_text(&contact.wxid, &text).await {
            Ok(receipt) => {
                self.record(
                    session_msg.id,
                    session_msg.id,
                    &contact.wxid,
                    &receipt,
                    &session_msg.text,
                )
                .await;
            }
            Err(e) => error!(wxid = %contact.wxid, error = %e, "session text relay failed"),
        }
    }

    async fn lookup_contact(&self, chat_id: i64) -> Option<crate::registry::Contact> {
        match self.registry.get_by_chat_id(chat_id).await {
            Ok(Some(contact)) => Some(contact),
            Ok(None) => {
                debug!(chat_id, "no binding for chat, message dropped");
                None
            }
            Err(e) => {
                error!(chat_id, error = %e, "registry lookup failed");
                None
            }
        }
    }

    async fn translate(&self, msg: &Message, to_wxid: &str) -> anyhow::Result<()> {
        let receipt = if let Some(sticker) = &msg.sticker {
            self.send_sticker(msg, sticker, to_wxid).await?
        } else if let Some(photos) = &msg.photo {
            self.send_photo(msg, photos, to_wxid).await?
        } else if let Some(video) = &msg.video {
            self.send_video(msg, video, to_wxid).await?
        } else if let Some(voice) = &msg.voice {
            self.send_voice(voice, to_wxid).await?
        } else if let Some(document) = &msg.document {
            self.send_document(document, to_wxid).await?
        } else if let Some(venue) = &msg.venue {
            self.gateway
                .send_location(
                    to_wxid,
                    venue.location.latitude,
                    venue.location.longitude,
                    &venue.address,
                    &venue.title,
                )
                .await?
        } else if let Some(location) = &msg.location {
            self.gateway
                .send_location(to_wxid, location.latitude, location.longitude, "", "")
                .await?
        } else if let Some(text) = &msg.text {
            self.send_text(msg, text, to_wxid).await?
        } else {
            debug!(chat_id = msg.chat.id, "unsupported message kind, dropped");
            return Ok(());
        };

        let telethon_id = self.match_session_id(msg).await;
        let content = msg.text.clone().unwrap_or_default();
        self.record(msg.message_id, telethon_id, to_wxid, &receipt, &content)
            .await;
        Ok(())
    }

    // ── Text family ─────────────────────────────────────────────

    async fn send_text(
        &self,
        msg: &Message,
        text: &str,
        to_wxid: &str,
    ) -> anyhow::Result<SendReceipt> {
        // Quoted reply: resolve the replied-to Telegram id back to WeChat.
        if let Some(reply) = &msg.reply_to_message {
            if let Some(record) = self.correlator.tg_to_wx(reply.message_id).await {
                let xml = compose_quote_xml(
                    text,
                    record.wx_msg_id,
                    &record.from_wxid,
                    &self.config.my_wxid,
                    &record.content,
                );
                return Ok(self.gateway.send_app(to_wxid, &xml, 57).await?);
            }
            debug!(reply_to = reply.message_id, "reply target unknown, sending plain");
        }

        // A leading link entity becomes a WeChat link card.
        if let Some(entity) = msg
            .first_entity("text_link")
            .or_else(|| msg.first_entity("url"))
        {
            let url = match &entity.url {
                Some(url) => url.clone(),
                None => slice_entity(text, entity.offset, entity.length),
            };
            if !url.is_empty() {
                let xml = compose_link_xml(text, &url);
                return Ok(self.gateway.send_app(to_wxid, &xml, 5).await?);
            }
        }

        let mut body = text.to_owned();
        // A leading expandable blockquote is the mirrored sender tag; the
        // peer already knows who is talking.
        if msg
            .entities
            .first()
            .map(|e| e.entity_type == "expandable_blockquote" && e.offset == 0)
            .unwrap_or(false)
        {
            body = strip_leading_line(&body);
        }

        let body = prepare_outbound_text(&body);
        Ok(self.gateway.send_text(to_wxid, &body).await?)
    }

    // ── Media family ────────────────────────────────────────────

    async fn download_by_file_id(&self, file_id: &str) -> anyhow::Result<(Vec<u8>, String)> {
        let file = self.bot.get_file(file_id).await?;
        let extension = file
            .file_path
            .as_deref()
            .and_then(|p| p.rsplit('.').next())
            .unwrap_or_default()
            .to_owned();
        let bytes = self.bot.download_file(&file).await?;
        Ok((bytes, extension))
    }

    async fn send_photo(
        &self,
        _msg: &Message,
        photos: &[crate::bot::PhotoSize],
        to_wxid: &str,
    ) -> anyhow::Result<SendReceipt> {
        let best = photos
            .last()
            .ok_or_else(|| anyhow::anyhow!("photo array is empty"))?;
        let (bytes, _) = self.download_by_file_id(&best.file_id).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Ok(self.gateway.send_image(to_wxid, &encoded).await?)
    }

    async fn send_video(
        &self,
        _msg: &Message,
        video: &crate::bot::Video,
        to_wxid: &str,
    ) -> anyhow::Result<SendReceipt> {
        let (bytes, _) = self.download_by_file_id(&video.file_id).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let thumb = match &video.thumbnail {
            Some(thumb) => self.download_by_file_id(&thumb.file_id).await.map(|(b, _)| b),
            None => Err(anyhow::anyhow!("no thumbnail")),
        }
        .unwrap_or_else(|_| media::placeholder_thumbnail());
        let thumb_encoded = base64::engine::general_purpose::STANDARD.encode(&thumb);

        Ok(self
            .gateway
            .send_video(to_wxid, &encoded, &thumb_encoded, video.duration)
            .await?)
    }

    async fn send_voice(
        &self,
        voice: &crate::bot::Voice,
        to_wxid: &str,
    ) -> anyhow::Result<SendReceipt> {
        let (ogg, _) = self.download_by_file_id(&voice.file_id).await?;
        let (silk, duration_ms) = media::ogg_to_silk(&ogg).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&silk);
        Ok(self
            .gateway
            .send_voice(to_wxid, &encoded, duration_ms)
            .await?)
    }

    async fn send_document(
        &self,
        document: &crate::bot::Document,
        to_wxid: &str,
    ) -> anyhow::Result<SendReceipt> {
        let (bytes, extension) = self.download_by_file_id(&document.file_id).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let name = document
            .file_name
            .clone()
            .unwrap_or_else(|| format!("file.{extension}"));
        Ok(self.gateway.upload_file(to_wxid, &encoded, &name).await?)
    }

    async fn send_sticker(
        &self,
        _msg: &Message,
        sticker: &crate::bot::Sticker,
        to_wxid: &str,
    ) -> anyhow::Result<SendReceipt> {
        // Known sticker: re-send by identity, no binary involved.
        if let Some(record) = self.stickers.get(&sticker.file_unique_id).await {
            info!(md5 = %record.md5, "sticker re-sent from index");
            return Ok(self
                .gateway
                .send_emoji(to_wxid, &record.md5, record.size)
                .await?);
        }

        let (bytes, extension) = self.download_by_file_id(&sticker.file_id).await?;
        let gif = media::sticker_to_gif(&bytes, &extension).await?;
        let total_len = gif.len() as u64;
        // Fresh upload: the gateway indexes the binary by itself. The GIF's
        // own md5 is remembered so the next send of this sticker skips the
        // conversion entirely.
        let receipt = self.gateway.send_emoji(to_wxid, "", total_len).await?;
        let md5 = hex::encode(*md5::compute(&gif));
        self.stickers
            .add(&sticker.file_unique_id, &md5, total_len, "")
            .await;
        Ok(receipt)
    }

    // ── Correlation ─────────────────────────────────────────────

    /// Walk the user's last few session messages in this chat and pick the
    /// one matching the send time (and text, when there is text).
    async fn match_session_id(&self, msg: &Message) -> i64 {
        let Some(user) = &self.user else {
            return 0;
        };
        let recent = match user
            .recent_own_messages(msg.chat.id, SESSION_MATCH_SCAN)
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                debug!(error = %e, "session scan failed, telethon id not captured");
                return 0;
            }
        };
        recent
            .iter()
            .find(|candidate| {
                let time_ok =
                    (candidate.date - msg.date).abs() <= SESSION_MATCH_WINDOW_SECS;
                let text_ok = match msg.text.as_deref() {
                    Some(text) if !text.is_empty() => candidate.text == text,
                    _ => true,
                };
                time_ok && text_ok
            })
            .map(|m| m.id)
            .unwrap_or(0)
    }

    async fn record(
        &self,
        tg_msg_id: i64,
        telethon_msg_id: i64,
        to_wxid: &str,
        receipt: &SendReceipt,
        content: &str,
    ) {
        if receipt.new_msg_id == 0 {
            warn!(to_wxid, "send response carried no NewMsgId, not recorded");
            return;
        }
        let mapping = MsgMapping {
            tg_msg_id,
            telethon_msg_id,
            from_wxid: self.config.my_wxid.clone(),
            to_wxid: if receipt.to_user_name.is_empty() {
                to_wxid.to_owned()
            } else {
                receipt.to_user_name.clone()
            },
            wx_msg_id: receipt.new_msg_id,
            client_msg_id: receipt.client_msg_id,
            create_time: receipt.create_time,
            content: content.lines().next().unwrap_or_default().to_owned(),
        };
        if let Err(e) = self.correlator.add(mapping).await {
            error!(error = %e, "failed to record outbound correlation");
        }
    }
}

// ── Pure helpers ────────────────────────────────────────────────

/// Emoji-alias rewrite applied to every outbound text.
fn prepare_outbound_text(text: &str) -> String {
    emoji::rewrite_aliases(text)
}

/// Drop the first line (the mirrored sender tag).
fn strip_leading_line(text: &str) -> String {
    match text.split_once('\n') {
        Some((_, rest)) => rest.to_owned(),
        None => String::new(),
    }
}

/// UTF-16 entity slice, the Bot API's offset space.
fn slice_entity(text: &str, offset: i64, length: i64) -> String {
    let units: Vec<u16> = text.encode_utf16().collect();
    let start = offset.max(0) as usize;
    let end = (start + length.max(0) as usize).min(units.len());
    if start >= units.len() {
        return String::new();
    }
    String::from_utf16_lossy(&units[start..end])
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `<appmsg>` for a link card (type 5).
fn compose_link_xml(title: &str, url: &str) -> String {
    format!(
        "<appmsg appid=\"\" sdkver=\"0\"><title>{}</title><des>{}</des><type>5</type><url>{}</url></appmsg>",
        xml_escape(title),
        xml_escape(title),
        xml_escape(url)
    )
}

/// `<appmsg>` for a quoted reply (type 57).
fn compose_quote_xml(
    text: &str,
    svrid: i64,
    quoted_from: &str,
    my_wxid: &str,
    quoted_content: &str,
) -> String {
    format!(
        "<appmsg appid=\"\" sdkver=\"0\"><title>{}</title><des></des><type>57</type>\
         <refermsg><type>1</type><svrid>{svrid}</svrid><fromusr>{}</fromusr>\
         <chatusr>{}</chatusr><content>{}</content></refermsg></appmsg>",
        xml_escape(text),
        xml_escape(quoted_from),
        xml_escape(my_wxid),
        xml_escape(quoted_content)
    )
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wechat::xml::{AppContent, Content};

    #[test]
    fn leading_line_stripped() {
        assert_eq!(strip_leading_line("Alice\nhello"), "hello");
        assert_eq!(strip_leading_line("hello"), "");
        assert_eq!(strip_leading_line("a\nb\nc"), "b\nc");
    }

    #[test]
    fn entity_slice_is_utf16_based() {
        // "héllo world": entity offsets count UTF-16 units.
        let text = "say https://e.com now";
        assert_eq!(slice_entity(text, 4, 13), "https://e.com");
        // Out-of-range offsets stay safe.
        assert_eq!(slice_entity(text, 100, 5), "");
    }

    #[test]
    fn quote_xml_roundtrips_through_decoder() {
        let xml = format!(
            "<msg>{}</msg>",
            compose_quote_xml("ok", 999, "u1", "me", "hello")
        );
        let Content::App(AppContent::Quote { title, refer_svrid }) = Content::decode(49, &xml)
        else {
            panic!("expected quote");
        };
        assert_eq!(title, "ok");
        assert_eq!(refer_svrid, 999);
    }

    #[test]
    fn link_xml_roundtrips_through_decoder() {
        let xml = format!(
            "<msg>{}</msg>",
            compose_link_xml("look at this", "https://e.com?a=1&b=2")
        );
        let Content::App(AppContent::Link { title, url, .. }) = Content::decode(49, &xml) else {
            panic!("expected link");
        };
        assert_eq!(title, "look at this");
        assert_eq!(url, "https://e.com?a=1&b=2");
    }

    #[test]
    fn outbound_text_gets_emoji_tokens() {
        assert_eq!(prepare_outbound_text("你好 微笑"), "你好 [微笑]");
        assert_eq!(prepare_outbound_text("plain"), "plain");
    }

    #[test]
    fn xml_special_characters_escaped() {
        let xml = compose_link_xml("a<b>&c", "https://e.com");
        assert!(xml.contains("a&lt;b&gt;&amp;c"));
    }
}
