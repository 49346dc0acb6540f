//! WeChat → Telegram translation.
//!
//! One classified [`AddMsg`] in, one Telegram message out, with the pair of
//! ids recorded in the correlator before the next message on the same
//! per-contact worker begins. Media failures degrade to a textual
//! placeholder that keeps the sender line; a deleted mirror group triggers
//! one re-provisioning pass.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bot::{html, BotApiError, BotClient, InputFile, Message};
use crate::config::Config;
use crate::correlator::{Correlator, MsgMapping};
use crate::gateway::{GatewayClient, GroupMemberCache};
use crate::locales::Locale;
use crate::media;
use crate::provision::Provisioner;
use crate::registry::{ContactRegistry, StickerIndex};
use crate::wechat::xml::{
    AppContent, Article, Content, ImageInfo, LocationInfo, RecordInfo, StickerInfo, SysContent,
    VideoInfo, VoiceInfo,
};
use crate::wechat::{peer_kind, AddMsg, PeerKind};

mod history;

use history::render_chat_history;

/// Pseudo-contact for `@app` service notifications.
const SERVICE_NOTIFICATION: &str = "service_notification";

/// Fallback avatar for enterprise contacts.
const ENTERPRISE_AVATAR: &str =
    "https://raw.githubusercontent.com/hououinkami/wechat2tg/refs/heads/wx2tg-mac-dev/qywx.jpg";

/// Inner types never rendered, regardless of sender.
fn is_blacklisted(msg: &AddMsg) -> bool {
    match &msg.content {
        // Opening a chat on the phone must not create a mirror.
        _ if msg.msg_type == 51 => true,
        Content::Sys(SysContent::Other(kind)) => {
            kind == "bizlivenotify" || kind == "qy_chat_update"
        }
        Content::App(AppContent::Other { app_type, .. }) => *app_type == 74,
        _ => false,
    }
}

/// The inbound translator; one instance shared by all per-contact workers.
pub struct WxToTg {
    config: Arc<Config>,
    locale: Locale,
    gateway: GatewayClient,
    bot: BotClient,
    registry: ContactRegistry,
    stickers: Arc<StickerIndex>,
    correlator: Arc<Correlator>,
    groups: Arc<GroupMemberCache>,
    provisioner: Arc<Provisioner>,
}

/// What a render produced: the send already performed, or a degraded text.
enum Sent {
    Message(Message),
    Skipped,
}

impl WxToTg {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        gateway: GatewayClient,
        bot: BotClient,
        registry: ContactRegistry,
        stickers: Arc<StickerIndex>,
        correlator: Arc<Correlator>,
        groups: Arc<GroupMemberCache>,
        provisioner: Arc<Provisioner>,
    ) -> Arc<Self> {
        let locale = Locale::from_lang(&config.lang);
        Arc::new(Self {
            config,
            locale,
            gateway,
            bot,
            registry,
            stickers,
            correlator,
            groups,
            provisioner,
        })
    }

    /// Worker entry point. Never propagates: a failed message must not stall
    /// the conversation.
    pub async fn handle(&self, mut msg: AddMsg) {
        // Fold-group activations and notification aggregates never mirror.
        if msg.from_wxid.ends_with("@placeholder_foldgroup")
            || msg.from_wxid == "notification_messages"
        {
            return;
        }
        if msg.from_wxid.ends_with("@app") {
            msg.from_wxid = SERVICE_NOTIFICATION.to_owned();
        }
        if is_blacklisted(&msg) {
            debug!(msg_type = msg.msg_type, "blacklisted message dropped");
            return;
        }
        // The user's own revocation is already visible on their client.
        if msg.sender_wxid == self.config.my_wxid {
            if let Content::Sys(SysContent::Revoke { .. }) = msg.content {
                return;
            }
        }
        if self.config.enable_blacklist {
            if let Content::Text(text) = &msg.content {
                if self.config.blacklist.iter().any(|kw| text.contains(kw)) {
                    debug!("text matched blacklist keyword, dropped");
                    return;
                }
            }
        }

        if let Err(e) = self.translate(&msg).await {
            error!(msg_id = msg.msg_id, error = %e, "inbound translation failed");
        }
    }

    async fn translate(&self, msg: &AddMsg) -> anyhow::Result<()> {
        let (contact_name, avatar_url) = self.contact_info(&msg.from_wxid, msg).await;

        let Some(chat_id) = self.route(msg, &contact_name, &avatar_url).await? else {
            return Ok(());
        };

        let sender_line = self.sender_line(msg, &contact_name).await;

        let sent = match self.render_and_send(chat_id, msg, &sender_line).await {
            Ok(sent) => sent,
            Err(e) => {
                if let Some(bot_err) = e.downcast_ref::<BotApiError>() {
                    if bot_err.is_chat_gone() {
                        return self
                            .reprovision_and_resend(msg, &contact_name, &avatar_url, &sender_line)
                            .await;
                    }
                }
                // Degrade to a placeholder so the conversation keeps flowing.
                warn!(msg_id = msg.msg_id, error = %e, "falling back to placeholder");
                let text = format!("{sender_line}\n[{}]", self.type_label(msg));
                Sent::Message(self.bot.send_message(chat_id, text.trim(), None).await?)
            }
        };

        if let Sent::Message(message) = sent {
            self.record(msg, &message).await;
        }
        Ok(())
    }

    async fn reprovision_and_resend(
        &self,
        msg: &AddMsg,
        contact_name: &str,
        avatar_url: &str,
        sender_line: &str,
    ) -> anyhow::Result<()> {
        warn!(wxid = %msg.from_wxid, "mirror group gone, re-provisioning");
        self.registry.delete(&msg.from_wxid).await?;
        let chat_id = self
            .provisioner
            .provision(&msg.from_wxid, contact_name, avatar_url)
            .await?;
        match self.render_and_send(chat_id, msg, sender_line).await {
            Ok(Sent::Message(message)) => {
                self.record(msg, &message).await;
                Ok(())
            }
            Ok(Sent::Skipped) => Ok(()),
            Err(e) => {
                // Second failure is terminal for this message.
                error!(msg_id = msg.msg_id, error = %e, "resend into fresh group failed");
                Ok(())
            }
        }
    }

    // ── Routing ─────────────────────────────────────────────────

    async fn route(
        &self,
        msg: &AddMsg,
        contact_name: &str,
        avatar_url: &str,
    ) -> anyhow::Result<Option<i64>> {
        if let Some(contact) = self.registry.get(&msg.from_wxid).await? {
            if !contact.is_receive {
                debug!(wxid = %msg.from_wxid, "receive disabled, dropped");
                return Ok(None);
            }
            if contact.is_bound() {
                return Ok(Some(contact.chat_id));
            }
        }

        if !self.config.auto_create_groups || msg.from_wxid == self.config.my_wxid {
            debug!(wxid = %msg.from_wxid, "no binding and auto-create disabled");
            return Ok(None);
        }

        match self
            .provisioner
            .provision(&msg.from_wxid, contact_name, avatar_url)
            .await
        {
            Ok(chat_id) => Ok(Some(chat_id)),
            Err(e) => {
                // Creation failed: the message is dropped, the next one
                // retries provisioning.
                error!(wxid = %msg.from_wxid, error = %e, "provisioning failed, message dropped");
                Ok(None)
            }
        }
    }

    async fn contact_info(&self, wxid: &str, msg: &AddMsg) -> (String, String) {
        if wxid == SERVICE_NOTIFICATION {
            return (SERVICE_NOTIFICATION.to_owned(), String::new());
        }
        let saved = self.registry.get(wxid).await.ok().flatten();
        let (mut name, mut avatar) = match self.gateway.get_user_info(wxid).await {
            Ok(info) => (info.name, info.avatar_url),
            Err(e) => {
                debug!(wxid, error = %e, "user info lookup failed");
                match &saved {
                    Some(c) => (c.name.clone(), c.avatar_url.clone()),
                    None => (crate::gateway::contacts::UNKNOWN_USER.to_owned(), String::new()),
                }
            }
        };

        // Enterprise peers often resolve to nothing useful.
        if name == crate::gateway::contacts::UNKNOWN_USER && !msg.push_content.is_empty() {
            if let Some((pushed_name, _)) = msg.push_content.split_once(" : ") {
                name = pushed_name.to_owned();
            }
        }
        if peer_kind(wxid) == PeerKind::Enterprise {
            avatar = ENTERPRISE_AVATAR.to_owned();
            if name == crate::gateway::contacts::UNKNOWN_USER {
                name = "企业微信".to_owned();
            }
        }
        (name, avatar)
    }

    /// First line of group-chat mirrors: the sender's display name in an
    /// expandable blockquote. Absent for direct chats and self-sent
    /// messages.
    async fn sender_line(&self, msg: &AddMsg, contact_name: &str) -> String {
        if msg.sender_wxid == self.config.my_wxid {
            return String::new();
        }
        let flagged_group = self
            .registry
            .get(&msg.from_wxid)
            .await
            .ok()
            .flatten()
            .map(|c| c.is_group)
            .unwrap_or(false);
        if !msg.is_chatroom() && !flagged_group {
            return String::new();
        }

        let name = if msg.is_chatroom() && !msg.sender_wxid.is_empty() {
            let display = self
                .groups
                .display_name(&self.gateway, &msg.from_wxid, &msg.sender_wxid)
                .await;
            if display.is_empty() {
                match self.gateway.get_user_info(&msg.sender_wxid).await {
                    Ok(info) => info.name,
                    Err(_) => msg.sender_wxid.clone(),
                }
            } else {
                display
            }
        } else {
            contact_name.to_owned()
        };
        format!("<blockquote expandable>{}</blockquote>", html::escape(&name))
    }

    // ── Rendering ───────────────────────────────────────────────

    fn type_label(&self, msg: &AddMsg) -> &'static str {
        let label = match &msg.content {
            Content::App(app) => self.locale.msg_type(app.app_type()),
            Content::Sys(SysContent::Revoke { .. }) => self.locale.sys_type("revokemsg"),
            Content::Sys(SysContent::Pat { .. }) => self.locale.sys_type("pat"),
            Content::Voip(_) => self.locale.sys_type("VoIPBubbleMsg"),
            _ => self.locale.msg_type(msg.msg_type),
        };
        label.unwrap_or_else(|| self.locale.sys_type("unknown").unwrap_or("unknown"))
    }

    fn with_sender(&self, sender_line: &str, body: &str) -> String {
        if sender_line.is_empty() {
            body.to_owned()
        } else {
            format!("{sender_line}\n{body}")
        }
    }

    async fn render_and_send(
        &self,
        chat_id: i64,
        msg: &AddMsg,
        sender_line: &str,
    ) -> anyhow::Result<Sent> {
        let sent = match &msg.content {
            Content::Text(text) => {
                let body = self.with_sender(sender_line, &html::escape(text));
                Sent::Message(self.bot.send_message(chat_id, &body, None).await?)
            }
            Content::Image(info) => self.send_image(chat_id, msg, info, sender_line).await?,
            Content::Voice(info) => self.send_voice(chat_id, msg, info, sender_line).await?,
            Content::Video(info) => self.send_video(chat_id, msg, info, sender_line).await?,
            Content::Sticker(info) => self.send_sticker(chat_id, info, sender_line).await?,
            Content::Location(info) => self.send_location(chat_id, info).await?,
            Content::App(app) => self.send_app(chat_id, msg, app, sender_line).await?,
            Content::Sys(SysContent::Revoke {
                new_msg_id,
                replace_msg,
            }) => {
                let reply_to = self.correlator.wx_to_tg(*new_msg_id).await;
                let body = self.with_sender(sender_line, &html::escape(replace_msg));
                // The original stays visible; the notice threads onto it.
                Sent::Message(self.bot.send_message(chat_id, &body, reply_to).await?)
            }
            Content::Sys(SysContent::Pat { template }) => {
                let rendered = self.render_pat(template).await;
                let body = self.with_sender(sender_line, &format!("[{}]", html::escape(&rendered)));
                Sent::Message(self.bot.send_message(chat_id, &body, None).await?)
            }
            Content::Sys(SysContent::Other(_)) => Sent::Skipped,
            Content::Voip(text) => {
                let body = self.with_sender(sender_line, &html::escape(text));
                Sent::Message(self.bot.send_message(chat_id, &body, None).await?)
            }
            Content::Unrecognized => {
                info!(msg_type = msg.msg_type, "unrecognized message type");
                let body = self.with_sender(sender_line, &format!("[{}]", self.type_label(msg)));
                Sent::Message(self.bot.send_message(chat_id, &body, None).await?)
            }
        };
        Ok(sent)
    }

    async fn send_image(
        &self,
        chat_id: i64,
        msg: &AddMsg,
        info: &ImageInfo,
        sender_line: &str,
    ) -> anyhow::Result<Sent> {
        let path = self
            .gateway
            .download_image(
                msg.msg_id,
                &msg.from_wxid,
                info,
                &self.config.paths.media_dir("image"),
            )
            .await?;
        let bytes = tokio::fs::read(&path).await?;
        let mode = media::photo_send_mode(&bytes, self.config.max_ratio, self.config.max_size_mb);
        let file = InputFile::Path(path);
        let message = match mode {
            media::PhotoMode::Photo => {
                self.bot
                    .send_photo(chat_id, &file, sender_line, None)
                    .await?
            }
            media::PhotoMode::Document => {
                self.bot
                    .send_document(chat_id, &file, sender_line, None)
                    .await?
            }
        };
        Ok(Sent::Message(message))
    }

    async fn send_voice(
        &self,
        chat_id: i64,
        msg: &AddMsg,
        info: &VoiceInfo,
        sender_line: &str,
    ) -> anyhow::Result<Sent> {
        let silk_path = self
            .gateway
            .download_voice(
                msg.msg_id,
                &msg.from_wxid,
                info,
                &self.config.paths.media_dir("voice"),
            )
            .await?;
        let (ogg_path, duration) = media::silk_to_ogg(&silk_path).await?;
        let message = self
            .bot
            .send_voice(chat_id, &InputFile::Path(ogg_path), sender_line, duration)
            .await?;
        Ok(Sent::Message(message))
    }

    async fn send_video(
        &self,
        chat_id: i64,
        msg: &AddMsg,
        info: &VideoInfo,
        sender_line: &str,
    ) -> anyhow::Result<Sent> {
        let path = self
            .gateway
            .download_video(
                msg.msg_id,
                &msg.from_wxid,
                info,
                &self.config.paths.media_dir("video"),
            )
            .await?;
        let message = self
            .bot
            .send_video(chat_id, &InputFile::Path(path), sender_line, None)
            .await?;
        Ok(Sent::Message(message))
    }

    async fn send_sticker(
        &self,
        chat_id: i64,
        info: &StickerInfo,
        sender_line: &str,
    ) -> anyhow::Result<Sent> {
        let path = self
            .gateway
            .download_emoji(info, &self.config.paths.media_dir("sticker"))
            .await?;
        let message = self
            .bot
            .send_animation(chat_id, &InputFile::Path(path), sender_line)
            .await?;

        // Remember the identity so the same sticker can go back to WeChat
        // without re-uploading.
        let file_unique_id = message
            .animation
            .as_ref()
            .map(|a| a.file_unique_id.clone())
            .or_else(|| message.document.as_ref().map(|d| d.file_unique_id.clone()))
            .or_else(|| message.sticker.as_ref().map(|s| s.file_unique_id.clone()));
        if let Some(id) = file_unique_id.filter(|id| !id.is_empty()) {
            self.stickers.add(&id, &info.md5, info.len, "").await;
        }
        Ok(Sent::Message(message))
    }

    async fn send_location(&self, chat_id: i64, info: &LocationInfo) -> anyhow::Result<Sent> {
        let message = if info.poi_name.is_empty() && info.label.is_empty() {
            self.bot.send_location(chat_id, info.x, info.y).await?
        } else {
            self.bot
                .send_venue(chat_id, info.x, info.y, &info.poi_name, &info.label)
                .await?
        };
        Ok(Sent::Message(message))
    }

    async fn send_app(
        &self,
        chat_id: i64,
        msg: &AddMsg,
        app: &AppContent,
        sender_line: &str,
    ) -> anyhow::Result<Sent> {
        let message = match app {
            AppContent::Link {
                title,
                url,
                des,
                articles,
            } => {
                let body = render_link_block(title, url, des, articles);
                self.bot
                    .send_message(chat_id, &self.with_sender(sender_line, &body), None)
                    .await?
            }
            AppContent::File(attach) => {
                let path = self
                    .gateway
                    .download_attachment(attach, &self.config.paths.media_dir("file"))
                    .await?;
                self.bot
                    .send_document(chat_id, &InputFile::Path(path), sender_line, None)
                    .await?
            }
            AppContent::ChatHistory { title, record } => {
                let body = match record {
                    Some(record) => render_chat_history(title, record),
                    None => format!("[{}]", self.type_label(msg)),
                };
                self.bot
                    .send_message(chat_id, &self.with_sender(sender_line, &body), None)
                    .await?
            }
            AppContent::MiniProgram {
                title,
                source_display_name,
            } => {
                let body = html::escape(&format!(
                    "[{}]\n{source_display_name}\n{title}",
                    self.type_label(msg)
                ));
                self.bot
                    .send_message(chat_id, &self.with_sender(sender_line, &body), None)
                    .await?
            }
            AppContent::Channel { nickname, desc } => {
                let body = html::escape(&format!(
                    "[{}]\n{nickname}\n{desc}",
                    self.type_label(msg)
                ));
                self.bot
                    .send_message(chat_id, &self.with_sender(sender_line, &body), None)
                    .await?
            }
            AppContent::GroupNote { title } => {
                let inner = html::escape(&format!("[{}]\n{title}", self.type_label(msg)));
                let body = format!("<blockquote expandable>{inner}</blockquote>");
                self.bot
                    .send_message(chat_id, &self.with_sender(sender_line, &body), None)
                    .await?
            }
            AppContent::Quote { title, refer_svrid } => {
                let reply_to = if *refer_svrid != 0 {
                    self.correlator.wx_to_tg(*refer_svrid).await
                } else {
                    None
                };
                let body = self.with_sender(sender_line, &html::escape(title));
                self.bot.send_message(chat_id, &body, reply_to).await?
            }
            AppContent::Transfer { fee_desc } => {
                let body = html::escape(&format!("[{}]\n{fee_desc}", self.type_label(msg)));
                self.bot
                    .send_message(chat_id, &self.with_sender(sender_line, &body), None)
                    .await?
            }
            AppContent::Other { .. } => {
                let body = format!("[{}]", self.type_label(msg));
                self.bot
                    .send_message(chat_id, &self.with_sender(sender_line, &body), None)
                    .await?
            }
        };
        Ok(Sent::Message(message))
    }

    /// Substitute `${wxid}` placeholders in a pat template with display
    /// names.
    async fn render_pat(&self, template: &str) -> String {
        static PAT_VAR: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        let pattern =
            PAT_VAR.get_or_init(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern"));
        let mut rendered = template.to_owned();
        let wxids: Vec<String> = pattern
            .captures_iter(template)
            .map(|c| c[1].to_owned())
            .collect();
        for wxid in wxids {
            let name = match self.gateway.get_user_info(&wxid).await {
                Ok(info) => info.name,
                Err(_) => wxid.clone(),
            };
            rendered = rendered.replace(&format!("${{{wxid}}}"), &name);
        }
        rendered
    }

    // ── Correlation ─────────────────────────────────────────────

    async fn record(&self, msg: &AddMsg, message: &Message) {
        // Official-account pushes are one-way; no revocation path needs them.
        if peer_kind(&msg.from_wxid) == PeerKind::Official {
            return;
        }
        let content = match &msg.content {
            Content::Text(text) => text.lines().next().unwrap_or_default().to_owned(),
            _ => String::new(),
        };
        let mapping = MsgMapping {
            tg_msg_id: message.message_id,
            telethon_msg_id: 0,
            from_wxid: msg.sender_wxid.clone(),
            to_wxid: msg.to_wxid.clone(),
            wx_msg_id: msg.new_msg_id,
            client_msg_id: 0,
            create_time: msg.create_time,
            content,
        };
        if let Err(e) = self.correlator.add(mapping).await {
            error!(error = %e, "failed to record correlation");
        }
    }
}

/// HTML link block for an official-account push: each article becomes an
/// anchor with a blockquoted summary, falling back to the main title/url.
fn render_link_block(title: &str, url: &str, des: &str, articles: &[Article]) -> String {
    let mut out = String::new();
    if articles.is_empty() {
        out.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            html::escape(url),
            html::escape(title)
        ));
        if !des.is_empty() {
            out.push_str(&format!("<blockquote>{}</blockquote>\n", html::escape(des)));
        }
    } else {
        for article in articles {
            out.push_str(&format!(
                "<a href=\"{}\">{}</a>\n",
                html::escape(&article.url),
                html::escape(&article.title)
            ));
            if !article.summary.is_empty() {
                out.push_str(&format!(
                    "<blockquote>{}</blockquote>\n",
                    html::escape(&article.summary)
                ));
            }
        }
    }
    out.trim_end().to_owned()
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wechat::{RawAddMsg, StringField};

    fn add_msg(msg_type: i64, from: &str, content: &str) -> AddMsg {
        AddMsg::from_raw(
            RawAddMsg {
                msg_id: 1,
                new_msg_id: 100,
                from_user_name: StringField::Plain(from.to_owned()),
                to_user_name: StringField::Plain("me".to_owned()),
                msg_type,
                content: StringField::Plain(content.to_owned()),
                push_content: String::new(),
                create_time: 0,
            },
            "me",
        )
    }

    #[test]
    fn open_chat_is_blacklisted() {
        let msg = add_msg(51, "u1", "<msg/>");
        assert!(is_blacklisted(&msg));
    }

    #[test]
    fn sys_blacklist_types() {
        let msg = add_msg(
            10002,
            "u1",
            r#"<sysmsg type="bizlivenotify"><x/></sysmsg>"#,
        );
        assert!(is_blacklisted(&msg));
        let pat = add_msg(
            10002,
            "u1",
            r#"<sysmsg type="pat"><pat><template>t</template></pat></sysmsg>"#,
        );
        assert!(!is_blacklisted(&pat));
    }

    #[test]
    fn app_74_is_blacklisted() {
        let msg = add_msg(49, "u1", "<msg><appmsg><type>74</type></appmsg></msg>");
        assert!(is_blacklisted(&msg));
    }

    #[test]
    fn link_block_with_articles() {
        let articles = vec![
            Article {
                title: "A & B".to_owned(),
                url: "https://a".to_owned(),
                summary: "s1".to_owned(),
            },
            Article {
                title: "C".to_owned(),
                url: "https://c".to_owned(),
                summary: String::new(),
            },
        ];
        let block = render_link_block("main", "https://m", "d", &articles);
        assert!(block.contains("<a href=\"https://a\">A &amp; B</a>"));
        assert!(block.contains("<blockquote>s1</blockquote>"));
        assert!(block.contains("<a href=\"https://c\">C</a>"));
        assert!(!block.contains("https://m"));
    }

    #[test]
    fn link_block_without_articles_uses_main() {
        let block = render_link_block("main", "https://m", "summary", &[]);
        assert!(block.contains("<a href=\"https://m\">main</a>"));
        assert!(block.contains("<blockquote>summary</blockquote>"));
    }
}
