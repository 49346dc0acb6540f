//! Control-plane commands.
//!
//! Commands arrive as ordinary Telegram texts starting with `/`. Each one is
//! gated to a scope (bot DM, mirror chat, WeChat-group mirror); violations
//! answer with a localized notice. Commands issued inside mirror chats are
//! deleted after execution so the mirror stays clean.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveTime, Timelike};
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bot::{
    BotClient, CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, Message,
};
use crate::config::{Config, UNBOUND_CHAT_ID};
use crate::gateway::{Endpoint, GatewayClient, GroupMemberCache};
use crate::locales::Locale;
use crate::registry::{BoolPatch, ContactPatch, ContactRegistry};
use crate::revoke::Revoker;
use crate::wechat::{peer_kind, PeerKind};

/// Contacts per page in `/friend` listings.
const CONTACTS_PER_PAGE: usize = 10;

/// Friend-add scene aliases accepted by `/add`.
fn scene_code(alias: &str) -> i64 {
    match alias {
        "id" => 3,
        "qq" => 4,
        "group" => 8,
        "phone" => 15,
        "card" => 17,
        "qr" => 30,
        _ => 0,
    }
}

/// Where a command may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Only the bot DM.
    BotOnly,
    /// Any mirror chat (not the bot DM).
    Mirror,
    /// Only mirrors of WeChat group chats.
    GroupMirror,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// Parse `/cmd@bot arg1 arg2`; returns `None` for non-commands.
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    let rest = text.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let first = parts.next()?;
    let name = first.split('@').next().unwrap_or(first).to_owned();
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        name,
        args: parts.map(str::to_owned).collect(),
    })
}

/// A pending `/add` confirmation, keyed by a short callback token.
struct PendingAdd {
    payload: Value,
}

/// The command surface.
pub struct CommandSurface {
    config: Arc<Config>,
    locale: Locale,
    gateway: GatewayClient,
    bot: BotClient,
    registry: ContactRegistry,
    groups: Arc<GroupMemberCache>,
    revoker: Arc<Revoker>,
    /// Chat id of the bot DM (the session user's own id).
    bot_dm_chat_id: i64,
    pending_adds: Mutex<HashMap<String, PendingAdd>>,
    shutdown: tokio::sync::watch::Receiver<bool>,
    http: reqwest::Client,
}

impl CommandSurface {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        gateway: GatewayClient,
        bot: BotClient,
        registry: ContactRegistry,
        groups: Arc<GroupMemberCache>,
        revoker: Arc<Revoker>,
        bot_dm_chat_id: i64,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Arc<Self> {
        let locale = Locale::from_lang(&config.lang);
        Arc::new(Self {
            config,
            locale,
            gateway,
            bot,
            registry,
            groups,
            revoker,
            bot_dm_chat_id,
            pending_adds: Mutex::new(HashMap::new()),
            shutdown,
            http: reqwest::Client::new(),
        })
    }

    /// The command menu registered with `setMyCommands`.
    pub fn menu(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("update", self.locale.command("update")),
            ("receive", self.locale.command("receive")),
            ("unbind", self.locale.command("unbind")),
            ("friend", self.locale.command("friend")),
            ("add", self.locale.command("add")),
            ("remark", self.locale.command("remark")),
            ("quit", self.locale.command("quit")),
            ("rm", self.locale.command("revoke")),
            ("login", self.locale.command("login")),
            ("timer", self.locale.command("timer")),
        ]
    }

    /// Handle a command message. Returns true when the text was a command
    /// (even one that failed); the caller then skips translation.
    pub async fn handle_message(&self, msg: &Message) -> bool {
        let Some(text) = msg.text.as_deref() else {
            return false;
        };
        let Some(parsed) = parse_command(text) else {
            return false;
        };

        let chat_id = msg.chat.id;
        let delete_after = chat_id != self.bot_dm_chat_id;

        let scope = match parsed.name.as_str() {
            "friend" | "add" | "login" => Scope::BotOnly,
            "quit" => Scope::GroupMirror,
            "update" | "receive" | "unbind" | "remark" | "rm" | "revoke" | "timer" => Scope::Mirror,
            _ => {
                // Unknown commands fall through to translation as plain text
                // would be wrong; swallow with a note instead.
                let _ = self
                    .bot
                    .send_message(chat_id, &format!("Unknown command: /{}", parsed.name), None)
                    .await;
                return true;
            }
        };

        if let Err(notice) = self.check_scope(scope, chat_id).await {
            let _ = self.bot.send_message(chat_id, notice, None).await;
            self.delete_command(chat_id, msg.message_id).await;
            return true;
        }

        let result = match parsed.name.as_str() {
            "update" => self.cmd_update(chat_id).await,
            "receive" => self.cmd_receive(chat_id).await,
            "unbind" => self.cmd_unbind(chat_id, &parsed.args).await,
            "friend" => self.cmd_friend(chat_id, &parsed.args).await,
            "add" => self.cmd_add(chat_id, &parsed.args).await,
            "remark" => self.cmd_remark(chat_id, &parsed.args).await,
            "quit" => self.cmd_quit(chat_id).await,
            "rm" | "revoke" => {
                let replied = msg.reply_to_message.as_ref().map(|m| m.message_id);
                self.revoker.revoke_command(chat_id, replied).await;
                Ok(())
            }
            "login" => self.cmd_login(chat_id).await,
            "timer" => self.cmd_timer(chat_id, &parsed.args).await,
            _ => Ok(()),
        };

        if let Err(e) = result {
            error!(command = %parsed.name, error = %e, "command failed");
            let notice = format!("{}: {e}", self.locale.common("failed"));
            let _ = self.bot.send_message(chat_id, &notice, None).await;
        }

        if delete_after {
            self.delete_command(chat_id, msg.message_id).await;
        }
        true
    }

    async fn check_scope(&self, scope: Scope, chat_id: i64) -> Result<(), &'static str> {
        let is_bot_dm = chat_id == self.bot_dm_chat_id;
        match scope {
            Scope::BotOnly if !is_bot_dm => Err(self.locale.command("only_in_bot")),
            Scope::BotOnly => Ok(()),
            Scope::Mirror | Scope::GroupMirror if is_bot_dm => {
                Err(self.locale.command("not_in_bot"))
            }
            Scope::Mirror => Ok(()),
            Scope::GroupMirror => {
                let wxid = self
                    .registry
                    .get_by_chat_id(chat_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|c| c.wxid);
                match wxid {
                    None => Err(self.locale.command("no_binding")),
                    Some(wxid) if !wxid.ends_with("@chatroom") => {
                        Err(self.locale.command("only_in_group"))
                    }
                    Some(_) => Ok(()),
                }
            }
        }
    }

    async fn delete_command(&self, chat_id: i64, message_id: i64) {
        if let Err(e) = self.bot.delete_message(chat_id, message_id).await {
            warn!(chat_id, message_id, error = %e, "failed to delete command message");
        }
    }

    async fn bound_wxid(&self, chat_id: i64) -> anyhow::Result<Option<String>> {
        Ok(self
            .registry
            .get_by_chat_id(chat_id)
            .await?
            .map(|c| c.wxid))
    }

    // ── /update ─────────────────────────────────────────────────

    async fn cmd_update(&self, chat_id: i64) -> anyhow::Result<()> {
        let Some(wxid) = self.bound_wxid(chat_id).await? else {
            self.bot
                .send_message(chat_id, self.locale.command("no_binding"), None)
                .await?;
            return Ok(());
        };

        let (name, avatar_url) = if peer_kind(&wxid) == PeerKind::Enterprise {
            // Enterprise peers resolve from the registry only.
            match self.registry.get(&wxid).await? {
                Some(c) => (c.name, c.avatar_url),
                None => return Ok(()),
            }
        } else {
            let info = self.gateway.get_user_info(&wxid).await?;
            self.registry
                .update_by_chat_id(
                    chat_id,
                    &ContactPatch {
                        name: Some(info.name.clone()),
                        avatar_url: Some(info.avatar_url.clone()),
                        ..ContactPatch::default()
                    },
                )
                .await?;
            (info.name, info.avatar_url)
        };

        self.bot.set_chat_title(chat_id, &name).await?;
        if !avatar_url.is_empty() {
            match self.fetch_avatar(&avatar_url).await {
                Ok(jpeg) => {
                    let file = InputFile::Bytes {
                        name: "avatar.jpg".to_owned(),
                        bytes: jpeg,
                    };
                    if let Err(e) = self.bot.set_chat_photo(chat_id, &file).await {
                        warn!(chat_id, error = %e, "chat photo update failed");
                    }
                }
                Err(e) => warn!(chat_id, error = %e, "avatar fetch failed"),
            }
        }
        Ok(())
    }

    async fn fetch_avatar(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let bytes = self
            .http
            .get(url)
            .header("User-Agent", "Mozilla/5.0")
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(crate::media::normalize_avatar(&bytes)?)
    }

    // ── /receive ────────────────────────────────────────────────

    async fn cmd_receive(&self, chat_id: i64) -> anyhow::Result<()> {
        let patch = ContactPatch {
            is_receive: Some(BoolPatch::Toggle),
            ..ContactPatch::default()
        };
        if !self.registry.update_by_chat_id(chat_id, &patch).await? {
            self.bot
                .send_message(chat_id, self.locale.command("no_binding"), None)
                .await?;
            return Ok(());
        }
        let notice = match self.registry.get_by_chat_id(chat_id).await? {
            Some(c) if c.is_receive => self.locale.command("receive_on"),
            Some(_) => self.locale.command("receive_off"),
            None => self.locale.command("no_binding"),
        };
        self.bot.send_message(chat_id, notice, None).await?;
        Ok(())
    }

    // ── /unbind ─────────────────────────────────────────────────

    async fn cmd_unbind(&self, chat_id: i64, args: &[String]) -> anyhow::Result<()> {
        let Some(wxid) = self.bound_wxid(chat_id).await? else {
            self.bot
                .send_message(chat_id, self.locale.command("no_binding"), None)
                .await?;
            return Ok(());
        };

        let ok = if args.first().map(|a| a.eq_ignore_ascii_case("del")) == Some(true) {
            self.registry.delete(&wxid).await?
        } else {
            let patch = ContactPatch {
                chat_id: Some(UNBOUND_CHAT_ID),
                ..ContactPatch::default()
            };
            self.registry.update_by_chat_id(chat_id, &patch).await?
        };

        let notice = if ok {
            self.locale.command("unbind_successed")
        } else {
            self.locale.common("failed")
        };
        self.bot.send_message(chat_id, notice, None).await?;
        Ok(())
    }

    // ── /friend ─────────────────────────────────────────────────

    async fn cmd_friend(&self, chat_id: i64, args: &[String]) -> anyhow::Result<()> {
        match args.first().map(String::as_str) {
            Some("import") => {
                let name = args.get(1).map(String::as_str).unwrap_or("contact");
                let path = self
                    .config
                    .paths
                    .contact_db
                    .with_file_name(format!("{name}.json"));
                let count = self.registry.import_json(&path).await?;
                self.bot
                    .send_message(chat_id, &format!("⬆️ {count}"), None)
                    .await?;
            }
            Some("export") => {
                let name = args.get(1).map(String::as_str).unwrap_or("contact");
                let path = self
                    .config
                    .paths
                    .contact_db
                    .with_file_name(format!("{name}.json"));
                let count = self.registry.export_json(&path).await?;
                self.bot
                    .send_message(chat_id, &format!("⬇️ {count}"), None)
                    .await?;
            }
            Some("update") => {
                let (official, others) = self.gateway.list_friends().await?;
                let mut all = others;
                all.extend(official);
                let created = self
                    .registry
                    .merge_discovered(&all, &HashMap::new())
                    .await?;
                info!(created, "contact sync merged");
                self.send_contact_page(chat_id, "", 0).await?;
            }
            Some(query) => self.send_contact_page(chat_id, query, 0).await?,
            None => self.send_contact_page(chat_id, "", 0).await?,
        }
        Ok(())
    }

    async fn send_contact_page(
        &self,
        chat_id: i64,
        query: &str,
        page: usize,
    ) -> anyhow::Result<()> {
        let contacts = self.registry.search_by_name(query).await?;
        if contacts.is_empty() {
            self.bot
                .send_message(chat_id, self.locale.command("no_contacts"), None)
                .await?;
            return Ok(());
        }

        let stats = self.registry.stats().await?;
        let official = contacts
            .iter()
            .filter(|c| peer_kind(&c.wxid) == PeerKind::Official)
            .count();
        let groups = contacts.iter().filter(|c| c.is_group).count();
        let friends = contacts.len().saturating_sub(groups).saturating_sub(official);

        let total_pages = contacts.len().div_ceil(CONTACTS_PER_PAGE);
        let page = page.min(total_pages.saturating_sub(1));
        let slice = contacts
            .iter()
            .skip(page * CONTACTS_PER_PAGE)
            .take(CONTACTS_PER_PAGE);

        let mut lines = vec![format!(
            "📋 {} ({}/{})\n  • {}: {friends} | {}: {groups} | {}: {official}\n  • 🔗 {} | 🔔 {}",
            self.locale.command("contact_list"),
            page + 1,
            total_pages,
            self.locale.common("chat_account"),
            self.locale.common("group_account"),
            self.locale.common("offical_account"),
            stats.bound,
            stats.receiving,
        )];
        for contact in slice {
            let kind = match peer_kind(&contact.wxid) {
                PeerKind::Chatroom => "👥",
                PeerKind::Official => "📰",
                PeerKind::Enterprise => "🏢",
                PeerKind::Friend => "👤",
            };
            let receive = if contact.is_receive { "🔔" } else { "🔕" };
            let bound = if contact.is_bound() { "" } else { " ·" };
            lines.push(format!("{kind}{receive} {}{bound}", contact.name));
        }

        let mut buttons = Vec::new();
        if page > 0 {
            buttons.push(InlineKeyboardButton {
                text: self.locale.command("previous_page").to_owned(),
                callback_data: format!("fp:{}:{query}", page - 1),
            });
        }
        if page + 1 < total_pages {
            buttons.push(InlineKeyboardButton {
                text: self.locale.command("next_page").to_owned(),
                callback_data: format!("fp:{}:{query}", page + 1),
            });
        }
        let markup = if buttons.is_empty() {
            None
        } else {
            Some(InlineKeyboardMarkup::single_row(buttons))
        };

        self.bot
            .send_message_opts(chat_id, &lines.join("\n"), None, markup.as_ref(), true)
            .await?;
        Ok(())
    }

    // ── /add ────────────────────────────────────────────────────

    async fn cmd_add(&self, chat_id: i64, args: &[String]) -> anyhow::Result<()> {
        let Some(user_id) = args.first() else {
            self.bot
                .send_message(chat_id, self.locale.command("no_phone"), None)
                .await?;
            return Ok(());
        };
        let message = args.get(1).cloned().unwrap_or_default();
        let scene = args.get(2).map(|a| scene_code(a)).unwrap_or(0);

        let data = self
            .gateway
            .call(
                Endpoint::UserSearch,
                json!({
                    "FromScene": scene,
                    "SearchScene": 1,
                    "ToUserName": user_id,
                    "Wxid": self.config.my_wxid,
                }),
            )
            .await?;

        let ret = data
            .pointer("/BaseResponse/ret")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if ret == -4 {
            self.bot
                .send_message(chat_id, self.locale.command("no_user"), None)
                .await?;
            return Ok(());
        }

        let string_of = |key: &str| -> String {
            data.get(key)
                .and_then(|v| v.as_str().or_else(|| v.get("string").and_then(Value::as_str)))
                .unwrap_or_default()
                .to_owned()
        };
        let nickname = string_of("NickName");
        let username = string_of("UserName");
        let ticket = string_of("AntispamTicket");
        if ticket.is_empty() {
            self.bot
                .send_message(chat_id, self.locale.command("user_added"), None)
                .await?;
            return Ok(());
        }

        // Stash the verify payload; callback data is tiny.
        let token = format!("{:08x}", rand::thread_rng().gen::<u32>());
        self.pending_adds.lock().await.insert(
            token.clone(),
            PendingAdd {
                payload: json!({
                    "Opcode": 2,
                    "Scene": scene,
                    "V1": username,
                    "V2": ticket,
                    "VerifyContent": message,
                    "Wxid": self.config.my_wxid,
                }),
            },
        );

        let markup = InlineKeyboardMarkup::single_row(vec![InlineKeyboardButton {
            text: self.locale.common("add_contact").to_owned(),
            callback_data: format!("add:{token}"),
        }]);
        let body = format!("<blockquote>{}</blockquote>", crate::bot::html::escape(&nickname));
        self.bot
            .send_message_opts(chat_id, &body, None, Some(&markup), true)
            .await?;
        Ok(())
    }

    /// Inline-keyboard callbacks (`add:` confirmations, `fp:` paging).
    pub async fn handle_callback(&self, query: &CallbackQuery) {
        let Some(data) = query.data.as_deref() else {
            let _ = self.bot.answer_callback_query(&query.id, None).await;
            return;
        };
        let chat_id = query
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(self.bot_dm_chat_id);

        if let Some(token) = data.strip_prefix("add:") {
            let pending = self.pending_adds.lock().await.remove(token);
            let answer = match pending {
                Some(pending) => {
                    match self.gateway.call(Endpoint::UserAdd, pending.payload).await {
                        Ok(_) => self.locale.common("add_contact"),
                        Err(e) => {
                            error!(error = %e, "friend request failed");
                            self.locale.common("failed")
                        }
                    }
                }
                None => self.locale.common("failed"),
            };
            let _ = self.bot.answer_callback_query(&query.id, Some(answer)).await;
        } else if let Some(rest) = data.strip_prefix("fp:") {
            let (page, search) = rest.split_once(':').unwrap_or((rest, ""));
            let page = page.parse().unwrap_or(0);
            if let Err(e) = self.send_contact_page(chat_id, search, page).await {
                error!(error = %e, "contact paging failed");
            }
            let _ = self.bot.answer_callback_query(&query.id, None).await;
        } else {
            let _ = self.bot.answer_callback_query(&query.id, None).await;
        }
    }

    // ── /remark ─────────────────────────────────────────────────

    async fn cmd_remark(&self, chat_id: i64, args: &[String]) -> anyhow::Result<()> {
        if args.is_empty() {
            self.bot
                .send_message(chat_id, self.locale.command("no_remark_name"), None)
                .await?;
            return Ok(());
        }
        let Some(wxid) = self.bound_wxid(chat_id).await? else {
            self.bot
                .send_message(chat_id, self.locale.command("no_binding"), None)
                .await?;
            return Ok(());
        };
        let remark = args.join(" ");

        if peer_kind(&wxid) == PeerKind::Enterprise {
            self.registry
                .update_by_chat_id(
                    chat_id,
                    &ContactPatch {
                        name: Some(remark),
                        ..ContactPatch::default()
                    },
                )
                .await?;
        } else {
            self.gateway
                .call(
                    Endpoint::UserRemark,
                    json!({
                        "Remarks": remark,
                        "ToWxid": wxid,
                        "Wxid": self.config.my_wxid,
                    }),
                )
                .await?;
        }
        // Refresh the mirror so the new name shows everywhere.
        self.cmd_update(chat_id).await
    }

    // ── /quit ───────────────────────────────────────────────────

    async fn cmd_quit(&self, chat_id: i64) -> anyhow::Result<()> {
        let Some(wxid) = self.bound_wxid(chat_id).await? else {
            self.bot
                .send_message(chat_id, self.locale.command("no_binding"), None)
                .await?;
            return Ok(());
        };
        self.gateway.group_quit(&wxid).await?;
        self.registry.delete(&wxid).await?;
        self.groups.forget(&wxid).await;
        Ok(())
    }

    // ── /login ──────────────────────────────────────────────────

    async fn cmd_login(&self, chat_id: i64) -> anyhow::Result<()> {
        let notice = if self.gateway.twice_login().await? {
            self.locale.common("twice_login_success")
        } else {
            self.locale.common("twice_login_fail")
        };
        self.bot.send_message(chat_id, notice, None).await?;
        Ok(())
    }

    // ── /timer ──────────────────────────────────────────────────

    async fn cmd_timer(&self, chat_id: i64, args: &[String]) -> anyhow::Result<()> {
        let Some(time_arg) = args.first() else {
            self.bot
                .send_message(chat_id, self.locale.command("no_message"), None)
                .await?;
            return Ok(());
        };
        let text = args[1..].join(" ");
        if text.is_empty() {
            self.bot
                .send_message(chat_id, self.locale.command("no_message"), None)
                .await?;
            return Ok(());
        }
        let Some(target) = parse_timer_time(time_arg) else {
            self.bot
                .send_message(chat_id, self.locale.common("failed"), None)
                .await?;
            return Ok(());
        };

        let now = Local::now().time();
        let wait_secs = i64::from(target.num_seconds_from_midnight())
            - i64::from(now.num_seconds_from_midnight());
        if wait_secs < 0 {
            self.bot
                .send_message(chat_id, self.locale.common("failed"), None)
                .await?;
            return Ok(());
        }
        // Small jitter keeps repeated timers from looking mechanical.
        let jitter = rand::thread_rng().gen_range(0..5);
        let total_wait = wait_secs.saturating_add(jitter) as u64;

        let Some(wxid) = self.bound_wxid(chat_id).await? else {
            self.bot
                .send_message(chat_id, self.locale.command("no_binding"), None)
                .await?;
            return Ok(());
        };

        let gateway = self.gateway.clone();
        let bot = self.bot.clone();
        let locale = self.locale;
        let mut shutdown = self.shutdown.clone();
        info!(chat_id, wait_secs = total_wait, "timer scheduled");
        tokio::spawn(async move {
            // Sleep in slices so shutdown is honoured at least once a minute.
            let mut remaining = total_wait;
            loop {
                if *shutdown.borrow() {
                    return;
                }
                if remaining == 0 {
                    break;
                }
                let slice = remaining.min(60);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(slice)) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
                remaining = remaining.saturating_sub(slice);
            }

            let notice = match gateway.send_text(&wxid, &text).await {
                Ok(_) => locale.command("timer_successed"),
                Err(e) => {
                    error!(error = %e, "timer send failed");
                    locale.command("timer_failed")
                }
            };
            let _ = bot.send_message(chat_id, notice, None).await;
        });
        Ok(())
    }
}

/// Accepts `HHMM`, `HH:MM` and `HH:MM:SS`.
fn parse_timer_time(arg: &str) -> Option<NaiveTime> {
    if arg.len() == 4 && arg.chars().all(|c| c.is_ascii_digit()) {
        let hours: u32 = arg[..2].parse().ok()?;
        let minutes: u32 = arg[2..].parse().ok()?;
        return NaiveTime::from_hms_opt(hours, minutes, 0);
    }
    NaiveTime::parse_from_str(arg, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(arg, "%H:%M"))
        .ok()
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing() {
        assert_eq!(
            parse_command("/update"),
            Some(ParsedCommand {
                name: "update".to_owned(),
                args: vec![]
            })
        );
        assert_eq!(
            parse_command("/unbind del"),
            Some(ParsedCommand {
                name: "unbind".to_owned(),
                args: vec!["del".to_owned()]
            })
        );
        assert_eq!(
            parse_command("/friend@wegram_bot export backup"),
            Some(ParsedCommand {
                name: "friend".to_owned(),
                args: vec!["export".to_owned(), "backup".to_owned()]
            })
        );
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn timer_time_formats() {
        assert_eq!(parse_timer_time("0750"), NaiveTime::from_hms_opt(7, 50, 0));
        assert_eq!(parse_timer_time("23:05"), NaiveTime::from_hms_opt(23, 5, 0));
        assert_eq!(
            parse_timer_time("08:30:15"),
            NaiveTime::from_hms_opt(8, 30, 15)
        );
        assert_eq!(parse_timer_time("2500"), None);
        assert_eq!(parse_timer_time("soon"), None);
    }

    #[test]
    fn scene_aliases() {
        assert_eq!(scene_code("id"), 3);
        assert_eq!(scene_code("qr"), 30);
        assert_eq!(scene_code("anything"), 0);
    }
}
