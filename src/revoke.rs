//! Revocation handling across both directions.
//!
//! Telegram-side "unsend" (the `/rm` command or a user-session delete
//! event) looks up the correlation and calls the gateway's revoke endpoint.
//! The WeChat-side `revokemsg` system message is handled inline by the
//! inbound translator (the replacement text threads onto the original;
//! nothing is deleted). Revocations are idempotent per Telegram id.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::bot::BotClient;
use crate::correlator::{Correlator, MsgMapping};
use crate::gateway::{GatewayClient, RevokeParams};
use crate::locales::Locale;

/// Outcome of a revocation attempt, for command feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// The gateway accepted the revocation (or it had already been issued).
    Revoked,
    /// No correlation exists for the message.
    NotFound,
    /// The gateway rejected the call.
    Failed,
}

/// Issues compensating revocations against the gateway.
pub struct Revoker {
    gateway: GatewayClient,
    correlator: Arc<Correlator>,
    bot: BotClient,
    locale: Locale,
    revoked: Mutex<HashSet<i64>>,
}

impl Revoker {
    pub fn new(
        gateway: GatewayClient,
        correlator: Arc<Correlator>,
        bot: BotClient,
        locale: Locale,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            correlator,
            bot,
            locale,
            revoked: Mutex::new(HashSet::new()),
        })
    }

    /// Revoke the WeChat message correlated with `tg_msg_id`. A second call
    /// for the same id is a no-op reported as success.
    pub async fn revoke_by_tg_id(&self, tg_msg_id: i64) -> RevokeOutcome {
        {
            let revoked = self.revoked.lock().await;
            if revoked.contains(&tg_msg_id) {
                debug!(tg_msg_id, "already revoked, no-op");
                return RevokeOutcome::Revoked;
            }
        }
        let Some(record) = self.correlator.tg_to_wx(tg_msg_id).await else {
            return RevokeOutcome::NotFound;
        };
        self.issue(tg_msg_id, &record).await
    }

    /// `/rm` as a reply: resolve the replied-to message and revoke it,
    /// notifying the chat on failure.
    pub async fn revoke_command(&self, chat_id: i64, replied_to: Option<i64>) {
        let Some(tg_msg_id) = replied_to else {
            let _ = self
                .bot
                .send_message(chat_id, self.locale.command("no_reply"), None)
                .await;
            return;
        };
        match self.revoke_by_tg_id(tg_msg_id).await {
            RevokeOutcome::Revoked => {}
            RevokeOutcome::NotFound | RevokeOutcome::Failed => {
                let _ = self
                    .bot
                    .send_message(chat_id, self.locale.common("revoke_failed"), None)
                    .await;
            }
        }
    }

    /// User-session delete events: each deleted id that correlates to a
    /// WeChat message gets revoked.
    pub async fn handle_session_deletes(&self, message_ids: &[i64]) {
        for id in message_ids {
            let Some(record) = self.correlator.telethon_to_wx(*id).await else {
                continue;
            };
            info!(telethon_id = id, wx_msg_id = record.wx_msg_id, "revoking from delete event");
            self.issue(record.tg_msg_id, &record).await;
        }
    }

    async fn issue(&self, tg_msg_id: i64, record: &MsgMapping) -> RevokeOutcome {
        let params = RevokeParams {
            client_msg_id: record.client_msg_id,
            create_time: record.create_time,
            new_msg_id: record.wx_msg_id,
            to_user_name: record.to_wxid.clone(),
        };
        match self.gateway.revoke(&params).await {
            Ok(()) => {
                self.revoked.lock().await.insert(tg_msg_id);
                RevokeOutcome::Revoked
            }
            Err(e) => {
                error!(tg_msg_id, error = %e, "gateway revocation failed");
                RevokeOutcome::Failed
            }
        }
    }
}
