//! Mirror-group provisioning.
//!
//! On the first inbound message from an unbound peer, the user session
//! creates a basic group with the bot, promotes it, uploads the peer's
//! avatar, places the chat into the right folder, and the binding lands in
//! the registry. Only group creation itself is fatal; every later step
//! leaves the group usable and logs its failure.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::media;
use crate::registry::{Contact, ContactRegistry, RegistryError};
use crate::user_client::{UserClientError, UserClientHandle};
use crate::wechat::{peer_kind, PeerKind};

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The user session could not create the group.
    #[error("group creation failed: {0}")]
    UserClient(#[from] UserClientError),
    /// The binding could not be persisted.
    #[error("registry write failed: {0}")]
    Registry(#[from] RegistryError),
}

/// Creates and binds mirror groups.
pub struct Provisioner {
    user: UserClientHandle,
    registry: ContactRegistry,
    chat_folder: String,
    official_folder: String,
    http: reqwest::Client,
}

impl Provisioner {
    /// Build a provisioner placing ordinary chats into `chat_folder` and
    /// official accounts into `official_folder`.
    pub fn new(
        user: UserClientHandle,
        registry: ContactRegistry,
        chat_folder: &str,
        official_folder: &str,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Arc::new(Self {
            user,
            registry,
            chat_folder: chat_folder.to_owned(),
            official_folder: official_folder.to_owned(),
            http,
        })
    }

    /// Provision (or return the existing) mirror group for `wxid`.
    pub async fn provision(
        &self,
        wxid: &str,
        name: &str,
        avatar_url: &str,
    ) -> Result<i64, ProvisionError> {
        if let Some(existing) = self.registry.check_existing_mapping(wxid).await? {
            return Ok(existing.chat_id);
        }

        let chat_id = self.user.create_group(name).await?;

        if let Err(e) = self.user.promote_bot(chat_id).await {
            warn!(chat_id, error = %e, "bot promotion failed, group left unconfigured");
        }

        if !avatar_url.is_empty() {
            if let Err(e) = self.upload_avatar(chat_id, avatar_url).await {
                warn!(chat_id, error = %e, "avatar upload failed");
            }
        }

        let folder = match peer_kind(wxid) {
            PeerKind::Official => &self.official_folder,
            _ => &self.chat_folder,
        };
        if let Err(e) = self.user.move_to_folder(chat_id, folder).await {
            warn!(chat_id, folder, error = %e, "folder placement failed");
        }

        let contact = Contact {
            chat_id,
            avatar_url: avatar_url.to_owned(),
            wx_name: name.to_owned(),
            ..Contact::unbound(wxid, name)
        };
        self.registry.save(&contact).await?;

        info!(wxid, chat_id, name, "mirror group provisioned");
        Ok(chat_id)
    }

    async fn upload_avatar(&self, chat_id: i64, url: &str) -> anyhow::Result<()> {
        let bytes = self
            .http
            .get(url)
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let jpeg = media::normalize_avatar(&bytes)?;
        self.user.set_group_photo(chat_id, jpeg).await?;
        Ok(())
    }
}
