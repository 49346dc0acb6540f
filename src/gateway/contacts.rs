//! Peer information and group-member lookups.
//!
//! `USER_INFO` resolves display names (remark beats nickname) and avatars.
//! Group chats additionally need per-member display names; those come from
//! `GROUP_MEMBER` and are cached on disk keyed by chatroom id, invalidated
//! by `ServerVersion` changes or a 2 h TTL.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Endpoint, GatewayClient, GatewayError};

/// Cache lifetime for group-member snapshots.
const CACHE_EXPIRE_SECS: i64 = 2 * 3600;

/// Fallback display name when the gateway knows nothing about a peer.
pub const UNKNOWN_USER: &str = "未知用户";

/// Resolved peer display info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Remark if set, else nickname, else [`UNKNOWN_USER`].
    pub name: String,
    /// Big avatar if present, else small, else empty.
    pub avatar_url: String,
}

impl GatewayClient {
    /// Resolve one peer's display name and avatar.
    pub async fn get_user_info(&self, to_wxid: &str) -> Result<UserInfo, GatewayError> {
        let data = self
            .call(
                Endpoint::UserInfo,
                json!({
                    "Wxid": self.my_wxid(),
                    "ChatRoom": "",
                    "Towxids": to_wxid,
                }),
            )
            .await?;

        let contact = data
            .get("ContactList")
            .and_then(|l| l.get(0))
            .ok_or_else(|| GatewayError::Decode("ContactList is empty".to_owned()))?;

        let field = |outer: &str| -> String {
            contact
                .get(outer)
                .and_then(|v| v.get("string").or(Some(v)))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let remark = field("Remark");
        let nickname = field("NickName");
        let name = if !remark.is_empty() {
            remark
        } else if !nickname.is_empty() {
            nickname
        } else {
            UNKNOWN_USER.to_owned()
        };

        let avatar = |key: &str| -> String {
            contact
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let big = avatar("BigHeadImgUrl");
        let avatar_url = if big.is_empty() {
            avatar("SmallHeadImgUrl")
        } else {
            big
        };

        Ok(UserInfo { name, avatar_url })
    }

    /// Page through the full contact list. Returns (official, others).
    pub async fn list_friends(&self) -> Result<(Vec<String>, Vec<String>), GatewayError> {
        let mut wx_seq = 0_i64;
        let mut chatroom_seq = 0_i64;
        let mut all: Vec<String> = Vec::new();

        loop {
            let data = self
                .call(
                    Endpoint::UserList,
                    json!({
                        "CurrentChatRoomContactSeq": chatroom_seq,
                        "CurrentWxcontactSeq": wx_seq,
                        "Wxid": self.my_wxid(),
                    }),
                )
                .await?;

            if let Some(list) = data.get("ContactUsernameList").and_then(Value::as_array) {
                all.extend(list.iter().filter_map(Value::as_str).map(str::to_owned));
            }

            let flag = data.get("CountinueFlag").and_then(Value::as_i64).unwrap_or(0);
            wx_seq = data
                .get("CurrentWxcontactSeq")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            chatroom_seq = data
                .get("CurrentChatRoomContactSeq")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if flag != 1 {
                break;
            }
        }

        let (official, others) = all.into_iter().partition(|c| c.starts_with("gh_"));
        Ok((official, others))
    }
}

// ── Group-member cache ──────────────────────────────────────────

/// One cached chatroom member.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub username: String,
    pub nickname: String,
    #[serde(rename = "displayname")]
    pub display_name: String,
}

/// Cached member snapshot for one chatroom.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupSnapshot {
    #[serde(rename = "serverVersion")]
    pub server_version: i64,
    #[serde(rename = "memberCount")]
    pub member_count: i64,
    #[serde(rename = "lastUpdate")]
    pub last_update: i64,
    #[serde(rename = "cacheExpiry")]
    pub cache_expiry: i64,
    pub members: Vec<GroupMember>,
}

/// Disk-backed cache of chatroom membership, shared behind a mutex.
pub struct GroupMemberCache {
    path: PathBuf,
    data: Mutex<HashMap<String, GroupSnapshot>>,
}

impl GroupMemberCache {
    /// Load (or lazily create) the cache at `path`.
    pub fn load(path: PathBuf) -> Self {
        let data = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// Resolve a member's display name inside a chatroom, refreshing the
    /// snapshot when the server version moved or the TTL expired. Returns an
    /// empty string for members the gateway does not list.
    pub async fn display_name(
        &self,
        gateway: &GatewayClient,
        chatroom_id: &str,
        username: &str,
    ) -> String {
        if let Err(e) = self.refresh(gateway, chatroom_id, false).await {
            warn!(chatroom_id, error = %e, "group member refresh failed, using stale cache");
        }

        let data = self.data.lock().await;
        data.get(chatroom_id)
            .and_then(|snap| snap.members.iter().find(|m| m.username == username))
            .map(|m| {
                if m.display_name.is_empty() {
                    m.nickname.clone()
                } else {
                    m.display_name.clone()
                }
            })
            .unwrap_or_default()
    }

    /// Drop one chatroom from the cache (used by `/quit`).
    pub async fn forget(&self, chatroom_id: &str) {
        let mut data = self.data.lock().await;
        if data.remove(chatroom_id).is_some() {
            Self::persist(&self.path, &data);
        }
    }

    async fn refresh(
        &self,
        gateway: &GatewayClient,
        chatroom_id: &str,
        force: bool,
    ) -> Result<(), GatewayError> {
        let now = chrono::Utc::now().timestamp();
        {
            let data = self.data.lock().await;
            if !force {
                if let Some(snap) = data.get(chatroom_id) {
                    if now < snap.cache_expiry {
                        // Fresh enough; a version check would need the same
                        // API round-trip as the refresh itself.
                        return Ok(());
                    }
                }
            }
        }

        let response = gateway
            .call(
                Endpoint::GroupMember,
                json!({ "QID": chatroom_id, "Wxid": gateway.my_wxid() }),
            )
            .await?;

        let server_version = response
            .get("ServerVersion")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        {
            let data = self.data.lock().await;
            if let Some(snap) = data.get(chatroom_id) {
                if !force && snap.server_version == server_version && now < snap.cache_expiry {
                    return Ok(());
                }
            }
        }

        let new_data = response
            .get("NewChatroomData")
            .cloned()
            .unwrap_or(Value::Null);
        let member_count = new_data
            .get("MemberCount")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let members = new_data
            .get("ChatRoomMember")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .map(|m| GroupMember {
                        username: str_of(m, "UserName"),
                        nickname: str_of(m, "NickName"),
                        display_name: str_of(m, "DisplayName"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let snapshot = GroupSnapshot {
            server_version,
            member_count,
            last_update: now,
            cache_expiry: now + CACHE_EXPIRE_SECS,
            members,
        };

        let mut data = self.data.lock().await;
        debug!(chatroom_id, server_version, member_count, "group member cache updated");
        data.insert(chatroom_id.to_owned(), snapshot);
        Self::persist(&self.path, &data);
        Ok(())
    }

    fn persist(path: &PathBuf, data: &HashMap<String, GroupSnapshot>) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(data) {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(path, serialized) {
                    warn!(path = %path.display(), error = %e, "failed to persist group cache");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize group cache"),
        }
    }
}

/// Member fields arrive either bare or `{string: ...}`-wrapped.
fn str_of(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str().or_else(|| v.get("string").and_then(Value::as_str)))
        .unwrap_or_default()
        .to_owned()
}
