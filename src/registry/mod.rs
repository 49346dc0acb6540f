//! Persistent contact registry.
//!
//! One SQLite table keyed by `wxid` maps every known WeChat peer to its
//! mirror group. `chat_id` holds the sentinel [`UNBOUND_CHAT_ID`] until a
//! group is provisioned. Boolean fields accept the `"toggle"` sentinel in
//! partial updates so commands can flip them without reading first.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UNBOUND_CHAT_ID;
use crate::wechat::{peer_kind, PeerKind};

pub mod sticker;

pub use sticker::{StickerIndex, StickerRecord};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Import/export (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Import/export file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One WeChat peer and its binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// WeChat identifier (primary key).
    pub wxid: String,
    /// Display name, remark-overridable.
    pub name: String,
    /// Bound Telegram chat id, or [`UNBOUND_CHAT_ID`].
    pub chat_id: i64,
    /// Group-chat flag, derived from the wxid but stored.
    pub is_group: bool,
    /// When false, inbound messages from this peer are dropped silently.
    pub is_receive: bool,
    /// Avatar URL captured at provisioning/update time.
    pub avatar_url: String,
    /// Original WeChat nickname, for audit.
    pub wx_name: String,
}

impl Contact {
    /// A fresh unbound contact for `wxid`.
    pub fn unbound(wxid: &str, name: &str) -> Self {
        Self {
            wxid: wxid.to_owned(),
            name: name.to_owned(),
            chat_id: UNBOUND_CHAT_ID,
            is_group: peer_kind(wxid) == PeerKind::Chatroom,
            is_receive: true,
            avatar_url: String::new(),
            wx_name: String::new(),
        }
    }

    /// Whether a mirror group is bound.
    pub fn is_bound(&self) -> bool {
        self.chat_id != UNBOUND_CHAT_ID
    }
}

/// JSON wire form for import/export and seed files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactWire {
    #[serde(rename = "wxId")]
    pub wx_id: String,
    pub name: String,
    #[serde(rename = "chatId")]
    pub chat_id: i64,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    #[serde(rename = "isReceive")]
    pub is_receive: bool,
    #[serde(rename = "avatarLink", default)]
    pub avatar_link: String,
    #[serde(rename = "wxName", default)]
    pub wx_name: String,
}

impl From<Contact> for ContactWire {
    fn from(c: Contact) -> Self {
        Self {
            wx_id: c.wxid,
            name: c.name,
            chat_id: c.chat_id,
            is_group: c.is_group,
            is_receive: c.is_receive,
            avatar_link: c.avatar_url,
            wx_name: c.wx_name,
        }
    }
}

impl From<ContactWire> for Contact {
    fn from(w: ContactWire) -> Self {
        Self {
            wxid: w.wx_id,
            name: w.name,
            chat_id: w.chat_id,
            is_group: w.is_group,
            is_receive: w.is_receive,
            avatar_url: w.avatar_link,
            wx_name: w.wx_name,
        }
    }
}

/// A boolean field update: a literal value or the `"toggle"` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolPatch {
    /// Set to the given value.
    Set(bool),
    /// Flip the stored value.
    Toggle,
}

impl BoolPatch {
    fn apply(self, current: bool) -> bool {
        match self {
            BoolPatch::Set(v) => v,
            BoolPatch::Toggle => !current,
        }
    }
}

impl<'de> Deserialize<'de> for BoolPatch {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Bool(v) => Ok(BoolPatch::Set(v)),
            Raw::Text(s) if s == "toggle" => Ok(BoolPatch::Toggle),
            Raw::Text(other) => Err(serde::de::Error::custom(format!(
                "expected bool or \"toggle\", got {other:?}"
            ))),
        }
    }
}

/// Partial update applied by chat id. Absent fields stay untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactPatch {
    pub name: Option<String>,
    #[serde(rename = "chatId")]
    pub chat_id: Option<i64>,
    #[serde(rename = "isGroup")]
    pub is_group: Option<BoolPatch>,
    #[serde(rename = "isReceive")]
    pub is_receive: Option<BoolPatch>,
    #[serde(rename = "avatarLink")]
    pub avatar_url: Option<String>,
    #[serde(rename = "wxName")]
    pub wx_name: Option<String>,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContactStats {
    pub total: i64,
    pub groups: i64,
    pub personal: i64,
    pub bound: i64,
    pub receiving: i64,
}

/// The contact registry backed by SQLite.
#[derive(Clone)]
pub struct ContactRegistry {
    db: SqlitePool,
}

impl ContactRegistry {
    /// Open (creating if needed) the registry at `path`.
    pub async fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let db = SqlitePoolOptions::new().connect_with(options).await?;
        let registry = Self { db };
        registry.migrate().await?;
        Ok(registry)
    }

    /// In-memory registry for tests.
    pub async fn open_in_memory() -> Result<Self, RegistryError> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let registry = Self { db };
        registry.migrate().await?;
        Ok(registry)
    }

    async fn migrate(&self) -> Result<(), RegistryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS contacts (
                wxid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                chat_id INTEGER DEFAULT -9999999999,
                is_group INTEGER DEFAULT 0,
                is_receive INTEGER DEFAULT 1,
                avatar_link TEXT DEFAULT '',
                wx_name TEXT DEFAULT ''
            )",
        )
        .execute(&self.db)
        .await?;
        for index in [
            "CREATE INDEX IF NOT EXISTS idx_contacts_chat_id ON contacts(chat_id)",
            "CREATE INDEX IF NOT EXISTS idx_contacts_name ON contacts(name)",
            "CREATE INDEX IF NOT EXISTS idx_contacts_is_group ON contacts(is_group)",
            "CREATE INDEX IF NOT EXISTS idx_contacts_is_receive ON contacts(is_receive)",
        ] {
            sqlx::query(index).execute(&self.db).await?;
        }
        Ok(())
    }

    fn row_to_contact(row: &sqlx::sqlite::SqliteRow) -> Contact {
        Contact {
            wxid: row.get("wxid"),
            name: row.get("name"),
            chat_id: row.get("chat_id"),
            is_group: row.get::<i64, _>("is_group") != 0,
            is_receive: row.get::<i64, _>("is_receive") != 0,
            avatar_url: row.get("avatar_link"),
            wx_name: row.get("wx_name"),
        }
    }

    /// Fetch by wxid.
    pub async fn get(&self, wxid: &str) -> Result<Option<Contact>, RegistryError> {
        let row = sqlx::query("SELECT * FROM contacts WHERE wxid = ?1")
            .bind(wxid)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.as_ref().map(Self::row_to_contact))
    }

    /// Fetch by bound Telegram chat id.
    pub async fn get_by_chat_id(&self, chat_id: i64) -> Result<Option<Contact>, RegistryError> {
        let row = sqlx::query("SELECT * FROM contacts WHERE chat_id = ?1")
            .bind(chat_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.as_ref().map(Self::row_to_contact))
    }

    /// Substring search over names; the empty string returns everything,
    /// ordered by name.
    pub async fn search_by_name(&self, substring: &str) -> Result<Vec<Contact>, RegistryError> {
        let rows = if substring.is_empty() {
            sqlx::query("SELECT * FROM contacts ORDER BY name")
                .fetch_all(&self.db)
                .await?
        } else {
            sqlx::query("SELECT * FROM contacts WHERE name LIKE ?1 ORDER BY name")
                .bind(format!("%{substring}%"))
                .fetch_all(&self.db)
                .await?
        };
        Ok(rows.iter().map(Self::row_to_contact).collect())
    }

    /// Insert or replace.
    pub async fn save(&self, contact: &Contact) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT OR REPLACE INTO contacts
                (wxid, name, chat_id, is_group, is_receive, avatar_link, wx_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&contact.wxid)
        .bind(&contact.name)
        .bind(contact.chat_id)
        .bind(i64::from(contact.is_group))
        .bind(i64::from(contact.is_receive))
        .bind(&contact.avatar_url)
        .bind(&contact.wx_name)
        .execute(&self.db)
        .await?;
        debug!(wxid = %contact.wxid, chat_id = contact.chat_id, "contact saved");
        Ok(())
    }

    /// Hard delete by wxid. Returns whether a row was removed.
    pub async fn delete(&self, wxid: &str) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM contacts WHERE wxid = ?1")
            .bind(wxid)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hard delete by chat id. Returns whether a row was removed.
    pub async fn delete_by_chat_id(&self, chat_id: i64) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM contacts WHERE chat_id = ?1")
            .bind(chat_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Partial update addressed by chat id; boolean fields honour the
    /// `"toggle"` sentinel. Returns false when no contact matches.
    pub async fn update_by_chat_id(
        &self,
        chat_id: i64,
        patch: &ContactPatch,
    ) -> Result<bool, RegistryError> {
        let Some(mut contact) = self.get_by_chat_id(chat_id).await? else {
            warn!(chat_id, "update requested for unknown chat id");
            return Ok(false);
        };
        if let Some(name) = &patch.name {
            contact.name = name.clone();
        }
        if let Some(new_chat_id) = patch.chat_id {
            contact.chat_id = new_chat_id;
        }
        if let Some(p) = patch.is_group {
            contact.is_group = p.apply(contact.is_group);
        }
        if let Some(p) = patch.is_receive {
            contact.is_receive = p.apply(contact.is_receive);
        }
        if let Some(url) = &patch.avatar_url {
            contact.avatar_url = url.clone();
        }
        if let Some(wx_name) = &patch.wx_name {
            contact.wx_name = wx_name.clone();
        }
        self.save(&contact).await?;
        Ok(true)
    }

    /// A contact that already has a real binding, if any.
    pub async fn check_existing_mapping(
        &self,
        wxid: &str,
    ) -> Result<Option<Contact>, RegistryError> {
        let row = sqlx::query("SELECT * FROM contacts WHERE wxid = ?1 AND chat_id != ?2")
            .bind(wxid)
            .bind(UNBOUND_CHAT_ID)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.as_ref().map(Self::row_to_contact))
    }

    /// Import contacts from a JSON seed file. Returns the imported count.
    pub async fn import_json(&self, path: &Path) -> Result<usize, RegistryError> {
        let text = std::fs::read_to_string(path)?;
        let wire: Vec<ContactWire> = serde_json::from_str(&text)?;
        let count = wire.len();
        for entry in wire {
            self.save(&entry.into()).await?;
        }
        info!(count, path = %path.display(), "contacts imported");
        Ok(count)
    }

    /// Export all contacts to a JSON file. Returns the exported count.
    pub async fn export_json(&self, path: &Path) -> Result<usize, RegistryError> {
        let contacts = self.search_by_name("").await?;
        let wire: Vec<ContactWire> = contacts.into_iter().map(ContactWire::from).collect();
        let count = wire.len();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&wire)?)?;
        info!(count, path = %path.display(), "contacts exported");
        Ok(count)
    }

    /// Merge wxids discovered by a contact sync, leaving known rows alone.
    /// Returns how many new rows were created.
    pub async fn merge_discovered(
        &self,
        wxids: &[String],
        names: &HashMap<String, String>,
    ) -> Result<usize, RegistryError> {
        let mut created = 0;
        for wxid in wxids {
            if self.get(wxid).await?.is_none() {
                let name = names.get(wxid).cloned().unwrap_or_else(|| wxid.clone());
                self.save(&Contact::unbound(wxid, &name)).await?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> Result<ContactStats, RegistryError> {
        let count = |sql: &'static str| async move {
            sqlx::query_scalar::<_, i64>(sql).fetch_one(&self.db).await
        };
        let total = count("SELECT COUNT(*) FROM contacts").await?;
        let groups = count("SELECT COUNT(*) FROM contacts WHERE is_group = 1").await?;
        let bound =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM contacts WHERE chat_id != ?1")
                .bind(UNBOUND_CHAT_ID)
                .fetch_one(&self.db)
                .await?;
        let receiving = count("SELECT COUNT(*) FROM contacts WHERE is_receive = 1").await?;
        Ok(ContactStats {
            total,
            groups,
            personal: total - groups,
            bound,
            receiving,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with(contacts: &[Contact]) -> ContactRegistry {
        let registry = ContactRegistry::open_in_memory().await.expect("open");
        for c in contacts {
            registry.save(c).await.expect("save");
        }
        registry
    }

    fn bound(wxid: &str, name: &str, chat_id: i64) -> Contact {
        Contact {
            chat_id,
            ..Contact::unbound(wxid, name)
        }
    }

    #[tokio::test]
    async fn save_get_roundtrip() {
        let registry = registry_with(&[bound("u1", "Alice", -100_123)]).await;
        let contact = registry.get("u1").await.expect("query").expect("hit");
        assert_eq!(contact.name, "Alice");
        assert_eq!(contact.chat_id, -100_123);
        assert!(contact.is_receive);
        assert!(registry.get("nobody").await.expect("query").is_none());
    }

    #[tokio::test]
    async fn chat_id_lookup_and_delete() {
        let registry = registry_with(&[bound("u1", "Alice", -100_123)]).await;
        let contact = registry
            .get_by_chat_id(-100_123)
            .await
            .expect("query")
            .expect("hit");
        assert_eq!(contact.wxid, "u1");

        assert!(registry.delete_by_chat_id(-100_123).await.expect("delete"));
        assert!(!registry.delete_by_chat_id(-100_123).await.expect("delete"));
    }

    #[tokio::test]
    async fn search_empty_returns_all_ordered() {
        let registry = registry_with(&[
            bound("u2", "bob", 2),
            bound("u1", "alice", 1),
            bound("u3", "carol", 3),
        ])
        .await;
        let all = registry.search_by_name("").await.expect("search");
        let names: Vec<&str> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);

        let hits = registry.search_by_name("aro").await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "carol");
    }

    #[tokio::test]
    async fn toggle_sentinel_flips_booleans() {
        let registry = registry_with(&[bound("u1", "Alice", -100_123)]).await;
        let patch = ContactPatch {
            is_receive: Some(BoolPatch::Toggle),
            ..ContactPatch::default()
        };
        assert!(registry
            .update_by_chat_id(-100_123, &patch)
            .await
            .expect("update"));
        let contact = registry.get("u1").await.expect("query").expect("hit");
        assert!(!contact.is_receive);

        assert!(registry
            .update_by_chat_id(-100_123, &patch)
            .await
            .expect("update"));
        let contact = registry.get("u1").await.expect("query").expect("hit");
        assert!(contact.is_receive);
    }

    #[test]
    fn toggle_sentinel_parses_from_json() {
        let patch: ContactPatch =
            serde_json::from_str(r#"{"isReceive": "toggle"}"#).expect("parse");
        assert_eq!(patch.is_receive, Some(BoolPatch::Toggle));
        let patch: ContactPatch = serde_json::from_str(r#"{"isReceive": false}"#).expect("parse");
        assert_eq!(patch.is_receive, Some(BoolPatch::Set(false)));
        assert!(serde_json::from_str::<ContactPatch>(r#"{"isReceive": "flip"}"#).is_err());
    }

    #[tokio::test]
    async fn unbind_clears_chat_id() {
        let registry = registry_with(&[bound("u1", "Alice", -100_123)]).await;
        let patch = ContactPatch {
            chat_id: Some(UNBOUND_CHAT_ID),
            ..ContactPatch::default()
        };
        registry
            .update_by_chat_id(-100_123, &patch)
            .await
            .expect("update");
        let contact = registry.get("u1").await.expect("query").expect("hit");
        assert!(!contact.is_bound());
        assert!(registry
            .check_existing_mapping("u1")
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn export_import_yields_equal_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contact.json");

        let source = registry_with(&[
            bound("u1", "Alice", -100_123),
            bound("123@chatroom", "Team", -100_456),
            Contact::unbound("gh_news", "News"),
        ])
        .await;
        assert_eq!(source.export_json(&path).await.expect("export"), 3);

        let target = ContactRegistry::open_in_memory().await.expect("open");
        assert_eq!(target.import_json(&path).await.expect("import"), 3);

        let mut a = source.search_by_name("").await.expect("all");
        let mut b = target.search_by_name("").await.expect("all");
        a.sort_by(|x, y| x.wxid.cmp(&y.wxid));
        b.sort_by(|x, y| x.wxid.cmp(&y.wxid));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn wire_field_names() {
        let wire = ContactWire::from(bound("u1", "Alice", -1));
        let json = serde_json::to_string(&wire).expect("serialize");
        for key in ["wxId", "chatId", "isGroup", "isReceive", "avatarLink", "wxName"] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[tokio::test]
    async fn stats_counts_bound_and_groups() {
        let registry = registry_with(&[
            bound("u1", "Alice", -100_123),
            bound("123@chatroom", "Team", -100_456),
            Contact::unbound("u2", "Bob"),
            Contact {
                is_receive: false,
                ..Contact::unbound("u3", "Mallory")
            },
        ])
        .await;
        let stats = registry.stats().await.expect("stats");
        assert_eq!(stats.total, 4);
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.personal, 3);
        assert_eq!(stats.bound, 2);
        assert_eq!(stats.receiving, 3);
    }

    #[tokio::test]
    async fn merge_discovered_keeps_existing() {
        let registry = registry_with(&[bound("u1", "Alice", -100_123)]).await;
        let names = HashMap::from([("u2".to_owned(), "Bob".to_owned())]);
        let created = registry
            .merge_discovered(
                &["u1".to_owned(), "u2".to_owned()],
                &names,
            )
            .await
            .expect("merge");
        assert_eq!(created, 1);

        // Existing binding untouched.
        let alice = registry.get("u1").await.expect("query").expect("hit");
        assert_eq!(alice.chat_id, -100_123);
        // New row unbound.
        let bob = registry.get("u2").await.expect("query").expect("hit");
        assert!(!bob.is_bound());
    }
}
