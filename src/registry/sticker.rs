//! Sticker identity index.
//!
//! When a WeChat sticker is relayed to Telegram, its md5 and size are
//! recorded under the resulting `file_unique_id`. When the user later sends
//! the same sticker back, the md5+size pair re-sends it as a WeChat custom
//! emoji without re-uploading the binary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// One indexed sticker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerRecord {
    pub md5: String,
    pub size: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(rename = "stickerToEmojiMap", default)]
    map: BTreeMap<String, StickerRecord>,
}

/// Disk-backed sticker index keyed by Telegram `file_unique_id`.
pub struct StickerIndex {
    path: PathBuf,
    data: Mutex<IndexFile>,
}

impl StickerIndex {
    /// Load (or lazily create) the index at `path`.
    pub fn load(path: PathBuf) -> Self {
        let data = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// Look up by Telegram file unique id.
    pub async fn get(&self, file_unique_id: &str) -> Option<StickerRecord> {
        self.data.lock().await.map.get(file_unique_id).cloned()
    }

    /// Reverse lookup by WeChat md5.
    pub async fn find_by_md5(&self, md5: &str) -> Option<(String, StickerRecord)> {
        self.data
            .lock()
            .await
            .map
            .iter()
            .find(|(_, r)| r.md5 == md5)
            .map(|(id, r)| (id.clone(), r.clone()))
    }

    /// Record a sticker. Dedupes by md5: a second `file_unique_id` for a
    /// known md5 only replaces an unnamed older entry; otherwise the index
    /// is left untouched.
    pub async fn add(&self, file_unique_id: &str, md5: &str, size: u64, name: &str) {
        let mut data = self.data.lock().await;

        let existing = data
            .map
            .iter()
            .find(|(_, r)| r.md5 == md5)
            .map(|(id, r)| (id.clone(), r.clone()));

        match existing {
            Some((existing_id, record)) if existing_id == file_unique_id => {
                // Same sticker seen again; size and md5 are already stable.
                let _ = record;
                return;
            }
            Some((existing_id, record)) => {
                if !record.name.is_empty() {
                    return;
                }
                data.map.remove(&existing_id);
            }
            None => {}
        }

        data.map.insert(
            file_unique_id.to_owned(),
            StickerRecord {
                md5: md5.to_owned(),
                size,
                name: name.to_owned(),
            },
        );
        self.persist(&data);
    }

    fn persist(&self, data: &IndexFile) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(data) {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(&self.path, serialized) {
                    warn!(path = %self.path.display(), error = %e, "failed to persist sticker index");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize sticker index"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_index() -> (tempfile::TempDir, StickerIndex) {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = StickerIndex::load(dir.path().join("sticker.json"));
        (dir, index)
    }

    #[tokio::test]
    async fn add_and_lookup() {
        let (_dir, index) = temp_index();
        index.add("fu-1", "abc", 12_345, "").await;
        let record = index.get("fu-1").await.expect("hit");
        assert_eq!(record.md5, "abc");
        assert_eq!(record.size, 12_345);

        let (id, _) = index.find_by_md5("abc").await.expect("reverse hit");
        assert_eq!(id, "fu-1");
    }

    #[tokio::test]
    async fn duplicate_add_keeps_single_row() {
        let (dir, index) = temp_index();
        index.add("fu-1", "abc", 12_345, "").await;
        index.add("fu-1", "abc", 12_345, "").await;

        let record = index.get("fu-1").await.expect("hit");
        assert_eq!((record.md5.as_str(), record.size), ("abc", 12_345));

        let reloaded = StickerIndex::load(dir.path().join("sticker.json"));
        let file = reloaded.data.lock().await;
        assert_eq!(file.map.len(), 1);
    }

    #[tokio::test]
    async fn named_entry_not_displaced() {
        let (_dir, index) = temp_index();
        index.add("fu-1", "abc", 12_345, "smile").await;
        index.add("fu-2", "abc", 12_345, "").await;

        assert!(index.get("fu-1").await.is_some());
        assert!(index.get("fu-2").await.is_none());
    }

    #[tokio::test]
    async fn unnamed_entry_displaced_by_new_id() {
        let (_dir, index) = temp_index();
        index.add("fu-1", "abc", 12_345, "").await;
        index.add("fu-2", "abc", 12_345, "").await;

        assert!(index.get("fu-1").await.is_none());
        assert!(index.get("fu-2").await.is_some());
    }

    #[tokio::test]
    async fn persists_across_reload() {
        let (dir, index) = temp_index();
        index.add("fu-1", "abc", 1, "").await;
        drop(index);
        let reloaded = StickerIndex::load(dir.path().join("sticker.json"));
        assert!(reloaded.get("fu-1").await.is_some());
    }
}
