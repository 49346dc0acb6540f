//! Message-identifier correlation store.
//!
//! Every relayed message links a Telegram message id to its WeChat ids in an
//! append-only record, sharded into one JSON file per UTC day under
//! `msgid/YYYY-MM-DD.json`. The current day also lives in memory; lookups
//! consult the cache first and then walk back up to three daily files.
//! Writes go synchronously to both, serialized per file by an exclusive
//! lock taken with bounded retries.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Days searched on lookup, today inclusive.
const LOOKUP_WINDOW_DAYS: i64 = 3;

/// Lock acquisition attempts and spacing.
const LOCK_ATTEMPTS: u32 = 5;
const LOCK_RETRY_MS: u64 = 100;

/// Correlator errors.
#[derive(Debug, Error)]
pub enum CorrelatorError {
    /// Filesystem failure on a shard or its lock.
    #[error("shard I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Shard content did not parse.
    #[error("shard decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// The shard lock stayed busy through all retries.
    #[error("shard lock busy: {0}")]
    LockBusy(PathBuf),
}

/// One correlation record. Field names mirror the on-disk shard format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgMapping {
    /// Bot-API message id.
    #[serde(rename = "tgmsgid")]
    pub tg_msg_id: i64,
    /// User-session message id; 0 when not captured.
    #[serde(rename = "telethonmsgid", default)]
    pub telethon_msg_id: i64,
    /// Sending conversation endpoint.
    #[serde(rename = "fromwxid")]
    pub from_wxid: String,
    /// Receiving conversation endpoint (revocation target).
    #[serde(rename = "towxid")]
    pub to_wxid: String,
    /// Gateway `NewMsgId`.
    #[serde(rename = "msgid")]
    pub wx_msg_id: i64,
    /// Gateway `ClientMsgId` (revocation input).
    #[serde(rename = "clientmsgid", default)]
    pub client_msg_id: i64,
    /// Gateway `CreateTime` (revocation input).
    #[serde(rename = "createtime", default)]
    pub create_time: i64,
    /// First-line text, kept for quote fallback rendering.
    #[serde(default)]
    pub content: String,
}

struct DayCache {
    day: String,
    records: Vec<MsgMapping>,
}

/// The correlation store.
pub struct Correlator {
    dir: PathBuf,
    cache: Mutex<DayCache>,
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn day_offset(days_back: i64) -> String {
    (Utc::now() - ChronoDuration::days(days_back))
        .format("%Y-%m-%d")
        .to_string()
}

impl Correlator {
    /// Open the store rooted at `dir`, loading today's shard into memory.
    pub fn open(dir: PathBuf) -> Result<Self, CorrelatorError> {
        std::fs::create_dir_all(&dir)?;
        let day = today();
        let records = Self::read_shard(&dir.join(format!("{day}.json")))?;
        debug!(count = records.len(), %day, "loaded correlator day cache");
        Ok(Self {
            dir,
            cache: Mutex::new(DayCache { day, records }),
        })
    }

    fn shard_path(&self, day: &str) -> PathBuf {
        self.dir.join(format!("{day}.json"))
    }

    fn read_shard(path: &Path) -> Result<Vec<MsgMapping>, CorrelatorError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_shard(&self, day: &str) -> Result<std::fs::File, CorrelatorError> {
        let lock_path = self.dir.join(format!("{day}.json.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        for attempt in 0..LOCK_ATTEMPTS {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(_) if attempt + 1 < LOCK_ATTEMPTS => {
                    tokio::time::sleep(Duration::from_millis(LOCK_RETRY_MS)).await;
                }
                Err(_) => break,
            }
        }
        Err(CorrelatorError::LockBusy(lock_path))
    }

    /// Record (or update in place) a mapping for today.
    ///
    /// At most one record per `tg_msg_id` exists across the window; inserts
    /// with the same key replace the stored record.
    pub async fn add(&self, mapping: MsgMapping) -> Result<(), CorrelatorError> {
        let day = today();

        // Memory first, so same-day lookups see the write immediately.
        {
            let mut cache = self.cache.lock().await;
            if cache.day != day {
                cache.day = day.clone();
                cache.records = Self::read_shard(&self.shard_path(&day))?;
            }
            upsert(&mut cache.records, mapping.clone());
        }

        let lock = self.lock_shard(&day).await?;
        let path = self.shard_path(&day);
        let result = (|| -> Result<(), CorrelatorError> {
            let mut records = Self::read_shard(&path)?;
            upsert(&mut records, mapping);
            let serialized = serde_json::to_string_pretty(&records)?;
            std::fs::write(&path, serialized)?;
            Ok(())
        })();
        let _ = FileExt::unlock(&lock);
        result
    }

    /// Full record for a Telegram message id.
    pub async fn tg_to_wx(&self, tg_msg_id: i64) -> Option<MsgMapping> {
        self.find(|m| m.tg_msg_id == tg_msg_id).await
    }

    /// Telegram message id for a WeChat `NewMsgId`.
    pub async fn wx_to_tg(&self, wx_msg_id: i64) -> Option<i64> {
        self.find(|m| m.wx_msg_id == wx_msg_id).await.map(|m| m.tg_msg_id)
    }

    /// Full record for a user-session message id.
    pub async fn telethon_to_wx(&self, telethon_msg_id: i64) -> Option<MsgMapping> {
        if telethon_msg_id == 0 {
            return None;
        }
        self.find(|m| m.telethon_msg_id == telethon_msg_id).await
    }

    /// All Telegram message ids originated by one wxid within the window.
    pub async fn by_from_wxid(&self, from_wxid: &str) -> Vec<i64> {
        let mut out: Vec<i64> = Vec::new();
        let mut push = |records: &[MsgMapping]| {
            for m in records.iter().filter(|m| m.from_wxid == from_wxid) {
                if !out.contains(&m.tg_msg_id) {
                    out.push(m.tg_msg_id);
                }
            }
        };

        let cache = self.cache.lock().await;
        push(&cache.records);
        let cache_day = cache.day.clone();
        drop(cache);

        for back in 0..LOOKUP_WINDOW_DAYS {
            let day = day_offset(back);
            if day == cache_day {
                continue;
            }
            if let Ok(records) = Self::read_shard(&self.shard_path(&day)) {
                push(&records);
            }
        }
        out
    }

    async fn find(&self, pred: impl Fn(&MsgMapping) -> bool) -> Option<MsgMapping> {
        let cache = self.cache.lock().await;
        if let Some(hit) = cache.records.iter().find(|m| pred(m)) {
            return Some(hit.clone());
        }
        let cache_day = cache.day.clone();
        drop(cache);

        for back in 0..LOOKUP_WINDOW_DAYS {
            let day = day_offset(back);
            if day == cache_day {
                continue;
            }
            match Self::read_shard(&self.shard_path(&day)) {
                Ok(records) => {
                    if let Some(hit) = records.into_iter().find(|m| pred(m)) {
                        return Some(hit);
                    }
                }
                Err(e) => warn!(%day, error = %e, "failed to read correlator shard"),
            }
        }
        None
    }
}

fn upsert(records: &mut Vec<MsgMapping>, mapping: MsgMapping) {
    match records.iter_mut().find(|m| m.tg_msg_id == mapping.tg_msg_id) {
        Some(slot) => *slot = mapping,
        None => records.push(mapping),
    }
}

// ── Tests ───────────────────────────────────────────────────────
