//! Media retrieval from the gateway.
//!
//! Images, videos and file attachments come down in 64 KiB chunks; voices
//! and stickers are single-shot. Images try a CDN decode first. Every
//! download lands in the content-addressed cache
//! `download/<kind>/<md5>.<ext>`, and an existing cache file short-circuits
//! the network entirely.

use std::path::{Path, PathBuf};

use base64::Engine;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::wechat::xml::{FileAttach, ImageInfo, StickerInfo, VideoInfo, VoiceInfo};

use super::{Endpoint, GatewayClient, GatewayError};

/// Chunk size for sectioned downloads.
pub const CHUNK_SIZE: u64 = 65_536;

/// What the sectioned endpoints address: a message or a file attachment.
enum ChunkTarget<'a> {
    Msg {
        endpoint: Endpoint,
        msg_id: i64,
        to_wxid: &'a str,
    },
    Attach {
        app_id: &'a str,
        attach_id: &'a str,
    },
}

impl ChunkTarget<'_> {
    fn endpoint(&self) -> Endpoint {
        match self {
            ChunkTarget::Msg { endpoint, .. } => *endpoint,
            ChunkTarget::Attach { .. } => Endpoint::GetFile,
        }
    }

    /// Section request body. `total` is omitted on the adaptive probe.
    fn payload(&self, wxid: &str, total: Option<u64>, offset: u64, chunk: u64) -> Value {
        let section = json!({ "DataLen": chunk, "StartPos": offset });
        let mut body = match self {
            ChunkTarget::Msg { msg_id, to_wxid, .. } => json!({
                "CompressType": 0,
                "MsgId": msg_id,
                "Section": section,
                "Wxid": wxid,
                "ToWxid": to_wxid,
            }),
            ChunkTarget::Attach { app_id, attach_id } => json!({
                "AppID": app_id,
                "AttachId": attach_id,
                "Section": section,
                "UserName": "",
                "Wxid": wxid,
            }),
        };
        if let Some(total) = total {
            body["DataLen"] = json!(total);
        }
        body
    }
}

/// Strip an optional `data:...,` prefix and decode base64.
fn decode_base64(data: &str) -> Result<Vec<u8>, GatewayError> {
    let payload = match data.split_once(',') {
        Some((_, tail)) => tail,
        None => data,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| GatewayError::Download(format!("invalid base64 payload: {e}")))
}

fn buffer_of(data: &Value) -> Option<&str> {
    data.get("data")?.get("buffer")?.as_str()
}

fn ensure_dir(path: &Path) -> Result<(), GatewayError> {
    std::fs::create_dir_all(path)
        .map_err(|e| GatewayError::Download(format!("cannot create {}: {e}", path.display())))
}

fn write_cache(path: &Path, bytes: &[u8]) -> Result<(), GatewayError> {
    std::fs::write(path, bytes)
        .map_err(|e| GatewayError::Download(format!("cannot write {}: {e}", path.display())))
}

impl GatewayClient {
    /// Download an image, preferring the single CDN decode.
    ///
    /// Falls back to the chunked path when no CDN URL is present or the CDN
    /// response carries no image.
    pub async fn download_image(
        &self,
        msg_id: i64,
        from_wxid: &str,
        info: &ImageInfo,
        dir: &Path,
    ) -> Result<PathBuf, GatewayError> {
        ensure_dir(dir)?;
        let name = if info.md5.is_empty() {
            format!("{msg_id}_{from_wxid}.png")
        } else {
            format!("{}.png", info.md5)
        };
        let path = dir.join(name);
        if path.exists() {
            return Ok(path);
        }

        if let Some(cdn_url) = info.best_cdn_url() {
            match self.cdn_image(&info.aes_key, cdn_url).await {
                Ok(bytes) => {
                    write_cache(&path, &bytes)?;
                    return Ok(path);
                }
                Err(e) => {
                    debug!(error = %e, "CDN image decode failed, falling back to chunks");
                }
            }
        }

        let target = ChunkTarget::Msg {
            endpoint: Endpoint::GetImage,
            msg_id,
            to_wxid: from_wxid,
        };
        let bytes = self.chunked(&target, info.length).await?;
        write_cache(&path, &bytes)?;
        Ok(path)
    }

    async fn cdn_image(&self, aes_key: &str, cdn_url: &str) -> Result<Vec<u8>, GatewayError> {
        let data = self
            .call(
                Endpoint::GetImageCdn,
                json!({
                    "FileAesKey": aes_key,
                    "FileNo": cdn_url,
                    "Wxid": self.my_wxid(),
                }),
            )
            .await?;
        let image = data
            .get("Image")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Download("CDN response carries no Image".to_owned()))?;
        decode_base64(image)
    }

    /// Download a video through the chunked path.
    pub async fn download_video(
        &self,
        msg_id: i64,
        from_wxid: &str,
        info: &VideoInfo,
        dir: &Path,
    ) -> Result<PathBuf, GatewayError> {
        ensure_dir(dir)?;
        let path = dir.join(format!("{}.mp4", info.md5));
        if path.exists() {
            return Ok(path);
        }
        let target = ChunkTarget::Msg {
            endpoint: Endpoint::GetVideo,
            msg_id,
            to_wxid: from_wxid,
        };
        let bytes = self.chunked(&target, info.length).await?;
        write_cache(&path, &bytes)?;
        Ok(path)
    }

    /// Download a file attachment through the chunked path (attach-id
    /// addressing).
    pub async fn download_attachment(
        &self,
        attach: &FileAttach,
        dir: &Path,
    ) -> Result<PathBuf, GatewayError> {
        ensure_dir(dir)?;
        let name = if attach.title.is_empty() {
            format!("{}.{}", attach.md5, attach.file_ext)
        } else {
            attach.title.clone()
        };
        let path = dir.join(name);
        if path.exists() {
            return Ok(path);
        }
        let target = ChunkTarget::Attach {
            app_id: &attach.app_id,
            attach_id: &attach.attach_id,
        };
        let bytes = self.chunked(&target, attach.total_len).await?;
        write_cache(&path, &bytes)?;
        Ok(path)
    }

    /// Download a voice clip (single-shot, base64 SILK payload).
    pub async fn download_voice(
        &self,
        msg_id: i64,
        from_wxid: &str,
        info: &VoiceInfo,
        dir: &Path,
    ) -> Result<PathBuf, GatewayError> {
        ensure_dir(dir)?;
        let path = dir.join(format!("{}.silk", info.aes_key));
        if path.exists() {
            return Ok(path);
        }

        let data = self
            .call(
                Endpoint::GetVoice,
                json!({
                    "Bufid": info.buf_id,
                    "FromUserName": from_wxid,
                    "Length": info.length,
                    "MsgId": msg_id,
                    "Wxid": self.my_wxid(),
                }),
            )
            .await?;
        let buffer = buffer_of(&data)
            .ok_or_else(|| GatewayError::Download("voice response carries no buffer".to_owned()))?;
        let bytes = decode_base64(buffer)?;
        write_cache(&path, &bytes)?;
        Ok(path)
    }

    /// Download an animated sticker: fetch its CDN URL directly, asking the
    /// gateway for a URL when the descriptor has none.
    pub async fn download_emoji(
        &self,
        info: &StickerInfo,
        dir: &Path,
    ) -> Result<PathBuf, GatewayError> {
        ensure_dir(dir)?;
        let path = dir.join(format!("{}.gif", info.md5));
        if path.exists() {
            return Ok(path);
        }

        let url = if info.cdn_url.is_empty() {
            self.emoji_url(&info.md5).await?
        } else {
            info.cdn_url.clone()
        };

        let resp = self
            .http_get(&url)
            .await
            .map_err(|e| GatewayError::Download(format!("emoji fetch failed: {e}")))?;
        write_cache(&path, &resp)?;
        Ok(path)
    }

    async fn emoji_url(&self, md5: &str) -> Result<String, GatewayError> {
        let data = self
            .call(
                Endpoint::GetEmoji,
                json!({ "Md5": md5, "Wxid": self.my_wxid() }),
            )
            .await?;
        let url = data
            .get("url")
            .and_then(Value::as_str)
            .or_else(|| {
                data.get("emojiList")
                    .and_then(|l| l.get(0))
                    .and_then(|e| e.get("url"))
                    .and_then(Value::as_str)
            })
            .ok_or_else(|| GatewayError::Download("emoji response carries no url".to_owned()))?;
        Ok(url.to_owned())
    }

    /// Plain GET used for CDN-hosted sticker bodies.
    async fn http_get(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let resp = reqwest::get(url).await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// The sectioned download loop.
    ///
    /// If the first chunk response lacks a buffer, one adaptive retry
    /// re-probes without a top-level `DataLen`, adopts the gateway's
    /// `totalLen`, and restarts from offset 0. The gateway's figure wins
    /// even when smaller than the descriptor's; a short figure truncates
    /// the tail.
    async fn chunked(
        &self,
        target: &ChunkTarget<'_>,
        total_len: u64,
    ) -> Result<Vec<u8>, GatewayError> {
        let mut total = total_len;
        let mut collected: Vec<u8> = Vec::with_capacity(total as usize);
        let mut offset = 0_u64;
        let mut adaptive_retry_used = false;

        loop {
            let chunk = CHUNK_SIZE.min(total.saturating_sub(offset));
            let body = target.payload(self.my_wxid(), Some(total), offset, chunk);
            let data = self.call(target.endpoint(), body).await?;

            match buffer_of(&data) {
                Some(b64) => {
                    let bytes = decode_base64(b64)?;
                    debug!(offset, size = bytes.len(), "received section");
                    collected.extend_from_slice(&bytes);
                    offset = offset.saturating_add(chunk);
                    if offset >= total {
                        return Ok(collected);
                    }
                }
                None if offset == 0 && !adaptive_retry_used => {
                    adaptive_retry_used = true;
                    let probe = target.payload(self.my_wxid(), None, 0, CHUNK_SIZE);
                    let probe_data = self.call(target.endpoint(), probe).await?;
                    let new_total = probe_data
                        .get("totalLen")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            GatewayError::Download("adaptive probe carries no totalLen".to_owned())
                        })?;
                    warn!(descriptor_len = total, total_len = new_total, "adopting gateway totalLen");
                    total = new_total;
                    collected.clear();
                    offset = 0;
                }
                None => {
                    return Err(GatewayError::Download(
                        "section response carries no buffer".to_owned(),
                    ));
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_with_and_without_header() {
        assert_eq!(decode_base64("aGk=").expect("decode"), b"hi");
        assert_eq!(
            decode_base64("data:image/png;base64,aGk=").expect("decode"),
            b"hi"
        );
        assert!(decode_base64("!!!").is_err());
    }

    #[test]
    fn buffer_extraction() {
        let data = json!({"data": {"buffer": "aGk="}});
        assert_eq!(buffer_of(&data), Some("aGk="));
        assert_eq!(buffer_of(&json!({"data": {}})), None);
        assert_eq!(buffer_of(&json!({})), None);
    }

    #[test]
    fn msg_payload_shape() {
        let target = ChunkTarget::Msg {
            endpoint: Endpoint::GetImage,
            msg_id: 7,
            to_wxid: "u1",
        };
        let body = target.payload("me", Some(100_000), 65_536, 34_464);
        assert_eq!(body["DataLen"], 100_000);
        assert_eq!(body["MsgId"], 7);
        assert_eq!(body["Section"]["StartPos"], 65_536);
        assert_eq!(body["Section"]["DataLen"], 34_464);
        assert_eq!(body["ToWxid"], "u1");
        assert_eq!(body["CompressType"], 0);
    }

    #[test]
    fn probe_payload_omits_total() {
        let target = ChunkTarget::Msg {
            endpoint: Endpoint::GetImage,
            msg_id: 7,
            to_wxid: "u1",
        };
        let body = target.payload("me", None, 0, CHUNK_SIZE);
        assert!(body.get("DataLen").is_none());
        assert_eq!(body["Section"]["DataLen"], CHUNK_SIZE);
    }

    #[test]
    fn attach_payload_shape() {
        let target = ChunkTarget::Attach {
            app_id: "wx1",
            attach_id: "@att",
        };
        let body = target.payload("me", Some(10), 0, 10);
        assert_eq!(body["AppID"], "wx1");
        assert_eq!(body["AttachId"], "@att");
        assert_eq!(body["UserName"], "");
        assert!(body.get("MsgId").is_none());
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cached = dir.path().join("abc.png");
        std::fs::write(&cached, b"cached").expect("write");

        // Unreachable gateway: a network attempt would error.
        let client = GatewayClient::new("http://127.0.0.1:1", "me");
        let info = ImageInfo {
            md5: "abc".to_owned(),
            length: 6,
            ..ImageInfo::default()
        };
        let path = client
            .download_image(1, "u1", &info, dir.path())
            .await
            .expect("cache hit");
        assert_eq!(path, cached);
    }
}
