//! Media conversion: voice codecs, sticker formats, avatars.
//!
//! WeChat voices are SILK; Telegram voices are OGG/Opus. Both directions go
//! through raw PCM, with `ffmpeg` and the `silk_v3` coder binaries driven as
//! child processes. Images are handled in-process with the `image` crate.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Sample rate used when decoding SILK for Telegram.
const SILK_DECODE_RATE: u32 = 24_000;

/// Sample rate used when encoding SILK for WeChat.
const SILK_ENCODE_RATE: u32 = 44_100;

/// Minimum avatar edge Telegram accepts without visible upscaling.
const AVATAR_MIN_SIZE: u32 = 512;

/// Media pipeline errors.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A codec child process failed.
    #[error("{tool} failed: {detail}")]
    Tool { tool: &'static str, detail: String },
    /// Image decode/encode failure.
    #[error("image error: {0}")]
    Image(#[from] image::error::ImageError),
    /// Format the bridge cannot convert.
    #[error("unsupported media: {0}")]
    Unsupported(String),
}

async fn run(tool: &'static str, args: &[&str]) -> Result<(), MediaError> {
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| MediaError::Tool {
            tool,
            detail: format!("spawn failed: {e}"),
        })?;
    if !output.status.success() {
        return Err(MediaError::Tool {
            tool,
            detail: String::from_utf8_lossy(&output.stderr)
                .lines()
                .last()
                .unwrap_or("unknown error")
                .to_owned(),
        });
    }
    Ok(())
}

// ── Voice ───────────────────────────────────────────────────────

/// Decode a SILK voice file into OGG/Opus for Telegram.
///
/// Returns the OGG path and the clip duration in seconds, derived from the
/// intermediate PCM length.
pub async fn silk_to_ogg(silk_path: &Path) -> Result<(PathBuf, i64), MediaError> {
    let pcm_path = silk_path.with_extension("pcm");
    let ogg_path = silk_path.with_extension("ogg");

    run(
        "silk_v3_decoder",
        &[
            &silk_path.to_string_lossy(),
            &pcm_path.to_string_lossy(),
        ],
    )
    .await?;

    let pcm_len = tokio::fs::metadata(&pcm_path).await?.len();
    // s16le mono: two bytes per sample.
    let duration = (pcm_len / 2 / u64::from(SILK_DECODE_RATE)).max(1) as i64;

    run(
        "ffmpeg",
        &[
            "-y",
            "-f",
            "s16le",
            "-ar",
            &SILK_DECODE_RATE.to_string(),
            "-ac",
            "1",
            "-i",
            &pcm_path.to_string_lossy(),
            "-c:a",
            "libopus",
            "-b:a",
            "64k",
            &ogg_path.to_string_lossy(),
        ],
    )
    .await?;

    let _ = tokio::fs::remove_file(&pcm_path).await;
    debug!(path = %ogg_path.display(), duration, "voice decoded for Telegram");
    Ok((ogg_path, duration))
}

/// Encode OGG/Opus voice bytes into SILK for WeChat.
///
/// Returns the SILK bytes and the clip duration in milliseconds, derived
/// from the intermediate PCM (44.1 kHz, s16le, mono).
pub async fn ogg_to_silk(ogg_bytes: &[u8]) -> Result<(Vec<u8>, i64), MediaError> {
    let dir = tempfile::tempdir()?;
    let ogg_path = dir.path().join("voice.ogg");
    let pcm_path = dir.path().join("voice.pcm");
    let silk_path = dir.path().join("voice.silk");
    tokio::fs::write(&ogg_path, ogg_bytes).await?;

    run(
        "ffmpeg",
        &[
            "-y",
            "-i",
            &ogg_path.to_string_lossy(),
            "-f",
            "s16le",
            "-ar",
            &SILK_ENCODE_RATE.to_string(),
            "-ac",
            "1",
            &pcm_path.to_string_lossy(),
        ],
    )
    .await?;

    let pcm_len = tokio::fs::metadata(&pcm_path).await?.len();
    let duration_ms = (pcm_len.saturating_mul(1000) / 2 / u64::from(SILK_ENCODE_RATE)).max(1) as i64;

    run(
        "silk_v3_encoder",
        &[
            &pcm_path.to_string_lossy(),
            &silk_path.to_string_lossy(),
            "-rate",
            &SILK_ENCODE_RATE.to_string(),
            "-tencent",
        ],
    )
    .await?;

    let silk = tokio::fs::read(&silk_path).await?;
    Ok((silk, duration_ms))
}

// ── Stickers ────────────────────────────────────────────────────

/// Convert a Telegram sticker body to GIF for the WeChat side.
///
/// `.webp` and `.webm` go through ffmpeg; `.tgs` (gzipped Lottie) has no
/// rasterizer here and is reported unsupported.
pub async fn sticker_to_gif(bytes: &[u8], extension: &str) -> Result<Vec<u8>, MediaError> {
    match extension {
        "webp" | "webm" => {}
        "tgs" => return Err(MediaError::Unsupported(".tgs sticker".to_owned())),
        other => return Err(MediaError::Unsupported(format!(".{other} sticker"))),
    }

    let dir = tempfile::tempdir()?;
    let input = dir.path().join(format!("sticker.{extension}"));
    let output = dir.path().join("sticker.gif");
    tokio::fs::write(&input, bytes).await?;

    run(
        "ffmpeg",
        &[
            "-y",
            "-i",
            &input.to_string_lossy(),
            &output.to_string_lossy(),
        ],
    )
    .await?;

    Ok(tokio::fs::read(&output).await?)
}

// ── Images ──────────────────────────────────────────────────────

/// Normalize avatar bytes to a square JPEG with edges >= 512 px.
///
/// Small images are upscaled with Lanczos keeping aspect, then center-cropped
/// to a square.
pub fn normalize_avatar(bytes: &[u8]) -> Result<Vec<u8>, MediaError> {
    let mut img = image::load_from_memory(bytes)?;

    let (w, h) = (img.width(), img.height());
    if w < AVATAR_MIN_SIZE || h < AVATAR_MIN_SIZE {
        let ratio = f64::from(AVATAR_MIN_SIZE) / f64::from(w.min(h));
        let new_w = (f64::from(w) * ratio).ceil() as u32;
        let new_h = (f64::from(h) * ratio).ceil() as u32;
        img = img.resize(new_w.max(AVATAR_MIN_SIZE), new_h.max(AVATAR_MIN_SIZE), FilterType::Lanczos3);
    }

    let img = center_crop_square(img);

    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

fn center_crop_square(img: DynamicImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w == h {
        return img;
    }
    let size = w.min(h);
    let left = (w - size) / 2;
    let top = (h - size) / 2;
    img.crop_imm(left, top, size, size)
}

/// How an inbound image should be delivered to Telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoMode {
    /// `sendPhoto` (Telegram may recompress).
    Photo,
    /// `sendDocument` (preserves the original bytes).
    Document,
}

/// Pick photo vs document for an image, per the aspect/size cutoffs.
pub fn photo_send_mode(bytes: &[u8], max_ratio: f64, max_size_mb: f64) -> PhotoMode {
    let Ok((w, h)) = image::load_from_memory(bytes).map(|i| (i.width(), i.height())) else {
        return PhotoMode::Photo;
    };
    let (wf, hf) = (f64::from(w), f64::from(h));
    let ratio = (wf / hf).max(hf / wf);
    let size_mb = bytes.len() as f64 / (1024.0 * 1024.0);
    let max_dim = w.max(h);

    if ratio > max_ratio || size_mb > max_size_mb || max_dim > 9_000 || w + h > 10_000 {
        PhotoMode::Document
    } else {
        PhotoMode::Photo
    }
}

/// A neutral gray JPEG used when an outbound video has no thumbnail.
pub fn placeholder_thumbnail() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(320, 320, image::Rgb([72, 72, 72]));
    let mut out = std::io::Cursor::new(Vec::new());
    // Encoding a raw in-memory image cannot fail.
    let _ = DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Jpeg);
    out.into_inner()
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .expect("encode");
        out.into_inner()
    }

    #[test]
    fn avatar_upscaled_and_squared() {
        let small = jpeg(100, 60);
        let normalized = normalize_avatar(&small).expect("normalize");
        let img = image::load_from_memory(&normalized).expect("decode");
        assert_eq!(img.width(), img.height());
        assert!(img.width() >= AVATAR_MIN_SIZE);
    }

    #[test]
    fn avatar_large_image_only_cropped() {
        let wide = jpeg(1200, 800);
        let normalized = normalize_avatar(&wide).expect("normalize");
        let img = image::load_from_memory(&normalized).expect("decode");
        assert_eq!((img.width(), img.height()), (800, 800));
    }

    #[test]
    fn photo_mode_by_ratio() {
        let tall = jpeg(100, 900);
        assert_eq!(photo_send_mode(&tall, 4.0, 10.0), PhotoMode::Document);
        let square = jpeg(500, 500);
        assert_eq!(photo_send_mode(&square, 4.0, 10.0), PhotoMode::Photo);
    }

    #[test]
    fn photo_mode_by_size() {
        let img = jpeg(500, 500);
        // Absurd cutoff forces document mode from size alone.
        assert_eq!(photo_send_mode(&img, 4.0, 0.000001), PhotoMode::Document);
    }

    #[test]
    fn undecodable_image_defaults_to_photo() {
        assert_eq!(photo_send_mode(b"not an image", 4.0, 10.0), PhotoMode::Photo);
    }

    #[test]
    fn placeholder_thumbnail_is_decodable_jpeg() {
        let bytes = placeholder_thumbnail();
        let img = image::load_from_memory(&bytes).expect("decode");
        assert_eq!((img.width(), img.height()), (320, 320));
    }

    #[tokio::test]
    async fn tgs_stickers_unsupported() {
        let err = sticker_to_gif(b"...", "tgs").await.expect_err("unsupported");
        assert!(matches!(err, MediaError::Unsupported(_)));
    }
}
