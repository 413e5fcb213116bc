use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{path::PathBuf, process::Stdio, sync::Arc, sync::OnceLock, time::Duration};
use tokio::{process::Command, sync::Semaphore, time::timeout};
use tracing::{debug, info, warn};
use url::Url;

use super::{MediaResolver, RawAudio, TrackMetadata};
use crate::{cache::MetadataCache, error::PlaybackError};

const YOUTUBE_HOSTS: [&str; 6] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
    "youtu.be",
];

/// Resolver de YouTube basado en yt-dlp
pub struct YtDlpResolver {
    ytdlp_path: PathBuf,
    cache: Arc<MetadataCache>,
    resolve_timeout: Duration,
    // Limitar lookups concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    is_live: Option<bool>,
}

impl From<YtDlpInfo> for TrackMetadata {
    fn from(info: YtDlpInfo) -> Self {
        Self {
            title: info.title,
            uploader: info.uploader,
            duration: info
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(Duration::from_secs_f64),
            thumbnail: info.thumbnail,
            page_url: info.webpage_url,
            is_live: info.is_live.unwrap_or(false),
        }
    }
}

impl YtDlpResolver {
    pub fn new(ytdlp_path: PathBuf, cache: Arc<MetadataCache>, resolve_timeout: Duration) -> Self {
        Self {
            ytdlp_path,
            cache,
            resolve_timeout,
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Extrae el video ID de una URL de YouTube
    pub fn extract_video_id(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }

        let host = parsed.host_str()?;
        if !YOUTUBE_HOSTS.contains(&host) {
            return None;
        }

        let candidate = if host == "youtu.be" {
            parsed.path_segments()?.next().map(str::to_string)
        } else {
            // youtube.com/watch?v=ID, /embed/ID, /v/ID, /shorts/ID, /live/ID
            parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
                .or_else(|| {
                    let mut segments = parsed.path_segments()?;
                    match segments.next()? {
                        "embed" | "v" | "shorts" | "live" => segments.next().map(str::to_string),
                        _ => None,
                    }
                })
        }?;

        video_id_pattern()
            .is_match(&candidate)
            .then_some(candidate)
    }

    async fn dump_json(&self, url: &str, locale: &str) -> Result<YtDlpInfo, PlaybackError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| PlaybackError::resolution(url, e))?;

        let lang = format!("youtube:lang={}", locale);
        let output = Command::new(&self.ytdlp_path)
            .args([
                "--no-playlist",
                "--dump-json",
                "--skip-download",
                "--no-warnings",
                "--extractor-args",
                &lang,
                url,
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = timeout(self.resolve_timeout, output)
            .await
            .map_err(|_| PlaybackError::resolution(url, "tiempo de espera agotado"))?
            .map_err(|e| PlaybackError::resolution(url, format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para {}: {}", url, stderr.trim());
            return Err(PlaybackError::resolution(url, stderr.trim()));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| PlaybackError::resolution(url, format!("respuesta inválida de yt-dlp: {}", e)))
    }
}

fn video_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static regex"))
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    fn validate(&self, url: &str) -> bool {
        Self::extract_video_id(url).is_some()
    }

    async fn resolve(&self, url: &str, locale: &str) -> Result<TrackMetadata, PlaybackError> {
        let video_id = Self::extract_video_id(url)
            .ok_or_else(|| PlaybackError::InvalidUrl(url.to_string()))?;

        if let Some(cached) = self.cache.get(&video_id) {
            debug!("📦 Metadata en caché para {}", video_id);
            return Ok(cached);
        }

        let metadata = TrackMetadata::from(self.dump_json(url, locale).await?);
        info!("📊 Metadata obtenida: {}", metadata.title);
        self.cache.put(video_id, metadata.clone());

        Ok(metadata)
    }

    async fn open(&self, url: &str) -> Result<RawAudio, PlaybackError> {
        let mut child = Command::new(&self.ytdlp_path)
            .args([
                "--no-playlist",
                "--format",
                "bestaudio[ext=m4a]/bestaudio/best",
                "--quiet",
                "--no-warnings",
                "--output",
                "-",
                url,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::resolution(url, format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlaybackError::resolution(url, "yt-dlp no expuso stdout"))?;

        debug!("⬇️ Descarga iniciada para {}", url);
        Ok(RawAudio::from_reader(url, stdout).with_process(child))
    }

    fn source_name(&self) -> &'static str {
        "YouTube"
    }
}
