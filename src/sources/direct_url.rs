use async_trait::async_trait;
use futures::TryStreamExt;
use std::{io, time::Duration};
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use super::{MediaResolver, RawAudio, TrackMetadata};
use crate::error::PlaybackError;

const AUDIO_EXTENSIONS: [&str; 6] = [".mp3", ".wav", ".ogg", ".opus", ".flac", ".m4a"];

/// Cliente para URLs directas a archivos de audio
pub struct DirectUrlResolver {
    client: reqwest::Client,
}

impl DirectUrlResolver {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    fn parse(url: &str) -> Option<Url> {
        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }

        let path = parsed.path().to_lowercase();
        AUDIO_EXTENSIONS
            .iter()
            .any(|ext| path.ends_with(ext))
            .then_some(parsed)
    }
}

#[async_trait]
impl MediaResolver for DirectUrlResolver {
    fn validate(&self, url: &str) -> bool {
        Self::parse(url).is_some()
    }

    async fn resolve(&self, url: &str, _locale: &str) -> Result<TrackMetadata, PlaybackError> {
        let parsed = Self::parse(url).ok_or_else(|| PlaybackError::InvalidUrl(url.to_string()))?;

        let response = self
            .client
            .head(parsed.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlaybackError::resolution(url, e))?;

        let title = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(|name| {
                urlencoding::decode(name)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| name.to_string())
            })
            .unwrap_or_else(|| url.to_string());

        debug!("🔗 URL directa válida ({}): {}", response.status(), title);

        Ok(TrackMetadata {
            title,
            page_url: Some(url.to_string()),
            ..TrackMetadata::default()
        })
    }

    async fn open(&self, url: &str) -> Result<RawAudio, PlaybackError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlaybackError::resolution(url, e))?;

        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));

        Ok(RawAudio::from_reader(url, StreamReader::new(body)))
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }
}
