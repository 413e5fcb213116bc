pub mod direct_url;
pub mod youtube;

use async_trait::async_trait;
use std::{fmt, pin::Pin, sync::Arc, time::Duration};
use tokio::{io::AsyncRead, process::Child};
use tracing::debug;

use crate::error::PlaybackError;

pub use direct_url::DirectUrlResolver;
pub use youtube::YtDlpResolver;

/// Contrato común para todas las fuentes de audio.
///
/// `resolve` solo obtiene metadata (se usa al encolar) y `open` abre el
/// stream de audio crudo (se usa cuando la entrada llega a la cabeza).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Verifica si la URL es válida para esta fuente
    fn validate(&self, url: &str) -> bool;

    /// Obtiene la metadata básica del track
    async fn resolve(&self, url: &str, locale: &str) -> Result<TrackMetadata, PlaybackError>;

    /// Abre el stream de audio crudo para la URL
    async fn open(&self, url: &str) -> Result<RawAudio, PlaybackError>;

    fn source_name(&self) -> &'static str;
}

/// Metadata de un track tal como la entrega la fuente
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackMetadata {
    pub title: String,
    pub uploader: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub page_url: Option<String>,
    pub is_live: bool,
}

impl TrackMetadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Stream de audio crudo, todavía sin transcodificar.
///
/// Si el stream viene de un subproceso (yt-dlp) el proceso viaja junto al
/// lector; se mata al soltarse, así que cancelar el pipeline lo termina.
pub struct RawAudio {
    url: String,
    reader: Pin<Box<dyn AsyncRead + Send>>,
    process: Option<Child>,
}

impl RawAudio {
    pub fn from_reader(url: impl Into<String>, reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            url: url.into(),
            reader: Box::pin(reader),
            process: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn with_process(mut self, child: Child) -> Self {
        self.process = Some(child);
        self
    }

    pub fn into_parts(self) -> (Pin<Box<dyn AsyncRead + Send>>, Option<Child>) {
        (self.reader, self.process)
    }
}

impl fmt::Debug for RawAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAudio")
            .field("url", &self.url)
            .field("process", &self.process.as_ref().and_then(|p| p.id()))
            .finish_non_exhaustive()
    }
}

/// Enruta cada URL a la primera fuente que la acepta
pub struct SourceRouter {
    sources: Vec<Arc<dyn MediaResolver>>,
}

impl SourceRouter {
    pub fn new(sources: Vec<Arc<dyn MediaResolver>>) -> Self {
        Self { sources }
    }

    fn route(&self, url: &str) -> Result<&Arc<dyn MediaResolver>, PlaybackError> {
        self.sources
            .iter()
            .find(|source| source.validate(url))
            .ok_or_else(|| PlaybackError::InvalidUrl(url.to_string()))
    }
}

#[async_trait]
impl MediaResolver for SourceRouter {
    fn validate(&self, url: &str) -> bool {
        self.route(url).is_ok()
    }

    async fn resolve(&self, url: &str, locale: &str) -> Result<TrackMetadata, PlaybackError> {
        let source = self.route(url)?;
        debug!("🔀 {} resuelto por {}", url, source.source_name());
        source.resolve(url, locale).await
    }

    async fn open(&self, url: &str) -> Result<RawAudio, PlaybackError> {
        self.route(url)?.open(url).await
    }

    fn source_name(&self) -> &'static str {
        "router"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn source(name: &'static str, prefix: &'static str) -> Arc<dyn MediaResolver> {
        let mut mock = MockMediaResolver::new();
        mock.expect_validate()
            .returning(move |url| url.starts_with(prefix));
        mock.expect_source_name().return_const(name);
        mock.expect_resolve()
            .returning(move |_, _| Ok(TrackMetadata::titled(name)));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_router_uses_first_matching_source() {
        let router = SourceRouter::new(vec![
            source("youtube", "https://youtu.be/"),
            source("direct", "https://"),
        ]);

        let meta = router.resolve("https://youtu.be/abc", "en").await.unwrap();
        assert_eq!(meta.title, "youtube");

        let meta = router.resolve("https://cdn.example/a.mp3", "en").await.unwrap();
        assert_eq!(meta.title, "direct");
    }

    #[tokio::test]
    async fn test_router_rejects_unknown_urls() {
        let router = SourceRouter::new(vec![source("youtube", "https://youtu.be/")]);

        assert!(!router.validate("ftp://nope"));
        let err = router.resolve("ftp://nope", "en").await.unwrap_err();
        assert_eq!(err, PlaybackError::InvalidUrl("ftp://nope".into()));
    }
}
