use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{manager::PipelineSettings, transcoder::TranscodeOptions};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub locale: String,
    pub output_gain: f32,
    pub opus_bitrate: u32,
    pub max_queue_size: usize,

    // Resolución
    #[serde(with = "duration_text")]
    pub resolve_timeout: Duration,
    #[serde(with = "duration_text")]
    pub metadata_ttl: Duration,
    pub cache_size: usize,
    pub enable_direct_urls: bool,

    // Paths
    pub cache_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.cache_dir)
            .with_context(|| format!("No se pudo crear {}", config.cache_dir.display()))?;

        Ok(config)
    }

    /// Construye la configuración a partir de una fuente de variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            application_id: lookup("APPLICATION_ID")
                .context("APPLICATION_ID no está definido")?
                .parse::<u64>()
                .context("APPLICATION_ID inválido")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.parse().ok()),

            // Audio
            locale: lookup("LOCALE").unwrap_or(defaults.locale),
            output_gain: parse_or(&lookup, "OUTPUT_GAIN", defaults.output_gain)?,
            opus_bitrate: parse_or(&lookup, "OPUS_BITRATE", defaults.opus_bitrate)?,
            max_queue_size: parse_or(&lookup, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            // Resolución
            resolve_timeout: duration_or(&lookup, "RESOLVE_TIMEOUT", defaults.resolve_timeout)?,
            metadata_ttl: duration_or(&lookup, "METADATA_TTL", defaults.metadata_ttl)?,
            cache_size: parse_or(&lookup, "CACHE_SIZE", defaults.cache_size)?,
            enable_direct_urls: parse_or(&lookup, "ENABLE_DIRECT_URLS", defaults.enable_direct_urls)?,

            // Paths
            cache_dir: lookup("CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            ytdlp_path: lookup("YTDLP_PATH").map(PathBuf::from).unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: lookup("FFMPEG_PATH").map(PathBuf::from).unwrap_or(defaults.ffmpeg_path),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Output gain must be between 0.0 and 2.0
    /// - Opus bitrate must be between 8kbps and 510kbps (Discord limit)
    /// - Queue and cache sizes must be greater than 0
    /// - Timeouts must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.output_gain) {
            anyhow::bail!("Output gain must be between 0.0 and 2.0, got: {}", self.output_gain);
        }

        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.cache_size == 0 {
            anyhow::bail!("Cache size must be greater than 0");
        }

        if self.resolve_timeout.is_zero() || self.metadata_ttl.is_zero() {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Never includes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {}, locale {})\n  \
            Audio: gain {}, {}kbps, max {} en cola\n  \
            Resolución: timeout {}, TTL {}, {} entradas en caché, URLs directas={}\n  \
            Paths: cache {}, yt-dlp {}, ffmpeg {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.locale,
            self.output_gain,
            self.opus_bitrate / 1000,
            self.max_queue_size,
            humantime::format_duration(self.resolve_timeout),
            humantime::format_duration(self.metadata_ttl),
            self.cache_size,
            self.enable_direct_urls,
            self.cache_dir.display(),
            self.ytdlp_path.display(),
            self.ffmpeg_path.display(),
        )
    }

    /// Directorio de archivos temporales de transcodificación
    pub fn scratch_dir(&self) -> PathBuf {
        self.cache_dir.join("scratch")
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            locale: self.locale.clone(),
            transcode: TranscodeOptions::ogg_opus(self.output_gain, self.opus_bitrate),
            max_queue_size: self.max_queue_size,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .with_context(|| format!("{} inválido: {}", key, val)),
        _ => Ok(default),
    }
}

fn duration_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match lookup(key) {
        Some(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
            .with_context(|| format!("{} inválido: {}", key, val)),
        _ => Ok(default),
    }
}

/// Serializa duraciones como texto legible ("30s", "1h")
mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Audio defaults
            locale: "en".into(),
            output_gain: 0.1,
            opus_bitrate: 96000, // 96kbps (Discord default)
            max_queue_size: 1000,

            // Resolution defaults
            resolve_timeout: Duration::from_secs(30),
            metadata_ttl: Duration::from_secs(3600),
            cache_size: 500,
            enable_direct_urls: true,

            // Path defaults
            cache_dir: "/app/cache".into(),
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [("DISCORD_TOKEN", "secret-token"), ("APPLICATION_ID", "1234")];

    #[test]
    fn test_defaults_fill_optional_values() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.application_id, 1234);
        assert_eq!(config.guild_id, None);
        assert_eq!(config.locale, "en");
        assert_eq!(config.output_gain, 0.1);
        assert_eq!(config.resolve_timeout, Duration::from_secs(30));
        assert_eq!(config.scratch_dir(), PathBuf::from("/app/cache/scratch"));
    }

    #[test]
    fn test_overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("GUILD_ID", "99"),
            ("LOCALE", "ko"),
            ("OUTPUT_GAIN", "0.5"),
            ("OPUS_BITRATE", "128000"),
            ("RESOLVE_TIMEOUT", "10s"),
            ("METADATA_TTL", "2h"),
            ("ENABLE_DIRECT_URLS", "false"),
            ("FFMPEG_PATH", "/usr/local/bin/ffmpeg"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.guild_id, Some(99));
        assert_eq!(config.locale, "ko");
        assert_eq!(config.metadata_ttl, Duration::from_secs(7200));
        assert!(!config.enable_direct_urls);

        let settings = config.pipeline_settings();
        assert_eq!(settings.transcode, TranscodeOptions::ogg_opus(0.5, 128_000));
        assert_eq!(settings.locale, "ko");
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let err = Config::from_lookup(lookup(&[("APPLICATION_ID", "1")])).unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("OUTPUT_GAIN", "3.0"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let config = Config {
            opus_bitrate: 600_000,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_queue_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        let summary = config.summary();

        assert!(!summary.contains("secret-token"));
        assert!(summary.contains("App ID 1234"));
        assert!(summary.contains("30s"));
    }
}
