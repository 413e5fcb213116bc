use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::Stdio,
};
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{error::PlaybackError, sources::RawAudio};

const SCRATCH_PREFIX: &str = "guild-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Ogg,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Ogg => ".ogg",
        }
    }
}

/// Parámetros fijos de salida: códec, contenedor y ganancia
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOptions {
    pub codec: AudioCodec,
    pub container: Container,
    pub gain: f32,
    pub bitrate: u32,
}

impl TranscodeOptions {
    pub fn ogg_opus(gain: f32, bitrate: u32) -> Self {
        Self {
            codec: AudioCodec::Opus,
            container: Container::Ogg,
            gain,
            bitrate,
        }
    }
}

/// Audio listo para el reproductor.
///
/// Vive en un archivo temporal que se borra al soltar el stream, sea cual
/// sea el camino de salida (fin, cancelación o error).
pub struct EncodedStream {
    path: TempPath,
    container: Container,
}

impl EncodedStream {
    pub fn new(path: TempPath, container: Container) -> Self {
        Self { path, container }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn container(&self) -> Container {
        self.container
    }
}

impl fmt::Debug for EncodedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedStream")
            .field("path", &self.path.display())
            .field("container", &self.container)
            .finish()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        guild_id: GuildId,
        raw: RawAudio,
        options: &TranscodeOptions,
    ) -> Result<EncodedStream, PlaybackError>;
}

/// Transcodificador basado en ffmpeg que escribe Ogg/Opus a un archivo
/// temporal por servidor.
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    scratch_dir: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf, scratch_dir: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&scratch_dir)?;
        Ok(Self {
            ffmpeg_path,
            scratch_dir,
        })
    }

    /// Borra archivos temporales que quedaron de una ejecución anterior
    pub fn purge_stale(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.scratch_dir)? {
            let path = entry?.path();
            let is_scratch = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(SCRATCH_PREFIX));

            if is_scratch && path.is_file() {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("⚠️ No se pudo borrar {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("🧹 {} archivos temporales viejos eliminados", removed);
        }
        Ok(removed)
    }

    fn scratch_file(&self, guild_id: GuildId, options: &TranscodeOptions) -> io::Result<TempPath> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{}{}-", SCRATCH_PREFIX, guild_id))
            .suffix(options.container.extension())
            .tempfile_in(&self.scratch_dir)?;
        Ok(file.into_temp_path())
    }

    fn ffmpeg_args(options: &TranscodeOptions, output: &Path) -> Vec<String> {
        let codec = match options.codec {
            AudioCodec::Opus => "libopus",
        };
        let format = match options.container {
            Container::Ogg => "ogg",
        };

        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            "pipe:0".into(),
            "-vn".into(),
            "-c:a".into(),
            codec.into(),
            "-b:a".into(),
            options.bitrate.to_string(),
            "-af".into(),
            format!("volume={}", options.gain),
            "-f".into(),
            format.into(),
            "-y".into(),
            output.display().to_string(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        guild_id: GuildId,
        raw: RawAudio,
        options: &TranscodeOptions,
    ) -> Result<EncodedStream, PlaybackError> {
        let scratch = self.scratch_file(guild_id, options)?;
        let url = raw.url().to_string();
        let (mut reader, download) = raw.into_parts();

        let mut child = Command::new(&self.ffmpeg_path)
            .args(Self::ffmpeg_args(options, &scratch))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::Transcode(format!("no se pudo ejecutar ffmpeg: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PlaybackError::Transcode("ffmpeg no expuso stdin".into()))?;

        debug!("🎛️ Transcodificando {} en {}", url, scratch.display());

        let feed = async move {
            let copied = tokio::io::copy(&mut reader, &mut stdin).await;
            // Cerrar stdin para que ffmpeg vea EOF
            drop(stdin);
            copied
        };
        let (copied, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        // Si ffmpeg falla, la descarga muere por el pipe roto: el error es de ffmpeg
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("⚠️ ffmpeg terminó con {} para {}", output.status, url);
            return Err(PlaybackError::Transcode(stderr.trim().to_string()));
        }

        if let Some(mut download) = download {
            let status = download.wait().await?;
            if !status.success() {
                return Err(PlaybackError::resolution(
                    url,
                    format!("la descarga terminó con {}", status),
                ));
            }
        }

        match copied {
            Ok(bytes) if bytes > 0 => debug!("✅ {} bytes transcodificados para {}", bytes, url),
            Ok(_) => return Err(PlaybackError::resolution(url, "el stream de audio llegó vacío")),
            Err(e) => return Err(PlaybackError::Transcode(e.to_string())),
        }

        Ok(EncodedStream::new(scratch, options.container))
    }
}
