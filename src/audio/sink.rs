use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use songbird::{
    input::{File, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transcoder::EncodedStream;
use crate::error::PlaybackError;

/// Identifica una corrida del pipeline.
///
/// Las señales de inactividad llevan el token del stream que terminó, así el
/// gestor puede descartar las que pertenecen a un stream ya reemplazado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackToken(pub u64);

impl fmt::Display for TrackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Canal por el que el sink avisa que un stream dejó de sonar
#[derive(Clone)]
pub struct IdleSignal {
    notify: Arc<dyn Fn(TrackToken) + Send + Sync>,
}

impl IdleSignal {
    pub fn new(notify: impl Fn(TrackToken) + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    pub fn emit(&self, token: TrackToken) {
        (self.notify)(token)
    }
}

impl fmt::Debug for IdleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdleSignal")
    }
}

/// Salida de audio de un servidor: un stream a la vez.
///
/// Debe emitir exactamente una señal de inactividad por cada stream que
/// termina, ya sea naturalmente o por `stop`/reemplazo.
#[async_trait]
pub trait PlayerSink: Send + Sync {
    /// Reemplaza lo que esté sonando por `stream`.
    ///
    /// Si `cancel` ya fue cancelado al momento de publicar el stream, no lo
    /// deja sonando.
    async fn play(
        &self,
        stream: EncodedStream,
        token: TrackToken,
        cancel: &CancellationToken,
    ) -> Result<(), PlaybackError>;

    /// `true` solo si el sink pasó de sonando a pausado
    async fn pause(&self) -> bool;

    /// `true` solo si el sink pasó de pausado a sonando
    async fn unpause(&self) -> bool;

    async fn stop(&self);
}

/// Construye el sink de cada servidor la primera vez que se usa
pub trait SinkFactory: Send + Sync {
    fn create(&self, guild_id: GuildId, idle: IdleSignal) -> Arc<dyn PlayerSink>;
}

struct ActiveTrack {
    handle: TrackHandle,
    token: TrackToken,
    paused: bool,
    // Mantiene vivo el archivo temporal mientras suena
    _stream: EncodedStream,
}

/// Sink sobre la llamada de songbird del servidor
pub struct SongbirdSink {
    guild_id: GuildId,
    songbird: Arc<Songbird>,
    idle: IdleSignal,
    current: Mutex<Option<ActiveTrack>>,
}

impl SongbirdSink {
    pub fn new(guild_id: GuildId, songbird: Arc<Songbird>, idle: IdleSignal) -> Self {
        Self {
            guild_id,
            songbird,
            idle,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PlayerSink for SongbirdSink {
    async fn play(
        &self,
        stream: EncodedStream,
        token: TrackToken,
        cancel: &CancellationToken,
    ) -> Result<(), PlaybackError> {
        let call = self.songbird.get(self.guild_id).ok_or_else(|| {
            PlaybackError::SinkRejected("el bot no está conectado a un canal de voz".into())
        })?;

        let input: Input = File::new(stream.path().to_path_buf()).into();
        let handle = {
            let mut handler = call.lock().await;
            handler.play_input(input)
        };

        // End y Error comparten la bandera: una sola señal por stream
        let fired = Arc::new(AtomicBool::new(false));
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackIdleHandler {
                        guild_id: self.guild_id,
                        token,
                        fired: fired.clone(),
                        idle: self.idle.clone(),
                    },
                )
                .map_err(|e| PlaybackError::SinkRejected(e.to_string()))?;
        }

        let previous = {
            let mut current = self.current.lock();
            // Un stop pudo llegar mientras se armaba el track
            if cancel.is_cancelled() {
                drop(current);
                debug!("✂️ Stream {} cancelado antes de sonar en guild {}", token, self.guild_id);
                let _ = handle.stop();
                return Ok(());
            }
            current.replace(ActiveTrack {
                handle,
                token,
                paused: false,
                _stream: stream,
            })
        };

        if let Some(previous) = previous {
            debug!("🔁 Reemplazando stream {} en guild {}", previous.token, self.guild_id);
            let _ = previous.handle.stop();
        }

        info!("🎵 Stream {} en el aire en guild {}", token, self.guild_id);
        Ok(())
    }

    async fn pause(&self) -> bool {
        let mut current = self.current.lock();
        match current.as_mut() {
            Some(track) if !track.paused => {
                let paused = track.handle.pause().is_ok();
                track.paused = paused;
                paused
            }
            _ => false,
        }
    }

    async fn unpause(&self) -> bool {
        let mut current = self.current.lock();
        match current.as_mut() {
            Some(track) if track.paused => {
                let resumed = track.handle.play().is_ok();
                track.paused = !resumed;
                resumed
            }
            _ => false,
        }
    }

    async fn stop(&self) {
        if let Some(track) = self.current.lock().take() {
            debug!("⏹️ Deteniendo stream {} en guild {}", track.token, self.guild_id);
            let _ = track.handle.stop();
        }
    }
}

/// Traduce el fin de un track de songbird a una señal de inactividad
struct TrackIdleHandler {
    guild_id: GuildId,
    token: TrackToken,
    fired: Arc<AtomicBool>,
    idle: IdleSignal,
}

#[async_trait]
impl VoiceEventHandler for TrackIdleHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in *tracks {
                if let PlayMode::Errored(err) = &state.playing {
                    warn!("⚠️ Stream {} falló en guild {}: {:?}", self.token, self.guild_id, err);
                } else {
                    debug!("🏁 Stream {} terminó en guild {}", self.token, self.guild_id);
                }
            }
        }

        if !self.fired.swap(true, Ordering::SeqCst) {
            self.idle.emit(self.token);
        }

        None
    }
}

pub struct SongbirdSinkFactory {
    songbird: Arc<Songbird>,
}

impl SongbirdSinkFactory {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self { songbird }
    }
}

impl SinkFactory for SongbirdSinkFactory {
    fn create(&self, guild_id: GuildId, idle: IdleSignal) -> Arc<dyn PlayerSink> {
        Arc::new(SongbirdSink::new(guild_id, self.songbird.clone(), idle))
    }
}
