//! Per-guild queue manager.
//!
//! Every guild gets one [`QueueManager`] handle and one worker task. The
//! handle validates input and forwards commands over an unbounded channel;
//! the worker owns the playlist, the stopped flag and the sink, and is the
//! only place where state changes. Metadata lookups and pipeline runs are
//! spawned tasks that report back over the same channel, so a `stop` and a
//! natural end-of-track can never interleave inside a transition.

use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    events::PlaybackEvent,
    queue::{PlayerState, Playlist, QueueEntry, QueueSnapshot},
    sink::{IdleSignal, PlayerSink, SinkFactory, TrackToken},
    transcoder::{TranscodeOptions, Transcoder},
};
use crate::{
    error::PlaybackError,
    sources::{MediaResolver, TrackMetadata},
};

const EVENT_CAPACITY: usize = 64;

/// Parámetros fijos del pipeline de cada servidor
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub locale: String,
    pub transcode: TranscodeOptions,
    pub max_queue_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Front,
    Back,
}

#[derive(Debug)]
enum Command {
    Play(Option<String>),
    Add(String),
    Pause,
    Unpause,
    Skip,
    Stop,
    Reset,
    Snapshot(oneshot::Sender<QueueSnapshot>),
    Resolved {
        placement: Placement,
        url: String,
        cancel: CancellationToken,
        result: Result<TrackMetadata, PlaybackError>,
    },
    PipelineFinished {
        token: TrackToken,
        result: Result<(), PlaybackError>,
    },
    Idle(TrackToken),
}

/// Handle público del gestor de cola de un servidor.
///
/// Las operaciones no bloquean: los resultados llegan como
/// [`PlaybackEvent`]s a quien esté suscrito. Solo los errores de validación
/// de URL se devuelven además de forma síncrona.
pub struct QueueManager {
    guild_id: GuildId,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PlaybackEvent>,
    resolver: Arc<dyn MediaResolver>,
}

impl QueueManager {
    /// Crea el sink del servidor y lanza su worker
    pub fn spawn(
        guild_id: GuildId,
        resolver: Arc<dyn MediaResolver>,
        transcoder: Arc<dyn Transcoder>,
        sinks: &dyn SinkFactory,
        settings: PipelineSettings,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let idle_target = commands.downgrade();
        let idle = IdleSignal::new(move |token| {
            if let Some(commands) = idle_target.upgrade() {
                let _ = commands.send(Command::Idle(token));
            }
        });

        let worker = GuildWorker {
            guild_id,
            playlist: Playlist::new(settings.max_queue_size),
            stopped: false,
            state: PlayerState::Idle,
            sink: sinks.create(guild_id, idle),
            resolver: resolver.clone(),
            transcoder,
            settings,
            events: events.clone(),
            commands: commands.downgrade(),
            last_token: 0,
            pipeline: None,
            on_air: None,
            pending_front: CancellationToken::new(),
            pending_back: CancellationToken::new(),
            resolving: 0,
        };
        tokio::spawn(worker.run(receiver));

        Self {
            guild_id,
            commands,
            events,
            resolver,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Reproduce `url` saltándose la cola, o la cabeza actual si no hay URL
    pub fn play(&self, url: Option<&str>) -> Result<(), PlaybackError> {
        if let Some(url) = url {
            self.validate(url)?;
        }
        self.send(Command::Play(url.map(str::to_string)))
    }

    /// Agrega `url` al final de la cola
    pub fn add(&self, url: &str) -> Result<(), PlaybackError> {
        self.validate(url)?;
        self.send(Command::Add(url.to_string()))
    }

    pub fn pause(&self) -> Result<(), PlaybackError> {
        self.send(Command::Pause)
    }

    pub fn unpause(&self) -> Result<(), PlaybackError> {
        self.send(Command::Unpause)
    }

    pub fn skip(&self) -> Result<(), PlaybackError> {
        self.send(Command::Skip)
    }

    pub fn stop(&self) -> Result<(), PlaybackError> {
        self.send(Command::Stop)
    }

    pub fn reset(&self) -> Result<(), PlaybackError> {
        self.send(Command::Reset)
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, PlaybackError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        response.await.map_err(|_| PlaybackError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    fn validate(&self, url: &str) -> Result<(), PlaybackError> {
        if self.resolver.validate(url) {
            return Ok(());
        }

        let err = PlaybackError::InvalidUrl(url.to_string());
        warn!("🚫 URL inválida en guild {}: {}", self.guild_id, url);
        let _ = self.events.send(PlaybackEvent::from(&err));
        Err(err)
    }

    fn send(&self, command: Command) -> Result<(), PlaybackError> {
        self.commands.send(command).map_err(|_| PlaybackError::Closed)
    }
}

struct ActivePipeline {
    token: TrackToken,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActivePipeline {
    fn abort(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Una corrida de descarga → transcodificación → reproducción
struct PipelineRun {
    guild_id: GuildId,
    url: String,
    token: TrackToken,
    resolver: Arc<dyn MediaResolver>,
    transcoder: Arc<dyn Transcoder>,
    sink: Arc<dyn PlayerSink>,
    options: TranscodeOptions,
    cancel: CancellationToken,
}

impl PipelineRun {
    async fn execute(self) -> Result<(), PlaybackError> {
        let raw = self.resolver.open(&self.url).await?;
        let encoded = self
            .transcoder
            .transcode(self.guild_id, raw, &self.options)
            .await?;
        self.sink.play(encoded, self.token, &self.cancel).await
    }
}

struct GuildWorker {
    guild_id: GuildId,
    playlist: Playlist,
    stopped: bool,
    state: PlayerState,
    sink: Arc<dyn PlayerSink>,
    resolver: Arc<dyn MediaResolver>,
    transcoder: Arc<dyn Transcoder>,
    settings: PipelineSettings,
    events: broadcast::Sender<PlaybackEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
    last_token: u64,
    pipeline: Option<ActivePipeline>,
    // Token del stream que el sink tiene al aire
    on_air: Option<TrackToken>,
    pending_front: CancellationToken,
    pending_back: CancellationToken,
    resolving: usize,
}

impl GuildWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("🧵 Worker de cola iniciado para guild {}", self.guild_id);

        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }

        self.cancel_pipeline();
        self.pending_front.cancel();
        self.pending_back.cancel();
        self.sink.stop().await;
        debug!("🧵 Worker de cola terminado para guild {}", self.guild_id);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Play(None) => self.play_head(),
            Command::Play(Some(url)) => self.request_resolution(url, Placement::Front),
            Command::Add(url) => self.request_resolution(url, Placement::Back),
            Command::Pause => self.pause().await,
            Command::Unpause => self.unpause().await,
            Command::Skip => self.skip().await,
            Command::Stop => self.stop().await,
            Command::Reset => self.reset().await,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Resolved {
                placement,
                url,
                cancel,
                result,
            } => self.on_resolved(placement, url, cancel, result),
            Command::PipelineFinished { token, result } => {
                self.on_pipeline_finished(token, result).await
            }
            Command::Idle(token) => self.on_idle(token).await,
        }
    }

    fn play_head(&mut self) {
        if self.playlist.is_empty() {
            self.emit_error(&PlaybackError::EmptyPlaylist);
            return;
        }
        self.start_pipeline();
    }

    fn request_resolution(&mut self, url: String, placement: Placement) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        let cancel = match placement {
            Placement::Front => {
                self.resolving += 1;
                if matches!(self.state, PlayerState::Idle | PlayerState::Stopped) {
                    self.state = PlayerState::Resolving;
                }
                self.pending_front.child_token()
            }
            Placement::Back => self.pending_back.child_token(),
        };

        debug!("🔍 Resolviendo {} ({:?}) en guild {}", url, placement, self.guild_id);

        let resolver = self.resolver.clone();
        let locale = self.settings.locale.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = resolver.resolve(&url, &locale) => result,
            };
            let _ = commands.send(Command::Resolved {
                placement,
                url,
                cancel,
                result,
            });
        });
    }

    fn on_resolved(
        &mut self,
        placement: Placement,
        url: String,
        cancel: CancellationToken,
        result: Result<TrackMetadata, PlaybackError>,
    ) {
        if placement == Placement::Front {
            self.resolving = self.resolving.saturating_sub(1);
        }

        if cancel.is_cancelled() {
            debug!("🗑️ Resolución descartada para {}", url);
            return;
        }

        let metadata = match result {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("❌ No se pudo resolver {}: {}", url, err);
                self.settle_after_resolution();
                self.emit_error(&err);
                return;
            }
        };

        let entry = QueueEntry::new(url, metadata);
        match placement {
            Placement::Back => match self.playlist.push_back(entry.clone()) {
                Ok(()) => self.emit(PlaybackEvent::Added { entry }),
                Err(err) => self.emit_error(&err),
            },
            Placement::Front => match self.playlist.push_front(entry) {
                Ok(()) => self.start_pipeline(),
                Err(err) => {
                    self.settle_after_resolution();
                    self.emit_error(&err);
                }
            },
        }
    }

    fn settle_after_resolution(&mut self) {
        if self.state == PlayerState::Resolving && self.resolving == 0 {
            self.state = if self.stopped {
                PlayerState::Stopped
            } else {
                PlayerState::Idle
            };
        }
    }

    /// Arranca el pipeline de la cabeza, cancelando cualquier otro
    fn start_pipeline(&mut self) {
        self.stopped = false;
        self.cancel_pipeline();
        // Lo que siga sonando queda retirado: su señal de fin es obsoleta
        self.on_air = None;

        let Some(entry) = self.playlist.head().cloned() else {
            return;
        };
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        self.last_token += 1;
        let token = TrackToken(self.last_token);
        let cancel = CancellationToken::new();

        let run = PipelineRun {
            guild_id: self.guild_id,
            url: entry.url.clone(),
            token,
            resolver: self.resolver.clone(),
            transcoder: self.transcoder.clone(),
            sink: self.sink.clone(),
            options: self.settings.transcode.clone(),
            cancel: cancel.clone(),
        };

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let result = tokio::select! {
                _ = task_cancel.cancelled() => {
                    debug!("✂️ Pipeline {} cancelado", token);
                    return;
                }
                result = run.execute() => result,
            };
            let _ = commands.send(Command::PipelineFinished { token, result });
        });

        info!(
            "🎵 Preparando {} ({}) en guild {}",
            entry.title(),
            token,
            self.guild_id
        );
        self.pipeline = Some(ActivePipeline {
            token,
            cancel,
            task,
        });
        self.state = PlayerState::Pipelining;
    }

    fn cancel_pipeline(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            debug!("✂️ Cancelando pipeline {} en guild {}", pipeline.token, self.guild_id);
            pipeline.abort();
        }
    }

    fn cancel_front_resolutions(&mut self) {
        self.pending_front.cancel();
        self.pending_front = CancellationToken::new();
        self.resolving = 0;
    }

    async fn on_pipeline_finished(&mut self, token: TrackToken, result: Result<(), PlaybackError>) {
        if self.pipeline.as_ref().map(|p| p.token) != Some(token) {
            debug!("🗑️ Resultado obsoleto del pipeline {}", token);
            // Nada debería estar sonando: no dejar al aire un stream cancelado
            if result.is_ok() && self.pipeline.is_none() && self.on_air.is_none() {
                self.sink.stop().await;
            }
            return;
        }
        self.pipeline = None;

        match result {
            Ok(()) => {
                self.on_air = Some(token);
                self.state = PlayerState::Playing;
                if let Some(entry) = self.playlist.head().cloned() {
                    info!("▶️ Reproduciendo {} en guild {}", entry.title(), self.guild_id);
                    self.emit(PlaybackEvent::Playing { entry });
                }
            }
            Err(err) => {
                // La entrada fallida se queda en la cabeza hasta play/skip
                error!("❌ Pipeline {} falló en guild {}: {}", token, self.guild_id, err);
                self.stopped = true;
                self.on_air = None;
                self.sink.stop().await;
                self.state = PlayerState::Stopped;
                self.emit_error(&err);
            }
        }
    }

    async fn on_idle(&mut self, token: TrackToken) {
        if self.on_air != Some(token) {
            debug!("🗑️ Señal de fin obsoleta {} en guild {}", token, self.guild_id);
            return;
        }
        self.on_air = None;

        if self.stopped {
            debug!("⏹️ Fin por stop explícito en guild {}, sin avanzar", self.guild_id);
            return;
        }

        info!("🏁 Track terminado en guild {}, avanzando", self.guild_id);
        self.advance().await;
    }

    async fn advance(&mut self) {
        self.playlist.pop_head();
        if self.playlist.head().is_some() {
            self.start_pipeline();
        } else {
            info!("📭 Cola vacía en guild {}", self.guild_id);
            self.stop().await;
        }
    }

    async fn pause(&mut self) {
        if self.sink.pause().await {
            if self.state == PlayerState::Playing {
                self.state = PlayerState::Paused;
            }
            self.emit(PlaybackEvent::Paused);
        } else {
            self.emit(PlaybackEvent::CannotPause);
        }
    }

    async fn unpause(&mut self) {
        if self.sink.unpause().await {
            if self.state == PlayerState::Paused {
                self.state = PlayerState::Playing;
            }
            self.emit(PlaybackEvent::Unpaused);
        } else {
            self.emit(PlaybackEvent::CannotUnpause);
        }
    }

    async fn skip(&mut self) {
        self.cancel_pipeline();
        self.cancel_front_resolutions();

        if let Some(skipped) = self.playlist.pop_head() {
            info!("⏭️ Saltado {} en guild {}", skipped.title(), self.guild_id);
        }

        if self.playlist.head().is_some() {
            self.sink.stop().await;
            self.start_pipeline();
        } else {
            self.stop().await;
        }
    }

    async fn stop(&mut self) {
        self.stopped = true;
        self.cancel_pipeline();
        self.cancel_front_resolutions();
        self.sink.stop().await;
        self.state = PlayerState::Stopped;

        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        self.emit(PlaybackEvent::Stopped);
    }

    async fn reset(&mut self) {
        self.playlist.clear();
        self.pending_back.cancel();
        self.pending_back = CancellationToken::new();

        self.stop().await;
        self.state = PlayerState::Idle;
        self.emit(PlaybackEvent::Reset);
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            state: self.state,
            stopped: self.stopped,
            entries: self.playlist.entries(),
            total_duration: self.playlist.total_duration(),
        }
    }

    fn emit_error(&self, err: &PlaybackError) {
        self.emit(PlaybackEvent::from(err));
    }

    fn emit(&self, event: PlaybackEvent) {
        debug!("📣 Evento {} en guild {}", event.name(), self.guild_id);
        // Sin suscriptores no hay a quién avisar
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Colaboradores falsos con control de tiempos para los tests.

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serenity::model::id::GuildId;
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    use crate::{
        audio::{
            events::PlaybackEvent,
            sink::{IdleSignal, PlayerSink, SinkFactory, TrackToken},
            transcoder::{Container, EncodedStream, TranscodeOptions, Transcoder},
        },
        error::PlaybackError,
        sources::{MediaResolver, RawAudio, TrackMetadata},
    };

    /// Acepta `https://valid/...`; `bad-meta`, `slow-meta` y `bad-audio`
    /// en la URL cambian su comportamiento.
    #[derive(Default)]
    pub struct FakeResolver {
        pub opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MediaResolver for FakeResolver {
        fn validate(&self, url: &str) -> bool {
            url.starts_with("https://valid/")
        }

        async fn resolve(&self, url: &str, _locale: &str) -> Result<TrackMetadata, PlaybackError> {
            if url.contains("slow-meta") {
                std::future::pending::<()>().await;
            }
            if url.contains("bad-meta") {
                return Err(PlaybackError::resolution(url, "video unavailable"));
            }
            let title = url.trim_start_matches("https://valid/");
            Ok(TrackMetadata::titled(title))
        }

        async fn open(&self, url: &str) -> Result<RawAudio, PlaybackError> {
            if url.contains("bad-audio") {
                return Err(PlaybackError::resolution(url, "403 Forbidden"));
            }
            self.opened.lock().push(url.to_string());
            Ok(RawAudio::from_reader(url, tokio::io::empty()))
        }

        fn source_name(&self) -> &'static str {
            "fake"
        }
    }

    /// Escribe archivos temporales reales; `slow-audio` se queda colgado
    /// hasta que lo cancelen.
    #[derive(Default)]
    pub struct FakeTranscoder {
        pub active: Arc<AtomicUsize>,
        pub max_active: AtomicUsize,
        pub completed: Mutex<Vec<String>>,
    }

    struct ActiveGuard(Arc<AtomicUsize>);

    impl Drop for ActiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn transcode(
            &self,
            _guild_id: GuildId,
            raw: RawAudio,
            options: &TranscodeOptions,
        ) -> Result<EncodedStream, PlaybackError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let _guard = ActiveGuard(self.active.clone());

            if raw.url().contains("slow-audio") {
                std::future::pending::<()>().await;
            }
            tokio::task::yield_now().await;

            let path = tempfile::NamedTempFile::new()?.into_temp_path();
            self.completed.lock().push(raw.url().to_string());
            Ok(EncodedStream::new(path, options.container))
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SinkStatus {
        Playing,
        Paused,
    }

    /// Sink en memoria que emite la señal de inactividad igual que el real:
    /// al reemplazar, al detener y cuando el test llama a `finish`.
    ///
    /// Con `commit_delay` bloquea el hilo entre recibir el stream y
    /// publicarlo, sin puntos de espera, como el armado del track real.
    pub struct FakeSink {
        idle: IdleSignal,
        current: Mutex<Option<(TrackToken, SinkStatus)>>,
        pub played: Mutex<Vec<TrackToken>>,
        pub entered: AtomicBool,
        pub commit_delay: Mutex<Option<Duration>>,
    }

    impl FakeSink {
        pub fn new(idle: IdleSignal) -> Self {
            Self {
                idle,
                current: Mutex::new(None),
                played: Mutex::new(Vec::new()),
                entered: AtomicBool::new(false),
                commit_delay: Mutex::new(None),
            }
        }

        /// Simula el fin natural del stream actual
        pub fn finish(&self) {
            let finished = self.current.lock().take();
            if let Some((token, _)) = finished {
                self.idle.emit(token);
            }
        }

        pub fn status(&self) -> Option<SinkStatus> {
            let current = *self.current.lock();
            current.map(|(_, status)| status)
        }

        pub fn play_count(&self) -> usize {
            self.played.lock().len()
        }
    }

    #[async_trait]
    impl PlayerSink for FakeSink {
        async fn play(
            &self,
            stream: EncodedStream,
            token: TrackToken,
            cancel: &CancellationToken,
        ) -> Result<(), PlaybackError> {
            assert_eq!(stream.container(), Container::Ogg);
            self.entered.store(true, Ordering::SeqCst);
            let delay = *self.commit_delay.lock();
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }

            let replaced = {
                let mut current = self.current.lock();
                if cancel.is_cancelled() {
                    drop(current);
                    self.idle.emit(token);
                    return Ok(());
                }
                self.played.lock().push(token);
                current.replace((token, SinkStatus::Playing))
            };
            if let Some((old, _)) = replaced {
                self.idle.emit(old);
            }
            Ok(())
        }

        async fn pause(&self) -> bool {
            match self.current.lock().as_mut() {
                Some((_, status)) if *status == SinkStatus::Playing => {
                    *status = SinkStatus::Paused;
                    true
                }
                _ => false,
            }
        }

        async fn unpause(&self) -> bool {
            match self.current.lock().as_mut() {
                Some((_, status)) if *status == SinkStatus::Paused => {
                    *status = SinkStatus::Playing;
                    true
                }
                _ => false,
            }
        }

        async fn stop(&self) {
            self.finish();
        }
    }

    /// Guarda cada sink creado para que el test pueda manejarlo
    #[derive(Default)]
    pub struct FakeSinkFactory {
        pub created: Mutex<Vec<(GuildId, Arc<FakeSink>)>>,
    }

    impl FakeSinkFactory {
        pub fn sink(&self, guild_id: GuildId) -> Arc<FakeSink> {
            self.created
                .lock()
                .iter()
                .find(|(id, _)| *id == guild_id)
                .map(|(_, sink)| sink.clone())
                .expect("sink created for guild")
        }
    }

    impl SinkFactory for FakeSinkFactory {
        fn create(&self, guild_id: GuildId, idle: IdleSignal) -> Arc<dyn PlayerSink> {
            let sink = Arc::new(FakeSink::new(idle));
            self.created.lock().push((guild_id, sink.clone()));
            sink
        }
    }

    pub async fn wait_for(
        events: &mut broadcast::Receiver<PlaybackEvent>,
        name: &str,
    ) -> PlaybackEvent {
        let wait = async {
            loop {
                let event = events.recv().await.expect("event channel open");
                if event.name() == name {
                    return event;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for `{}`", name))
    }
}
