use anyhow::{Context as _, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{path::Path, sync::Arc};
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;

use crate::audio::{registry::Registry, sink::SongbirdSinkFactory, transcoder::FfmpegTranscoder};
use crate::bot::QueueBot;
use crate::cache::MetadataCache;
use crate::config::Config;
use crate::sources::{DirectUrlResolver, MediaResolver, SourceRouter, YtDlpResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_queue=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music Queue v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Caché de metadata
    let cache = Arc::new(MetadataCache::new(config.cache_size, config.metadata_ttl));

    // Fuentes: YouTube vía yt-dlp y, opcionalmente, URLs directas
    let mut sources: Vec<Arc<dyn MediaResolver>> = vec![Arc::new(YtDlpResolver::new(
        config.ytdlp_path.clone(),
        cache.clone(),
        config.resolve_timeout,
    ))];
    if config.enable_direct_urls {
        sources.push(Arc::new(DirectUrlResolver::new(config.resolve_timeout)?));
        info!("🔗 URLs directas habilitadas");
    }
    let resolver: Arc<dyn MediaResolver> = Arc::new(SourceRouter::new(sources));

    // Transcodificador y limpieza de archivos temporales huérfanos
    let transcoder = FfmpegTranscoder::new(config.ffmpeg_path.clone(), config.scratch_dir())
        .with_context(|| format!("No se pudo preparar {}", config.scratch_dir().display()))?;
    if let Err(e) = transcoder.purge_stale() {
        warn!("⚠️ No se pudieron limpiar archivos temporales: {:?}", e);
    }

    // Registro de colas por servidor sobre songbird
    let songbird = Songbird::serenity();
    let registry = Arc::new(Registry::new(
        resolver,
        Arc::new(transcoder),
        Arc::new(SongbirdSinkFactory::new(songbird.clone())),
        config.pipeline_settings(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = QueueBot::new(config.clone(), registry.clone(), cache);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        registry.stop_all();
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = dependency_ok(&config.ytdlp_path, "--version").await;
    let ffmpeg = dependency_ok(&config.ffmpeg_path, "-version").await;

    if yt_dlp && ffmpeg {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes (yt-dlp: {}, ffmpeg: {})", yt_dlp, ffmpeg);
    }
}

async fn dependency_ok(program: &Path, version_flag: &str) -> bool {
    match async_process::Command::new(program).arg(version_flag).output().await {
        Ok(output) => output.status.success(),
        Err(e) => {
            warn!("⚠️ {} no disponible: {}", program.display(), e);
            false
        }
    }
}
