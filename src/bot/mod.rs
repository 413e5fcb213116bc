//! # Bot Module
//!
//! Discord front end for the queue bot.
//!
//! - Registers the slash commands (globally, or per guild for development)
//! - Maps every command 1:1 onto the guild's [`QueueManager`]
//! - Joins the caller's voice channel on `play`/`add`
//! - Forwards each guild's playback events to its last command channel
//! - Stops a guild when the bot is disconnected from voice
//!
//! [`QueueManager`]: crate::audio::manager::QueueManager

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{error, info, warn};

pub mod announcer;
pub mod commands;
pub mod handlers;

use crate::{audio::registry::Registry, cache::MetadataCache, config::Config};
use announcer::Announcer;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

/// Handler principal de eventos de Discord
pub struct QueueBot {
    config: Arc<Config>,
    registry: Arc<Registry>,
    cache: Arc<MetadataCache>,
    announcer: Announcer,
    // `ready` se repite en cada reconexión
    maintenance_started: AtomicBool,
}

impl QueueBot {
    pub fn new(config: Arc<Config>, registry: Arc<Registry>, cache: Arc<MetadataCache>) -> Self {
        Self {
            config,
            registry,
            cache,
            announcer: Announcer::new(),
            maintenance_started: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn announcer(&self) -> &Announcer {
        &self.announcer
    }

    /// Registra los comandos slash, por guild si `GUILD_ID` está definido
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for QueueBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let cache = self.cache.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            maintenance_tasks(cache, registry).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Detiene la reproducción cuando el bot sale del canal de voz
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        info!("🔌 Bot desconectado en guild {}", guild_id);
        if let Some(manager) = self.registry.get_existing(guild_id) {
            if let Err(e) = manager.stop() {
                error!("Error al detener reproducción: {:?}", e);
            }
        }
    }
}

/// Limpieza periódica de la caché de metadata
async fn maintenance_tasks(cache: Arc<MetadataCache>, registry: Arc<Registry>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;

        let removed = cache.cleanup_old_entries();
        info!(
            "🧹 Mantenimiento: {} entradas expiradas eliminadas, {} en caché, {} servidores activos",
            removed,
            cache.len(),
            registry.len()
        );
    }
}
