use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::info;

use super::{
    manager::{PipelineSettings, QueueManager},
    sink::SinkFactory,
    transcoder::Transcoder,
};
use crate::sources::MediaResolver;

/// Un gestor de cola por servidor, creado la primera vez que se pide.
///
/// Los servidores no comparten estado: cada uno tiene su worker, su sink y
/// sus archivos temporales.
pub struct Registry {
    managers: DashMap<GuildId, Arc<QueueManager>>,
    resolver: Arc<dyn MediaResolver>,
    transcoder: Arc<dyn Transcoder>,
    sinks: Arc<dyn SinkFactory>,
    settings: PipelineSettings,
}

impl Registry {
    pub fn new(
        resolver: Arc<dyn MediaResolver>,
        transcoder: Arc<dyn Transcoder>,
        sinks: Arc<dyn SinkFactory>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            managers: DashMap::new(),
            resolver,
            transcoder,
            sinks,
            settings,
        }
    }

    /// Devuelve el gestor del servidor, creándolo si no existe
    pub fn get(&self, guild_id: GuildId) -> Arc<QueueManager> {
        self.managers
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Creando gestor de cola para guild {}", guild_id);
                Arc::new(QueueManager::spawn(
                    guild_id,
                    self.resolver.clone(),
                    self.transcoder.clone(),
                    self.sinks.as_ref(),
                    self.settings.clone(),
                ))
            })
            .clone()
    }

    /// Gestor existente, sin crear uno nuevo
    pub fn get_existing(&self, guild_id: GuildId) -> Option<Arc<QueueManager>> {
        self.managers.get(&guild_id).map(|m| m.clone())
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Detiene todos los servidores (apagado del bot)
    pub fn stop_all(&self) {
        for manager in self.managers.iter() {
            let _ = manager.stop();
        }
    }
}
