use dashmap::DashMap;
use serenity::{
    all::{ChannelId, GuildId},
    http::Http,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::{
    audio::{events::PlaybackEvent, manager::QueueManager, queue::QueueEntry},
    error::ErrorCode,
};

/// Publica los eventos de cada servidor en el canal de texto donde se usó
/// el último comando.
pub struct Announcer {
    channels: Arc<DashMap<GuildId, ChannelId>>,
    watching: DashMap<GuildId, ()>,
}

impl Announcer {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            watching: DashMap::new(),
        }
    }

    /// Apunta los avisos del servidor a `channel_id`; la primera vez lanza
    /// la tarea que escucha sus eventos.
    pub fn watch(&self, http: Arc<Http>, manager: &QueueManager, channel_id: ChannelId) {
        let guild_id = manager.guild_id();
        self.channels.insert(guild_id, channel_id);

        if self.watching.insert(guild_id, ()).is_some() {
            return;
        }

        debug!("📢 Anunciando eventos de guild {}", guild_id);
        let events = manager.subscribe();
        let channels = self.channels.clone();
        tokio::spawn(forward_events(http, guild_id, events, channels));
    }
}

impl Default for Announcer {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward_events(
    http: Arc<Http>,
    guild_id: GuildId,
    mut events: broadcast::Receiver<PlaybackEvent>,
    channels: Arc<DashMap<GuildId, ChannelId>>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("⚠️ {} eventos perdidos en guild {}", skipped, guild_id);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if !announces(&event) {
            continue;
        }

        if event.is_error() {
            debug!("📢 Error anunciado en guild {}: {}", guild_id, event);
        }

        let Some(channel_id) = channels.get(&guild_id).map(|c| *c) else {
            continue;
        };

        if let Err(e) = channel_id.say(&*http, render_event(&event)).await {
            warn!("⚠️ No se pudo anunciar {} en guild {}: {:?}", event.name(), guild_id, e);
        }
    }

    debug!("📢 Fin de anuncios para guild {}", guild_id);
}

/// Las URLs inválidas se rechazan en el momento y ya salen en la respuesta
/// del comando
pub fn announces(event: &PlaybackEvent) -> bool {
    !matches!(
        event,
        PlaybackEvent::Error {
            code: ErrorCode::InvalidUrl,
            ..
        }
    )
}

/// Texto del aviso, con autor y duración cuando se conocen
pub fn render_event(event: &PlaybackEvent) -> String {
    match event {
        PlaybackEvent::Playing { entry } | PlaybackEvent::Added { entry } => {
            let mut text = event.to_string();
            if let Some(details) = entry_details(entry) {
                text.push_str(&format!(" ({})", details));
            }
            text
        }
        other => other.to_string(),
    }
}

pub fn entry_details(entry: &QueueEntry) -> Option<String> {
    let meta = &entry.metadata;
    let duration = if meta.is_live {
        Some("en vivo".to_string())
    } else {
        meta.duration.map(format_duration)
    };

    match (meta.uploader.as_deref(), duration) {
        (Some(uploader), Some(duration)) => Some(format!("{} · {}", uploader, duration)),
        (Some(uploader), None) => Some(uploader.to_string()),
        (None, Some(duration)) => Some(duration),
        (None, None) => None,
    }
}

/// Duración redondeada a segundos ("3m 25s")
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(Duration::from_secs(duration.as_secs())).to_string()
}
