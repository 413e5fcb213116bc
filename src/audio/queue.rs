use chrono::{DateTime, Utc};
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::{error::PlaybackError, sources::TrackMetadata};

/// Una entrada de la lista de reproducción, inmutable una vez creada
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub url: String,
    pub metadata: TrackMetadata,
    pub added_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(url: impl Into<String>, metadata: TrackMetadata) -> Self {
        Self {
            url: url.into(),
            metadata,
            added_at: Utc::now(),
        }
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }
}

/// Estado observable del reproductor de un servidor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nada en cola ni sonando
    Idle,
    /// Metadata de un `play(url)` en vuelo
    Resolving,
    /// Descarga/transcodificación en vuelo
    Pipelining,
    Playing,
    Paused,
    /// Detenido explícitamente; no avanza solo
    Stopped,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Resolving => "resolving",
            PlayerState::Pipelining => "pipelining",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Stopped => "stopped",
        }
    }
}

/// Lista FIFO; la cabeza es lo que suena o está por sonar
#[derive(Debug)]
pub struct Playlist {
    entries: VecDeque<QueueEntry>,
    max_size: usize,
}

impl Playlist {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega una entrada al final de la cola
    pub fn push_back(&mut self, entry: QueueEntry) -> Result<(), PlaybackError> {
        self.ensure_room()?;
        info!("➕ Agregado a la cola: {}", entry.title());
        self.entries.push_back(entry);
        Ok(())
    }

    /// Coloca una entrada en la cabeza (se salta la cola)
    pub fn push_front(&mut self, entry: QueueEntry) -> Result<(), PlaybackError> {
        self.ensure_room()?;
        info!("⏫ Al frente de la cola: {}", entry.title());
        self.entries.push_front(entry);
        Ok(())
    }

    /// Descarta la cabeza actual
    pub fn pop_head(&mut self) -> Option<QueueEntry> {
        let popped = self.entries.pop_front();
        if let Some(entry) = &popped {
            debug!("⏭️ Cabeza descartada: {}", entry.title());
        }
        popped
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        info!("🗑️ Cola limpiada: {} canciones removidas", cleared);
        cleared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.entries.iter().filter_map(|e| e.metadata.duration).sum()
    }

    fn ensure_room(&self) -> Result<(), PlaybackError> {
        if self.entries.len() >= self.max_size {
            return Err(PlaybackError::QueueFull(self.max_size));
        }
        Ok(())
    }
}

/// Copia de solo lectura del estado de un servidor
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub state: PlayerState,
    pub stopped: bool,
    pub entries: Vec<QueueEntry>,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    pub fn head(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }

    pub fn urls(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.url.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(url: &str) -> QueueEntry {
        QueueEntry::new(url, TrackMetadata::titled(url))
    }

    #[test]
    fn test_fifo_order_with_front_insert() {
        let mut playlist = Playlist::new(10);
        playlist.push_back(entry("a")).unwrap();
        playlist.push_back(entry("b")).unwrap();
        playlist.push_front(entry("x")).unwrap();

        let urls: Vec<_> = playlist.entries().into_iter().map(|e| e.url).collect();
        assert_eq!(urls, vec!["x", "a", "b"]);

        assert_eq!(playlist.pop_head().map(|e| e.url).as_deref(), Some("x"));
        assert_eq!(playlist.head().map(|e| e.url.as_str()), Some("a"));
    }

    #[test]
    fn test_rejects_entries_past_max_size() {
        let mut playlist = Playlist::new(1);
        playlist.push_back(entry("a")).unwrap();

        assert_eq!(playlist.push_back(entry("b")), Err(PlaybackError::QueueFull(1)));
        assert_eq!(playlist.push_front(entry("c")), Err(PlaybackError::QueueFull(1)));
        assert_eq!(playlist.len(), 1);
    }

    #[test]
    fn test_total_duration_skips_unknown() {
        let mut playlist = Playlist::new(10);
        let mut long = entry("a");
        long.metadata.duration = Some(Duration::from_secs(90));
        playlist.push_back(long).unwrap();
        playlist.push_back(entry("b")).unwrap();

        assert_eq!(playlist.total_duration(), Duration::from_secs(90));
        assert_eq!(playlist.clear(), 2);
        assert!(playlist.is_empty());
    }
}
