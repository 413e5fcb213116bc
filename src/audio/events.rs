use std::fmt;

use super::queue::QueueEntry;
use crate::error::{ErrorCode, PlaybackError};

/// Eventos emitidos por el gestor de cola de un servidor.
///
/// Todo resultado (éxito o fallo) llega al front end por aquí; los
/// rechazos de pausa/reanudación son eventos propios, no errores.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Playing { entry: QueueEntry },
    Added { entry: QueueEntry },
    Paused,
    CannotPause,
    Unpaused,
    CannotUnpause,
    Stopped,
    Reset,
    Error { code: ErrorCode, message: String },
}

impl PlaybackEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackEvent::Playing { .. } => "playing",
            PlaybackEvent::Added { .. } => "added",
            PlaybackEvent::Paused => "paused",
            PlaybackEvent::CannotPause => "cannotPause",
            PlaybackEvent::Unpaused => "unpaused",
            PlaybackEvent::CannotUnpause => "cannotUnpause",
            PlaybackEvent::Stopped => "stopped",
            PlaybackEvent::Reset => "reset",
            PlaybackEvent::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PlaybackEvent::Error { .. })
    }
}

impl From<&PlaybackError> for PlaybackEvent {
    fn from(err: &PlaybackError) -> Self {
        PlaybackEvent::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for PlaybackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackEvent::Playing { entry } => write!(f, "▶️ Reproduciendo: **{}**", entry.title()),
            PlaybackEvent::Added { entry } => write!(f, "➕ Agregado a la cola: **{}**", entry.title()),
            PlaybackEvent::Paused => f.write_str("⏸️ Reproducción pausada"),
            PlaybackEvent::CannotPause => f.write_str("⚠️ No hay nada que pausar"),
            PlaybackEvent::Unpaused => f.write_str("▶️ Reproducción reanudada"),
            PlaybackEvent::CannotUnpause => f.write_str("⚠️ No hay nada que reanudar"),
            PlaybackEvent::Stopped => f.write_str("⏹️ Reproducción detenida"),
            PlaybackEvent::Reset => f.write_str("🗑️ Cola reiniciada"),
            PlaybackEvent::Error { code, message } => write!(f, "❌ {} (`{}`)", message, code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_event_carries_code_and_message() {
        let event = PlaybackEvent::from(&PlaybackError::EmptyPlaylist);

        assert!(event.is_error());
        assert_eq!(event.name(), "error");
        assert_eq!(
            event.to_string(),
            "❌ La lista de reproducción está vacía (`noplaylist`)"
        );
    }
}
