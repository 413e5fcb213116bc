use std::fmt;

use thiserror::Error;

/// Errores del sistema de reproducción.
///
/// Cada variante tiene un [`ErrorCode`] estable que el front end puede usar
/// para elegir el mensaje a mostrar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("No se encontró un ID de video en {0}")]
    InvalidUrl(String),

    #[error("La lista de reproducción está vacía")]
    EmptyPlaylist,

    #[error("No se pudo resolver {url}: {reason}")]
    Resolution { url: String, reason: String },

    #[error("Falló la transcodificación: {0}")]
    Transcode(String),

    #[error("El reproductor rechazó el stream: {0}")]
    SinkRejected(String),

    #[error("La cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error("El gestor de cola de este servidor ya no está activo")]
    Closed,
}

impl PlaybackError {
    pub fn resolution(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Resolution {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl(_) => ErrorCode::InvalidUrl,
            Self::EmptyPlaylist => ErrorCode::EmptyPlaylist,
            Self::Resolution { .. } => ErrorCode::Resolution,
            Self::Transcode(_) => ErrorCode::Transcode,
            Self::SinkRejected(_) => ErrorCode::SinkRejected,
            Self::QueueFull(_) => ErrorCode::QueueFull,
            Self::Closed => ErrorCode::Closed,
        }
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(err: std::io::Error) -> Self {
        Self::Transcode(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    EmptyPlaylist,
    Resolution,
    Transcode,
    SinkRejected,
    QueueFull,
    Closed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidUrl => "invalidurl",
            ErrorCode::EmptyPlaylist => "noplaylist",
            ErrorCode::Resolution => "resolution",
            ErrorCode::Transcode => "transcode",
            ErrorCode::SinkRejected => "sinkrejected",
            ErrorCode::QueueFull => "queuefull",
            ErrorCode::Closed => "closed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
