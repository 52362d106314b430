use serenity::model::id::GuildId;
use std::time::Duration;
use thiserror::Error;

/// Errores del motor de reproducción.
///
/// Hay dos familias. Los fallos recuperables (`Resolution`, `PipelineSpawn`,
/// `PipelineRuntime`, `CrossThreadTimeout`) se manejan dentro del motor saltando
/// al siguiente item. El resto son rechazos de validación que se devuelven al
/// usuario sin tocar el estado.
#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    #[error("la cola está vacía")]
    QueueEmpty,

    #[error("la cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error("no se pudo resolver {locator}: {reason}")]
    Resolution { locator: String, reason: String },

    #[error("no se pudo iniciar el proceso de audio: {0}")]
    PipelineSpawn(String),

    #[error("error durante la reproducción: {0}")]
    PipelineRuntime(String),

    #[error("posición {requested:.1}s fuera de rango (0 - {duration:.1}s)")]
    SeekOutOfRange { requested: f64, duration: f64 },

    #[error("la señal de fin de pista para guild {tenant} no se entregó en {timeout:?}")]
    CrossThreadTimeout { tenant: GuildId, timeout: Duration },

    #[error("calidad inválida '{0}', usa low/medium/high/ultra")]
    InvalidQuality(String),

    #[error("volumen {0} fuera de rango (0.0 - 2.0)")]
    InvalidVolume(f32),

    #[error("el tiempo de inactividad debe ser 0 o mayor, recibido {0}")]
    InvalidIdleTimeout(i64),

    #[error("no hay nada reproduciéndose")]
    NotPlaying,

    #[error("la reproducción ya está pausada")]
    AlreadyPaused,

    #[error("la reproducción no está pausada")]
    NotPaused,

    #[error("no hay conexión de voz activa")]
    NotConnected,

    #[error("guild {0} no está registrada")]
    UnknownTenant(GuildId),

    #[error("error de transporte de voz: {0}")]
    Transport(String),
}

impl PlaybackError {
    /// True for synchronous validation rejections that never change state.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. }
                | Self::SeekOutOfRange { .. }
                | Self::InvalidQuality(_)
                | Self::InvalidVolume(_)
                | Self::InvalidIdleTimeout(_)
                | Self::NotPlaying
                | Self::AlreadyPaused
                | Self::NotPaused
                | Self::NotConnected
        )
    }

    pub fn resolution(locator: impl ToString, reason: impl ToString) -> Self {
        Self::Resolution {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_not_faults() {
        assert!(PlaybackError::NotPaused.is_user_error());
        assert!(PlaybackError::SeekOutOfRange { requested: -5.0, duration: 10.0 }.is_user_error());
        assert!(!PlaybackError::PipelineSpawn("ffmpeg".into()).is_user_error());
        assert!(!PlaybackError::resolution("https://x", "404").is_user_error());
    }
}
