use chrono::{DateTime, Utc};
use serenity::model::id::UserId;

use crate::{audio::effects::Quality, sources::Locator};

/// Entrada de la cola: una petición sin resolver más sus parámetros de reproducción.
///
/// Una vez encolado no se modifica; la cola solo entrega copias.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub locator: Locator,
    pub volume: f32,
    pub requester: UserId,
    pub title_hint: Option<String>,
    pub video_mode: bool,
    pub quality: Quality,
    pub enqueued_at: DateTime<Utc>,
}

impl Item {
    pub fn new(locator: Locator, requester: UserId) -> Self {
        Self {
            locator,
            volume: 1.0,
            requester,
            title_hint: None,
            video_mode: false,
            quality: Quality::default(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title_hint = Some(title.into());
        self
    }

    pub fn with_video_mode(mut self, video_mode: bool) -> Self {
        self.video_mode = video_mode;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Título para listados: el sugerido, si no el nombre de archivo o la URL
    pub fn display_title(&self) -> String {
        self.title_hint
            .clone()
            .unwrap_or_else(|| self.locator.to_string())
    }
}
