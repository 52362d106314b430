//! # Sources Module
//!
//! Everything between a user's request and a playable [`Source`](crate::audio::source::Source):
//!
//! - [`Locator`]: what the user asked for (a URL or an uploaded attachment)
//! - [`Platform`]: which site a locator points at, and whether it is a playlist
//! - [`Resolver`]: the collaborator that turns a locator into metadata plus a stream URL
//!
//! The production resolver lives in [`ytdlp`] and shells out to `yt-dlp` and `ffprobe`.

pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use std::{fmt, sync::LazyLock};
use url::Url;

use crate::{
    audio::source::{ResolvedInfo, SourceVariant},
    error::{PlaybackError, PlaybackResult},
};

pub use ytdlp::YtDlpResolver;

static NICO_PLAYLIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(mylist|series)/\d+").expect("regex válido"));

/// Archivo subido al chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: u64,
    pub filename: String,
    pub url: String,
}

/// Contenido sin resolver que identifica algo reproducible
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Url(Url),
    Attachment(AttachmentRef),
}

impl Locator {
    pub fn parse(raw: &str) -> PlaybackResult<Self> {
        Url::parse(raw.trim())
            .map(Locator::Url)
            .map_err(|e| PlaybackError::resolution(raw, e))
    }

    pub fn platform(&self) -> Platform {
        match self {
            Locator::Attachment(_) => Platform::Attachment,
            Locator::Url(url) => Platform::detect(url),
        }
    }

    /// Clasifica el locator sin tocar la red.
    pub fn classify(&self) -> LocatorClass {
        let platform = self.platform();
        let is_playlist = match self {
            Locator::Attachment(_) => false,
            Locator::Url(url) => match platform {
                Platform::YouTube => {
                    url.query_pairs().any(|(k, _)| k == "list") && !url.path().starts_with("/watch")
                        || url.path().starts_with("/playlist")
                }
                Platform::NicoNico => NICO_PLAYLIST.is_match(url.path()),
                Platform::SoundCloud => url.path().contains("/sets/"),
                _ => false,
            },
        };

        LocatorClass { is_playlist, platform }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Url(url) => write!(f, "{url}"),
            Locator::Attachment(attachment) => write!(f, "{}", attachment.filename),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    YouTube,
    NicoNico,
    SoundCloud,
    Spotify,
    AppleMusic,
    Direct,
    Attachment,
}

impl Platform {
    pub fn detect(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().trim_start_matches("www.");

        match host {
            "youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be" => Platform::YouTube,
            "nico.ms" => Platform::NicoNico,
            h if h == "nicovideo.jp" || h.ends_with(".nicovideo.jp") => Platform::NicoNico,
            h if h == "soundcloud.com" || h.ends_with(".soundcloud.com") => Platform::SoundCloud,
            "open.spotify.com" => Platform::Spotify,
            "music.apple.com" => Platform::AppleMusic,
            _ => Platform::Direct,
        }
    }

    /// Plataformas que requieren sesión con cookies en cada apertura del pipeline.
    pub fn needs_session(self) -> bool {
        matches!(self, Platform::NicoNico)
    }

    /// yt-dlp no sabe extraer audio de estos catálogos
    pub fn is_supported(self) -> bool {
        !matches!(self, Platform::Spotify | Platform::AppleMusic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorClass {
    pub is_playlist: bool,
    pub platform: Platform,
}

/// Resultado de resolver un locator
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub info: ResolvedInfo,
    pub variant: SourceVariant,
}

/// Entrada de una playlist expandida
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub locator: Locator,
    pub title: Option<String>,
}

/// Colaborador que resuelve locators a fuentes reproducibles
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Obtiene metadatos y URL de stream para un único item
    async fn resolve(&self, locator: &Locator, video_mode: bool) -> PlaybackResult<ResolvedTrack>;

    /// Indica si el locator es una playlist y de qué plataforma viene
    async fn classify(&self, locator: &Locator) -> PlaybackResult<LocatorClass> {
        Ok(locator.classify())
    }

    /// Expande una playlist en sus entradas
    async fn expand(&self, locator: &Locator) -> PlaybackResult<Vec<PlaylistEntry>>;
}
