use serenity::model::id::UserId;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::debug;

use crate::{
    audio::{
        effects::FilterConfig,
        pipeline::{PipelineLauncher, PipelineSpec, RenderPipeline},
    },
    error::PlaybackResult,
    sources::{Locator, ResolvedTrack, Resolver},
};

/// Unidades de progreso por segundo (un frame de 20 ms por unidad)
pub const UNITS_PER_SECOND: u64 = 50;
pub const FRAME: Duration = Duration::from_millis(20);

/// Metadatos de una pista resuelta
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInfo {
    pub title: String,
    pub page_url: String,
    pub thumbnail_url: Option<String>,
    pub duration_secs: f64,
}

/// Cómo se obtiene el audio de una fuente
#[derive(Debug, Clone, PartialEq)]
pub enum SourceVariant {
    /// Stream remoto por URL
    Stream { stream_url: String },
    /// Stream de un sitio que exige sesión; las cookies viajan en cada apertura
    SiteSession {
        stream_url: String,
        cookies: Vec<(String, String)>,
        session_id: Option<String>,
    },
    /// Archivo subido al chat
    Upload { raw_url: String },
}

impl SourceVariant {
    pub fn input_url(&self) -> &str {
        match self {
            SourceVariant::Stream { stream_url } | SourceVariant::SiteSession { stream_url, .. } => {
                stream_url
            }
            SourceVariant::Upload { raw_url } => raw_url,
        }
    }

    pub fn request_headers(&self) -> Vec<(String, String)> {
        match self {
            SourceVariant::SiteSession { cookies, .. } if !cookies.is_empty() => {
                let cookie = cookies
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                vec![("Cookie".to_string(), cookie)]
            }
            _ => Vec::new(),
        }
    }

    /// Los archivos subidos no tienen semántica de reconexión
    pub fn reconnects(&self) -> bool {
        !matches!(self, SourceVariant::Upload { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceVariant::Stream { .. } => "stream",
            SourceVariant::SiteSession { .. } => "sesión",
            SourceVariant::Upload { .. } => "archivo",
        }
    }

    pub fn pipeline_spec(&self, start_offset_secs: f64, filters: FilterConfig) -> PipelineSpec {
        PipelineSpec::new(self.input_url(), start_offset_secs, filters)
            .with_reconnect(self.reconnects())
            .with_headers(self.request_headers())
    }
}

/// Reloj de posición compartido con el hilo que empuja el audio.
///
/// Cuenta unidades de 20 ms; el transporte lo actualiza y el motor lo lee.
#[derive(Debug, Clone, Default)]
pub struct ProgressClock(Arc<AtomicU64>);

impl ProgressClock {
    pub fn starting_at(seconds: f64) -> Self {
        Self(Arc::new(AtomicU64::new(Self::seconds_to_units(seconds))))
    }

    pub fn seconds_to_units(seconds: f64) -> u64 {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        (seconds * UNITS_PER_SECOND as f64).round() as u64
    }

    pub fn units(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, units: u64) {
        self.0.store(units, Ordering::Release);
    }

    pub fn advance(&self, units: u64) {
        self.0.fetch_add(units, Ordering::AcqRel);
    }

    pub fn seconds(&self) -> f64 {
        self.units() as f64 / UNITS_PER_SECOND as f64
    }
}

/// Fuente reproducible: metadatos resueltos + pipeline abierto + estado en vivo.
///
/// Nunca se modifica para hacer seek o cambiar filtros; [`Source::reopen_at`]
/// construye una fuente nueva con la misma identidad y un pipeline fresco.
pub struct Source {
    info: ResolvedInfo,
    variant: SourceVariant,
    volume: f32,
    progress: ProgressClock,
    requester: UserId,
    filters: FilterConfig,
    pipeline: Option<Box<dyn RenderPipeline>>,
}

impl Source {
    /// Resuelve el locator y abre el pipeline en `start_offset_secs`
    pub async fn open(
        locator: &Locator,
        start_offset_secs: f64,
        volume: f32,
        requester: UserId,
        filters: FilterConfig,
        resolver: &dyn Resolver,
        launcher: &dyn PipelineLauncher,
    ) -> PlaybackResult<Self> {
        let resolved = resolver.resolve(locator, filters.video_mode).await?;
        Self::from_resolved(resolved, start_offset_secs, volume, requester, filters, launcher)
    }

    pub fn from_resolved(
        resolved: ResolvedTrack,
        start_offset_secs: f64,
        volume: f32,
        requester: UserId,
        filters: FilterConfig,
        launcher: &dyn PipelineLauncher,
    ) -> PlaybackResult<Self> {
        let ResolvedTrack { info, variant } = resolved;
        let pipeline = launcher.launch(variant.pipeline_spec(start_offset_secs, filters))?;

        debug!(
            "🎧 Fuente abierta ({}) '{}' en {:.2}s",
            variant.label(),
            info.title,
            start_offset_secs
        );

        Ok(Self {
            info,
            variant,
            volume: volume.clamp(0.0, 2.0),
            progress: ProgressClock::starting_at(start_offset_secs),
            requester,
            filters,
            pipeline: Some(pipeline),
        })
    }

    /// Fuente nueva con la misma identidad, abierta en otra posición o con otros filtros.
    ///
    /// El pipeline de `self` no se toca: quien llama debe soltarlo en cuanto
    /// adjunte el nuevo.
    pub fn reopen_at(
        &self,
        offset_secs: f64,
        filters: FilterConfig,
        launcher: &dyn PipelineLauncher,
    ) -> PlaybackResult<Source> {
        let resolved = ResolvedTrack {
            info: self.info.clone(),
            variant: self.variant.clone(),
        };
        Self::from_resolved(resolved, offset_secs, self.volume, self.requester, filters, launcher)
    }

    pub fn current_position_secs(&self) -> f64 {
        self.progress.seconds()
    }

    pub fn info(&self) -> &ResolvedInfo {
        &self.info
    }

    pub fn variant(&self) -> &SourceVariant {
        &self.variant
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 2.0);
    }

    pub fn filters(&self) -> FilterConfig {
        self.filters
    }

    pub fn progress(&self) -> ProgressClock {
        self.progress.clone()
    }

    /// Entrega el pipeline al transporte. Solo puede hacerse una vez.
    pub fn take_pipeline(&mut self) -> Option<Box<dyn RenderPipeline>> {
        self.pipeline.take()
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("title", &self.info.title)
            .field("variant", &self.variant.label())
            .field("volume", &self.volume)
            .field("position", &self.current_position_secs())
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}
