use async_trait::async_trait;

use crate::{
    audio::{bridge::CompletionSignal, pipeline::RenderPipeline, source::ProgressClock},
    error::PlaybackResult,
};

/// Conexión de voz de una guild.
///
/// `attach` entrega el pipeline a un hilo propio del transporte. Ese hilo
/// actualiza `progress` y dispara `signal` al terminar o fallar. Detener la
/// reproducción con [`PlaybackHandle::stop`] también dispara la señal.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn attach(
        &self,
        pipeline: Box<dyn RenderPipeline>,
        volume: f32,
        progress: ProgressClock,
        signal: CompletionSignal,
    ) -> PlaybackResult<Box<dyn PlaybackHandle>>;

    async fn disconnect(&self) -> PlaybackResult<()>;
}

/// Control sobre una reproducción adjunta
pub trait PlaybackHandle: Send + Sync {
    fn pause(&self) -> PlaybackResult<()>;

    fn resume(&self) -> PlaybackResult<()>;

    fn set_volume(&self, volume: f32) -> PlaybackResult<()>;

    fn stop(&self);
}
