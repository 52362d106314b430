use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    input::{AudioStream, Input, LiveInput},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use symphonia::core::{
    io::{MediaSource, ReadOnlySource},
    probe::Hint,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    audio::{
        bridge::{CompletionSignal, PlaybackOutcome},
        pipeline::RenderPipeline,
        source::{ProgressClock, FRAME},
        transport::{PlaybackHandle, Transport},
    },
    error::{PlaybackError, PlaybackResult},
};

/// Transporte de voz sobre una llamada de songbird
pub struct SongbirdTransport {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    /// Entra al canal de voz y devuelve el transporte listo para adjuntar pistas
    pub async fn join(
        manager: Arc<Songbird>,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlaybackResult<Self> {
        let call = manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| PlaybackError::Transport(format!("no se pudo entrar al canal: {e}")))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(Self {
            guild_id,
            call,
            manager,
        })
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn attach(
        &self,
        pipeline: Box<dyn RenderPipeline>,
        volume: f32,
        progress: ProgressClock,
        signal: CompletionSignal,
    ) -> PlaybackResult<Box<dyn PlaybackHandle>> {
        let base = progress.units();

        let mut hint = Hint::new();
        hint.with_extension("ogg");
        let media: Box<dyn MediaSource> = Box::new(ReadOnlySource::new(pipeline.into_reader()));
        let input = Input::Live(
            LiveInput::Raw(AudioStream {
                input: media,
                hint: Some(hint),
            }),
            None,
        );

        let handle = self.call.lock().await.play_input(input);

        let signal = Arc::new(signal);
        let registered = handle
            .add_event(Event::Track(TrackEvent::End), TrackEndHandler { signal: signal.clone() })
            .and_then(|_| {
                handle.add_event(Event::Track(TrackEvent::Error), TrackEndHandler { signal })
            })
            .and_then(|_| {
                handle.add_event(Event::Periodic(FRAME, None), ProgressUpdater { progress, base })
            })
            .and_then(|_| handle.set_volume(volume));

        if let Err(e) = registered {
            let _ = handle.stop();
            return Err(PlaybackError::Transport(format!("pista no disponible: {e}")));
        }

        Ok(Box::new(SongbirdPlayback(handle)))
    }

    async fn disconnect(&self) -> PlaybackResult<()> {
        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
                Ok(())
            }
            Err(e) => Err(PlaybackError::Transport(e.to_string())),
        }
    }
}

struct SongbirdPlayback(TrackHandle);

impl PlaybackHandle for SongbirdPlayback {
    fn pause(&self) -> PlaybackResult<()> {
        self.0.pause().map_err(|e| PlaybackError::Transport(e.to_string()))
    }

    fn resume(&self) -> PlaybackResult<()> {
        self.0.play().map_err(|e| PlaybackError::Transport(e.to_string()))
    }

    fn set_volume(&self, volume: f32) -> PlaybackResult<()> {
        self.0
            .set_volume(volume)
            .map_err(|e| PlaybackError::Transport(e.to_string()))
    }

    fn stop(&self) {
        if let Err(e) = self.0.stop() {
            debug!("La pista ya estaba detenida: {}", e);
        }
    }
}

/// Traduce el fin o error de la pista en la señal del intento
struct TrackEndHandler {
    signal: Arc<CompletionSignal>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let mut outcome = PlaybackOutcome::Finished;
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in tracks.iter() {
                if let PlayMode::Errored(e) = &state.playing {
                    outcome = PlaybackOutcome::Failed(e.to_string());
                }
            }
        }

        // `fire` puede bloquear hasta el timeout del puente
        let signal = self.signal.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = signal.fire(outcome) {
                debug!("Señal de fin no entregada: {}", e);
            }
        });

        Some(Event::Cancel)
    }
}

/// Mantiene el reloj de progreso en `base` + posición de la pista
struct ProgressUpdater {
    progress: ProgressClock,
    base: u64,
}

#[async_trait]
impl VoiceEventHandler for ProgressUpdater {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            if let Some((state, _)) = tracks.first() {
                let played = ProgressClock::seconds_to_units(state.position.as_secs_f64());
                self.progress.set(self.base + played);
            }
        }
        None
    }
}
