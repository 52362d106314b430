use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        bridge::{Completion, CompletionBridge, PlaybackOutcome},
        effects::{FilterConfig, Quality},
        item::Item,
        notify::{Notice, Notifier},
        pipeline::PipelineLauncher,
        queue::QueuePage,
        source::{ResolvedInfo, Source},
        state::{ActiveSource, PlaybackPhase, TenantRegistry, TenantState},
        transport::Transport,
    },
    error::{PlaybackError, PlaybackResult},
    sources::Resolver,
};

pub const QUEUE_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_queue_size: usize,
    pub teardown_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            teardown_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    Absolute(f64),
    Relative(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityChange {
    Applied,
    /// Se usará desde la próxima pista
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReport {
    /// Posición (1-indexada) del primer item agregado
    pub position: usize,
    pub added: usize,
    pub started: bool,
}

/// Lo que suena ahora en una guild
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub info: ResolvedInfo,
    pub requester: UserId,
    pub position_secs: f64,
    pub volume: f32,
    pub paused: bool,
    pub looping: bool,
    pub shuffle: bool,
    pub filters: FilterConfig,
}

/// Máquina de estados de reproducción de todas las guilds.
///
/// Las operaciones de una guild se serializan con su mutex; guilds distintas
/// avanzan en paralelo. La fuente activa solo cambia aquí: el transporte y el
/// puente de finalización únicamente avisan.
pub struct PlaybackEngine {
    tenants: TenantRegistry,
    resolver: Arc<dyn Resolver>,
    launcher: Arc<dyn PipelineLauncher>,
    notifier: Arc<dyn Notifier>,
    bridge: CompletionBridge,
    settings: EngineSettings,
}

impl PlaybackEngine {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        launcher: Arc<dyn PipelineLauncher>,
        notifier: Arc<dyn Notifier>,
        bridge: CompletionBridge,
        settings: EngineSettings,
    ) -> Self {
        Self {
            tenants: TenantRegistry::new(settings.max_queue_size),
            resolver,
            launcher,
            notifier,
            bridge,
            settings,
        }
    }

    pub fn tenants(&self) -> &TenantRegistry {
        &self.tenants
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    pub fn register(&self, guild_id: GuildId) {
        self.tenants.register(guild_id);
    }

    /// Elimina la guild tras un margen para que terminen las referencias en vuelo
    pub async fn remove_tenant(&self, guild_id: GuildId) {
        tokio::time::sleep(self.settings.teardown_grace).await;

        let Some(tenant) = self.tenants.remove(guild_id) else {
            debug!("Guild {} ya no estaba registrada", guild_id);
            return;
        };

        let mut state = tenant.lock().await;
        self.release_locked(&mut state).await;
        info!("👋 Guild {} eliminada", guild_id);
    }

    fn tenant(&self, guild_id: GuildId) -> PlaybackResult<Arc<Mutex<TenantState>>> {
        self.tenants
            .get(guild_id)
            .ok_or(PlaybackError::UnknownTenant(guild_id))
    }

    /// Asocia el transporte de voz. Si había cola pendiente, empieza a sonar.
    pub async fn connect(
        &self,
        guild_id: GuildId,
        transport: Arc<dyn Transport>,
        text_channel: Option<ChannelId>,
    ) -> PlaybackResult<()> {
        let tenant = self.tenants.register(guild_id);
        let mut state = tenant.lock().await;

        state.transport = Some(transport);
        if text_channel.is_some() {
            state.text_channel = text_channel;
        }
        state.touch();
        info!("🔊 Guild {} conectada a voz", guild_id);

        if state.phase == PlaybackPhase::Idle && !state.queue.is_empty() {
            self.advance_locked(&mut state).await;
        }

        Ok(())
    }

    /// Detiene la reproducción y cierra el transporte. La cola se descarta.
    pub async fn disconnect(&self, guild_id: GuildId) -> PlaybackResult<()> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        if !state.is_connected() {
            return Err(PlaybackError::NotConnected);
        }

        self.release_locked(&mut state).await;
        Ok(())
    }

    /// La conexión de voz desapareció por fuera (expulsión, canal borrado)
    pub async fn transport_lost(&self, guild_id: GuildId) {
        let Some(tenant) = self.tenants.get(guild_id) else {
            return;
        };
        let mut state = tenant.lock().await;

        if state.is_connected() {
            warn!("📴 Guild {} perdió la conexión de voz", guild_id);
            self.release_locked(&mut state).await;
        }
    }

    /// Suelta fuente y transporte dejando la guild inactiva
    pub(crate) async fn release_locked(&self, state: &mut TenantState) {
        let (active, transport) = state.reset();

        if let Some(active) = active {
            active.handle.stop();
        }

        if let Some(transport) = transport {
            if let Err(e) = transport.disconnect().await {
                warn!("⚠️ Error al desconectar guild {}: {}", state.id, e);
            }
        }
    }

    pub async fn set_text_channel(&self, guild_id: GuildId, channel: ChannelId) {
        let tenant = self.tenants.register(guild_id);
        tenant.lock().await.text_channel = Some(channel);
    }

    pub async fn enqueue(&self, guild_id: GuildId, item: Item) -> PlaybackResult<EnqueueReport> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        state.queue.enqueue(item)?;
        let position = state.queue.len();
        let started = self.start_if_idle(&mut state).await;

        Ok(EnqueueReport {
            position,
            added: 1,
            started,
        })
    }

    /// Encola varios items (playlist). Los que no quepan se descartan.
    pub async fn enqueue_all(
        &self,
        guild_id: GuildId,
        items: Vec<Item>,
    ) -> PlaybackResult<EnqueueReport> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        let position = state.queue.len() + 1;
        let requested = items.len();
        let added = state.queue.enqueue_all(items);
        if added == 0 && requested > 0 {
            return Err(PlaybackError::QueueFull {
                max: self.settings.max_queue_size,
            });
        }
        let started = self.start_if_idle(&mut state).await;

        Ok(EnqueueReport {
            position,
            added,
            started,
        })
    }

    async fn start_if_idle(&self, state: &mut TenantState) -> bool {
        state.touch();
        if state.phase != PlaybackPhase::Idle || !state.is_connected() {
            return false;
        }
        self.advance_locked(state).await;
        true
    }

    /// Pasa al siguiente item de la cola
    pub async fn advance(&self, guild_id: GuildId) -> PlaybackResult<PlaybackPhase> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;
        Ok(self.advance_locked(&mut state).await)
    }

    /// Desencola hasta que un item suene o la cola se agote.
    ///
    /// Los fallos de resolución, de arranque del pipeline o del transporte
    /// saltan el item y prueban con el siguiente.
    async fn advance_locked(&self, state: &mut TenantState) -> PlaybackPhase {
        if let Some(previous) = state.take_active() {
            previous.handle.stop();
        }

        loop {
            let Some(transport) = state.transport.clone() else {
                state.phase = PlaybackPhase::Idle;
                return state.phase;
            };

            state.sync_shuffle();
            let item = match state.queue.dequeue() {
                Ok(item) => item,
                Err(_) => {
                    info!("⏹️ Cola terminada en guild {}", state.id);
                    state.phase = PlaybackPhase::Idle;
                    state.touch();
                    return state.phase;
                }
            };

            state.phase = PlaybackPhase::Resolving;
            let filters = state.filters_for(&item);
            let opened = Source::open(
                &item.locator,
                0.0,
                item.volume,
                item.requester,
                filters,
                self.resolver.as_ref(),
                self.launcher.as_ref(),
            )
            .await;

            let source = match opened {
                Ok(source) => source,
                Err(e) => {
                    warn!("⚠️ Saltando '{}': {}", item.display_title(), e);
                    let notice = Notice::ResolutionFailed {
                        locator: item.display_title(),
                        reason: e.to_string(),
                    };
                    self.notify(state, notice).await;
                    continue;
                }
            };

            let info = source.info().clone();
            let requester = source.requester();
            match self.attach_locked(state, transport, source).await {
                Ok(()) => {
                    info!("🎵 Reproduciendo en guild {}: {}", state.id, info.title);
                    self.notify(state, Notice::NowPlaying { info, requester }).await;
                    return state.phase;
                }
                Err(e) => {
                    warn!("⚠️ No se pudo adjuntar '{}': {}", info.title, e);
                    let notice = Notice::PlaybackFailed {
                        title: info.title,
                        reason: e.to_string(),
                    };
                    self.notify(state, notice).await;
                }
            }
        }
    }

    async fn attach_locked(
        &self,
        state: &mut TenantState,
        transport: Arc<dyn Transport>,
        mut source: Source,
    ) -> PlaybackResult<()> {
        let pipeline = source
            .take_pipeline()
            .ok_or_else(|| PlaybackError::PipelineSpawn("la fuente no tiene pipeline".into()))?;

        state.attempt += 1;
        let signal = self.bridge.signal(state.id, state.attempt);

        match transport
            .attach(pipeline, source.volume(), source.progress(), signal)
            .await
        {
            Ok(handle) => {
                state.active = Some(ActiveSource { source, handle });
                state.phase = PlaybackPhase::Playing;
                state.skip_requested = false;
                state.touch();
                Ok(())
            }
            Err(e) => {
                // La señal del intento fallido ya no corresponde a nada
                state.attempt += 1;
                Err(e)
            }
        }
    }

    /// Procesa una señal del puente de finalización
    pub async fn on_completion(&self, completion: Completion) {
        let Some(tenant) = self.tenants.get(completion.tenant) else {
            debug!("Señal para guild {} ya eliminada", completion.tenant);
            return;
        };
        let mut state = tenant.lock().await;

        if completion.attempt != state.attempt || state.active.is_none() {
            debug!(
                "Señal obsoleta en guild {} (intento {}, actual {})",
                completion.tenant, completion.attempt, state.attempt
            );
            return;
        }

        let finished = state.take_active();
        let skipped = std::mem::take(&mut state.skip_requested);

        match completion.outcome {
            PlaybackOutcome::Finished => {
                if state.looping && !skipped {
                    debug!("🔁 Repitiendo pista en guild {}", state.id);
                    // El cambio de orden pendiente no debe mover la pista repetida
                    state.sync_shuffle();
                    state.queue.prev();
                }
            }
            PlaybackOutcome::Failed(reason) => {
                let title = finished
                    .as_ref()
                    .map(|active| active.source.info().title.clone())
                    .unwrap_or_default();
                error!("❌ Error reproduciendo '{}' en guild {}: {}", title, state.id, reason);
                let notice = Notice::PlaybackFailed {
                    title,
                    reason: PlaybackError::PipelineRuntime(reason).to_string(),
                };
                self.notify(&state, notice).await;
            }
        }

        drop(finished);
        self.advance_locked(&mut state).await;
    }

    /// Consume el receptor del puente hasta que se cancele el token
    pub fn spawn_completion_loop(
        self: Arc<Self>,
        completions: flume::Receiver<Completion>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = completions.recv_async() => match received {
                        Ok(completion) => {
                            let engine = self.clone();
                            tokio::spawn(async move { engine.on_completion(completion).await });
                        }
                        Err(_) => break,
                    },
                }
            }
            info!("🛑 Bucle de finalización detenido");
        })
    }

    pub async fn pause(&self, guild_id: GuildId) -> PlaybackResult<()> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        match (state.phase, state.active.as_ref()) {
            (PlaybackPhase::Playing, Some(active)) => active.handle.pause()?,
            (PlaybackPhase::Paused, _) => return Err(PlaybackError::AlreadyPaused),
            _ => return Err(PlaybackError::NotPlaying),
        }

        state.phase = PlaybackPhase::Paused;
        state.touch();
        info!("⏸️ Reproducción pausada en guild {}", guild_id);
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId) -> PlaybackResult<()> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        match (state.phase, state.active.as_ref()) {
            (PlaybackPhase::Paused, Some(active)) => active.handle.resume()?,
            (PlaybackPhase::Playing, _) => return Err(PlaybackError::NotPaused),
            _ => return Err(PlaybackError::NotPlaying),
        }

        state.phase = PlaybackPhase::Playing;
        state.touch();
        info!("▶️ Reproducción reanudada en guild {}", guild_id);
        Ok(())
    }

    /// Detiene la pista actual; la señal de fin hace avanzar la cola
    pub async fn skip(&self, guild_id: GuildId) -> PlaybackResult<()> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        let Some(active) = state.active.as_ref() else {
            return Err(PlaybackError::NotPlaying);
        };
        active.handle.stop();
        state.skip_requested = true;
        state.touch();
        info!("⏭️ Canción saltada en guild {}", guild_id);
        Ok(())
    }

    /// Vuelve al item anterior
    pub async fn prev(&self, guild_id: GuildId) -> PlaybackResult<()> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        if !state.is_connected() {
            return Err(PlaybackError::NotConnected);
        }

        state.touch();
        state.sync_shuffle();
        if state.active.is_some() {
            // Uno por la pista actual y otro para caer en la anterior
            state.queue.prev();
            state.queue.prev();
            state.skip_requested = true;
            if let Some(active) = state.active.as_ref() {
                active.handle.stop();
            }
        } else {
            state.queue.prev();
            self.advance_locked(&mut state).await;
        }

        info!("⏮️ Volviendo a la canción anterior en guild {}", guild_id);
        Ok(())
    }

    /// Vacía la cola, corta la reproducción y sale del canal de voz
    pub async fn stop(&self, guild_id: GuildId) -> PlaybackResult<()> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        if !state.is_connected() {
            return Err(PlaybackError::NotConnected);
        }

        self.release_locked(&mut state).await;
        info!("⏹️ Reproducción detenida en guild {}", guild_id);
        Ok(())
    }

    /// Mueve la posición de la pista actual; devuelve la posición final en segundos
    pub async fn seek(&self, guild_id: GuildId, target: SeekTarget) -> PlaybackResult<f64> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        let Some(active) = state.active.as_ref() else {
            return Err(PlaybackError::NotPlaying);
        };
        let duration = active.source.info().duration_secs;
        let position = active.source.current_position_secs();
        let filters = active.source.filters();

        let offset = match target {
            SeekTarget::Absolute(secs) if (0.0..=duration).contains(&secs) => secs,
            SeekTarget::Absolute(secs) => {
                return Err(PlaybackError::SeekOutOfRange {
                    requested: secs,
                    duration,
                })
            }
            SeekTarget::Relative(delta) if delta.is_finite() => {
                (position + delta).clamp(0.0, duration.max(0.0))
            }
            SeekTarget::Relative(delta) => {
                return Err(PlaybackError::SeekOutOfRange {
                    requested: delta,
                    duration,
                })
            }
        };

        self.reopen_active(&mut state, offset, filters).await?;
        info!("⏩ Guild {} movida a {:.1}s", guild_id, offset);
        Ok(offset)
    }

    /// Cambia la fuente activa por una nueva abierta en `offset` con `filters`.
    ///
    /// La nueva se lanza antes de soltar la vieja; si no arranca, la vieja sigue
    /// sonando. La vieja se detiene antes de adjuntar la nueva.
    async fn reopen_active(
        &self,
        state: &mut TenantState,
        offset: f64,
        filters: FilterConfig,
    ) -> PlaybackResult<()> {
        let transport = state.transport.clone().ok_or(PlaybackError::NotConnected)?;
        let Some(active) = state.active.as_ref() else {
            return Err(PlaybackError::NotPlaying);
        };
        let was_paused = state.phase == PlaybackPhase::Paused;

        let fresh = active
            .source
            .reopen_at(offset, filters, self.launcher.as_ref())?;

        if let Some(previous) = state.take_active() {
            previous.handle.stop();
        }

        if let Err(e) = self.attach_locked(state, transport, fresh).await {
            warn!("⚠️ No se pudo reabrir la fuente en guild {}: {}", state.id, e);
            self.advance_locked(state).await;
            return Err(e);
        }

        if was_paused {
            if let Some(active) = state.active.as_ref() {
                active.handle.pause()?;
                state.phase = PlaybackPhase::Paused;
            }
        }

        Ok(())
    }

    /// Alterna el bass boost; con algo sonando se reabre en la misma posición
    pub async fn toggle_bass_boost(&self, guild_id: GuildId) -> PlaybackResult<bool> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        let enabled = !state.bass_boost;
        if let Some(active) = state.active.as_ref() {
            let position = active.source.current_position_secs();
            let filters = active.source.filters().with_bass_boost(enabled);
            self.reopen_active(&mut state, position, filters).await?;
        }

        state.bass_boost = enabled;
        state.touch();
        info!(
            "🎛️ Bass boost {} en guild {}",
            if enabled { "activado" } else { "desactivado" },
            guild_id
        );
        Ok(enabled)
    }

    /// Fija la calidad. En modo video o sin nada sonando se aplica a la próxima pista.
    pub async fn set_quality(
        &self,
        guild_id: GuildId,
        quality: Quality,
    ) -> PlaybackResult<QualityChange> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        state.quality = Some(quality);
        state.touch();

        let Some(active) = state.active.as_ref() else {
            return Ok(QualityChange::Deferred);
        };
        let filters = active.source.filters();
        if filters.video_mode {
            info!("🎬 Calidad {} aplazada hasta la próxima pista en guild {}", quality, guild_id);
            return Ok(QualityChange::Deferred);
        }
        if filters.quality == quality {
            return Ok(QualityChange::Applied);
        }

        let position = active.source.current_position_secs();
        self.reopen_active(&mut state, position, filters.with_quality(quality))
            .await?;
        info!("🎚️ Calidad {} aplicada en guild {}", quality, guild_id);
        Ok(QualityChange::Applied)
    }

    /// Ajusta el volumen de la pista actual sin reabrirla
    pub async fn set_volume(&self, guild_id: GuildId, volume: f32) -> PlaybackResult<f32> {
        if !volume.is_finite() || !(0.0..=2.0).contains(&volume) {
            return Err(PlaybackError::InvalidVolume(volume));
        }

        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;
        Self::apply_volume(&mut state, volume)
    }

    /// Suma `delta` al volumen actual (botones ±0.1), acotado a 0.0 - 2.0
    pub async fn adjust_volume(&self, guild_id: GuildId, delta: f32) -> PlaybackResult<f32> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;

        let current = state
            .active
            .as_ref()
            .map(|active| active.source.volume())
            .ok_or(PlaybackError::NotPlaying)?;
        let volume = floor_hundredths((current + delta).clamp(0.0, 2.0));
        Self::apply_volume(&mut state, volume)
    }

    fn apply_volume(state: &mut TenantState, volume: f32) -> PlaybackResult<f32> {
        let Some(active) = state.active.as_mut() else {
            return Err(PlaybackError::NotPlaying);
        };
        active.handle.set_volume(volume)?;
        active.source.set_volume(volume);
        state.touch();
        info!("🔊 Volumen {:.2} en guild {}", volume, state.id);
        Ok(volume)
    }

    pub async fn toggle_loop(&self, guild_id: GuildId) -> PlaybackResult<bool> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;
        state.looping = !state.looping;
        state.touch();
        info!("🔁 Repetición {} en guild {}", state.looping, guild_id);
        Ok(state.looping)
    }

    /// Cambia la preferencia de shuffle. La cola se reordena en el siguiente avance.
    pub async fn toggle_shuffle(&self, guild_id: GuildId) -> PlaybackResult<bool> {
        let tenant = self.tenant(guild_id)?;
        let mut state = tenant.lock().await;
        state.shuffle = !state.shuffle;
        state.touch();
        info!("🔀 Shuffle {} en guild {}", state.shuffle, guild_id);
        Ok(state.shuffle)
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> PlaybackResult<Option<NowPlaying>> {
        let tenant = self.tenant(guild_id)?;
        let state = tenant.lock().await;

        Ok(state.active.as_ref().map(|active| NowPlaying {
            info: active.source.info().clone(),
            requester: active.source.requester(),
            position_secs: active.source.current_position_secs(),
            volume: active.source.volume(),
            paused: state.phase == PlaybackPhase::Paused,
            looping: state.looping,
            shuffle: state.shuffle,
            filters: active.source.filters(),
        }))
    }

    /// Página de la cola; sin número, la que contiene la pista actual
    pub async fn queue_page(
        &self,
        guild_id: GuildId,
        page: Option<usize>,
    ) -> PlaybackResult<QueuePage> {
        let tenant = self.tenant(guild_id)?;
        let state = tenant.lock().await;
        let page = page.unwrap_or_else(|| state.queue.default_page(QUEUE_PAGE_SIZE));
        Ok(state.queue.page(page, QUEUE_PAGE_SIZE))
    }

    pub async fn phase(&self, guild_id: GuildId) -> Option<PlaybackPhase> {
        let tenant = self.tenants.get(guild_id)?;
        let phase = tenant.lock().await.phase;
        Some(phase)
    }

    pub async fn is_connected(&self, guild_id: GuildId) -> bool {
        match self.tenants.get(guild_id) {
            Some(tenant) => tenant.lock().await.is_connected(),
            None => false,
        }
    }

    /// Aviso de mejor esfuerzo al último canal de texto conocido
    pub(crate) async fn notify(&self, state: &TenantState, notice: Notice) {
        let Some(channel) = state.text_channel else {
            debug!("Guild {} sin canal de texto, aviso descartado", state.id);
            return;
        };

        if let Err(e) = self.notifier.notify(channel, notice).await {
            warn!("⚠️ No se pudo avisar en guild {}: {:?}", state.id, e);
        }
    }
}

fn floor_hundredths(volume: f32) -> f32 {
    ((volume * 100.0) + 1e-3).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::notify::MockNotifier,
        sources::Locator,
        testing::{quiet_notifier, FakeLauncher, FakeResolver, FakeTransport},
    };
    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    fn guild() -> GuildId {
        GuildId::new(7)
    }

    fn item(name: &str) -> Item {
        Item::new(
            Locator::parse(&format!("https://example.com/{name}")).unwrap(),
            UserId::new(11),
        )
        .with_title(name)
    }

    struct Harness {
        engine: Arc<PlaybackEngine>,
        completions: flume::Receiver<Completion>,
        transport: FakeTransport,
        launcher: Arc<FakeLauncher>,
        resolver: Arc<FakeResolver>,
    }

    impl Harness {
        fn new(resolver: FakeResolver, notifier: MockNotifier) -> Self {
            let (bridge, completions) = CompletionBridge::new(16, Duration::from_secs(5));
            let resolver = Arc::new(resolver);
            let launcher = Arc::new(FakeLauncher::new());
            let engine = Arc::new(PlaybackEngine::new(
                resolver.clone(),
                launcher.clone(),
                Arc::new(notifier),
                bridge,
                EngineSettings {
                    max_queue_size: 100,
                    teardown_grace: Duration::from_millis(10),
                },
            ));
            engine.register(guild());

            Self {
                engine,
                completions,
                transport: FakeTransport::new(),
                launcher,
                resolver,
            }
        }

        async fn connected(resolver: FakeResolver, notifier: MockNotifier) -> Self {
            let harness = Self::new(resolver, notifier);
            harness.connect().await;
            harness
        }

        async fn connect(&self) {
            self.engine
                .connect(guild(), Arc::new(self.transport.clone()), Some(ChannelId::new(99)))
                .await
                .unwrap();
        }

        /// Delivers the next completion from the bridge to the engine
        async fn pump(&self) {
            let completion = timeout(Duration::from_secs(5), self.completions.recv_async())
                .await
                .expect("completion within bound")
                .expect("bridge open");
            self.engine.on_completion(completion).await;
        }

        async fn enqueue(&self, names: &[&str]) {
            for name in names {
                self.engine.enqueue(guild(), item(name)).await.unwrap();
            }
        }

        async fn title(&self) -> Option<String> {
            self.engine
                .now_playing(guild())
                .await
                .unwrap()
                .map(|now| now.info.title)
        }

        async fn phase(&self) -> PlaybackPhase {
            self.engine.phase(guild()).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_plays_through_queue_then_idles() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;

        let report = h.engine.enqueue(guild(), item("a")).await.unwrap();
        assert!(report.started);
        let report = h.engine.enqueue(guild(), item("b")).await.unwrap();
        assert!(!report.started);
        assert_eq!(report.position, 2);
        assert_eq!(h.title().await.as_deref(), Some("a"));

        h.transport.finish();
        h.pump().await;
        assert_eq!(h.title().await.as_deref(), Some("b"));

        h.transport.finish();
        h.pump().await;
        assert_eq!(h.phase().await, PlaybackPhase::Idle);
        assert_eq!(h.title().await, None);
        assert_eq!(h.transport.disconnects(), 0);
        assert_eq!(h.transport.live(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_without_transport_waits_for_connect() {
        let h = Harness::new(FakeResolver::new(), quiet_notifier());
        h.enqueue(&["a", "b"]).await;
        assert_eq!(h.phase().await, PlaybackPhase::Idle);
        assert_eq!(h.resolver.calls(), 0);

        h.connect().await;
        assert_eq!(h.title().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_resolution_failure_skips_item() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, notice| matches!(notice, Notice::ResolutionFailed { .. }))
            .times(1)
            .returning(|_, _| Ok(()));
        notifier
            .expect_notify()
            .withf(|_, notice| matches!(notice, Notice::NowPlaying { .. }))
            .times(1)
            .returning(|_, _| Ok(()));

        let h = Harness::new(FakeResolver::new().failing_on("bad"), notifier);
        h.enqueue(&["bad", "good"]).await;
        h.connect().await;

        assert_eq!(h.title().await.as_deref(), Some("good"));
        assert_eq!(h.phase().await, PlaybackPhase::Playing);
        assert_eq!(h.resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_skips_item() {
        let h = Harness::new(FakeResolver::new(), quiet_notifier());
        h.enqueue(&["nospawn", "ok"]).await;
        h.connect().await;

        assert_eq!(h.title().await.as_deref(), Some("ok"));
        assert_eq!(h.launcher.specs().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_notification_does_not_block_queue() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .returning(|_, _| Err(anyhow::anyhow!("canal borrado")));

        let h = Harness::new(FakeResolver::new().failing_on("bad"), notifier);
        h.enqueue(&["bad", "good"]).await;
        h.connect().await;

        assert_eq!(h.title().await.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn test_runtime_error_advances_to_next() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, notice| matches!(notice, Notice::PlaybackFailed { title, .. } if title == "a"))
            .times(1)
            .returning(|_, _| Ok(()));
        notifier
            .expect_notify()
            .withf(|_, notice| matches!(notice, Notice::NowPlaying { .. }))
            .returning(|_, _| Ok(()));

        let h = Harness::connected(FakeResolver::new(), notifier).await;
        h.enqueue(&["a", "b"]).await;

        h.transport.fail("decoder crashed");
        h.pump().await;

        assert_eq!(h.title().await.as_deref(), Some("b"));
        assert_eq!(h.phase().await, PlaybackPhase::Playing);
        assert_eq!(h.transport.live(), 1);
    }

    #[tokio::test]
    async fn test_skip_is_a_forced_completion() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.enqueue(&["a", "b", "c"]).await;

        h.engine.skip(guild()).await.unwrap();
        h.pump().await;

        assert_eq!(h.title().await.as_deref(), Some("b"));
        assert_eq!(h.transport.max_live(), 1);
    }

    #[tokio::test]
    async fn test_prev_replays_previous_item() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.enqueue(&["A", "B", "C"]).await;

        h.transport.finish();
        h.pump().await;
        assert_eq!(h.title().await.as_deref(), Some("B"));

        h.engine.prev(guild()).await.unwrap();
        h.pump().await;

        assert_eq!(h.title().await.as_deref(), Some("A"));
        let page = h.engine.queue_page(guild(), None).await.unwrap();
        let current: Vec<usize> = page
            .entries
            .iter()
            .filter(|e| e.is_current)
            .map(|e| e.position)
            .collect();
        assert_eq!(current, vec![1]);
    }

    #[tokio::test]
    async fn test_loop_repeats_only_on_natural_end() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.enqueue(&["a", "b"]).await;
        assert!(h.engine.toggle_loop(guild()).await.unwrap());

        h.transport.finish();
        h.pump().await;
        assert_eq!(h.title().await.as_deref(), Some("a"));

        h.engine.skip(guild()).await.unwrap();
        h.pump().await;
        assert_eq!(h.title().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_loop_repeat_ignores_pending_shuffle_toggle() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        let names: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        h.enqueue(&refs).await;
        assert!(h.engine.toggle_loop(guild()).await.unwrap());
        assert!(h.engine.toggle_shuffle(guild()).await.unwrap());

        h.transport.finish();
        h.pump().await;
        assert_eq!(h.title().await.as_deref(), Some("t0"));

        h.engine.skip(guild()).await.unwrap();
        h.pump().await;
        let shuffled_pick = h.title().await;
        assert!(shuffled_pick.is_some());

        assert!(!h.engine.toggle_shuffle(guild()).await.unwrap());
        h.transport.finish();
        h.pump().await;
        assert_eq!(h.title().await, shuffled_pick);

        let tenant = h.engine.tenants().get(guild()).unwrap();
        assert!(!tenant.lock().await.queue.is_shuffled());
    }

    #[tokio::test]
    async fn test_seek_validation_and_reopen() {
        let h = Harness::connected(FakeResolver::new().with_duration(200.0), quiet_notifier()).await;
        h.enqueue(&["a"]).await;
        let spawned = h.launcher.specs().len();

        for bad in [-5.0, 201.0] {
            assert!(matches!(
                h.engine.seek(guild(), SeekTarget::Absolute(bad)).await,
                Err(PlaybackError::SeekOutOfRange { .. })
            ));
        }
        assert_eq!(h.launcher.specs().len(), spawned);

        let landed = h.engine.seek(guild(), SeekTarget::Absolute(100.0)).await.unwrap();
        assert_eq!(landed, 100.0);

        let now = h.engine.now_playing(guild()).await.unwrap().unwrap();
        assert!((now.position_secs - 100.0).abs() <= 0.02);
        assert_eq!(now.info.title, "a");
        assert_eq!(now.requester, UserId::new(11));
        assert_eq!(h.launcher.last_spec().unwrap().start_offset_secs, 100.0);
        assert_eq!(h.transport.max_live(), 1);

        // La señal de la fuente reemplazada llega tarde y se ignora
        h.pump().await;
        assert_eq!(h.title().await.as_deref(), Some("a"));
        assert_eq!(h.phase().await, PlaybackPhase::Playing);
    }

    #[tokio::test]
    async fn test_relative_seek_clamps() {
        let h = Harness::connected(FakeResolver::new().with_duration(200.0), quiet_notifier()).await;
        h.enqueue(&["a"]).await;

        assert_eq!(h.engine.seek(guild(), SeekTarget::Relative(-10.0)).await.unwrap(), 0.0);
        assert_eq!(h.engine.seek(guild(), SeekTarget::Relative(1000.0)).await.unwrap(), 200.0);
    }

    #[tokio::test]
    async fn test_seek_while_paused_stays_paused() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.enqueue(&["a"]).await;
        h.engine.pause(guild()).await.unwrap();

        h.engine.seek(guild(), SeekTarget::Absolute(30.0)).await.unwrap();

        assert_eq!(h.phase().await, PlaybackPhase::Paused);
        assert_eq!(h.transport.last_paused(), Some(true));
    }

    #[tokio::test]
    async fn test_bass_boost_reopens_at_position() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.enqueue(&["a"]).await;
        h.engine.seek(guild(), SeekTarget::Absolute(50.0)).await.unwrap();

        assert!(h.engine.toggle_bass_boost(guild()).await.unwrap());

        let spec = h.launcher.last_spec().unwrap();
        assert!(spec.filters.bass_boost);
        assert!((spec.start_offset_secs - 50.0).abs() <= 0.02);
        assert_eq!(h.transport.live(), 1);

        assert!(!h.engine.toggle_bass_boost(guild()).await.unwrap());
        assert!(!h.launcher.last_spec().unwrap().filters.bass_boost);
    }

    #[tokio::test]
    async fn test_quality_change_deferred_in_video_mode() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.engine
            .enqueue(guild(), item("clip").with_video_mode(true))
            .await
            .unwrap();
        h.enqueue(&["song"]).await;
        let spawned = h.launcher.specs().len();

        let change = h.engine.set_quality(guild(), Quality::Low).await.unwrap();
        assert_eq!(change, QualityChange::Deferred);
        assert_eq!(h.launcher.specs().len(), spawned);

        h.transport.finish();
        h.pump().await;
        assert_eq!(h.launcher.last_spec().unwrap().filters.quality, Quality::Low);

        let change = h.engine.set_quality(guild(), Quality::Ultra).await.unwrap();
        assert_eq!(change, QualityChange::Applied);
        assert_eq!(h.launcher.last_spec().unwrap().filters.quality, Quality::Ultra);
    }

    #[tokio::test]
    async fn test_pause_resume_outside_playback_are_user_errors() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        assert!(matches!(h.engine.pause(guild()).await, Err(PlaybackError::NotPlaying)));
        assert!(matches!(h.engine.resume(guild()).await, Err(PlaybackError::NotPlaying)));

        h.enqueue(&["a"]).await;
        assert!(matches!(h.engine.resume(guild()).await, Err(PlaybackError::NotPaused)));
        h.engine.pause(guild()).await.unwrap();
        assert!(matches!(h.engine.pause(guild()).await, Err(PlaybackError::AlreadyPaused)));
        h.engine.resume(guild()).await.unwrap();
        assert_eq!(h.phase().await, PlaybackPhase::Playing);
        assert_eq!(h.transport.last_paused(), Some(false));
    }

    #[tokio::test]
    async fn test_volume_validation_and_adjustment() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.enqueue(&["a"]).await;

        assert!(matches!(
            h.engine.set_volume(guild(), 2.5).await,
            Err(PlaybackError::InvalidVolume(_))
        ));
        assert_eq!(h.engine.set_volume(guild(), 0.7).await.unwrap(), 0.7);
        assert_eq!(h.engine.adjust_volume(guild(), 0.1).await.unwrap(), 0.8);
        assert_eq!(h.transport.last_volume(), Some(0.8));
        assert_eq!(h.engine.adjust_volume(guild(), 5.0).await.unwrap(), 2.0);
        assert_eq!(h.engine.adjust_volume(guild(), -9.0).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_shuffle_waits_for_next_advance() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        let names: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        h.enqueue(&refs).await;

        assert!(h.engine.toggle_shuffle(guild()).await.unwrap());
        {
            let tenant = h.engine.tenants().get(guild()).unwrap();
            assert!(!tenant.lock().await.queue.is_shuffled());
        }
        assert_eq!(h.title().await.as_deref(), Some("t0"));

        h.transport.finish();
        h.pump().await;

        let tenant = h.engine.tenants().get(guild()).unwrap();
        let state = tenant.lock().await;
        assert!(state.queue.is_shuffled());
        assert_eq!(state.queue.iter().next().map(Item::display_title).as_deref(), Some("t0"));
    }

    #[tokio::test]
    async fn test_stop_clears_queue_and_disconnects() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.enqueue(&["a", "b"]).await;

        h.engine.stop(guild()).await.unwrap();
        h.pump().await;

        assert_eq!(h.phase().await, PlaybackPhase::Idle);
        assert_eq!(h.transport.disconnects(), 1);
        assert_eq!(h.transport.live(), 0);
        assert_eq!(h.engine.queue_page(guild(), None).await.unwrap().total_items, 0);
        assert!(matches!(h.engine.stop(guild()).await, Err(PlaybackError::NotConnected)));
    }

    #[tokio::test]
    async fn test_attach_failure_skips_item() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.transport.fail_next_attach();
        h.engine
            .enqueue_all(guild(), vec![item("a"), item("b")])
            .await
            .unwrap();

        assert_eq!(h.title().await.as_deref(), Some("b"));

        // El intento rechazado suelta su señal; debe llegar como obsoleta
        h.pump().await;
        assert_eq!(h.title().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_completion_after_removal_is_noop() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        h.enqueue(&["a"]).await;

        h.engine.remove_tenant(guild()).await;
        h.pump().await;

        assert_eq!(h.engine.phase(guild()).await, None);
        assert_eq!(h.transport.disconnects(), 1);
        assert!(matches!(
            h.engine.skip(guild()).await,
            Err(PlaybackError::UnknownTenant(_))
        ));
    }

    #[tokio::test]
    async fn test_tenants_advance_independently() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        let other = GuildId::new(8);
        let other_transport = FakeTransport::new();
        h.engine
            .connect(other, Arc::new(other_transport.clone()), None)
            .await
            .unwrap();

        h.enqueue(&["a", "b"]).await;
        h.engine.enqueue(other, item("x")).await.unwrap();
        h.engine.enqueue(other, item("y")).await.unwrap();

        other_transport.finish();
        h.transport.finish();
        h.pump().await;
        h.pump().await;

        assert_eq!(h.title().await.as_deref(), Some("b"));
        let other_now = h.engine.now_playing(other).await.unwrap().unwrap();
        assert_eq!(other_now.info.title, "y");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_completion_loop_drives_queue() {
        let h = Harness::connected(FakeResolver::new(), quiet_notifier()).await;
        let shutdown = CancellationToken::new();
        let worker = h
            .engine
            .clone()
            .spawn_completion_loop(h.completions.clone(), shutdown.clone());

        h.enqueue(&["a", "b"]).await;
        h.transport.finish();

        let mut advanced = false;
        for _ in 0..200 {
            if h.title().await.as_deref() == Some("b") {
                advanced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(advanced);

        shutdown.cancel();
        timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
    }

    #[test]
    fn test_volume_floor_to_hundredths() {
        assert_eq!(floor_hundredths(0.7 + 0.1), 0.8);
        assert_eq!(floor_hundredths(1.237), 1.23);
        assert_eq!(floor_hundredths(0.0), 0.0);
    }
}
