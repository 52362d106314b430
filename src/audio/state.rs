use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::audio::{
    effects::{FilterConfig, Quality},
    item::Item,
    queue::MusicQueue,
    source::Source,
    transport::{PlaybackHandle, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Resolving,
    Playing,
    Paused,
}

/// Fuente adjunta al transporte junto con su control
pub struct ActiveSource {
    pub source: Source,
    pub handle: Box<dyn PlaybackHandle>,
}

/// Estado de reproducción de una guild.
///
/// `phase` es `Playing` o `Paused` solo mientras hay `active`. `attempt` crece
/// cada vez que una fuente se adjunta o se descarta, así las señales de
/// intentos anteriores se reconocen como obsoletas.
pub struct TenantState {
    pub id: GuildId,
    pub queue: MusicQueue,
    pub active: Option<ActiveSource>,
    pub phase: PlaybackPhase,
    pub looping: bool,
    /// Preferencia del usuario; la cola la aplica en el siguiente avance
    pub shuffle: bool,
    pub bass_boost: bool,
    /// Calidad fijada con el comando; si no hay, se usa la del item
    pub quality: Option<Quality>,
    pub last_activity: Instant,
    pub transport: Option<Arc<dyn Transport>>,
    pub text_channel: Option<ChannelId>,
    pub attempt: u64,
    pub skip_requested: bool,
}

impl TenantState {
    pub fn new(id: GuildId, max_queue_size: usize) -> Self {
        Self {
            id,
            queue: MusicQueue::new(max_queue_size),
            active: None,
            phase: PlaybackPhase::Idle,
            looping: false,
            shuffle: false,
            bass_boost: false,
            quality: None,
            last_activity: Instant::now(),
            transport: None,
            text_channel: None,
            attempt: 0,
            skip_requested: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.phase == PlaybackPhase::Playing
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn touch(&mut self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Filtros con los que se abre un item nuevo
    pub fn filters_for(&self, item: &Item) -> FilterConfig {
        FilterConfig {
            bass_boost: self.bass_boost,
            quality: self.quality.unwrap_or(item.quality),
            video_mode: item.video_mode,
        }
    }

    /// Aplica a la cola la preferencia de shuffle pendiente
    pub fn sync_shuffle(&mut self) {
        if self.shuffle == self.queue.is_shuffled() {
            return;
        }
        if self.shuffle {
            self.queue.shuffle();
        } else {
            self.queue.unshuffle();
        }
    }

    /// Quita la fuente activa e invalida las señales que aún pueda emitir
    pub fn take_active(&mut self) -> Option<ActiveSource> {
        self.attempt += 1;
        if matches!(self.phase, PlaybackPhase::Playing | PlaybackPhase::Paused) {
            self.phase = PlaybackPhase::Idle;
        }
        self.active.take()
    }

    /// Vuelve a inactivo sin conexión. Las preferencias se conservan.
    pub fn reset(&mut self) -> (Option<ActiveSource>, Option<Arc<dyn Transport>>) {
        let active = self.take_active();
        self.phase = PlaybackPhase::Idle;
        self.skip_requested = false;
        self.queue.clear();
        debug!("♻️ Estado de guild {} reiniciado", self.id);
        (active, self.transport.take())
    }
}

/// Mapa de guilds a su estado. Cada estado tiene su propio mutex.
pub struct TenantRegistry {
    tenants: DashMap<GuildId, Arc<Mutex<TenantState>>>,
    max_queue_size: usize,
}

impl TenantRegistry {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            tenants: DashMap::new(),
            max_queue_size,
        }
    }

    /// Crea el estado si no existe; registrar dos veces no lo reemplaza
    pub fn register(&self, id: GuildId) -> Arc<Mutex<TenantState>> {
        self.tenants
            .entry(id)
            .or_insert_with(|| {
                info!("📋 Guild {} registrada", id);
                Arc::new(Mutex::new(TenantState::new(id, self.max_queue_size)))
            })
            .clone()
    }

    pub fn get(&self, id: GuildId) -> Option<Arc<Mutex<TenantState>>> {
        self.tenants.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: GuildId) -> Option<Arc<Mutex<TenantState>>> {
        self.tenants.remove(&id).map(|(_, state)| state)
    }

    /// Copia de las entradas para recorrerlas sin retener el mapa
    pub fn snapshot(&self) -> Vec<(GuildId, Arc<Mutex<TenantState>>)> {
        self.tenants
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
