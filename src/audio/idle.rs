use futures::future::join_all;
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    audio::{notify::Notice, player::PlaybackEngine, state::PlaybackPhase},
    error::{PlaybackError, PlaybackResult},
};

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Tiempo de inactividad permitido, modificable en caliente
#[derive(Debug)]
pub struct IdleSettings {
    timeout_secs: AtomicU64,
}

impl IdleSettings {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs: AtomicU64::new(timeout_secs),
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.load(Ordering::Relaxed)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs())
    }

    pub fn set_timeout_secs(&self, secs: i64) -> PlaybackResult<u64> {
        let secs = u64::try_from(secs).map_err(|_| PlaybackError::InvalidIdleTimeout(secs))?;
        self.timeout_secs.store(secs, Ordering::Relaxed);
        info!("⏲️ Tiempo de inactividad fijado en {}s", secs);
        Ok(secs)
    }
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT_SECS)
    }
}

/// Barrido periódico que desconecta las guilds inactivas
pub struct IdleMonitor {
    engine: Arc<PlaybackEngine>,
    settings: Arc<IdleSettings>,
    interval: Duration,
}

impl IdleMonitor {
    pub fn new(engine: Arc<PlaybackEngine>, settings: Arc<IdleSettings>, interval: Duration) -> Self {
        Self {
            engine,
            settings,
            interval,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let disconnected = self.sweep().await;
                        if !disconnected.is_empty() {
                            info!("💤 {} guild(s) desconectadas por inactividad", disconnected.len());
                        }
                    }
                }
            }
            info!("🛑 Monitor de inactividad detenido");
        })
    }

    pub async fn sweep(&self) -> Vec<GuildId> {
        self.sweep_at(Instant::now()).await
    }

    /// Revisa todas las guilds contra `now`; devuelve las desconectadas.
    ///
    /// Una guild con su mutex ocupado tiene una operación en curso y se deja
    /// para el siguiente barrido. Una guild en pausa cuenta como activa.
    pub async fn sweep_at(&self, now: Instant) -> Vec<GuildId> {
        let timeout = self.settings.timeout();
        let tenants = self.engine.tenants().snapshot();

        let checks = tenants.into_iter().map(|(id, tenant)| async move {
            let Ok(mut state) = tenant.try_lock() else {
                debug!("Guild {} ocupada, se revisa en el próximo barrido", id);
                return None;
            };

            if !state.is_connected() {
                return None;
            }

            if matches!(
                state.phase,
                PlaybackPhase::Playing | PlaybackPhase::Paused | PlaybackPhase::Resolving
            ) {
                state.touch_at(now);
                return None;
            }

            let idle = state.idle_for(now);
            if idle < timeout {
                return None;
            }

            info!("💤 Guild {} inactiva {}s, desconectando", id, idle.as_secs());
            self.engine.release_locked(&mut state).await;
            let notice = Notice::IdleDisconnect {
                idle_secs: idle.as_secs(),
            };
            self.engine.notify(&state, notice).await;
            Some(id)
        });

        join_all(checks).await.into_iter().flatten().collect()
    }
}
