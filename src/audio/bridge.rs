use serenity::model::id::GuildId;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tracing::{debug, error, warn};

use crate::error::{PlaybackError, PlaybackResult};

/// Cómo terminó un intento de reproducción
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    Finished,
    Failed(String),
}

/// Señal entregada al motor cuando termina un intento
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub tenant: GuildId,
    pub attempt: u64,
    pub outcome: PlaybackOutcome,
}

/// Canal acotado entre los hilos que empujan audio y el runtime.
///
/// Cada intento de reproducción recibe su propia [`CompletionSignal`]; el motor
/// consume las [`Completion`] desde el receptor devuelto por [`CompletionBridge::new`].
#[derive(Debug, Clone)]
pub struct CompletionBridge {
    tx: flume::Sender<Completion>,
    timeout: Duration,
}

impl CompletionBridge {
    pub fn new(capacity: usize, timeout: Duration) -> (Self, flume::Receiver<Completion>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (Self { tx, timeout }, rx)
    }

    pub fn signal(&self, tenant: GuildId, attempt: u64) -> CompletionSignal {
        CompletionSignal {
            tenant,
            attempt,
            tx: self.tx.clone(),
            timeout: self.timeout,
            fired: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Entrega exactamente una señal por intento.
///
/// `fire` bloquea como mucho `timeout` y nunca más. Si la señal se suelta sin
/// haberse disparado, se entrega como fallo.
#[derive(Debug)]
pub struct CompletionSignal {
    tenant: GuildId,
    attempt: u64,
    tx: flume::Sender<Completion>,
    timeout: Duration,
    fired: AtomicBool,
}

impl CompletionSignal {
    pub fn tenant(&self) -> GuildId {
        self.tenant
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Pensado para el hilo del pipeline; no llamar desde una tarea async.
    pub fn fire(&self, outcome: PlaybackOutcome) -> PlaybackResult<()> {
        if self.fired.swap(true, Ordering::AcqRel) {
            debug!(
                "Señal repetida ignorada para guild {} (intento {})",
                self.tenant, self.attempt
            );
            return Ok(());
        }

        let completion = Completion {
            tenant: self.tenant,
            attempt: self.attempt,
            outcome,
        };

        match self.tx.send_timeout(completion, self.timeout) {
            Ok(()) => Ok(()),
            Err(flume::SendTimeoutError::Timeout(_)) => {
                error!(
                    "⏱️ Señal de fin de pista para guild {} no entregada en {:?}",
                    self.tenant, self.timeout
                );
                Err(PlaybackError::CrossThreadTimeout {
                    tenant: self.tenant,
                    timeout: self.timeout,
                })
            }
            Err(flume::SendTimeoutError::Disconnected(_)) => {
                debug!("Motor detenido, señal de guild {} descartada", self.tenant);
                Ok(())
            }
        }
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        if self.has_fired() {
            return;
        }
        warn!(
            "⚠️ Pipeline de guild {} terminó sin señal (intento {})",
            self.tenant, self.attempt
        );
        let outcome = PlaybackOutcome::Failed("el pipeline terminó sin señal".into());

        // En un worker del runtime no se puede bloquear esperando hueco en el canal
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let _ = self.fire(outcome);
            return;
        };
        self.fired.store(true, Ordering::Release);

        let completion = Completion {
            tenant: self.tenant,
            attempt: self.attempt,
            outcome,
        };
        match self.tx.try_send(completion) {
            Ok(()) | Err(flume::TrySendError::Disconnected(_)) => {}
            Err(flume::TrySendError::Full(completion)) => {
                let tx = self.tx.clone();
                let timeout = self.timeout;
                runtime.spawn_blocking(move || {
                    let tenant = completion.tenant;
                    if let Err(flume::SendTimeoutError::Timeout(_)) =
                        tx.send_timeout(completion, timeout)
                    {
                        error!(
                            "⏱️ Señal de fin de pista para guild {} no entregada en {:?}",
                            tenant, timeout
                        );
                    }
                });
            }
        }
    }
}
