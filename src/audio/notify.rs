use async_trait::async_trait;
use serenity::model::id::{ChannelId, UserId};

use crate::audio::source::ResolvedInfo;

/// Avisos que el motor envía al último canal de texto conocido de la guild
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NowPlaying { info: ResolvedInfo, requester: UserId },
    PlaybackFailed { title: String, reason: String },
    ResolutionFailed { locator: String, reason: String },
    IdleDisconnect { idle_secs: u64 },
}

/// Destino de los avisos. Los fallos se registran y nunca frenan la cola.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: ChannelId, notice: Notice) -> anyhow::Result<()>;
}
