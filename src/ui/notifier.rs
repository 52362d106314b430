use async_trait::async_trait;
use serenity::{builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;
use tracing::debug;

use crate::{
    audio::notify::{Notice, Notifier},
    ui::{
        buttons::{create_player_controls, ControlsState},
        embeds::create_notice_embed,
    },
};

/// Publica los avisos del motor como embeds en el canal de texto
pub struct SerenityNotifier {
    http: Arc<Http>,
}

impl SerenityNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for SerenityNotifier {
    async fn notify(&self, channel: ChannelId, notice: Notice) -> anyhow::Result<()> {
        let mut message = CreateMessage::new().embed(create_notice_embed(&notice));
        if matches!(notice, Notice::NowPlaying { .. }) {
            message = message.components(create_player_controls(ControlsState::default()));
        }

        channel.send_message(&self.http, message).await?;
        debug!("📨 Aviso enviado a canal {}", channel);
        Ok(())
    }
}
