//! # Bot Module
//!
//! Serenity adapter for Guild Jukebox.
//!
//! This module only translates Discord events into [`PlaybackEngine`] calls:
//! - Guild lifecycle (ready, guild create/delete) registers and drops tenants
//! - Slash commands and player buttons map onto engine operations
//! - The bot's own voice state tells the engine when the voice link is gone
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use guild_jukebox::{audio::{idle::IdleSettings, player::PlaybackEngine}, bot::JukeboxBot, config::Config};
//! # fn example(engine: Arc<PlaybackEngine>) -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let idle = Arc::new(IdleSettings::new(config.idle_timeout));
//! let bot = JukeboxBot::new(config, engine, idle);
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use serenity::{
    all::{
        ChannelId, Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild,
        UserId, VoiceState,
    },
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{idle::IdleSettings, player::PlaybackEngine, voice::SongbirdTransport},
    config::Config,
};

/// Main Discord event handler.
///
/// Holds no playback state of its own: every guild lives inside the shared
/// [`PlaybackEngine`], so the background completion loop and idle monitor see
/// the same tenants as the commands do.
pub struct JukeboxBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    /// Playback engine shared with the background tasks
    pub engine: Arc<PlaybackEngine>,
    /// Idle timeout, changed at runtime by `/timeout`
    pub idle: Arc<IdleSettings>,
}

impl JukeboxBot {
    pub fn new(config: Config, engine: Arc<PlaybackEngine>, idle: Arc<IdleSettings>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            idle,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands go to the guild named by `GUILD_ID` when set (propagates in about
    /// a second), globally otherwise (can take up to an hour).
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Connects the bot to a voice channel and hands the call to the engine.
    ///
    /// If the guild already had queued items they start playing right away.
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
        text_channel: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        let transport = SongbirdTransport::join(manager, guild_id, channel_id).await?;
        self.engine
            .connect(guild_id, Arc::new(transport), Some(text_channel))
            .await?;
        Ok(())
    }

    /// Joins the caller's voice channel unless the guild is already connected
    pub async fn ensure_connected(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        user_id: UserId,
        text_channel: ChannelId,
    ) -> Result<()> {
        if self.engine.is_connected(guild_id).await {
            self.engine.set_text_channel(guild_id, text_channel).await;
            return Ok(());
        }

        let channel_id = handlers::get_user_voice_channel(ctx, guild_id, user_id)?;
        self.join_voice_channel(ctx, guild_id, channel_id, text_channel)
            .await
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    /// Called when the bot is ready and connected to Discord.
    ///
    /// Every guild in the ready payload gets a tenant before any command can
    /// reach it, then the slash commands are registered.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        for guild in &ready.guilds {
            self.engine.register(guild.id);
        }

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        self.engine.register(guild.id);
        if is_new == Some(true) {
            info!("🏠 Nuevo servidor: {} ({})", guild.name, guild.id);
        }
    }

    /// A guild outage keeps the tenant; only a real removal drops it.
    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        if incomplete.unavailable {
            warn!("⚠️ Guild {} no disponible temporalmente", incomplete.id);
            return;
        }

        info!("🚪 Bot removido de guild {}", incomplete.id);
        let engine = self.engine.clone();
        tokio::spawn(async move {
            engine.remove_tenant(incomplete.id).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await
                {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Detects the bot being kicked or moved out of voice.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        if old.is_some() && new.channel_id.is_none() {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.engine.transport_lost(guild_id).await;
        } else {
            debug!("Estado de voz del bot actualizado en guild {}", guild_id);
        }
    }
}
