use anyhow::Result;
use regex::Regex;
use serenity::{
    builder::{
        CreateActionRow, CreateEmbed, CreateInteractionResponse, CreateInteractionResponseFollowup,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction, ResolvedValue},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::{
    audio::{
        effects::Quality,
        item::Item,
        player::{QualityChange, SeekTarget},
        state::PlaybackPhase,
    },
    bot::JukeboxBot,
    error::PlaybackError,
    sources::{AttachmentRef, Locator},
    ui::{
        buttons::{create_pagination_controls, create_player_controls, ButtonAction, ControlsState},
        embeds,
    },
};

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:(\d+):)?(\d+):)?(\d+(?:\.\d+)?)$").expect("regex válido")
});

/// Respuesta de un comando antes de enviarla a Discord
struct Reply {
    embed: CreateEmbed,
    components: Vec<CreateActionRow>,
    ephemeral: bool,
}

impl Reply {
    fn public(embed: CreateEmbed) -> Self {
        Self {
            embed,
            components: Vec::new(),
            ephemeral: false,
        }
    }

    fn private(embed: CreateEmbed) -> Self {
        Self {
            ephemeral: true,
            ..Self::public(embed)
        }
    }

    fn with_components(mut self, components: Vec<CreateActionRow>) -> Self {
        self.components = components;
        self
    }

    fn from_error(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<PlaybackError>() {
            Some(e) if e.is_user_error() => {
                Self::private(embeds::create_error_embed("No se pudo completar", &e.to_string()))
            }
            Some(e) => {
                warn!("⚠️ Error del motor: {}", e);
                Self::private(embeds::create_error_embed("Error", &e.to_string()))
            }
            None => Self::private(embeds::create_error_embed("Error", &error.to_string())),
        }
    }
}

/// Comandos que pueden tardar (resolver, conectar, reabrir) y se difieren
fn is_slow(command: &str) -> bool {
    matches!(command, "play" | "playfile" | "join" | "seek" | "bassboost" | "quality")
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let deferred = is_slow(&command.data.name);
    if deferred {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await?;
    }

    let result = match command.data.name.as_str() {
        "join" => handle_join(ctx, &command, bot, guild_id).await,
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "playfile" => handle_playfile(ctx, &command, bot, guild_id).await,
        "skip" => handle_skip(bot, guild_id).await,
        "prev" => handle_prev(bot, guild_id).await,
        "stop" => handle_stop(bot, guild_id).await,
        "pause" => handle_pause(bot, guild_id).await,
        "resume" => handle_resume(bot, guild_id).await,
        "seek" => handle_seek(&command, bot, guild_id).await,
        "bassboost" => handle_bassboost(bot, guild_id).await,
        "quality" => handle_quality(&command, bot, guild_id).await,
        "volume" => handle_volume(&command, bot, guild_id).await,
        "loop" => handle_loop(bot, guild_id).await,
        "shuffle" => handle_shuffle(bot, guild_id).await,
        "queue" => handle_queue(&command, bot, guild_id).await,
        "nowplaying" => handle_nowplaying(bot, guild_id).await,
        "timeout" => handle_timeout(&command, bot),
        _ => Ok(Reply::private(embeds::create_error_embed(
            "Comando no reconocido",
            "Este comando no existe",
        ))),
    };

    let reply = result.unwrap_or_else(|e| Reply::from_error(&e));
    send_reply(ctx, &command, reply, deferred).await
}

/// Cómo llega una respuesta a Discord según si el comando se difirió
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Create,
    EditDeferred,
    /// El defer es público: se borra y el mensaje va como seguimiento privado
    PrivateFollowup,
}

fn delivery(deferred: bool, ephemeral: bool) -> Delivery {
    match (deferred, ephemeral) {
        (false, _) => Delivery::Create,
        (true, false) => Delivery::EditDeferred,
        (true, true) => Delivery::PrivateFollowup,
    }
}

async fn send_reply(
    ctx: &Context,
    command: &CommandInteraction,
    reply: Reply,
    deferred: bool,
) -> Result<()> {
    match delivery(deferred, reply.ephemeral) {
        Delivery::Create => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .embed(reply.embed)
                            .components(reply.components)
                            .ephemeral(reply.ephemeral),
                    ),
                )
                .await?;
        }
        Delivery::EditDeferred => {
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .embed(reply.embed)
                        .components(reply.components),
                )
                .await?;
        }
        Delivery::PrivateFollowup => {
            if let Err(e) = command.delete_response(&ctx.http).await {
                warn!("⚠️ No se pudo borrar la respuesta diferida: {:?}", e);
            }
            command
                .create_followup(
                    ctx,
                    CreateInteractionResponseFollowup::new()
                        .embed(reply.embed)
                        .components(reply.components)
                        .ephemeral(true),
                )
                .await?;
        }
    }

    Ok(())
}

fn option<'a>(command: &'a CommandInteraction, name: &str) -> Option<ResolvedValue<'a>> {
    command
        .data
        .options()
        .into_iter()
        .find(|opt| opt.name == name)
        .map(|opt| opt.value)
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    match option(command, name) {
        Some(ResolvedValue::String(value)) => Some(value),
        _ => None,
    }
}

fn number_option(command: &CommandInteraction, name: &str) -> Option<f64> {
    match option(command, name) {
        Some(ResolvedValue::Number(value)) => Some(value),
        Some(ResolvedValue::Integer(value)) => Some(value as f64),
        _ => None,
    }
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    match option(command, name) {
        Some(ResolvedValue::Integer(value)) => Some(value),
        _ => None,
    }
}

fn bool_option(command: &CommandInteraction, name: &str) -> Option<bool> {
    match option(command, name) {
        Some(ResolvedValue::Boolean(value)) => Some(value),
        _ => None,
    }
}

fn start_volume(command: &CommandInteraction, bot: &JukeboxBot) -> Result<f32> {
    let volume = number_option(command, "volume")
        .map(|v| v as f32)
        .unwrap_or(bot.config().default_volume);
    if !volume.is_finite() || !(0.0..=2.0).contains(&volume) {
        return Err(PlaybackError::InvalidVolume(volume).into());
    }
    Ok(volume)
}

// Handlers específicos para cada comando

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply> {
    bot.ensure_connected(ctx, guild_id, command.user.id, command.channel_id)
        .await?;
    Ok(Reply::public(embeds::create_success_embed(
        "Conectado",
        "🔊 Listo para reproducir. Usa `/play <url>`",
    )))
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply> {
    let raw = string_option(command, "url")
        .ok_or_else(|| anyhow::anyhow!("URL no proporcionada"))?;
    let locator = Locator::parse(raw)?;
    let volume = start_volume(command, bot)?;
    let video_mode = bool_option(command, "video").unwrap_or(false);
    let requester = command.user.id;

    let class = bot.engine.resolver().classify(&locator).await?;
    if !class.platform.is_supported() {
        return Err(PlaybackError::resolution(&locator, "plataforma no soportada").into());
    }

    bot.ensure_connected(ctx, guild_id, requester, command.channel_id)
        .await?;

    if class.is_playlist {
        let entries = bot.engine.resolver().expand(&locator).await?;
        if entries.is_empty() {
            return Err(PlaybackError::resolution(&locator, "la playlist está vacía").into());
        }

        let items: Vec<Item> = entries
            .into_iter()
            .take(bot.config().max_playlist_size)
            .map(|entry| {
                let item = Item::new(entry.locator, requester)
                    .with_volume(volume)
                    .with_video_mode(video_mode);
                match entry.title {
                    Some(title) => item.with_title(title),
                    None => item,
                }
            })
            .collect();

        let report = bot.engine.enqueue_all(guild_id, items).await?;
        info!("📋 {} canciones agregadas en guild {}", report.added, guild_id);
        return Ok(Reply::public(embeds::create_enqueued_embed(
            raw,
            report.position,
            report.added,
        )));
    }

    let item = Item::new(locator, requester)
        .with_volume(volume)
        .with_video_mode(video_mode);
    let title = item.display_title();
    let report = bot.engine.enqueue(guild_id, item).await?;
    Ok(Reply::public(embeds::create_enqueued_embed(&title, report.position, 1)))
}

async fn handle_playfile(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply> {
    let attachment = match option(command, "file") {
        Some(ResolvedValue::Attachment(attachment)) => attachment,
        _ => anyhow::bail!("Archivo no proporcionado"),
    };
    let volume = start_volume(command, bot)?;

    bot.ensure_connected(ctx, guild_id, command.user.id, command.channel_id)
        .await?;

    let locator = Locator::Attachment(AttachmentRef {
        id: attachment.id.get(),
        filename: attachment.filename.clone(),
        url: attachment.url.clone(),
    });
    let item = Item::new(locator, command.user.id)
        .with_volume(volume)
        .with_title(attachment.filename.clone());
    let report = bot.engine.enqueue(guild_id, item).await?;

    Ok(Reply::public(embeds::create_enqueued_embed(
        &attachment.filename,
        report.position,
        1,
    )))
}

async fn handle_skip(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    bot.engine.skip(guild_id).await?;
    Ok(Reply::public(embeds::create_success_embed(
        "Canción Saltada",
        "⏭️ Pasando a la siguiente canción",
    )))
}

async fn handle_prev(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    bot.engine.prev(guild_id).await?;
    Ok(Reply::public(embeds::create_success_embed(
        "Canción Anterior",
        "⏮️ Volviendo a la canción anterior",
    )))
}

async fn handle_stop(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    bot.engine.stop(guild_id).await?;
    Ok(Reply::public(embeds::create_success_embed(
        "Reproducción Detenida",
        "⏹️ Cola vaciada y desconectado del canal de voz",
    )))
}

async fn handle_pause(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    bot.engine.pause(guild_id).await?;
    Ok(Reply::public(embeds::create_success_embed(
        "Pausado",
        "⏸️ Usa `/resume` para continuar",
    )))
}

async fn handle_resume(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    bot.engine.resume(guild_id).await?;
    Ok(Reply::public(embeds::create_success_embed(
        "Reanudado",
        "▶️ La reproducción continúa",
    )))
}

async fn handle_seek(
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply> {
    let raw = string_option(command, "time")
        .ok_or_else(|| anyhow::anyhow!("Tiempo no proporcionado"))?;
    let seconds = parse_timestamp(raw)
        .ok_or_else(|| anyhow::anyhow!("Formato inválido '{}', usa s, m:s o h:m:s", raw))?;

    let position = bot
        .engine
        .seek(guild_id, SeekTarget::Absolute(seconds))
        .await?;
    Ok(Reply::public(embeds::create_success_embed(
        "Posición Cambiada",
        &format!("⏩ Reproduciendo desde `{}`", embeds::format_duration(position)),
    )))
}

async fn handle_bassboost(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    let enabled = bot.engine.toggle_bass_boost(guild_id).await?;
    let description = if enabled {
        "🔉 Realce de graves activado"
    } else {
        "🔉 Realce de graves desactivado"
    };
    Ok(Reply::public(embeds::create_success_embed("Bass Boost", description)))
}

async fn handle_quality(
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply> {
    let quality: Quality = string_option(command, "tier")
        .ok_or_else(|| anyhow::anyhow!("Calidad no proporcionada"))?
        .parse()?;

    let description = match bot.engine.set_quality(guild_id, quality).await? {
        QualityChange::Applied => format!(
            "🎚️ Calidad **{}** ({} kbps) aplicada",
            quality,
            quality.bitrate_kbps()
        ),
        QualityChange::Deferred => format!(
            "🎚️ Calidad **{}** ({} kbps) se usará desde la próxima canción",
            quality,
            quality.bitrate_kbps()
        ),
    };
    Ok(Reply::public(embeds::create_success_embed("Calidad", &description)))
}

async fn handle_volume(
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply> {
    let level = number_option(command, "level")
        .ok_or_else(|| anyhow::anyhow!("Nivel no proporcionado"))? as f32;
    let volume = bot.engine.set_volume(guild_id, level).await?;
    Ok(Reply::public(embeds::create_success_embed(
        "Volumen",
        &format!("🔊 Volumen ajustado a {}%", (volume * 100.0).round() as u32),
    )))
}

async fn handle_loop(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    let enabled = bot.engine.toggle_loop(guild_id).await?;
    let description = if enabled {
        "🔂 La canción actual se repetirá"
    } else {
        "🔂 Repetición desactivada"
    };
    Ok(Reply::public(embeds::create_success_embed("Repetición", description)))
}

async fn handle_shuffle(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    let enabled = bot.engine.toggle_shuffle(guild_id).await?;
    let description = if enabled {
        "🔀 Modo aleatorio activado desde la próxima canción"
    } else {
        "🔀 Modo aleatorio desactivado desde la próxima canción"
    };
    Ok(Reply::public(embeds::create_success_embed("Aleatorio", description)))
}

async fn handle_queue(
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply> {
    let page = integer_option(command, "page")
        .and_then(|p| usize::try_from(p).ok())
        .filter(|p| *p > 0);
    let page = bot.engine.queue_page(guild_id, page).await?;

    let mut reply = Reply::public(embeds::create_queue_embed(&page));
    if page.total_pages > 1 {
        reply = reply.with_components(vec![create_pagination_controls(&page)]);
    }
    Ok(reply)
}

async fn handle_nowplaying(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply> {
    let now = bot
        .engine
        .now_playing(guild_id)
        .await?
        .ok_or(PlaybackError::NotPlaying)?;

    let controls = ControlsState {
        paused: now.paused,
        looping: now.looping,
        shuffle: now.shuffle,
        bass_boost: now.filters.bass_boost,
    };
    Ok(Reply::public(embeds::create_now_playing_embed(&now))
        .with_components(create_player_controls(controls)))
}

fn handle_timeout(command: &CommandInteraction, bot: &JukeboxBot) -> Result<Reply> {
    let description = match integer_option(command, "seconds") {
        Some(seconds) => {
            let secs = bot.idle.set_timeout_secs(seconds)?;
            format!("⏲️ Me desconectaré tras **{}s** sin reproducción", secs)
        }
        None => format!(
            "⏲️ Tiempo de inactividad actual: **{}s**",
            bot.idle.timeout_secs()
        ),
    };
    Ok(Reply::public(embeds::create_info_embed("Inactividad", &description)))
}

/// Maneja interacciones con componentes (botones del reproductor y de la cola)
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let Some(action) = ButtonAction::parse(&component.data.custom_id) else {
        return respond_ephemeral(ctx, &component, "❌ Acción no reconocida").await;
    };

    if let ButtonAction::QueuePage(page) = action {
        let page = match bot.engine.queue_page(guild_id, Some(page)).await {
            Ok(page) => page,
            Err(e) => return respond_ephemeral(ctx, &component, &format!("❌ {}", e)).await,
        };
        component
            .create_response(
                &ctx.http,
                CreateInteractionResponse::UpdateMessage(
                    CreateInteractionResponseMessage::new()
                        .embed(embeds::create_queue_embed(&page))
                        .components(vec![create_pagination_controls(&page)]),
                ),
            )
            .await?;
        return Ok(());
    }

    if action == ButtonAction::Queue {
        let page = match bot.engine.queue_page(guild_id, None).await {
            Ok(page) => page,
            Err(e) => return respond_ephemeral(ctx, &component, &format!("❌ {}", e)).await,
        };
        let mut message = CreateInteractionResponseMessage::new()
            .embed(embeds::create_queue_embed(&page))
            .ephemeral(true);
        if page.total_pages > 1 {
            message = message.components(vec![create_pagination_controls(&page)]);
        }
        component
            .create_response(&ctx.http, CreateInteractionResponse::Message(message))
            .await?;
        return Ok(());
    }

    let content = match run_button(bot, guild_id, action).await {
        Ok(content) => content,
        Err(e) => format!("❌ {}", e),
    };
    respond_ephemeral(ctx, &component, &content).await
}

async fn run_button(
    bot: &JukeboxBot,
    guild_id: GuildId,
    action: ButtonAction,
) -> Result<String, PlaybackError> {
    let engine = &bot.engine;
    let content = match action {
        ButtonAction::Previous => {
            engine.prev(guild_id).await?;
            "⏮️ Volviendo a la canción anterior".to_string()
        }
        ButtonAction::PlayPause => {
            if engine.phase(guild_id).await == Some(PlaybackPhase::Paused) {
                engine.resume(guild_id).await?;
                "▶️ Música reanudada".to_string()
            } else {
                engine.pause(guild_id).await?;
                "⏸️ Música pausada".to_string()
            }
        }
        ButtonAction::Skip => {
            engine.skip(guild_id).await?;
            "⏭️ Saltando a la siguiente canción".to_string()
        }
        ButtonAction::Stop => {
            engine.stop(guild_id).await?;
            "⏹️ Reproducción detenida".to_string()
        }
        ButtonAction::Seek(delta) => {
            let position = engine.seek(guild_id, SeekTarget::Relative(delta)).await?;
            format!("⏩ Posición `{}`", embeds::format_duration(position))
        }
        ButtonAction::Volume(delta) => {
            let volume = engine.adjust_volume(guild_id, delta).await?;
            format!("🔊 Volumen {}%", (volume * 100.0).round() as u32)
        }
        ButtonAction::Loop => {
            if engine.toggle_loop(guild_id).await? {
                "🔂 Repetición activada".to_string()
            } else {
                "🔂 Repetición desactivada".to_string()
            }
        }
        ButtonAction::Shuffle => {
            if engine.toggle_shuffle(guild_id).await? {
                "🔀 Modo aleatorio activado".to_string()
            } else {
                "🔀 Modo aleatorio desactivado".to_string()
            }
        }
        ButtonAction::BassBoost => {
            if engine.toggle_bass_boost(guild_id).await? {
                "🎛️ Bass boost activado".to_string()
            } else {
                "🎛️ Bass boost desactivado".to_string()
            }
        }
        ButtonAction::Queue | ButtonAction::QueuePage(_) => String::new(),
    };
    Ok(content)
}

async fn respond_ephemeral(
    ctx: &Context,
    component: &ComponentInteraction,
    content: &str,
) -> Result<()> {
    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

pub fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}

/// Convierte `s`, `m:s` o `h:m:s` en segundos
pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let caps = TIMESTAMP.captures(raw.trim())?;
    let number = |i: usize| caps.get(i).map(|m| m.as_str().parse::<f64>());

    let seconds = number(3)?.ok()?;
    let minutes = number(2).transpose().ok()?;
    let hours = number(1).transpose().ok()?;

    if minutes.is_some() && seconds >= 60.0 {
        return None;
    }
    if hours.is_some() && minutes.is_some_and(|m| m >= 60.0) {
        return None;
    }

    Some(hours.unwrap_or(0.0) * 3600.0 + minutes.unwrap_or(0.0) * 60.0 + seconds)
}
