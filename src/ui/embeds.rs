use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
    model::id::UserId,
};
use std::time::Duration;

use crate::audio::{
    notify::Notice, player::NowPlaying, queue::QueuePage, source::ResolvedInfo,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

const PROGRESS_BAR_LENGTH: usize = 20;

/// Embed enviado cuando empieza una pista
pub fn create_track_started_embed(info: &ResolvedInfo, requester: UserId) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", info.title))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", duration_field(info.duration_secs), true)
        .field("👤 Solicitado por", format!("<@{}>", requester), true);

    if let Some(thumbnail) = &info.thumbnail_url {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(&info.page_url)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed de `/nowplaying` con barra de progreso y estado del reproductor
pub fn create_now_playing_embed(now: &NowPlaying) -> CreateEmbed {
    let status = if now.paused { "⏸️ Pausado" } else { "▶️ Reproduciendo" };
    let progress = if now.info.duration_secs > 0.0 {
        format!(
            "{} `{} / {}`",
            progress_bar(now.position_secs, now.info.duration_secs, PROGRESS_BAR_LENGTH),
            format_duration(now.position_secs),
            format_duration(now.info.duration_secs)
        )
    } else {
        format!("🔴 En vivo `{}`", format_duration(now.position_secs))
    };

    let mut embed = CreateEmbed::default()
        .title(status)
        .description(format!("**{}**\n\n{}", now.info.title, progress))
        .color(if now.paused { colors::WARNING_ORANGE } else { colors::MUSIC_PURPLE })
        .field("👤 Solicitado por", format!("<@{}>", now.requester), true)
        .field("🔊 Volumen", format!("{}%", (now.volume * 100.0).round() as u32), true)
        .field("🎚️ Calidad", now.filters.quality.to_string(), true)
        .field("🔁 Repetir", on_off(now.looping), true)
        .field("🔀 Aleatorio", on_off(now.shuffle), true)
        .field("🔉 Bass boost", on_off(now.filters.bass_boost), true);

    if let Some(thumbnail) = &now.info.thumbnail_url {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(&now.info.page_url)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(page: &QueuePage) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if page.total_items == 0 {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <url>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    let lines: Vec<String> = page
        .entries
        .iter()
        .map(|entry| {
            let marker = if entry.is_current { "▶️" } else { "▫️" };
            format!(
                "{} `{}.` **{}** • <@{}>",
                marker,
                entry.position,
                truncate(&entry.title, 60),
                entry.requester
            )
        })
        .collect();

    let description = if lines.is_empty() {
        "📭 Esta página no tiene canciones".to_string()
    } else {
        lines.join("\n")
    };

    embed
        .description(description)
        .footer(CreateEmbedFooter::new(format!(
            "Página {}/{} • {} canciones en total",
            page.current_page,
            page.total_pages.max(1),
            page.total_items
        )))
        .timestamp(Timestamp::now())
}

/// Confirmación de canciones agregadas a la cola
pub fn create_enqueued_embed(title: &str, position: usize, added: usize) -> CreateEmbed {
    let description = if added == 1 {
        format!("**{}** se agregó en la posición **#{}**", title, position)
    } else {
        format!(
            "Se agregaron **{} canciones** de **{}** desde la posición **#{}**",
            added, title, position
        )
    };

    CreateEmbed::default()
        .title(if added == 1 { "✅ Canción Agregada" } else { "📋 Playlist Agregada" })
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente si no hay música sonando",
        ))
}

/// Embed para los avisos que el motor manda al canal de texto
pub fn create_notice_embed(notice: &Notice) -> CreateEmbed {
    match notice {
        Notice::NowPlaying { info, requester } => create_track_started_embed(info, *requester),
        Notice::PlaybackFailed { title, reason } => create_error_embed(
            "Error de Reproducción",
            &format!("**{}** no se pudo reproducir: {}\n⏭️ Pasando a la siguiente", title, reason),
        ),
        Notice::ResolutionFailed { locator, reason } => create_error_embed(
            "No se pudo cargar",
            &format!("`{}`: {}\n⏭️ Pasando a la siguiente", truncate(locator, 100), reason),
        ),
        Notice::IdleDisconnect { idle_secs } => create_info_embed(
            "Desconectado por inactividad",
            &format!(
                "💤 Sin reproducción durante {}. ¡Usa `/play` para volver!",
                humantime::format_duration(Duration::from_secs(*idle_secs))
            ),
        ),
    }
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de información
pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn duration_field(seconds: f64) -> String {
    if seconds > 0.0 {
        format_duration(seconds)
    } else {
        "🔴 En vivo".to_string()
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "✅"
    } else {
        "❌"
    }
}

/// Formatea segundos como `m:ss` o `h:mm:ss`
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Barra de progreso de `length` segmentos con un indicador en la posición actual
pub fn progress_bar(position: f64, duration: f64, length: usize) -> String {
    let length = length.max(1);
    let ratio = if duration > 0.0 {
        (position / duration).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = ((ratio * length as f64) as usize).min(length - 1);

    format!("{}🔘{}", "▬".repeat(filled), "▬".repeat(length - 1 - filled))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}
