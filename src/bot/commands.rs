use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::audio::effects::Quality;

/// Todos los comandos slash del bot
pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        play_command(),
        playfile_command(),
        skip_command(),
        prev_command(),
        stop_command(),
        pause_command(),
        resume_command(),
        seek_command(),
        bassboost_command(),
        quality_command(),
        volume_command(),
        loop_command(),
        shuffle_command(),
        queue_command(),
        nowplaying_command(),
        timeout_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn volume_option() -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Number, "volume", "Volumen inicial (0.0 - 2.0)")
        .min_number_value(0.0)
        .max_number_value(2.0)
}

// Comandos de reproducción

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Conecta el bot a tu canal de voz")
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una URL o playlist")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "url", "URL de la canción o playlist")
                .required(true),
        )
        .add_option(volume_option())
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "video",
            "Usar el formato de video como fuente",
        ))
}

fn playfile_command() -> CreateCommand {
    CreateCommand::new("playfile")
        .description("Reproduce un archivo de audio adjunto")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Attachment, "file", "Archivo de audio")
                .required(true),
        )
        .add_option(volume_option())
}

// Comandos de control

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta a la siguiente canción")
}

fn prev_command() -> CreateCommand {
    CreateCommand::new("prev").description("Vuelve a la canción anterior")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción, limpia la cola y desconecta")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn seek_command() -> CreateCommand {
    CreateCommand::new("seek")
        .description("Salta a una posición de la canción actual")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "time", "Posición: s, m:s o h:m:s")
                .required(true),
        )
}

// Comandos de audio

fn bassboost_command() -> CreateCommand {
    CreateCommand::new("bassboost").description("Activa/desactiva el realce de graves")
}

fn quality_command() -> CreateCommand {
    let mut option =
        CreateCommandOption::new(CommandOptionType::String, "tier", "Nivel de calidad").required(true);
    for quality in Quality::ALL {
        option = option.add_string_choice(
            format!("{} ({} kbps)", quality, quality.bitrate_kbps()),
            quality.as_str(),
        );
    }

    CreateCommand::new("quality")
        .description("Cambia la calidad de audio")
        .add_option(option)
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Number, "level", "Nivel de volumen (0.0 - 2.0)")
                .min_number_value(0.0)
                .max_number_value(2.0)
                .required(true),
        )
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop").description("Activa/desactiva la repetición de la canción actual")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Activa/desactiva el modo aleatorio")
}

// Comandos de información

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Número de página")
                .min_int_value(1),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra información de la canción actual")
}

fn timeout_command() -> CreateCommand {
    CreateCommand::new("timeout")
        .description("Consulta o cambia el tiempo de inactividad antes de desconectar")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Integer,
            "seconds",
            "Segundos sin reproducción (0 desconecta en el siguiente barrido)",
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_is_registered_once() {
        let names: Vec<String> = all_commands()
            .iter()
            .map(|command| {
                serde_json::to_value(command)
                    .ok()
                    .and_then(|v| v.get("name").and_then(|n| n.as_str()).map(str::to_string))
                    .unwrap_or_default()
            })
            .collect();

        assert_eq!(names.len(), 17);
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
        assert!(names.contains(&"playfile".to_string()));
        assert!(names.contains(&"timeout".to_string()));
    }
}
