use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use guild_jukebox::{
    audio::{
        bridge::CompletionBridge,
        idle::{IdleMonitor, IdleSettings},
        pipeline::FfmpegLauncher,
        player::{EngineSettings, PlaybackEngine},
    },
    bot::JukeboxBot,
    config::Config,
    sources::YtDlpResolver,
    ui::SerenityNotifier,
};

fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("jukebox-worker")
        .enable_all()
        .build()?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return runtime.block_on(health_check(&config));
    }

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let shutdown = CancellationToken::new();
    let (bridge, completions) =
        CompletionBridge::new(config.completion_capacity, config.completion_timeout());

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let engine = Arc::new(PlaybackEngine::new(
        Arc::new(YtDlpResolver::new(&config.ytdlp_path, &config.ffprobe_path)),
        Arc::new(FfmpegLauncher::new(&config.ffmpeg_path)),
        Arc::new(SerenityNotifier::new(http)),
        bridge,
        EngineSettings {
            max_queue_size: config.max_queue_size,
            teardown_grace: config.teardown_grace(),
        },
    ));
    let idle = Arc::new(IdleSettings::new(config.idle_timeout));

    // Tareas de fondo
    let completion_task = engine.clone().spawn_completion_loop(completions, shutdown.clone());
    let idle_task = IdleMonitor::new(engine.clone(), idle.clone(), config.idle_sweep_interval())
        .spawn(shutdown.clone());
    info!("💤 Monitor de inactividad activo ({}s)", config.idle_timeout);

    // Construir cliente
    let token = config.discord_token.clone();
    let handler = JukeboxBot::new(config, engine, idle);
    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        signal_token.cancel();
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    shutdown.cancel();
    let _ = tokio::join!(completion_task, idle_task);
    info!("👋 Guild Jukebox detenido");
    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
