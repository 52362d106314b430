use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub max_playlist_size: usize,

    // Binarios externos
    pub ffmpeg_path: PathBuf,
    pub ytdlp_path: PathBuf,
    pub ffprobe_path: PathBuf,

    // Tiempos (segundos salvo indicación)
    pub idle_timeout: u64,
    pub idle_sweep_interval: u64,
    pub completion_timeout: u64,
    pub completion_capacity: usize,
    pub teardown_grace_ms: u64,

    // Rendimiento
    pub worker_threads: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            guild_id: var("GUILD_ID").and_then(|s| s.trim().parse().ok()),

            default_volume: parse_or(var("DEFAULT_VOLUME"), "DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: parse_or(var("MAX_QUEUE_SIZE"), "MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_playlist_size: parse_or(
                var("MAX_PLAYLIST_SIZE"),
                "MAX_PLAYLIST_SIZE",
                defaults.max_playlist_size,
            )?,

            ffmpeg_path: var("FFMPEG_PATH").map_or(defaults.ffmpeg_path, PathBuf::from),
            ytdlp_path: var("YTDLP_PATH").map_or(defaults.ytdlp_path, PathBuf::from),
            ffprobe_path: var("FFPROBE_PATH").map_or(defaults.ffprobe_path, PathBuf::from),

            idle_timeout: parse_or(var("IDLE_TIMEOUT"), "IDLE_TIMEOUT", defaults.idle_timeout)?,
            idle_sweep_interval: parse_or(
                var("IDLE_SWEEP_INTERVAL"),
                "IDLE_SWEEP_INTERVAL",
                defaults.idle_sweep_interval,
            )?,
            completion_timeout: parse_or(
                var("COMPLETION_TIMEOUT"),
                "COMPLETION_TIMEOUT",
                defaults.completion_timeout,
            )?,
            completion_capacity: parse_or(
                var("COMPLETION_CAPACITY"),
                "COMPLETION_CAPACITY",
                defaults.completion_capacity,
            )?,
            teardown_grace_ms: parse_or(
                var("TEARDOWN_GRACE_MS"),
                "TEARDOWN_GRACE_MS",
                defaults.teardown_grace_ms,
            )?,

            worker_threads: parse_or(var("WORKER_THREADS"), "WORKER_THREADS", defaults.worker_threads)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Queue, playlist and channel sizes must be greater than 0
    /// - The idle sweep and completion timeout must be at least one second
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.completion_capacity == 0 {
            anyhow::bail!("Completion capacity must be greater than 0");
        }

        if self.idle_sweep_interval == 0 {
            anyhow::bail!("Idle sweep interval must be at least 1 second");
        }

        if self.completion_timeout == 0 {
            anyhow::bail!("Completion timeout must be at least 1 second");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker threads must be greater than 0");
        }

        Ok(())
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// Returns a summary of the current configuration for logging, without the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Audio: {}% vol, {} queue, {} playlist\n  \
            Binaries: ffmpeg={}, yt-dlp={}, ffprobe={}\n  \
            Idle: {}s timeout, sweep every {}s\n  \
            Completion: {}s timeout, {} slots, {}ms teardown grace\n  \
            Runtime: {} workers",
            self.guild_id.map_or("global".to_string(), |id| format!("guild {id}")),
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.max_playlist_size,
            self.ffmpeg_path.display(),
            self.ytdlp_path.display(),
            self.ffprobe_path.display(),
            self.idle_timeout,
            self.idle_sweep_interval,
            self.completion_timeout,
            self.completion_capacity,
            self.teardown_grace_ms,
            self.worker_threads,
        )
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} inválido '{value}': {e}")),
        None => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            default_volume: 1.0,
            max_queue_size: 1000,
            max_playlist_size: 100,

            ffmpeg_path: "ffmpeg".into(),
            ytdlp_path: "yt-dlp".into(),
            ffprobe_path: "ffprobe".into(),

            idle_timeout: 180,
            idle_sweep_interval: 30,
            completion_timeout: 30,
            completion_capacity: 64,
            teardown_grace_ms: 2000,

            worker_threads: num_cpus::get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_apply() {
        let config = load(&[("DISCORD_TOKEN", "token")]).unwrap();
        assert_eq!(config.idle_timeout, 180);
        assert_eq!(config.idle_sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.completion_timeout(), Duration::from_secs(30));
        assert_eq!(config.teardown_grace(), Duration::from_secs(2));
        assert_eq!(config.default_volume, 1.0);
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert!(!config.summary().contains("token"));
    }

    #[test]
    fn test_token_is_required() {
        assert!(load(&[]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn test_overrides_and_validation() {
        let config = load(&[
            ("DISCORD_TOKEN", "t"),
            ("GUILD_ID", "1234"),
            ("IDLE_TIMEOUT", "0"),
            ("FFMPEG_PATH", "/usr/local/bin/ffmpeg"),
        ])
        .unwrap();
        assert_eq!(config.guild_id, Some(1234));
        assert_eq!(config.idle_timeout, 0);
        assert_eq!(config.ffmpeg_path, PathBuf::from("/usr/local/bin/ffmpeg"));

        assert!(load(&[("DISCORD_TOKEN", "t"), ("DEFAULT_VOLUME", "3.5")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "t"), ("IDLE_TIMEOUT", "-1")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "t"), ("IDLE_SWEEP_INTERVAL", "0")]).is_err());
    }
}
