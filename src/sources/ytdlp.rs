use async_trait::async_trait;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Locator, Platform, PlaylistEntry, ResolvedTrack, Resolver};
use crate::{
    audio::source::{ResolvedInfo, SourceVariant},
    error::{PlaybackError, PlaybackResult},
};

const COOKIE_ATTRIBUTES: [&str; 7] =
    ["domain", "path", "expires", "max-age", "secure", "httponly", "samesite"];

/// Resolver basado en yt-dlp (y ffprobe para archivos subidos)
pub struct YtDlpResolver {
    ytdlp: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(ytdlp: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp: ytdlp.into(),
            ffprobe: ffprobe.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, program: &Path, args: &[&str]) -> Result<Vec<u8>, String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| format!("{} no respondió en {:?}", program.display(), self.timeout))?
        .map_err(|e| format!("{}: {e}", program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(stderr.lines().last().unwrap_or("error desconocido").to_string());
        }

        Ok(output.stdout)
    }

    async fn dump_json(&self, locator: &Locator, args: &[&str]) -> PlaybackResult<Value> {
        let stdout = self
            .run(&self.ytdlp, args)
            .await
            .map_err(|reason| PlaybackError::resolution(locator, reason))?;

        serde_json::from_slice(&stdout).map_err(|e| PlaybackError::resolution(locator, e))
    }

    async fn probe_duration(&self, url: &str) -> f64 {
        let args = [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            url,
        ];

        match self.run(&self.ffprobe, &args).await {
            Ok(stdout) => String::from_utf8_lossy(&stdout).trim().parse().unwrap_or(0.0),
            Err(e) => {
                warn!("⚠️ ffprobe no pudo leer la duración: {}", e);
                0.0
            }
        }
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, locator: &Locator, video_mode: bool) -> PlaybackResult<ResolvedTrack> {
        let url = match locator {
            Locator::Attachment(attachment) => {
                let duration_secs = self.probe_duration(&attachment.url).await;
                return Ok(ResolvedTrack {
                    info: ResolvedInfo {
                        title: attachment.filename.clone(),
                        page_url: attachment.url.clone(),
                        thumbnail_url: None,
                        duration_secs,
                    },
                    variant: SourceVariant::Upload {
                        raw_url: attachment.url.clone(),
                    },
                });
            }
            Locator::Url(url) => url.as_str(),
        };

        let platform = locator.platform();
        if !platform.is_supported() {
            return Err(PlaybackError::resolution(locator, "plataforma no soportada"));
        }

        debug!("🔍 Resolviendo con yt-dlp: {}", url);
        let format = if video_mode { "best" } else { "bestaudio/best" };
        let json = self
            .dump_json(locator, &["-J", "--no-playlist", "--no-warnings", "-f", format, url])
            .await?;

        let track = parse_track(&json, locator, platform)?;
        info!("✅ Resuelto: {} ({:.0}s)", track.info.title, track.info.duration_secs);
        Ok(track)
    }

    async fn expand(&self, locator: &Locator) -> PlaybackResult<Vec<PlaylistEntry>> {
        let Locator::Url(url) = locator else {
            return Ok(Vec::new());
        };
        if !locator.platform().is_supported() {
            return Err(PlaybackError::resolution(locator, "plataforma no soportada"));
        }

        let json = self
            .dump_json(locator, &["-J", "--flat-playlist", "--no-warnings", url.as_str()])
            .await?;
        let entries = parse_playlist(&json);
        info!("📜 Playlist con {} entradas: {}", entries.len(), url);
        Ok(entries)
    }
}

fn parse_track(json: &Value, locator: &Locator, platform: Platform) -> PlaybackResult<ResolvedTrack> {
    let text = |key: &str| json.get(key).and_then(Value::as_str).map(str::to_string);

    let stream_url = text("url")
        .or_else(|| {
            json.get("requested_formats")
                .and_then(Value::as_array)
                .and_then(|formats| formats.iter().find_map(|f| f.get("url")?.as_str()))
                .map(str::to_string)
        })
        .ok_or_else(|| PlaybackError::resolution(locator, "sin URL de stream"))?;

    let info = ResolvedInfo {
        title: text("title").unwrap_or_else(|| locator.to_string()),
        page_url: text("webpage_url").unwrap_or_else(|| locator.to_string()),
        thumbnail_url: text("thumbnail"),
        duration_secs: json.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
    };

    let variant = if platform.needs_session() {
        let cookies = text("cookies")
            .map(|raw| parse_cookies(&raw))
            .unwrap_or_default();
        let session_id = cookies
            .iter()
            .find(|(name, _)| name == "nicosid")
            .map(|(_, value)| value.clone());
        SourceVariant::SiteSession {
            stream_url,
            cookies,
            session_id,
        }
    } else {
        SourceVariant::Stream { stream_url }
    };

    Ok(ResolvedTrack { info, variant })
}

/// Pares nombre=valor del campo `cookies` de yt-dlp, sin atributos
fn parse_cookies(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|part| part.trim().split_once('='))
        .map(|(name, value)| (name.trim(), value.trim().trim_matches('"')))
        .filter(|(name, _)| {
            !name.is_empty() && !COOKIE_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str())
        })
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn parse_playlist(json: &Value) -> Vec<PlaylistEntry> {
    let Some(entries) = json.get("entries").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let raw = entry
                .get("url")
                .or_else(|| entry.get("webpage_url"))
                .and_then(Value::as_str)?;
            let locator = Locator::parse(raw).ok()?;
            let title = entry.get("title").and_then(Value::as_str).map(str::to_string);
            Some(PlaylistEntry { locator, title })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn locator(raw: &str) -> Locator {
        Locator::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_youtube_track() {
        let json = json!({
            "title": "Never Gonna Give You Up",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
            "duration": 213,
            "url": "https://rr1---sn.googlevideo.com/videoplayback?id=1",
        });
        let loc = locator("https://youtu.be/dQw4w9WgXcQ");

        let track = parse_track(&json, &loc, Platform::YouTube).unwrap();

        assert_eq!(track.info.title, "Never Gonna Give You Up");
        assert_eq!(track.info.duration_secs, 213.0);
        assert_eq!(
            track.variant,
            SourceVariant::Stream {
                stream_url: "https://rr1---sn.googlevideo.com/videoplayback?id=1".into()
            }
        );
    }

    #[test]
    fn test_parse_niconico_session() {
        let json = json!({
            "title": "sm9",
            "duration": 320.5,
            "requested_formats": [{ "url": "https://delivery.domand.nicovideo.jp/hls/master.m3u8" }],
            "cookies": "nicosid=1700000000.123; Domain=.nicovideo.jp; Path=/; Expires=1800000000; domand_bid=\"abc\"; Secure",
        });
        let loc = locator("https://www.nicovideo.jp/watch/sm9");

        let track = parse_track(&json, &loc, Platform::NicoNico).unwrap();

        match track.variant {
            SourceVariant::SiteSession { stream_url, cookies, session_id } => {
                assert!(stream_url.ends_with("master.m3u8"));
                assert_eq!(
                    cookies,
                    vec![
                        ("nicosid".to_string(), "1700000000.123".to_string()),
                        ("domand_bid".to_string(), "abc".to_string()),
                    ]
                );
                assert_eq!(session_id.as_deref(), Some("1700000000.123"));
            }
            other => panic!("unexpected variant {other:?}"),
        }
        assert_eq!(track.info.page_url, "https://www.nicovideo.jp/watch/sm9");
    }

    #[test]
    fn test_missing_stream_url_is_resolution_error() {
        let json = json!({ "title": "x" });
        let result = parse_track(&json, &locator("https://example.com/x"), Platform::Direct);
        assert!(matches!(result, Err(PlaybackError::Resolution { .. })));
    }

    #[test]
    fn test_parse_flat_playlist() {
        let json = json!({
            "entries": [
                { "url": "https://www.youtube.com/watch?v=a", "title": "A" },
                { "url": "not a url" },
                { "webpage_url": "https://www.youtube.com/watch?v=b" },
            ]
        });

        let entries = parse_playlist(&json);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title.as_deref(), Some("A"));
        assert_eq!(entries[1].title, None);
        assert!(parse_playlist(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_apple_music_is_rejected_without_spawning() {
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp", "/nonexistent/ffprobe");
        let result = resolver
            .resolve(&locator("https://music.apple.com/jp/album/x/123"), false)
            .await;

        match result {
            Err(PlaybackError::Resolution { reason, .. }) => {
                assert_eq!(reason, "plataforma no soportada")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_resolution_error() {
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp", "/nonexistent/ffprobe");
        let result = resolver
            .resolve(&locator("https://www.youtube.com/watch?v=abc"), false)
            .await;
        assert!(matches!(result, Err(PlaybackError::Resolution { .. })));
    }
}
