use std::{
    io::{BufRead, BufReader, Read},
    path::PathBuf,
    process::{Child, ChildStdout, Command, Stdio},
};

use tracing::{debug, info, warn};

use crate::{
    audio::effects::FilterConfig,
    error::{PlaybackError, PlaybackResult},
};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u8 = 2;

/// Parámetros con los que se lanza un proceso de render.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    pub input: String,
    pub start_offset_secs: f64,
    pub reconnect: bool,
    pub channels: u8,
    pub filters: FilterConfig,
    pub headers: Vec<(String, String)>,
}

impl PipelineSpec {
    pub fn new(input: impl Into<String>, start_offset_secs: f64, filters: FilterConfig) -> Self {
        Self {
            input: input.into(),
            start_offset_secs: start_offset_secs.max(0.0),
            reconnect: true,
            channels: CHANNELS,
            filters,
            headers: Vec::new(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Opciones que van antes de `-i`
    pub fn before_input_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if !self.headers.is_empty() {
            let headers: String = self
                .headers
                .iter()
                .map(|(name, value)| format!("{name}: {value}\r\n"))
                .collect();
            args.extend(["-headers".to_string(), headers]);
        }

        if self.reconnect {
            args.extend(
                ["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "5"]
                    .map(String::from),
            );
        }

        args.extend([
            "-ss".to_string(),
            format!("{:.3}", self.start_offset_secs),
            "-fflags".to_string(),
            "+discardcorrupt+genpts".to_string(),
        ]);

        args
    }

    /// Opciones de salida: canales, buffers, filtros y calidad
    pub fn output_args(&self) -> Vec<String> {
        // En modo video se prioriza la latencia para no desincronizar la imagen.
        let (bufsize, threads) = if self.filters.video_mode { ("64k", "1") } else { ("128k", "0") };

        let mut args: Vec<String> = vec![
            "-vn".into(),
            "-ac".into(),
            self.channels.to_string(),
            "-bufsize".into(),
            bufsize.into(),
            "-analyzeduration".into(),
            "10000000".into(),
            "-probesize".into(),
            "5000000".into(),
            "-threads".into(),
            threads.into(),
        ];

        if let Some(chain) = self.filters.audio_filter() {
            args.extend(["-af".to_string(), chain.to_string()]);
        }

        let quality = self.filters.quality;
        args.extend([
            "-acodec".to_string(),
            quality.codec().to_string(),
            "-b:a".to_string(),
            format!("{}k", quality.bitrate_kbps()),
        ]);

        args
    }

    /// Línea de comando completa; la salida es Ogg/Opus por stdout
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning"].map(String::from).to_vec();
        args.extend(self.before_input_args());
        args.extend(["-i".to_string(), self.input.clone()]);
        args.extend(self.output_args());
        args.extend(["-ar", &SAMPLE_RATE.to_string(), "-f", "ogg", "pipe:1"].map(String::from));
        args
    }
}

/// Proceso de render ya lanzado
pub trait RenderPipeline: Send + Sync {
    fn spec(&self) -> &PipelineSpec;

    /// Entrega la salida de audio. El proceso vive mientras viva el lector.
    fn into_reader(self: Box<Self>) -> Box<dyn Read + Send + Sync>;
}

/// Lanza procesos de render
pub trait PipelineLauncher: Send + Sync {
    fn launch(&self, spec: PipelineSpec) -> PlaybackResult<Box<dyn RenderPipeline>>;
}

/// Lanzador basado en ffmpeg
pub struct FfmpegLauncher {
    executable: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl PipelineLauncher for FfmpegLauncher {
    fn launch(&self, spec: PipelineSpec) -> PlaybackResult<Box<dyn RenderPipeline>> {
        let mut child = Command::new(&self.executable)
            .args(spec.ffmpeg_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PlaybackError::PipelineSpawn(format!("{}: {e}", self.executable.display()))
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PlaybackError::PipelineSpawn("ffmpeg sin stdout".into()));
        };

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            let drained = std::thread::Builder::new()
                .name(format!("ffmpeg-stderr-{pid}"))
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        debug!("ffmpeg[{}]: {}", pid, line);
                    }
                });
            if let Err(e) = drained {
                warn!("⚠️ No se pudo leer stderr de ffmpeg: {}", e);
            }
        }

        info!("🎛️ ffmpeg lanzado (pid {}) en {:.1}s", child.id(), spec.start_offset_secs);
        Ok(Box::new(FfmpegPipeline {
            spec,
            process: ChildProcess { child, stdout },
        }))
    }
}

struct FfmpegPipeline {
    spec: PipelineSpec,
    process: ChildProcess,
}

impl RenderPipeline for FfmpegPipeline {
    fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    fn into_reader(self: Box<Self>) -> Box<dyn Read + Send + Sync> {
        Box::new(self.process)
    }
}

/// Salida de ffmpeg; al soltarla se mata el proceso
struct ChildProcess {
    child: Child,
    stdout: ChildStdout,
}

impl Read for ChildProcess {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        debug!("🧹 ffmpeg (pid {}) liberado", self.child.id());
    }
}
