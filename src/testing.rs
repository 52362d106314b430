//! In-process fakes for the resolver, launcher, transport and notifier seams.

use async_trait::async_trait;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::{
    io::Read,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use crate::{
    audio::{
        bridge::{CompletionSignal, PlaybackOutcome},
        notify::MockNotifier,
        pipeline::{PipelineLauncher, PipelineSpec, RenderPipeline},
        source::{ProgressClock, ResolvedInfo, SourceVariant},
        transport::{PlaybackHandle, Transport},
    },
    error::{PlaybackError, PlaybackResult},
    sources::{Locator, Platform, PlaylistEntry, ResolvedTrack, Resolver},
};

/// Resolves every locator locally. Titles are the last path segment.
pub struct FakeResolver {
    duration: f64,
    fail_on: Vec<String>,
    calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self {
            duration: 180.0,
            fail_on: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    /// Any locator containing `fragment` fails to resolve
    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on.push(fragment.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, locator: &Locator, _video_mode: bool) -> PlaybackResult<ResolvedTrack> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let raw = locator.to_string();
        if self.fail_on.iter().any(|fragment| raw.contains(fragment)) {
            return Err(PlaybackError::resolution(&raw, "404"));
        }

        let title = raw.rsplit('/').next().unwrap_or_default().to_string();
        let variant = match locator {
            Locator::Attachment(attachment) => SourceVariant::Upload {
                raw_url: attachment.url.clone(),
            },
            Locator::Url(_) if locator.platform() == Platform::NicoNico => SourceVariant::SiteSession {
                stream_url: format!("{raw}#stream"),
                cookies: vec![
                    ("nicosid".into(), "1700000000.1".into()),
                    ("domand_bid".into(), "abc".into()),
                ],
                session_id: Some("1700000000.1".into()),
            },
            Locator::Url(_) => SourceVariant::Stream {
                stream_url: format!("{raw}#stream"),
            },
        };

        Ok(ResolvedTrack {
            info: ResolvedInfo {
                title,
                page_url: raw,
                thumbnail_url: None,
                duration_secs: self.duration,
            },
            variant,
        })
    }

    async fn expand(&self, locator: &Locator) -> PlaybackResult<Vec<PlaylistEntry>> {
        (1..=3)
            .map(|n| -> PlaybackResult<PlaylistEntry> {
                Ok(PlaylistEntry {
                    locator: Locator::parse(&format!("{locator}/{n}"))?,
                    title: Some(format!("entry {n}")),
                })
            })
            .collect()
    }
}

/// Records every spec. Inputs containing "nospawn" fail to spawn.
#[derive(Default)]
pub struct FakeLauncher {
    specs: Mutex<Vec<PipelineSpec>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn specs(&self) -> Vec<PipelineSpec> {
        self.specs.lock().clone()
    }

    pub fn last_spec(&self) -> Option<PipelineSpec> {
        self.specs.lock().last().cloned()
    }
}

impl PipelineLauncher for FakeLauncher {
    fn launch(&self, spec: PipelineSpec) -> PlaybackResult<Box<dyn RenderPipeline>> {
        if spec.input.contains("nospawn") {
            return Err(PlaybackError::PipelineSpawn(format!("cannot start {}", spec.input)));
        }
        self.specs.lock().push(spec.clone());
        Ok(Box::new(FakePipeline { spec }))
    }
}

struct FakePipeline {
    spec: PipelineSpec,
}

impl RenderPipeline for FakePipeline {
    fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    fn into_reader(self: Box<Self>) -> Box<dyn Read + Send + Sync> {
        Box::new(std::io::empty())
    }
}

/// One attached playback, driven by its own OS thread
struct Playback {
    tx: Sender<PlaybackOutcome>,
    ended: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    volume: Arc<Mutex<f32>>,
    input: String,
}

#[derive(Default)]
struct TransportShared {
    live: AtomicUsize,
    max_live: AtomicUsize,
    disconnects: AtomicUsize,
    playbacks: Mutex<Vec<Playback>>,
}

impl TransportShared {
    fn end(&self, tx: &Sender<PlaybackOutcome>, ended: &AtomicBool, outcome: PlaybackOutcome) {
        if !ended.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            let _ = tx.send(outcome);
        }
    }
}

/// Voice transport fake. Each attach spawns a driver thread that fires the
/// completion signal when the playback is stopped, finished or failed.
#[derive(Clone, Default)]
pub struct FakeTransport {
    shared: Arc<TransportShared>,
    fail_attach: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_attach(&self) {
        self.fail_attach.store(true, Ordering::SeqCst);
    }

    /// Ends the latest playback naturally
    pub fn finish(&self) {
        self.end_latest(PlaybackOutcome::Finished);
    }

    /// Reports a runtime failure on the latest playback
    pub fn fail(&self, reason: &str) {
        self.end_latest(PlaybackOutcome::Failed(reason.to_string()));
    }

    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.shared.max_live.load(Ordering::SeqCst)
    }

    pub fn attached(&self) -> usize {
        self.shared.playbacks.lock().len()
    }

    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<String> {
        self.shared.playbacks.lock().last().map(|p| p.input.clone())
    }

    pub fn last_paused(&self) -> Option<bool> {
        self.shared
            .playbacks
            .lock()
            .last()
            .map(|p| p.paused.load(Ordering::SeqCst))
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.shared.playbacks.lock().last().map(|p| *p.volume.lock())
    }

    fn end_latest(&self, outcome: PlaybackOutcome) {
        let playbacks = self.shared.playbacks.lock();
        if let Some(playback) = playbacks.last() {
            self.shared.end(&playback.tx, &playback.ended, outcome);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn attach(
        &self,
        pipeline: Box<dyn RenderPipeline>,
        volume: f32,
        _progress: ProgressClock,
        signal: CompletionSignal,
    ) -> PlaybackResult<Box<dyn PlaybackHandle>> {
        if self.fail_attach.swap(false, Ordering::SeqCst) {
            return Err(PlaybackError::Transport("attach refused".into()));
        }

        let input = pipeline.spec().input.clone();
        let reader = pipeline.into_reader();
        let (tx, rx) = unbounded();

        thread::spawn(move || {
            let _reader = reader;
            match rx.recv() {
                Ok(outcome) => {
                    let _ = signal.fire(outcome);
                }
                Err(_) => drop(signal),
            }
        });

        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_live.fetch_max(live, Ordering::SeqCst);

        let playback = Playback {
            tx: tx.clone(),
            ended: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            volume: Arc::new(Mutex::new(volume)),
            input,
        };
        let handle = FakeHandle {
            shared: self.shared.clone(),
            tx,
            ended: playback.ended.clone(),
            paused: playback.paused.clone(),
            volume: playback.volume.clone(),
        };
        self.shared.playbacks.lock().push(playback);

        Ok(Box::new(handle))
    }

    async fn disconnect(&self) -> PlaybackResult<()> {
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeHandle {
    shared: Arc<TransportShared>,
    tx: Sender<PlaybackOutcome>,
    ended: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    volume: Arc<Mutex<f32>>,
}

impl PlaybackHandle for FakeHandle {
    fn pause(&self) -> PlaybackResult<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> PlaybackResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> PlaybackResult<()> {
        *self.volume.lock() = volume;
        Ok(())
    }

    fn stop(&self) {
        self.shared.end(&self.tx, &self.ended, PlaybackOutcome::Finished);
    }
}

/// Notifier that accepts anything
pub fn quiet_notifier() -> MockNotifier {
    let mut notifier = MockNotifier::new();
    notifier.expect_notify().returning(|_, _| Ok(()));
    notifier
}
