//! The session runner: opens capture, drives the show and the renderer at
//! the target frame rate, and tears everything down in order.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{
    audio::{
        feature_channel, AudioSource, CaptureProcessor, CaptureStats, FeatureReader, RunningFlag,
    },
    config::AppConfig,
    render::{background_for, Renderer, Surface},
    show::{Show, VisualEngine},
    timeline::FrameClock,
    FeatureSnapshot, PulseError, Result,
};

/// How often dropped capture blocks are reported.
const CAPTURE_REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Stop after this long; `None` runs until `stop` is cleared or the
    /// surface fails.
    pub duration: Option<Duration>,
    /// Fixed seed for the engine's random source.
    pub seed: Option<u64>,
    /// External stop request.
    pub stop: Option<RunningFlag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    Requested,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub show: String,
    pub device: String,
    pub frames: u64,
    pub spawned: u64,
    pub peak_population: usize,
    pub blocks_published: u64,
    pub overruns: u64,
    pub fft_failures: u64,
    pub stopped: StopReason,
}

/// Runs `show` against audio from `source` until the session ends.
///
/// The audio stream is opened before anything is spawned, so a missing
/// device fails fast with [`PulseError::DeviceUnavailable`]. Whatever the
/// outcome, the stream is stopped before this returns. A fatal surface
/// failure ends the session with [`PulseError::Renderer`].
pub fn run_session<S: Surface>(
    config: &AppConfig,
    source: &dyn AudioSource,
    show: &mut dyn Show,
    surface: S,
    options: &SessionOptions,
) -> Result<(SessionReport, S)> {
    config.validate()?;

    let (writer, reader) = feature_channel(FeatureSnapshot::silent(Instant::now()));
    let processor = CaptureProcessor::new(&config.analysis, writer);
    let capture = processor.stats();
    let mut stream = source.open(&config.audio, processor)?;
    let device = stream.describe();
    info!(
        show = show.name(),
        %device,
        frame_rate = config.frame_rate,
        "session started"
    );

    let outcome = drive(config, show, surface, options, reader, &capture, device);
    let stopped = stream.stop();

    let (report, surface) = outcome?;
    stopped?;
    info!(
        frames = report.frames,
        spawned = report.spawned,
        overruns = report.overruns,
        fft_failures = report.fft_failures,
        "session finished"
    );
    Ok((report, surface))
}

fn drive<S: Surface>(
    config: &AppConfig,
    show: &mut dyn Show,
    surface: S,
    options: &SessionOptions,
    mut reader: FeatureReader,
    capture: &CaptureStats,
    device: String,
) -> Result<(SessionReport, S)> {
    let started = Instant::now();
    let mut engine = match options.seed {
        Some(seed) => VisualEngine::seeded(config, started, seed)?,
        None => VisualEngine::new(config, started)?,
    };
    let mut renderer = Renderer::new(surface);
    let mut clock = FrameClock::new(config.frame_rate, started);
    let mut last_report = started;
    let mut spawned = 0u64;
    let mut peak_population = 0usize;

    show.initialize(&mut engine)?;

    let stopped = loop {
        let now = Instant::now();
        let elapsed = now.duration_since(started);
        if options.duration.is_some_and(|limit| elapsed >= limit) {
            break StopReason::DurationElapsed;
        }
        if options.stop.as_ref().is_some_and(|flag| !flag.is_running()) {
            break StopReason::Requested;
        }

        let dt = clock.tick(now);
        let features = reader.latest();
        let stats = show.tick(&mut engine, dt, now, &features);
        spawned += stats.spawned as u64;
        peak_population = peak_population.max(stats.alive);

        let background = background_for(&engine.palette().current);
        if let Err(err) = renderer.render_frame(background, engine.drawables()) {
            show.cleanup(&mut engine);
            return Err(err);
        }

        if now.duration_since(last_report) >= CAPTURE_REPORT_INTERVAL {
            report_dropped_blocks(capture);
            last_report = now;
        }
        clock.wait();
    };

    show.cleanup(&mut engine);
    report_dropped_blocks(capture);

    let report = SessionReport {
        show: show.name().to_string(),
        device,
        frames: renderer.frames(),
        spawned,
        peak_population,
        blocks_published: capture.published(),
        overruns: capture.overruns(),
        fft_failures: capture.fft_failures(),
        stopped,
    };
    Ok((report, renderer.into_surface()))
}

/// Logs blocks the capture side dropped since the previous report.
/// Returns how many were dropped.
fn report_dropped_blocks(capture: &CaptureStats) -> u64 {
    let skipped = capture.take_overruns();
    if skipped > 0 {
        let err = PulseError::CaptureOverrun(format!("{skipped} blocks skipped"));
        warn!(%err, total = capture.overruns(), "capture falling behind");
    }
    let failed = capture.take_fft_failures();
    if failed > 0 {
        warn!(
            failed,
            total = capture.fft_failures(),
            "spectral analysis failed; blocks dropped"
        );
    }
    skipped + failed
}
