use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use pulsefield_core::{
    audio::{RunningFlag, SyntheticSource},
    config::DeviceSelector,
    entity::EntityKind,
    render::{Surface, SurfaceError},
    run_session, AppConfig, AudioSource, Color, Drawable, PulseError, SessionOptions, Show,
    ShowRegistry,
};
use tracing_subscriber::EnvFilter;

fn main() -> pulsefield_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::ListShows => list_shows(),
        Commands::DefaultConfig => {
            println!("{}", AppConfig::default().to_json_pretty()?);
            Ok(())
        }
        #[cfg(feature = "cpal-capture")]
        Commands::ListDevices => {
            let names = pulsefield_core::audio::CpalSource::device_names()?;
            for (index, name) in names.iter().enumerate() {
                println!("{index}: {name}");
            }
            Ok(())
        }
        Commands::Run(args) => run(args),
    }
}

fn list_shows() -> pulsefield_core::Result<()> {
    let registry = ShowRegistry::builtin();
    for show in registry.iter() {
        println!("{:<14} {}", show.name(), show.description());
    }
    Ok(())
}

fn run(args: RunArgs) -> pulsefield_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::live_defaults(),
    };
    args.apply(&mut config);

    let mut show = ShowRegistry::builtin().get(&args.show)?;
    let source = audio_source(args.synthetic);
    let duration = args
        .seconds
        .map(|seconds| {
            Duration::try_from_secs_f64(seconds).map_err(|err| {
                PulseError::invalid_config(format!("--seconds {seconds}: {err}"))
            })
        })
        .transpose()?;
    let options = SessionOptions {
        duration,
        seed: args.seed,
        stop: Some(stop_on_interrupt()?),
    };
    tracing::info!(show = %args.show, seconds = ?args.seconds, "starting run");

    let surface = LogSurface::new(config.frame_rate);
    let (report, surface) = run_session(&config, source.as_ref(), &mut show, surface, &options)?;

    let summary = serde_json::json!({
        "show": report.show,
        "device": report.device,
        "frames": report.frames,
        "spawned": report.spawned,
        "peak_population": report.peak_population,
        "blocks_published": report.blocks_published,
        "overruns": report.overruns,
        "fft_failures": report.fft_failures,
        "stopped": format!("{:?}", report.stopped),
        "last_frame": surface.last_counts(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Ctrl-C ends the session loop instead of killing the process, so the show
/// is cleaned up and the stream released.
fn stop_on_interrupt() -> pulsefield_core::Result<RunningFlag> {
    let stop = RunningFlag::new();
    let handler = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received; stopping");
        handler.stop();
    })
    .map_err(|err| PulseError::msg(format!("installing the Ctrl-C handler: {err}")))?;
    Ok(stop)
}

fn audio_source(synthetic: bool) -> Box<dyn AudioSource> {
    if !synthetic {
        if let Some(source) = live_source() {
            return source;
        }
        tracing::warn!("built without cpal-capture; using the synthetic source");
    }
    Box::new(SyntheticSource::default())
}

#[cfg(feature = "cpal-capture")]
fn live_source() -> Option<Box<dyn AudioSource>> {
    Some(Box::new(pulsefield_core::audio::CpalSource))
}

#[cfg(not(feature = "cpal-capture"))]
fn live_source() -> Option<Box<dyn AudioSource>> {
    None
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Headless surface: counts what would be drawn and logs a line about once
/// a second.
struct LogSurface {
    report_every: u64,
    presented: u64,
    counts: [usize; EntityKind::COUNT],
    last: [usize; EntityKind::COUNT],
}

impl LogSurface {
    fn new(frame_rate: u32) -> Self {
        Self {
            report_every: u64::from(frame_rate.max(1)),
            presented: 0,
            counts: [0; EntityKind::COUNT],
            last: [0; EntityKind::COUNT],
        }
    }

    fn last_counts(&self) -> serde_json::Value {
        EntityKind::ALL
            .iter()
            .filter(|kind| self.last[kind.index()] > 0)
            .map(|kind| {
                let count = serde_json::Value::from(self.last[kind.index()]);
                (kind.label().to_string(), count)
            })
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into()
    }
}

impl Surface for LogSurface {
    fn clear(&mut self, _background: Color) -> Result<(), SurfaceError> {
        self.counts = [0; EntityKind::COUNT];
        Ok(())
    }

    fn draw(&mut self, drawable: &Drawable) -> Result<(), SurfaceError> {
        self.counts[drawable.kind.index()] += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<(), SurfaceError> {
        self.last = self.counts;
        self.presented += 1;
        if self.presented % self.report_every == 0 {
            let total: usize = self.last.iter().sum();
            tracing::info!(frame = self.presented, entities = total, "frame");
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive entity visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the built-in shows.
    ListShows,
    /// Print the default configuration as JSON.
    DefaultConfig,
    /// Print the available input devices.
    #[cfg(feature = "cpal-capture")]
    ListDevices,
    /// Run a show against live or synthetic audio.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Show to run.
    #[arg(short, long, default_value = ShowRegistry::DEFAULT_SHOW)]
    show: String,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Use generated tones instead of an input device.
    #[arg(long)]
    synthetic: bool,
    /// Input device index or name substring.
    #[arg(short, long)]
    device: Option<DeviceSelector>,
    #[arg(long)]
    sample_rate: Option<u32>,
    #[arg(long)]
    block_size: Option<usize>,
    /// Stop after this many seconds.
    #[arg(long)]
    seconds: Option<f64>,
    /// Seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(sample_rate) = self.sample_rate {
            config.audio.sample_rate = sample_rate;
        }
        if let Some(block_size) = self.block_size {
            config.audio.block_size = block_size;
        }
    }
}
