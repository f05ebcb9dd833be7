use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{Band, WindowKind},
    mapping::{BlendMode, ColorSource},
    palette::{builtin_palettes, NamedPalette},
    PulseError, Result,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub viewport: Viewport,
    pub analysis: AnalysisConfig,
    pub spawn: SpawnConfig,
    pub palette: PaletteConfig,
    /// Target render cadence in frames per second.
    pub frame_rate: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            viewport: Viewport::default(),
            analysis: AnalysisConfig::default(),
            spawn: SpawnConfig::default(),
            palette: PaletteConfig::default(),
            frame_rate: 30,
        }
    }
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document. Missing sections fall back to
    /// their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every section and reports the first value out of range.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.viewport.validate()?;
        self.analysis.validate()?;
        self.spawn.validate()?;
        self.palette.validate()?;
        if self.frame_rate == 0 || self.frame_rate > 240 {
            return Err(PulseError::invalid_config(format!(
                "frame_rate must be within 1..=240, got {}",
                self.frame_rate
            )));
        }
        Ok(())
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Input device; `None` picks the host default.
    pub device: Option<DeviceSelector>,
    /// Frames per analysed block.
    pub block_size: usize,
    pub latency: LatencyHint,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            device: None,
            block_size: 1024,
            latency: LatencyHint::Preset(LatencyPreset::High),
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PulseError::invalid_config("audio.sample_rate must be positive"));
        }
        if self.channels == 0 {
            return Err(PulseError::invalid_config("audio.channels must be positive"));
        }
        if self.block_size == 0 {
            return Err(PulseError::invalid_config("audio.block_size must be positive"));
        }
        if let LatencyHint::Seconds(seconds) = self.latency {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(PulseError::invalid_config(
                    "audio.latency must be a non-negative number of seconds",
                ));
            }
        }
        Ok(())
    }

    /// Wall-clock length of one block at the configured sample rate.
    pub fn block_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Identifies an input device either by its enumeration index or by a
/// case-insensitive substring of its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSelector {
    Index(usize),
    Name(String),
}

impl std::str::FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse::<usize>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(s.to_string()),
        })
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{index}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LatencyHint {
    Preset(LatencyPreset),
    Seconds(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyPreset {
    Low,
    High,
}

/// Logical drawing area shared by the spawner and the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 480.0,
        }
    }
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.width * 0.5, self.height * 0.5)
    }

    fn validate(&self) -> Result<()> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if ok(self.width) && ok(self.height) {
            Ok(())
        } else {
            Err(PulseError::invalid_config(format!(
                "viewport must have positive dimensions, got {}x{}",
                self.width, self.height
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Exponential smoothing coefficient applied to every band.
    pub smoothing: f64,
    pub window: WindowKind,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.2,
            window: WindowKind::Rectangular,
        }
    }
}

impl AnalysisConfig {
    fn validate(&self) -> Result<()> {
        if self.smoothing > 0.0 && self.smoothing <= 1.0 {
            Ok(())
        } else {
            Err(PulseError::invalid_config(format!(
                "analysis.smoothing must be within (0, 1], got {}",
                self.smoothing
            )))
        }
    }
}

/// How one entity variant is populated each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRule {
    /// Feature that drives the spawn count.
    pub band: Band,
    /// Entities spawned per unit of band energy.
    pub gain: f64,
    /// Clamp the driving value to `[0, 1]` before applying `gain`.
    #[serde(default)]
    pub saturate: bool,
    /// Spawned every tick regardless of energy, while below the ceiling.
    #[serde(default)]
    pub minimum: u32,
    /// Hard population limit for the variant.
    pub ceiling: usize,
    /// Base lifetime in seconds.
    pub lifetime: f64,
    /// Extra lifetime drawn uniformly from `[0, lifetime_jitter)`.
    #[serde(default)]
    pub lifetime_jitter: f64,
    pub color: ColorSource,
}

impl SpawnRule {
    fn validate(&self, name: &str) -> Result<()> {
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(PulseError::invalid_config(format!(
                "spawn.{name}.gain must be a non-negative number"
            )));
        }
        if self.ceiling == 0 {
            return Err(PulseError::invalid_config(format!(
                "spawn.{name}.ceiling must be positive"
            )));
        }
        if !(self.lifetime.is_finite() && self.lifetime > 0.0) {
            return Err(PulseError::invalid_config(format!(
                "spawn.{name}.lifetime must be positive"
            )));
        }
        if !self.lifetime_jitter.is_finite() || self.lifetime_jitter < 0.0 {
            return Err(PulseError::invalid_config(format!(
                "spawn.{name}.lifetime_jitter must be non-negative"
            )));
        }
        Ok(())
    }
}

/// Largest number of fragment rows or columns.
pub const MAX_FRAGMENT_SIDE: usize = 256;

/// Layout and motion constants for the image fragment grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    pub rows: usize,
    pub cols: usize,
    /// Fraction of the viewport kept free around the image.
    pub border: f64,
    pub lifetime: f64,
    /// Pixels of outward spacing per unit of bass.
    pub expansion_factor: f64,
    /// Pixels of vertical push per unit of treble.
    pub speed_factor: f64,
    /// Degrees of rotation per unit of mid.
    pub rotate_factor: f64,
    pub color: ColorSource,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            rows: 20,
            cols: 20,
            border: 0.10,
            lifetime: 8.0,
            expansion_factor: 10.0,
            speed_factor: 15.0,
            rotate_factor: 25.0,
            color: ColorSource::PaletteRandom,
        }
    }
}

impl FragmentConfig {
    pub fn tile_count(&self) -> usize {
        self.rows * self.cols
    }

    fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(PulseError::invalid_config(
                "spawn.fragments must have at least one row and column",
            ));
        }
        if self.rows > MAX_FRAGMENT_SIDE || self.cols > MAX_FRAGMENT_SIDE {
            return Err(PulseError::invalid_config(format!(
                "spawn.fragments is limited to {MAX_FRAGMENT_SIDE} per side, got {}x{}",
                self.rows, self.cols
            )));
        }
        if !(0.0..0.5).contains(&self.border) {
            return Err(PulseError::invalid_config(
                "spawn.fragments.border must be within [0, 0.5)",
            ));
        }
        if !(self.lifetime.is_finite() && self.lifetime > 0.0) {
            return Err(PulseError::invalid_config(
                "spawn.fragments.lifetime must be positive",
            ));
        }
        Ok(())
    }
}

/// Tunable spawn constants for every entity variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// Converts per-frame motion constants into per-second rates.
    pub rate_scale: f64,
    pub particle: SpawnRule,
    pub expanding_ring: SpawnRule,
    pub collapsing_ring: SpawnRule,
    pub star: SpawnRule,
    pub bubble: SpawnRule,
    pub shape: SpawnRule,
    pub fragments: FragmentConfig,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            rate_scale: 30.0,
            particle: SpawnRule {
                band: Band::Bass,
                gain: 1.0,
                saturate: false,
                minimum: 0,
                ceiling: 600,
                lifetime: 2.5,
                lifetime_jitter: 0.0,
                color: ColorSource::Blend(BlendMode::Quadratic),
            },
            expanding_ring: SpawnRule {
                band: Band::Bass,
                gain: 1.0 / 3.0,
                saturate: false,
                minimum: 1,
                ceiling: 300,
                lifetime: 5.0 / 3.0,
                lifetime_jitter: 0.0,
                color: ColorSource::Blend(BlendMode::Weighted),
            },
            collapsing_ring: SpawnRule {
                band: Band::Bass,
                gain: 1.0 / 3.0,
                saturate: false,
                minimum: 1,
                ceiling: 300,
                lifetime: 5.0 / 3.0,
                lifetime_jitter: 0.0,
                color: ColorSource::Blend(BlendMode::Weighted),
            },
            star: SpawnRule {
                band: Band::Bass,
                gain: 0.5,
                saturate: false,
                minimum: 0,
                ceiling: 500,
                lifetime: 2.5,
                lifetime_jitter: 0.0,
                color: ColorSource::Blend(BlendMode::Linear),
            },
            bubble: SpawnRule {
                band: Band::Mid,
                gain: 3.0,
                saturate: true,
                minimum: 0,
                ceiling: 100,
                lifetime: 30.0,
                lifetime_jitter: 0.0,
                color: ColorSource::PaletteRandom,
            },
            shape: SpawnRule {
                band: Band::Sum,
                gain: 0.1,
                saturate: false,
                minimum: 0,
                ceiling: 900,
                lifetime: 1.0,
                lifetime_jitter: 2.0,
                color: ColorSource::Tone,
            },
            fragments: FragmentConfig::default(),
        }
    }
}

impl SpawnConfig {
    fn validate(&self) -> Result<()> {
        if !(self.rate_scale.is_finite() && self.rate_scale > 0.0) {
            return Err(PulseError::invalid_config("spawn.rate_scale must be positive"));
        }
        self.particle.validate("particle")?;
        self.expanding_ring.validate("expanding_ring")?;
        self.collapsing_ring.validate("collapsing_ring")?;
        self.star.validate("star")?;
        self.bubble.validate("bubble")?;
        self.shape.validate("shape")?;
        self.fragments.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    /// Seconds between palette switches.
    pub interval_secs: f64,
    pub table: Vec<NamedPalette>,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30.0,
            table: builtin_palettes(),
        }
    }
}

impl PaletteConfig {
    /// Switch interval. Out-of-range values saturate; [`AppConfig::validate`]
    /// rejects them.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.interval_secs)
            .unwrap_or(std::time::Duration::MAX)
    }

    fn validate(&self) -> Result<()> {
        if !(self.interval_secs.is_finite() && self.interval_secs > 0.0) {
            return Err(PulseError::invalid_config(
                "palette.interval_secs must be positive",
            ));
        }
        std::time::Duration::try_from_secs_f64(self.interval_secs).map_err(|err| {
            PulseError::invalid_config(format!("palette.interval_secs: {err}"))
        })?;
        if self.table.is_empty() {
            return Err(PulseError::invalid_config(
                "palette.table must contain at least one palette",
            ));
        }
        Ok(())
    }
}
