//! Colour palettes and the timed palette rotator.

use std::time::{Duration, Instant};

use rand::{seq::SliceRandom, RngCore};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{PulseError, Result};

/// 8-bit RGB colour, serialised as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const BLACK: Self = Self(0, 0, 0);
    pub const WHITE: Self = Self(255, 255, 255);

    pub fn r(self) -> u8 {
        self.0
    }

    pub fn g(self) -> u8 {
        self.1
    }

    pub fn b(self) -> u8 {
        self.2
    }

    /// Builds a colour from floating point channels, clamping to `0..=255`.
    pub fn from_f64(r: f64, g: f64, b: f64) -> Self {
        let channel = |v: f64| if v.is_nan() { 0 } else { v.clamp(0.0, 255.0) as u8 };
        Self(channel(r), channel(g), channel(b))
    }
}

/// Three colours keyed to bass, mid and treble, in that order.
pub type Palette = [Color; 3];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPalette {
    pub name: String,
    pub colors: Palette,
}

impl NamedPalette {
    pub fn new(name: impl Into<String>, colors: Palette) -> Self {
        Self {
            name: name.into(),
            colors,
        }
    }
}

macro_rules! palettes {
    ($($name:literal => [$(($r:literal, $g:literal, $b:literal)),+]),+ $(,)?) => {
        vec![$(NamedPalette::new($name, [$(Color($r, $g, $b)),+])),+]
    };
}

/// The palette table used when the configuration does not supply one.
pub fn builtin_palettes() -> Vec<NamedPalette> {
    palettes! {
        "Ocean Glow" => [(0, 191, 255), (64, 224, 208), (135, 206, 250)],
        "Aurora Borealis" => [(0, 255, 127), (123, 104, 238), (0, 128, 255)],
        "Pastel Bliss" => [(255, 182, 193), (176, 224, 230), (221, 160, 221)],
        "Neon Bubblegum" => [(255, 20, 147), (0, 255, 127), (0, 191, 255)],
        "Mystic Moon" => [(72, 61, 139), (123, 104, 238), (240, 248, 255)],
        "Golden Hour" => [(255, 223, 0), (255, 165, 0), (255, 69, 0)],
        "Ethereal Frost" => [(224, 255, 255), (175, 238, 238), (173, 216, 230)],
        "Tropical Breeze" => [(255, 87, 51), (255, 195, 113), (64, 224, 208)],
        "Candy Glow" => [(255, 105, 180), (255, 182, 193), (135, 206, 250)],
        "Electric Pulse" => [(255, 0, 255), (0, 255, 255), (255, 255, 0)],
        "Firefly Night" => [(25, 25, 112), (72, 61, 139), (144, 238, 144)],
        "Sunset Skies" => [(255, 94, 77), (255, 165, 0), (138, 43, 226)],
        "Crystal Lagoon" => [(0, 206, 209), (72, 209, 204), (127, 255, 212)],
        "Molten Glow" => [(255, 69, 0), (255, 140, 0), (255, 215, 0)],
        "Frosted Mint" => [(173, 216, 230), (144, 238, 144), (224, 255, 255)],
        "Deep Sea" => [(0, 51, 102), (0, 102, 204), (51, 153, 255)],
        "Galaxy Swirl" => [(75, 0, 130), (123, 104, 238), (255, 0, 255)],
        "Tropical Sunset" => [(255, 87, 51), (255, 159, 63), (255, 223, 127)],
        "Cosmic Dream" => [(18, 10, 143), (75, 0, 130), (139, 0, 139)],
        "Dream Pastels" => [(250, 218, 221), (230, 230, 250), (255, 228, 225)],
        "Ice Glow" => [(176, 224, 230), (173, 216, 230), (70, 130, 180)],
        "Festival Neon" => [(255, 0, 0), (0, 255, 0), (0, 0, 255)],
        "Lava Lamp" => [(255, 69, 0), (255, 140, 0), (205, 92, 92)],
        "Ethereal Mist" => [(240, 248, 255), (224, 255, 255), (175, 238, 238)],
        "Polar Glow" => [(0, 128, 255), (123, 104, 238), (0, 255, 127)],
        "Aurora Glow" => [(0, 255, 127), (64, 224, 208), (0, 191, 255)],
        "Starry Night" => [(25, 25, 112), (72, 61, 139), (123, 104, 238)],
        "Tropical Waters" => [(0, 128, 128), (0, 191, 255), (64, 224, 208)],
        "Sunrise Bliss" => [(255, 87, 51), (255, 195, 113), (255, 159, 127)],
    }
}

/// The palette currently in use and when it was chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct PaletteState {
    pub name: String,
    pub current: Palette,
    pub last_switch: Instant,
}

/// Swaps the active palette for a random one from the table once the
/// configured interval has elapsed.
#[derive(Debug, Clone)]
pub struct PaletteRotator {
    table: Vec<NamedPalette>,
    interval: Duration,
    state: PaletteState,
}

impl PaletteRotator {
    /// Picks a random starting palette.
    pub fn new(
        table: Vec<NamedPalette>,
        interval: Duration,
        now: Instant,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let first = table
            .choose(rng)
            .cloned()
            .ok_or_else(|| PulseError::invalid_config("palette table is empty"))?;

        Ok(Self {
            table,
            interval,
            state: PaletteState {
                name: first.name,
                current: first.colors,
                last_switch: now,
            },
        })
    }

    pub fn state(&self) -> &PaletteState {
        &self.state
    }

    pub fn palette(&self) -> &Palette {
        &self.state.current
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Overrides the time of the last switch.
    pub fn with_last_switch(mut self, last_switch: Instant) -> Self {
        self.state.last_switch = last_switch;
        self
    }

    /// Switches palettes when more than `interval` has passed since the last
    /// switch. Returns `true` when a switch happened.
    pub fn tick(&mut self, now: Instant, rng: &mut dyn RngCore) -> bool {
        let elapsed = now.saturating_duration_since(self.state.last_switch);
        if elapsed <= self.interval {
            return false;
        }

        if let Some(next) = self.table.choose(rng) {
            self.state.name = next.name.clone();
            self.state.current = next.colors;
        }
        self.state.last_switch = now;
        info!(palette = %self.state.name, "palette switched");
        true
    }
}
