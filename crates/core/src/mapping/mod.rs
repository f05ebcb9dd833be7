//! Maps audio features onto entity colours.

use rand::{seq::SliceRandom, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    palette::{Color, Palette},
    FeatureSnapshot,
};

/// How a band-weighted mix of the palette is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Each band scales its palette colour; channels are clamped.
    Linear,
    /// Mid is boosted by 20 % and the mix is rescaled so the brightest
    /// channel never exceeds 255.
    Weighted,
    /// Squared band levels, normalised to sum to one, weight the palette.
    Quadratic,
}

/// Where a spawned entity takes its colour from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSource {
    Blend(BlendMode),
    /// One of the three palette colours at random.
    PaletteRandom,
    /// Looked up from the dominant frequency.
    Tone,
}

const MID_WEIGHT: f64 = 1.2;

/// Resolves [`ColorSource`]s against the active palette and the latest
/// features. Band levels are normalised by the loudest block seen so far.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    max_level: f64,
    tones: ToneColorMap,
}

impl Default for ColorMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorMapper {
    pub fn new() -> Self {
        Self {
            max_level: 1.0,
            tones: ToneColorMap::klotsche(),
        }
    }

    pub fn max_level(&self) -> f64 {
        self.max_level
    }

    /// Tracks the running loudness maximum used for normalisation.
    pub fn observe(&mut self, features: &FeatureSnapshot) {
        if features.loudness.is_finite() {
            self.max_level = self.max_level.max(features.loudness);
        }
    }

    pub fn color_for(
        &self,
        source: ColorSource,
        palette: &Palette,
        features: &FeatureSnapshot,
        rng: &mut dyn RngCore,
    ) -> Color {
        match source {
            ColorSource::Blend(mode) => self.blend(mode, palette, features),
            ColorSource::PaletteRandom => palette.choose(rng).copied().unwrap_or(Color::WHITE),
            ColorSource::Tone => self.tones.lookup(features.dominant_hz).unwrap_or(Color::WHITE),
        }
    }

    pub fn blend(&self, mode: BlendMode, palette: &Palette, features: &FeatureSnapshot) -> Color {
        let bands = [features.bass, features.mid, features.treble];
        let levels = bands.map(|v| v.max(0.0) / self.max_level);

        match mode {
            BlendMode::Linear => mix(palette, levels.map(|l| l.min(1.0))),
            BlendMode::Weighted => {
                let [b, m, t] = levels.map(|l| l.min(1.0));
                let (r, g, bl) = weighted_sum(palette, [b, m * MID_WEIGHT, t]);
                let peak = r.max(g).max(bl).max(255.0);
                Color::from_f64(r * 255.0 / peak, g * 255.0 / peak, bl * 255.0 / peak)
            }
            BlendMode::Quadratic => {
                let mut weights = levels.map(|l| l * l);
                let total: f64 = weights.iter().sum();
                if total > 0.0 {
                    weights = weights.map(|w| w / total);
                }
                mix(palette, weights)
            }
        }
    }
}

fn weighted_sum(palette: &Palette, weights: [f64; 3]) -> (f64, f64, f64) {
    palette
        .iter()
        .zip(weights)
        .fold((0.0, 0.0, 0.0), |(r, g, b), (color, w)| {
            (
                r + w * color.r() as f64,
                g + w * color.g() as f64,
                b + w * color.b() as f64,
            )
        })
}

fn mix(palette: &Palette, weights: [f64; 3]) -> Color {
    let (r, g, b) = weighted_sum(palette, weights);
    Color::from_f64(r, g, b)
}

/// Frequency-to-colour table after Klotsche's sound/colour correspondence,
/// covering F4 to F5.
#[derive(Debug, Clone)]
pub struct ToneColorMap {
    entries: Vec<(f64, Color)>,
}

impl ToneColorMap {
    pub fn klotsche() -> Self {
        Self::new(vec![
            (349.2, Color(82, 0, 0)),
            (370.0, Color(116, 0, 0)),
            (392.0, Color(179, 0, 0)),
            (415.3, Color(238, 0, 0)),
            (440.0, Color(255, 99, 0)),
            (466.2, Color(255, 236, 0)),
            (493.9, Color(153, 255, 0)),
            (523.2, Color(40, 255, 0)),
            (554.4, Color(0, 255, 232)),
            (587.3, Color(0, 124, 255)),
            (622.2, Color(5, 0, 255)),
            (659.3, Color(69, 0, 234)),
            (698.5, Color(87, 0, 158)),
        ])
    }

    /// Entries are sorted by frequency on construction.
    pub fn new(mut entries: Vec<(f64, Color)>) -> Self {
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { entries }
    }

    /// Colour of the band containing `hz`; frequencies above the table map
    /// to the last entry, below it to `None`.
    pub fn lookup(&self, hz: f64) -> Option<Color> {
        let index = self.entries.partition_point(|(start, _)| *start <= hz);
        index.checked_sub(1).map(|i| self.entries[i].1)
    }
}
