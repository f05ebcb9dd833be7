use std::time::Instant;

use super::{BandEnergies, FeatureSnapshot};

/// Exponential moving average over raw band energies.
///
/// `state = alpha * raw + (1 - alpha) * state`, applied to loudness, bass,
/// mid and treble. The dominant frequency is passed through as-is.
#[derive(Debug, Clone)]
pub struct FeatureSmoother {
    alpha: f64,
    state: BandEnergies,
}

impl FeatureSmoother {
    pub const DEFAULT_ALPHA: f64 = 0.2;

    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            state: BandEnergies::ZERO,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn state(&self) -> &BandEnergies {
        &self.state
    }

    /// Returns the smoother to rest. Called when a new stream starts.
    pub fn reset(&mut self) {
        self.state = BandEnergies::ZERO;
    }

    /// Folds one raw measurement into the running state and returns the
    /// snapshot to publish.
    pub fn update(&mut self, raw: &BandEnergies, timestamp: Instant) -> FeatureSnapshot {
        let alpha = self.alpha;
        let blend = |raw: f64, state: f64| alpha * raw + (1.0 - alpha) * state;

        self.state = BandEnergies {
            loudness: blend(raw.loudness, self.state.loudness),
            bass: blend(raw.bass, self.state.bass),
            mid: blend(raw.mid, self.state.mid),
            treble: blend(raw.treble, self.state.treble),
            dominant_hz: raw.dominant_hz,
        };

        FeatureSnapshot::from_energies(&self.state, timestamp)
    }
}

impl Default for FeatureSmoother {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ALPHA)
    }
}
