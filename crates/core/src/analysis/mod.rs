//! Spectral analysis of captured audio blocks.
//!
//! [`SpectralBinner`] turns one interleaved block into loudness and three
//! band energies; [`FeatureSmoother`] removes the block-to-block jitter
//! before the result is published as a [`FeatureSnapshot`].

mod smoothing;

use std::{f64::consts::PI, fmt, sync::Arc, time::Instant};

use realfft::{num_complex::Complex64, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::Result;

pub use smoothing::FeatureSmoother;

pub const BASS_RANGE_HZ: (f64, f64) = (20.0, 250.0);
pub const MID_RANGE_HZ: (f64, f64) = (250.0, 4_000.0);
/// Treble runs from this frequency up to and including Nyquist.
pub const TREBLE_FLOOR_HZ: f64 = 4_000.0;
/// Dominant frequencies below this are reported as this value.
pub const MIN_DOMINANT_HZ: f64 = 20.0;

/// One block of interleaved samples as delivered by the capture backend.
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    pub samples: &'a [f32],
    pub channels: u16,
    pub sample_rate: u32,
}

impl<'a> AudioBlock<'a> {
    pub fn new(samples: &'a [f32], channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Number of complete frames in the block.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Samples of channel 0, the channel used for the spectrum.
    pub fn reference_channel(&self) -> impl Iterator<Item = f32> + 'a {
        let step = self.channels as usize;
        let frames = self.frames();
        self.samples.iter().step_by(step).take(frames).copied()
    }
}

/// Raw per-block features before smoothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergies {
    pub loudness: f64,
    pub bass: f64,
    pub mid: f64,
    pub treble: f64,
    pub dominant_hz: f64,
}

impl BandEnergies {
    pub const ZERO: Self = Self {
        loudness: 0.0,
        bass: 0.0,
        mid: 0.0,
        treble: 0.0,
        dominant_hz: 0.0,
    };
}

/// Latest smoothed feature state, published as one immutable unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSnapshot {
    pub loudness: f64,
    pub bass: f64,
    pub mid: f64,
    pub treble: f64,
    /// Frequency of the strongest bin in the latest block. Not smoothed.
    pub dominant_hz: f64,
    pub timestamp: Instant,
}

impl FeatureSnapshot {
    /// A snapshot with every feature at zero.
    pub fn silent(timestamp: Instant) -> Self {
        Self::from_energies(&BandEnergies::ZERO, timestamp)
    }

    pub fn from_energies(energies: &BandEnergies, timestamp: Instant) -> Self {
        Self {
            loudness: energies.loudness,
            bass: energies.bass,
            mid: energies.mid,
            treble: energies.treble,
            dominant_hz: energies.dominant_hz,
            timestamp,
        }
    }

    pub fn energies(&self) -> BandEnergies {
        BandEnergies {
            loudness: self.loudness,
            bass: self.bass,
            mid: self.mid,
            treble: self.treble,
            dominant_hz: self.dominant_hz,
        }
    }

    /// Value of the requested feature.
    pub fn band(&self, band: Band) -> f64 {
        match band {
            Band::Loudness => self.loudness,
            Band::Bass => self.bass,
            Band::Mid => self.mid,
            Band::Treble => self.treble,
            Band::Sum => self.bass + self.mid + self.treble,
        }
    }
}

/// Feature selector used by spawn rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Loudness,
    Bass,
    Mid,
    Treble,
    /// Bass, mid and treble added together.
    Sum,
}

/// Window applied to the reference channel before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Rectangular,
    Hann,
}

/// Computes loudness and band energies for capture blocks.
///
/// The FFT plan and its buffers are cached for the most recent block length,
/// so steady-state analysis performs no allocation. The binner is `Send` and
/// moves into the capture context with its processor.
pub struct SpectralBinner {
    window: WindowKind,
    fft: Option<FftResources>,
}

impl SpectralBinner {
    pub fn new(window: WindowKind) -> Self {
        Self { window, fft: None }
    }

    /// Builds the plan for `frames`-long blocks ahead of the first callback.
    pub fn prepare(&mut self, frames: usize) {
        if frames >= 2 {
            self.prepare_fft(frames);
        }
    }

    pub fn window(&self) -> WindowKind {
        self.window
    }

    /// Analyses one block. Degenerate input (silence, empty blocks, empty
    /// bands) yields zeros rather than an error.
    pub fn analyze(&mut self, block: &AudioBlock<'_>) -> Result<BandEnergies> {
        let loudness = compute_loudness(block.samples);
        let frames = block.frames();
        if frames < 2 || block.sample_rate == 0 {
            return Ok(BandEnergies {
                loudness,
                ..BandEnergies::ZERO
            });
        }

        let window = self.window;
        let fft = self.prepare_fft(frames);
        for (index, (slot, sample)) in fft
            .input
            .iter_mut()
            .zip(block.reference_channel())
            .enumerate()
        {
            let weight = match window {
                WindowKind::Rectangular => 1.0,
                WindowKind::Hann => hann_value(index, frames),
            };
            *slot = sample as f64 * weight;
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let bin_hz = block.sample_rate as f64 / frames as f64;
        let mut bass = BandAccumulator::default();
        let mut mid = BandAccumulator::default();
        let mut treble = BandAccumulator::default();
        let mut peak = (0.0_f64, 0usize);

        for (bin, value) in fft.spectrum.iter().enumerate() {
            let magnitude = value.norm();
            let hz = bin as f64 * bin_hz;

            if (BASS_RANGE_HZ.0..BASS_RANGE_HZ.1).contains(&hz) {
                bass.add(magnitude);
            } else if (MID_RANGE_HZ.0..MID_RANGE_HZ.1).contains(&hz) {
                mid.add(magnitude);
            } else if hz >= TREBLE_FLOOR_HZ {
                treble.add(magnitude);
            }

            if bin > 0 && magnitude > peak.0 {
                peak = (magnitude, bin);
            }
        }

        let dominant_hz = if peak.0 <= f64::EPSILON {
            0.0
        } else {
            (peak.1 as f64 * bin_hz).max(MIN_DOMINANT_HZ)
        };

        Ok(BandEnergies {
            loudness,
            bass: bass.mean(),
            mid: mid.mean(),
            treble: treble.mean(),
            dominant_hz,
        })
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        if self.fft.as_ref().is_some_and(|fft| fft.size != size) {
            self.fft = None;
        }

        self.fft.get_or_insert_with(|| {
            let plan = RealFftPlanner::<f64>::new().plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            }
        })
    }
}

impl Default for SpectralBinner {
    fn default() -> Self {
        Self::new(WindowKind::Rectangular)
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f64>>,
    scratch: Vec<Complex64>,
    spectrum: Vec<Complex64>,
    input: Vec<f64>,
}

impl fmt::Debug for SpectralBinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralBinner")
            .field("window", &self.window)
            .field("fft_size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

#[derive(Default)]
struct BandAccumulator {
    sum: f64,
    bins: usize,
}

impl BandAccumulator {
    fn add(&mut self, magnitude: f64) {
        self.sum += magnitude;
        self.bins += 1;
    }

    fn mean(&self) -> f64 {
        if self.bins == 0 {
            0.0
        } else {
            self.sum / self.bins as f64
        }
    }
}

/// Root-mean-square over every sample in the block, independent of length.
fn compute_loudness(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    sum.sqrt() / (samples.len() as f64).sqrt()
}

fn hann_value(index: usize, len: usize) -> f64 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f64) / (len as f64 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, amplitude: f32, frames: usize, sample_rate: u32) -> Vec<f32> {
        (0..frames)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                amplitude * (2.0 * PI * freq * t).sin() as f32
            })
            .collect()
    }

    #[test]
    fn silent_block_is_exactly_zero() {
        let mut binner = SpectralBinner::default();
        let samples = vec![0.0_f32; 2048];
        let block = AudioBlock::new(&samples, 2, 44_100);

        let energies = binner.analyze(&block).unwrap();
        assert_eq!(energies, BandEnergies::ZERO);
    }

    #[test]
    fn empty_and_tiny_blocks_yield_zero_bands() {
        let mut binner = SpectralBinner::default();
        let empty = binner.analyze(&AudioBlock::new(&[], 1, 44_100)).unwrap();
        assert_eq!(empty, BandEnergies::ZERO);

        let single = binner.analyze(&AudioBlock::new(&[0.5], 1, 44_100)).unwrap();
        assert!((single.loudness - 0.5).abs() < 1e-12);
        assert_eq!(single.bass, 0.0);
        assert!(!single.treble.is_nan());
    }

    #[test]
    fn pure_bass_tone_dominates_the_bass_band() {
        let mut binner = SpectralBinner::default();
        let samples = sine(100.0, 1.0, 1024, 44_100);
        let energies = binner.analyze(&AudioBlock::new(&samples, 1, 44_100)).unwrap();

        assert!(energies.bass > 10.0 * energies.mid, "{energies:?}");
        assert!(energies.bass > 10.0 * energies.treble, "{energies:?}");
        assert!((energies.dominant_hz - 86.13).abs() < 50.0);
    }

    #[test]
    fn loudness_is_independent_of_block_size() {
        let mut binner = SpectralBinner::default();
        let short = vec![0.5_f32; 256];
        let long = vec![0.5_f32; 4096];

        let a = binner.analyze(&AudioBlock::new(&short, 1, 48_000)).unwrap();
        let b = binner.analyze(&AudioBlock::new(&long, 1, 48_000)).unwrap();
        assert!((a.loudness - 0.5).abs() < 1e-9);
        assert!((a.loudness - b.loudness).abs() < 1e-9);
    }

    #[test]
    fn spectrum_uses_the_first_channel_only() {
        let mut binner = SpectralBinner::default();
        let left = sine(6_000.0, 1.0, 1024, 44_100);
        let stereo: Vec<f32> = left.iter().flat_map(|l| [*l, 0.0]).collect();
        let energies = binner.analyze(&AudioBlock::new(&stereo, 2, 44_100)).unwrap();

        assert!(energies.treble > energies.bass);
        assert!(energies.treble > energies.mid);
    }

    #[test]
    fn high_sample_rate_leaves_bass_band_empty() {
        // 16 frames at 192 kHz puts the first non-DC bin at 12 kHz.
        let mut binner = SpectralBinner::default();
        let samples = sine(13_000.0, 1.0, 16, 192_000);
        let energies = binner.analyze(&AudioBlock::new(&samples, 1, 192_000)).unwrap();
        assert_eq!(energies.bass, 0.0);
        assert_eq!(energies.mid, 0.0);
        assert!(energies.treble > 0.0);
    }

    #[test]
    fn hann_window_tapers_edges() {
        assert!(hann_value(0, 1024).abs() < 1e-12);
        assert!((hann_value(1023, 1024)).abs() < 1e-12);
        assert!(hann_value(512, 1024) > 0.99);

        let mut binner = SpectralBinner::new(WindowKind::Hann);
        let samples = sine(100.0, 1.0, 1024, 44_100);
        let energies = binner.analyze(&AudioBlock::new(&samples, 1, 44_100)).unwrap();
        assert!(energies.bass > energies.mid);
    }

    #[test]
    fn snapshot_band_selector() {
        let snapshot = FeatureSnapshot::from_energies(
            &BandEnergies {
                loudness: 0.5,
                bass: 3.0,
                mid: 2.0,
                treble: 1.0,
                dominant_hz: 100.0,
            },
            Instant::now(),
        );
        assert_eq!(snapshot.band(Band::Sum), 6.0);
        assert_eq!(snapshot.band(Band::Loudness), 0.5);
        assert_eq!(snapshot.energies().dominant_hz, 100.0);
    }
}
