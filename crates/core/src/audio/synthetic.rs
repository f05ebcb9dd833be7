use std::{
    f64::consts::TAU,
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{debug, info};

use super::{AudioSource, BlockStatus, CaptureProcessor, CaptureStream, RunningFlag};
use crate::{analysis::AudioBlock, config::AudioConfig, PulseError, Result};

/// One sine partial of the synthetic signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f64,
    pub amplitude: f64,
    /// Rate of the amplitude swell; `0` keeps the tone steady.
    pub pulse_hz: f64,
}

impl Tone {
    pub const fn steady(frequency_hz: f64, amplitude: f64) -> Self {
        Self {
            frequency_hz,
            amplitude,
            pulse_hz: 0.0,
        }
    }

    pub const fn pulsing(frequency_hz: f64, amplitude: f64, pulse_hz: f64) -> Self {
        Self {
            frequency_hz,
            amplitude,
            pulse_hz,
        }
    }

    fn sample(&self, t: f64) -> f64 {
        let swell = if self.pulse_hz > 0.0 {
            0.5 + 0.5 * (TAU * self.pulse_hz * t).sin()
        } else {
            1.0
        };
        self.amplitude * swell * (TAU * self.frequency_hz * t).sin()
    }
}

/// Generates a mix of sine tones on a worker thread, standing in for a
/// capture device.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    tones: Vec<Tone>,
    paced: bool,
}

impl Default for SyntheticSource {
    /// A beating bass line under a steady mid tone and a faint hiss of
    /// treble.
    fn default() -> Self {
        Self::new(vec![
            Tone::pulsing(60.0, 0.6, 2.0),
            Tone::pulsing(440.0, 0.25, 0.5),
            Tone::pulsing(6_000.0, 0.1, 3.0),
        ])
    }
}

impl SyntheticSource {
    pub fn new(tones: Vec<Tone>) -> Self {
        Self { tones, paced: true }
    }

    /// Produces blocks as fast as they can be analysed instead of at the
    /// configured sample rate.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn tones(&self) -> &[Tone] {
        &self.tones
    }

    /// Writes `frames` interleaved frames starting at absolute frame
    /// `start`; every channel carries the same signal.
    pub fn render(&self, out: &mut [f32], channels: u16, sample_rate: u32, start: u64) {
        let channels = channels.max(1) as usize;
        let rate = sample_rate.max(1) as f64;
        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let t = (start + offset as u64) as f64 / rate;
            let mixed: f64 = self.tones.iter().map(|tone| tone.sample(t)).sum();
            frame.fill(mixed.clamp(-1.0, 1.0) as f32);
        }
    }
}

impl AudioSource for SyntheticSource {
    fn open(
        &self,
        config: &AudioConfig,
        mut processor: CaptureProcessor,
    ) -> Result<Box<dyn CaptureStream>> {
        let running = RunningFlag::new();
        let flag = running.clone();
        let source = self.clone();
        let channels = config.channels.max(1);
        let sample_rate = config.sample_rate;
        let block_frames = config.block_size.max(1);
        let period = config.block_period();

        let handle = thread::Builder::new()
            .name("pulsefield-synth".into())
            .spawn(move || {
                processor.prepare(block_frames);
                processor.reset();
                let mut samples = vec![0.0; block_frames * channels as usize];
                let mut frame = 0u64;
                let mut deadline = Instant::now();

                while flag.is_running() {
                    source.render(&mut samples, channels, sample_rate, frame);
                    frame += block_frames as u64;
                    let block = AudioBlock::new(&samples, channels, sample_rate);
                    processor.process(&block, BlockStatus::Nominal);

                    if source.paced {
                        deadline += period;
                        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                            thread::sleep(wait);
                        }
                    } else {
                        thread::yield_now();
                    }
                }
            })
            .map_err(|err| {
                PulseError::DeviceUnavailable(format!("synthetic capture thread: {err}"))
            })?;

        info!(
            tones = self.tones.len(),
            sample_rate,
            channels,
            "synthetic capture started"
        );
        Ok(Box::new(SyntheticStream {
            running,
            handle: Some(handle),
            tones: self.tones.len(),
        }))
    }
}

struct SyntheticStream {
    running: RunningFlag,
    handle: Option<JoinHandle<()>>,
    tones: usize,
}

impl CaptureStream for SyntheticStream {
    fn stop(&mut self) -> Result<()> {
        self.running.stop();
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| PulseError::msg("synthetic capture thread panicked"))?;
            debug!("synthetic capture stopped");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("synthetic ({} tones)", self.tones)
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
