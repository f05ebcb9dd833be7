//! Audio capture: sources, the per-block processor run in the capture
//! context, and the channel that carries features to the render loop.

mod channel;
#[cfg(feature = "cpal-capture")]
mod device;
mod synthetic;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use crate::{
    analysis::{AudioBlock, FeatureSmoother, SpectralBinner},
    config::{AnalysisConfig, AudioConfig},
    FeatureSnapshot, Result,
};

pub use channel::{feature_channel, FeatureReader, FeatureWriter, SharedFeatureReader};
#[cfg(feature = "cpal-capture")]
pub use device::CpalSource;
pub use synthetic::{SyntheticSource, Tone};

/// Health of a captured block as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Nominal,
    Overflow,
    Underflow,
}

/// What happened to one block handed to [`CaptureProcessor::process`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockOutcome {
    Published(FeatureSnapshot),
    /// Non-nominal block; dropped and counted.
    Skipped(BlockStatus),
    /// The transform failed; dropped and counted.
    Failed,
}

/// Counters shared between the capture context and the render loop.
#[derive(Debug, Default)]
pub struct CaptureStats {
    published: AtomicU64,
    overruns: AtomicU64,
    fft_failures: AtomicU64,
    pending_overruns: AtomicU64,
    pending_fft_failures: AtomicU64,
}

impl CaptureStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn fft_failures(&self) -> u64 {
        self.fft_failures.load(Ordering::Relaxed)
    }

    /// Overruns since the previous call, for periodic reporting.
    pub fn take_overruns(&self) -> u64 {
        self.pending_overruns.swap(0, Ordering::Relaxed)
    }

    /// Transform failures since the previous call.
    pub fn take_fft_failures(&self) -> u64 {
        self.pending_fft_failures.swap(0, Ordering::Relaxed)
    }

    fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
        self.pending_overruns.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fft_failure(&self) {
        self.fft_failures.fetch_add(1, Ordering::Relaxed);
        self.pending_fft_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Runs inside the capture callback: analyse, smooth, publish.
///
/// Nothing here locks, logs or allocates once the FFT plan for the block
/// size exists.
#[derive(Debug)]
pub struct CaptureProcessor {
    binner: SpectralBinner,
    smoother: FeatureSmoother,
    writer: FeatureWriter,
    stats: Arc<CaptureStats>,
}

impl CaptureProcessor {
    pub fn new(analysis: &AnalysisConfig, writer: FeatureWriter) -> Self {
        Self {
            binner: SpectralBinner::new(analysis.window),
            smoother: FeatureSmoother::new(analysis.smoothing),
            writer,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Builds the FFT plan for `frames`-sized blocks ahead of the first
    /// callback.
    pub fn prepare(&mut self, frames: usize) {
        self.binner.prepare(frames);
    }

    /// Clears the smoothing state for a fresh stream.
    pub fn reset(&mut self) {
        self.smoother.reset();
    }

    pub fn process(&mut self, block: &AudioBlock<'_>, status: BlockStatus) -> BlockOutcome {
        self.process_at(block, status, Instant::now())
    }

    pub fn process_at(
        &mut self,
        block: &AudioBlock<'_>,
        status: BlockStatus,
        at: Instant,
    ) -> BlockOutcome {
        if status != BlockStatus::Nominal {
            self.stats.record_overrun();
            return BlockOutcome::Skipped(status);
        }

        match self.binner.analyze(block) {
            Ok(raw) => {
                let snapshot = self.smoother.update(&raw, at);
                self.writer.publish(snapshot);
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                BlockOutcome::Published(snapshot)
            }
            Err(_) => {
                self.stats.record_fft_failure();
                BlockOutcome::Failed
            }
        }
    }
}

/// Re-chunks arbitrarily sized callback buffers into fixed-size blocks.
///
/// A backend glitch reported through [`BlockAssembler::mark_overrun`] taints
/// the block being filled, however many callbacks it takes to complete it.
#[derive(Debug)]
pub struct BlockAssembler {
    buffer: Vec<f32>,
    filled: usize,
    channels: u16,
    sample_rate: u32,
    overrun: bool,
}

impl BlockAssembler {
    pub fn new(block_frames: usize, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        Self {
            buffer: vec![0.0; block_frames.max(1) * channels as usize],
            filled: 0,
            channels,
            sample_rate,
            overrun: false,
        }
    }

    /// Flags the block currently being filled as [`BlockStatus::Overflow`].
    pub fn mark_overrun(&mut self) {
        self.overrun = true;
    }

    /// Appends interleaved samples, calling `emit` for every completed
    /// block with its status.
    pub fn push(
        &mut self,
        mut samples: &[f32],
        mut emit: impl FnMut(&AudioBlock<'_>, BlockStatus),
    ) {
        while !samples.is_empty() {
            let take = (self.buffer.len() - self.filled).min(samples.len());
            self.buffer[self.filled..self.filled + take].copy_from_slice(&samples[..take]);
            self.filled += take;
            samples = &samples[take..];

            if self.filled == self.buffer.len() {
                let status = if std::mem::take(&mut self.overrun) {
                    BlockStatus::Overflow
                } else {
                    BlockStatus::Nominal
                };
                emit(
                    &AudioBlock::new(&self.buffer, self.channels, self.sample_rate),
                    status,
                );
                self.filled = 0;
            }
        }
    }

    /// Drops a partially filled block.
    pub fn clear(&mut self) {
        self.filled = 0;
        self.overrun = false;
    }
}

/// Shared stop flag checked by capture callbacks before touching any
/// state.
#[derive(Debug, Clone)]
pub struct RunningFlag(Arc<AtomicBool>);

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An open capture stream. Dropping it stops capture as well.
pub trait CaptureStream {
    /// Stops delivering blocks and releases the device. Idempotent.
    fn stop(&mut self) -> Result<()>;

    /// Human readable description of the device in use.
    fn describe(&self) -> String;
}

/// Something that can open a capture stream feeding a [`CaptureProcessor`].
pub trait AudioSource {
    /// Opens and starts a stream. Failures surface as
    /// [`PulseError::DeviceUnavailable`](crate::PulseError::DeviceUnavailable).
    fn open(
        &self,
        config: &AudioConfig,
        processor: CaptureProcessor,
    ) -> Result<Box<dyn CaptureStream>>;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn processor() -> (CaptureProcessor, FeatureReader) {
        let (writer, reader) = feature_channel(FeatureSnapshot::silent(Instant::now()));
        (CaptureProcessor::new(&AnalysisConfig::default(), writer), reader)
    }

    fn tone(frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|n| (2.0 * std::f32::consts::PI * 100.0 * n as f32 / 44_100.0).sin())
            .collect()
    }

    #[test]
    fn nominal_blocks_are_published() {
        let (mut processor, mut reader) = processor();
        let samples = tone(1024);
        let block = AudioBlock::new(&samples, 1, 44_100);

        let outcome = processor.process(&block, BlockStatus::Nominal);
        let BlockOutcome::Published(snapshot) = outcome else {
            panic!("block should publish");
        };
        assert!(snapshot.bass > snapshot.mid);
        assert_eq!(reader.latest(), snapshot);
        assert_eq!(processor.stats().published(), 1);
    }

    #[test]
    fn overrun_blocks_are_skipped_and_counted() {
        let (mut processor, mut reader) = processor();
        let samples = tone(1024);
        let block = AudioBlock::new(&samples, 1, 44_100);
        let stats = processor.stats();

        assert_eq!(
            processor.process(&block, BlockStatus::Overflow),
            BlockOutcome::Skipped(BlockStatus::Overflow)
        );
        assert_eq!(
            processor.process(&block, BlockStatus::Underflow),
            BlockOutcome::Skipped(BlockStatus::Underflow)
        );
        assert!(!reader.has_update());
        assert_eq!(reader.latest().bass, 0.0);
        assert_eq!(stats.overruns(), 2);
        assert_eq!(stats.take_overruns(), 2);
        assert_eq!(stats.take_overruns(), 0);
        assert_eq!(stats.overruns(), 2);
    }

    #[test]
    fn reset_restarts_smoothing() {
        let (mut processor, _reader) = processor();
        let samples = tone(512);
        let block = AudioBlock::new(&samples, 1, 44_100);
        let at = Instant::now() + Duration::from_millis(5);

        let outcome = processor.process_at(&block, BlockStatus::Nominal, at);
        let BlockOutcome::Published(first) = outcome else {
            panic!("block should publish");
        };
        processor.process_at(&block, BlockStatus::Nominal, at);
        processor.reset();
        let outcome = processor.process_at(&block, BlockStatus::Nominal, at);
        let BlockOutcome::Published(again) = outcome else {
            panic!("block should publish");
        };
        assert_eq!(first, again);
    }

    #[test]
    fn assembler_emits_fixed_blocks_from_ragged_input() {
        let mut assembler = BlockAssembler::new(4, 2, 48_000);
        let samples: Vec<f32> = (0..20).map(|v| v as f32).collect();
        let mut blocks = Vec::new();

        for chunk in samples.chunks(3) {
            assembler.push(chunk, |block, status| {
                assert_eq!(status, BlockStatus::Nominal);
                assert_eq!(block.frames(), 4);
                assert_eq!(block.sample_rate, 48_000);
                blocks.push(block.samples.to_vec());
            });
        }

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], (0..8).map(|v| v as f32).collect::<Vec<_>>());
        assert_eq!(blocks[1], (8..16).map(|v| v as f32).collect::<Vec<_>>());
    }

    #[test]
    fn overrun_taints_the_block_completed_by_a_later_callback() {
        let mut assembler = BlockAssembler::new(8, 1, 44_100);
        let mut statuses = Vec::new();

        assembler.mark_overrun();
        assembler.push(&[0.0; 3], |_, status| statuses.push(status));
        assert!(statuses.is_empty());
        assembler.push(&[0.0; 3], |_, status| statuses.push(status));
        assembler.push(&[0.0; 10], |_, status| statuses.push(status));
        assert_eq!(statuses, [BlockStatus::Overflow, BlockStatus::Nominal]);

        assembler.mark_overrun();
        assembler.clear();
        assembler.push(&[0.0; 8], |_, status| statuses.push(status));
        assert_eq!(statuses.last(), Some(&BlockStatus::Nominal));
    }

    #[test]
    fn split_callbacks_still_skip_the_glitched_block() {
        let (mut processor, mut reader) = processor();
        let stats = processor.stats();
        let samples = tone(1024);
        let mut assembler = BlockAssembler::new(1024, 1, 44_100);

        assembler.mark_overrun();
        for chunk in samples.chunks(480) {
            assembler.push(chunk, |block, status| {
                processor.process(block, status);
            });
        }
        assert_eq!(stats.overruns(), 1);
        assert_eq!(stats.published(), 0);
        assert!(!reader.has_update());

        assembler.push(&samples, |block, status| {
            processor.process(block, status);
        });
        assert_eq!(stats.published(), 1);
        assert!(reader.latest().bass > 0.0);
    }

    #[test]
    fn fft_failures_are_counted_for_reporting() {
        let stats = CaptureStats::default();
        stats.record_fft_failure();
        stats.record_fft_failure();
        assert_eq!(stats.fft_failures(), 2);
        assert_eq!(stats.take_fft_failures(), 2);
        assert_eq!(stats.take_fft_failures(), 0);
        assert_eq!(stats.fft_failures(), 2);
    }

    #[test]
    fn running_flag_is_shared() {
        let flag = RunningFlag::new();
        let seen_by_callback = flag.clone();
        assert!(seen_by_callback.is_running());
        flag.stop();
        assert!(!seen_by_callback.is_running());
    }
}
