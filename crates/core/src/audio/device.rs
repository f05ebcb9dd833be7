use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, info, warn};

use super::{AudioSource, BlockAssembler, CaptureProcessor, CaptureStream, RunningFlag};
use crate::{
    config::{AudioConfig, DeviceSelector, LatencyHint, LatencyPreset},
    PulseError, Result,
};

/// Captures from a host input device through `cpal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalSource;

impl CpalSource {
    /// Names of the host's input devices, in enumeration order.
    pub fn device_names() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| PulseError::DeviceUnavailable(err.to_string()))?;
        Ok(devices
            .map(|device| device.name().unwrap_or_else(|_| "unknown".to_string()))
            .collect())
    }

    fn select(selector: Option<&DeviceSelector>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let Some(selector) = selector else {
            return host
                .default_input_device()
                .ok_or_else(|| PulseError::DeviceUnavailable("no default input device".into()));
        };

        let mut devices = host
            .input_devices()
            .map_err(|err| PulseError::DeviceUnavailable(err.to_string()))?;
        let found = match selector {
            DeviceSelector::Index(index) => devices.nth(*index),
            DeviceSelector::Name(name) => {
                let needle = name.to_lowercase();
                devices.find(|device| {
                    device
                        .name()
                        .map(|n| n.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            }
        };
        found.ok_or_else(|| {
            PulseError::DeviceUnavailable(format!("no input device matches `{selector}`"))
        })
    }
}

fn buffer_size(config: &AudioConfig) -> cpal::BufferSize {
    match config.latency {
        LatencyHint::Preset(LatencyPreset::High) => cpal::BufferSize::Default,
        LatencyHint::Preset(LatencyPreset::Low) => {
            cpal::BufferSize::Fixed(config.block_size as u32)
        }
        LatencyHint::Seconds(seconds) => {
            let frames = (seconds * config.sample_rate as f64).round().max(1.0);
            cpal::BufferSize::Fixed(frames as u32)
        }
    }
}

impl AudioSource for CpalSource {
    fn open(
        &self,
        config: &AudioConfig,
        mut processor: CaptureProcessor,
    ) -> Result<Box<dyn CaptureStream>> {
        let device = Self::select(config.device.as_ref())?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: buffer_size(config),
        };

        processor.prepare(config.block_size);
        processor.reset();
        let mut assembler =
            BlockAssembler::new(config.block_size, config.channels, config.sample_rate);
        let running = RunningFlag::new();
        let flag = running.clone();
        let overrun = Arc::new(AtomicBool::new(false));
        let overrun_flag = Arc::clone(&overrun);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !flag.is_running() {
                        return;
                    }
                    if overrun_flag.swap(false, Ordering::Relaxed) {
                        assembler.mark_overrun();
                    }
                    assembler.push(data, |block, status| {
                        processor.process(block, status);
                    });
                },
                move |err| {
                    // Backends report xruns here; the block in progress is dropped.
                    overrun.store(true, Ordering::Relaxed);
                    warn!(%err, "input stream error");
                },
                None,
            )
            .map_err(|err| PulseError::DeviceUnavailable(format!("{name}: {err}")))?;

        stream
            .play()
            .map_err(|err| PulseError::DeviceUnavailable(format!("{name}: {err}")))?;

        info!(
            device = %name,
            sample_rate = config.sample_rate,
            channels = config.channels,
            block_size = config.block_size,
            "capture started"
        );
        Ok(Box::new(CpalStream {
            stream: Some(stream),
            running,
            name,
        }))
    }
}

struct CpalStream {
    stream: Option<cpal::Stream>,
    running: RunningFlag,
    name: String,
}

impl CaptureStream for CpalStream {
    fn stop(&mut self) -> Result<()> {
        self.running.stop();
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            debug!(device = %self.name, "capture stopped");
            paused.map_err(|err| PulseError::DeviceUnavailable(format!("{}: {err}", self.name)))?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
