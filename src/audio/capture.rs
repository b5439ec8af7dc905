//! Microphone capture via cpal.
//!
//! Opens the default (or named) input device, captures audio at its native
//! sample rate, resamples to 16 kHz mono f32 if needed, and assembles
//! 4096-sample frames for the encoder. Frames are delivered on an mpsc
//! channel; the cpal callback itself only touches a lock-free ring buffer
//! and never blocks on downstream work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::ring_buffer::{audio_ring_buffer, AudioProducer};

/// Target sample rate for the outbound pipeline.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Frame size in samples (256 ms at 16 kHz). Matches the wire cadence the
/// remote agent expects.
pub const FRAME_SAMPLES: usize = 4096;

/// Ring capacity: ~10 seconds of 16 kHz mono audio.
const RING_CAPACITY: usize = 160_000;

/// One fixed-size chunk of normalized mono samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Everything the capture pipeline reports to its owner.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A full frame of capture audio, in capture order.
    Frame(AudioFrame),
    /// The input device failed mid-capture. Terminal: the pipeline has
    /// already shut itself down.
    DeviceLost(String),
}

/// Capture failures surfaced at open time.
#[derive(Debug)]
pub enum CaptureError {
    /// No microphone is accessible, or the device refused our config.
    DeviceUnavailable(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceUnavailable(msg) => write!(f, "input device unavailable: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Resolved info about the audio input we will use.
struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

/// Find and configure the input device.
fn resolve_device(device_name: Option<&str>) -> Result<CaptureConfig, CaptureError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| {
                CaptureError::DeviceUnavailable(format!("failed to enumerate input devices: {e}"))
            })?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable(format!("input device not found: {name}"))
            })?
    } else {
        host.default_input_device().ok_or_else(|| {
            CaptureError::DeviceUnavailable("no default input device available".to_string())
        })?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device.default_input_config().map_err(|e| {
        CaptureError::DeviceUnavailable(format!("failed to get default input config: {e}"))
    })?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        native_rate,
        channels,
        "Input device config (will resample to {}Hz mono if needed)",
        TARGET_SAMPLE_RATE,
    );

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Simple linear resampler from `from_rate` to `to_rate`.
/// Operates on mono f32 samples.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Exclusive owner of the microphone input stream.
///
/// Dropping the pipeline releases the device; `close` is idempotent and
/// safe to call on every teardown path.
pub struct CapturePipeline {
    stream: Option<cpal::Stream>,
    running: Arc<AtomicBool>,
    drain: Option<std::thread::JoinHandle<()>>,
}

/// Start audio capture on the named (or default) input device.
///
/// Returns the pipeline handle plus the frame channel. Every captured
/// frame is delivered exactly once, in capture order; device loss is
/// reported as a terminal [`CaptureEvent::DeviceLost`].
pub fn open(
    device_name: Option<&str>,
) -> Result<(CapturePipeline, mpsc::UnboundedReceiver<CaptureEvent>), CaptureError> {
    let cfg = resolve_device(device_name)?;
    let native_rate = cfg.native_rate;
    let channels = cfg.stream_config.channels;
    let needs_resample = native_rate != TARGET_SAMPLE_RATE;
    let needs_downmix = channels > 1;

    let (tx, rx) = mpsc::unbounded_channel();
    let (mut producer, mut consumer) = audio_ring_buffer(RING_CAPACITY);
    let running = Arc::new(AtomicBool::new(true));

    let running_err = Arc::clone(&running);
    let tx_err = tx.clone();

    let stream = cfg
        .device
        .build_input_stream(
            &cfg.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if needs_downmix {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };

                let resampled = if needs_resample {
                    resample_linear(&mono, native_rate, TARGET_SAMPLE_RATE)
                } else {
                    mono
                };

                let written = producer.push_slice(&resampled);
                if written < resampled.len() {
                    // Ring buffer full — oldest audio is lost until the
                    // consumer catches up.
                }
            },
            move |err| {
                error!("Audio input stream error: {err}");
                running_err.store(false, Ordering::SeqCst);
                let _ = tx_err.send(CaptureEvent::DeviceLost(err.to_string()));
            },
            None, // no timeout
        )
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to start input stream: {e}")))?;

    // Frame assembly runs on its own thread; the cpal callback only feeds
    // the ring buffer.
    let running_drain = Arc::clone(&running);
    let drain = std::thread::spawn(move || {
        while running_drain.load(Ordering::SeqCst) {
            match consumer.pop_frame(FRAME_SAMPLES) {
                Some(samples) => {
                    let frame = AudioFrame {
                        samples,
                        sample_rate: TARGET_SAMPLE_RATE,
                        channels: 1,
                    };
                    if tx.send(CaptureEvent::Frame(frame)).is_err() {
                        break; // receiver gone — session torn down
                    }
                }
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        debug!("Capture frame thread exiting");
    });

    info!("Audio capture started");

    Ok((
        CapturePipeline {
            stream: Some(stream),
            running,
            drain: Some(drain),
        },
        rx,
    ))
}

impl CapturePipeline {
    /// Release the input device. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("Audio capture stopped");
        }
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
    }

    /// Whether the device is still held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.close();
    }
}
