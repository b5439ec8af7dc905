//! Microphone capture and the sample ring buffer.

pub mod capture;
pub mod ring_buffer;

pub use capture::{AudioFrame, CaptureError, CaptureEvent, CapturePipeline};
