//! Gapless scheduled playback of synthesized speech.
//!
//! Decoded segments arrive out of lockstep with real time (network jitter)
//! and must play back-to-back with no gap or overlap. A pure [`Timeline`]
//! tracks the next-start marker and the set of live segment handles; the
//! [`PlaybackScheduler`] wraps it around a rodio sink. Barge-in flushes
//! everything and resets the marker to "now".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, info, warn};

// ── Timeline ────────────────────────────────────────────────────────

/// A segment's scheduled play window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSegment {
    pub start: Instant,
    pub end: Instant,
}

/// Pure scheduling state: the next-start marker plus an arena of live
/// segment handles keyed by stable ids. Separated from the audio device so
/// the timing rules can be exercised directly.
///
/// The next-start marker only moves forward, except on [`Timeline::flush`]
/// which resets it to the flush instant.
#[derive(Debug, Default)]
pub struct Timeline {
    next_start: Option<Instant>,
    next_id: u64,
    live: HashMap<u64, ScheduledSegment>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a segment of `duration` whose enqueue happens at `now`.
    ///
    /// The start time is `max(now, next_start)`: contiguous with the
    /// previous segment when we are keeping up, immediately at `now` after
    /// an underrun. Returns the handle id and the scheduled window.
    pub fn schedule(&mut self, duration: Duration, now: Instant) -> (u64, ScheduledSegment) {
        let start = match self.next_start {
            Some(t) if t > now => t,
            _ => now,
        };
        let end = start + duration;
        self.next_start = Some(end);

        let id = self.next_id;
        self.next_id += 1;
        let segment = ScheduledSegment { start, end };
        self.live.insert(id, segment);
        (id, segment)
    }

    /// Remove a segment that finished (or was cancelled). Returns whether
    /// it was still live.
    pub fn complete(&mut self, id: u64) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Drop every live segment and reset the next-start marker to `now`.
    /// Returns the ids that were cleared.
    pub fn flush(&mut self, now: Instant) -> Vec<u64> {
        let ids: Vec<u64> = self.live.keys().copied().collect();
        self.live.clear();
        self.next_start = Some(now);
        ids
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn next_start(&self) -> Option<Instant> {
        self.next_start
    }
}

// ── Scheduler ───────────────────────────────────────────────────────

/// Playback failures surfaced at open time.
#[derive(Debug)]
pub enum PlaybackError {
    /// No usable audio output device.
    OutputUnavailable(String),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutputUnavailable(msg) => write!(f, "audio output unavailable: {msg}"),
        }
    }
}

impl std::error::Error for PlaybackError {}

/// Handle to one scheduled segment. Cancelling mutes that segment without
/// disturbing the rest of the queue; cancelling a finished segment is a
/// no-op.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl PlaybackHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop this segment if it has not finished playing.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// State shared with the audio thread: the timeline arena plus each live
/// segment's cancellation flag. Mutated from the enqueue path and from
/// segment-completion callbacks on the device thread.
struct SchedulerShared {
    timeline: Timeline,
    cancels: HashMap<u64, Arc<AtomicBool>>,
}

/// Owner of the audio output stream. Appends segments to a single sink so
/// consecutive segments play gaplessly in enqueue order.
pub struct PlaybackScheduler {
    _stream: OutputStream,
    sink: Sink,
    shared: Arc<Mutex<SchedulerShared>>,
}

/// Open the audio output stream for a named or default device.
fn open_output_stream(
    output_device_name: Option<&str>,
) -> Result<(OutputStream, OutputStreamHandle), PlaybackError> {
    if let Some(name) = output_device_name {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| {
                PlaybackError::OutputUnavailable(format!("failed to enumerate output devices: {e}"))
            })?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));

        match device {
            Some(dev) => {
                info!(device = %name, "Using configured output device");
                OutputStream::try_from_device(&dev).map_err(|e| {
                    PlaybackError::OutputUnavailable(format!(
                        "failed to open output device '{name}': {e}"
                    ))
                })
            }
            None => {
                warn!(device = %name, "Configured output device not found, falling back to default");
                OutputStream::try_default().map_err(|e| {
                    PlaybackError::OutputUnavailable(format!("no audio output device: {e}"))
                })
            }
        }
    } else {
        OutputStream::try_default()
            .map_err(|e| PlaybackError::OutputUnavailable(format!("no audio output device: {e}")))
    }
}

impl PlaybackScheduler {
    /// Open the output device and create an empty schedule.
    pub fn new(output_device_name: Option<&str>) -> Result<Self, PlaybackError> {
        let (stream, handle) = open_output_stream(output_device_name)?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| PlaybackError::OutputUnavailable(format!("failed to create sink: {e}")))?;

        Ok(Self {
            _stream: stream,
            sink,
            shared: Arc::new(Mutex::new(SchedulerShared {
                timeline: Timeline::new(),
                cancels: HashMap::new(),
            })),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule a decoded segment to start at `max(now, next_start)`.
    ///
    /// Segments enqueued in order play in that order with contiguous
    /// timing, provided each arrives before the previous segment's end.
    pub fn enqueue(&self, samples: Vec<f32>, sample_rate: u32, channels: u16) -> PlaybackHandle {
        let frames = samples.len() / channels.max(1) as usize;
        let duration = Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64);
        let cancelled = Arc::new(AtomicBool::new(false));

        let id = {
            let mut shared = self.lock();
            let (id, segment) = shared.timeline.schedule(duration, Instant::now());
            shared.cancels.insert(id, Arc::clone(&cancelled));
            debug!(
                id,
                duration_ms = duration.as_millis() as u64,
                queued = shared.timeline.live_count(),
                lead_ms = segment.start.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Segment scheduled"
            );
            id
        };

        let shared = Arc::clone(&self.shared);
        let source = SegmentSource::new(
            samples,
            sample_rate,
            channels.max(1),
            Arc::clone(&cancelled),
            Box::new(move || {
                let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
                shared.timeline.complete(id);
                shared.cancels.remove(&id);
            }),
        );
        self.sink.append(source);

        PlaybackHandle { id, cancelled }
    }

    /// Stop every scheduled and in-flight segment, clear the handle set,
    /// and reset the next-start marker to now. Used on barge-in.
    pub fn flush_all(&self) {
        {
            let mut shared = self.lock();
            for flag in shared.cancels.values() {
                flag.store(true, Ordering::SeqCst);
            }
            shared.cancels.clear();
            let cleared = shared.timeline.flush(Instant::now());
            debug!(cleared = cleared.len(), "Playback flushed");
        }
        // Outside the lock: the audio thread drops sources on stop and
        // their completion callbacks take the same lock.
        self.sink.stop();
        self.sink.play();
    }

    /// Number of segments still scheduled or playing.
    pub fn live_count(&self) -> usize {
        self.lock().timeline.live_count()
    }
}

// ── Segment source ──────────────────────────────────────────────────

/// Rodio source for one scheduled segment. Yields its samples until done
/// or cancelled; fires the completion callback exactly once on either
/// path (including drop during a sink stop).
struct SegmentSource {
    samples: std::vec::IntoIter<f32>,
    sample_rate: u32,
    channels: u16,
    duration: Duration,
    cancelled: Arc<AtomicBool>,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl SegmentSource {
    fn new(
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
        cancelled: Arc<AtomicBool>,
        on_complete: Box<dyn FnOnce() + Send>,
    ) -> Self {
        let frames = samples.len() / channels as usize;
        let duration = Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64);
        Self {
            samples: samples.into_iter(),
            sample_rate,
            channels,
            duration,
            cancelled,
            on_complete: Some(on_complete),
        }
    }

    fn finish(&mut self) {
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
    }
}

impl Iterator for SegmentSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.cancelled.load(Ordering::Relaxed) {
            self.finish();
            return None;
        }
        match self.samples.next() {
            Some(s) => Some(s),
            None => {
                self.finish();
                None
            }
        }
    }
}

impl Source for SegmentSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(self.duration)
    }
}

impl Drop for SegmentSource {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_contiguous_schedule_regardless_of_arrival_jitter() {
        let mut timeline = Timeline::new();
        let t0 = Instant::now();

        let (_, first) = timeline.schedule(100 * MS, t0);
        // Second and third arrive with jitter but before the prior end.
        let (_, second) = timeline.schedule(200 * MS, t0 + 40 * MS);
        let (_, third) = timeline.schedule(50 * MS, t0 + 250 * MS);

        assert_eq!(first.start, t0);
        assert_eq!(second.start, t0 + 100 * MS);
        assert_eq!(third.start, t0 + 300 * MS);
        assert_eq!(timeline.next_start(), Some(t0 + 350 * MS));
    }

    #[test]
    fn test_underrun_restarts_at_now() {
        let mut timeline = Timeline::new();
        let t0 = Instant::now();

        timeline.schedule(100 * MS, t0);
        // Network stall: next segment arrives well past the previous end.
        let (_, late) = timeline.schedule(100 * MS, t0 + 500 * MS);
        assert_eq!(late.start, t0 + 500 * MS);
        assert_eq!(late.end, t0 + 600 * MS);
    }

    #[test]
    fn test_flush_clears_handles_and_resets_marker() {
        let mut timeline = Timeline::new();
        let t0 = Instant::now();

        timeline.schedule(100 * MS, t0);
        timeline.schedule(100 * MS, t0);
        timeline.schedule(100 * MS, t0);
        assert_eq!(timeline.live_count(), 3);

        let flush_at = t0 + 50 * MS;
        let cleared = timeline.flush(flush_at);
        assert_eq!(cleared.len(), 3);
        assert_eq!(timeline.live_count(), 0);

        // Next enqueue schedules at its own "now", not the pre-flush marker.
        let (_, next) = timeline.schedule(100 * MS, flush_at + 10 * MS);
        assert_eq!(next.start, flush_at + 10 * MS);
    }

    #[test]
    fn test_complete_removes_only_that_segment() {
        let mut timeline = Timeline::new();
        let t0 = Instant::now();
        let (a, _) = timeline.schedule(10 * MS, t0);
        let (b, _) = timeline.schedule(10 * MS, t0);
        assert!(timeline.complete(a));
        assert!(!timeline.complete(a));
        assert_eq!(timeline.live_count(), 1);
        assert!(timeline.complete(b));
    }

    #[test]
    fn test_segment_source_fires_completion_once() {
        use std::sync::atomic::AtomicUsize;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        let mut source = SegmentSource::new(
            vec![0.0; 4],
            16_000,
            1,
            Arc::new(AtomicBool::new(false)),
            Box::new(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        while source.next().is_some() {}
        drop(source);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_segment_stops_yielding() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut source = SegmentSource::new(
            vec![0.5; 100],
            16_000,
            1,
            Arc::clone(&cancelled),
            Box::new(|| {}),
        );

        assert!(source.next().is_some());
        cancelled.store(true, Ordering::SeqCst);
        assert!(source.next().is_none());
    }

    #[test]
    fn test_scheduler_flush_empties_arena() {
        // Needs a real output device; skip quietly on headless machines.
        let Ok(scheduler) = PlaybackScheduler::new(None) else {
            return;
        };
        scheduler.enqueue(vec![0.0; 24_000], 24_000, 1);
        scheduler.enqueue(vec![0.0; 24_000], 24_000, 1);
        scheduler.enqueue(vec![0.0; 24_000], 24_000, 1);
        assert_eq!(scheduler.live_count(), 3);

        scheduler.flush_all();
        assert_eq!(scheduler.live_count(), 0);

        // A segment enqueued after the flush schedules at "now".
        let before = Instant::now();
        scheduler.enqueue(vec![0.0; 2_400], 24_000, 1);
        let shared = scheduler.lock();
        let next = shared.timeline.next_start().expect("segment scheduled");
        assert!(next >= before);
        assert!(next <= before + Duration::from_millis(200));
    }
}
