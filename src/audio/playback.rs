// Audio playback scheduler
//
// Synthesized speech arrives as a stream of small PCM chunks with arbitrary
// network jitter. The scheduler keeps one monotonic "next start" cursor on the
// output clock so that consecutive chunks play back to back: a late chunk is
// queued right after its predecessor, an early chunk waits for its slot.

use anyhow::{bail, Context, Result};
use base64::Engine;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::backend::{BufferId, OutputDevice};

/// Decoded block of output audio (mono, `[-1, 1]`)
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode 16-bit little-endian PCM; a trailing odd byte is ignored
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Decode a base64 PCM16 payload as delivered by the remote service
    pub fn from_base64(data: &str, sample_rate: u32) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .context("Invalid base64 audio payload")?;
        Ok(Self::from_pcm16(&bytes, sample_rate))
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Placement of one buffer on the output clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: Duration,
    pub end: Duration,
}

/// Gapless sequential scheduler over an [`OutputDevice`].
///
/// The active set is only changed by [`enqueue`](Self::enqueue) (add),
/// [`reap_finished`](Self::reap_finished) (natural completion) and
/// [`interrupt`](Self::interrupt)/[`teardown`](Self::teardown) (remove).
pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    sample_rate: u32,
    next_start: Duration,
    active: BTreeMap<BufferId, ScheduledBuffer>,
    next_id: BufferId,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn OutputDevice>, sample_rate: u32) -> Self {
        info!(
            "Playback scheduler ready on {} ({}Hz)",
            device.name(),
            sample_rate
        );

        Self {
            device,
            sample_rate,
            next_start: Duration::ZERO,
            active: BTreeMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Decode an inbound base64 chunk and schedule it
    pub fn enqueue_base64(&mut self, data: &str) -> Result<ScheduledBuffer> {
        let buffer = PlaybackBuffer::from_base64(data, self.sample_rate)?;
        self.enqueue(buffer)
    }

    /// Schedule `buffer` immediately after everything already queued
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> Result<ScheduledBuffer> {
        if self.closed {
            bail!("Playback scheduler is closed");
        }

        self.reap_finished();

        let now = self.device.current_time();
        self.next_start = self.next_start.max(now);

        let id = self.next_id;
        self.next_id += 1;

        let start = self.next_start;
        let end = start + buffer.duration();
        self.device.start_buffer(id, start, &buffer);

        let scheduled = ScheduledBuffer { id, start, end };
        self.active.insert(id, scheduled);
        self.next_start = end;

        debug!(
            "Scheduled buffer {} at {:.3}s for {:.3}s ({} active)",
            id,
            start.as_secs_f64(),
            buffer.duration().as_secs_f64(),
            self.active.len()
        );

        Ok(scheduled)
    }

    /// Forget buffers whose playback has ended; returns how many were removed
    pub fn reap_finished(&mut self) -> usize {
        let now = self.device.current_time();
        let before = self.active.len();
        self.active.retain(|_, buffer| buffer.end > now);
        before - self.active.len()
    }

    /// Stop everything immediately and restart the schedule at "now"
    pub fn interrupt(&mut self) {
        let stopped = self.stop_all();
        self.next_start = self.device.current_time();

        info!("Playback interrupted ({} buffers stopped)", stopped);
    }

    /// Stop all buffers and release the output device
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }

        let stopped = self.stop_all();
        self.device.close();
        self.next_start = Duration::ZERO;
        self.closed = true;

        info!(
            "Playback torn down on {} ({} buffers stopped)",
            self.device.name(),
            stopped
        );
    }

    fn stop_all(&mut self) -> usize {
        let ids: Vec<BufferId> = self.active.keys().copied().collect();
        for id in &ids {
            self.device.stop_buffer(*id);
        }
        self.active.clear();
        ids.len()
    }

    /// Clock position where the next chunk will start
    pub fn next_start(&self) -> Duration {
        self.next_start
    }

    pub fn current_time(&self) -> Duration {
        self.device.current_time()
    }

    pub fn active(&self) -> impl Iterator<Item = &ScheduledBuffer> {
        self.active.values()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Output device with a wall clock and no sound.
///
/// Keeps scheduling semantics intact on machines without speakers.
pub struct SilentOutput {
    epoch: Instant,
    closed: bool,
}

impl SilentOutput {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            closed: false,
        }
    }
}

impl Default for SilentOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for SilentOutput {
    fn current_time(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn start_buffer(&mut self, id: BufferId, at: Duration, buffer: &PlaybackBuffer) {
        debug!(
            "silent output: buffer {} at {:.3}s ({} samples)",
            id,
            at.as_secs_f64(),
            buffer.samples().len()
        );
    }

    fn stop_buffer(&mut self, _id: BufferId) {}

    fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &str {
        "silent output"
    }
}
