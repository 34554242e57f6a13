// Audio capture pipeline
//
// Pulls frames from a capture backend, folds each frame's loudness into the
// shared volume estimate, encodes it as base64 PCM16 and forwards it to the
// session's outbound channel in capture order.

use anyhow::{Context, Result};
use base64::Engine;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{AudioFrame, CaptureBackend};
use crate::live::messages::Blob;

/// Smoothed loudness estimate in `[0, 1]`, shared with the presentation layer.
///
/// Updated on every captured frame with `level = level * 0.8 + rms * 2.0`.
/// Read-only for everybody except the capture pipeline.
#[derive(Debug, Default)]
pub struct VolumeLevel {
    bits: AtomicU32,
}

impl VolumeLevel {
    const DECAY: f32 = 0.8;
    const GAIN: f32 = 2.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Fold one frame's RMS into the estimate and return the new level
    pub fn fold(&self, rms: f32) -> f32 {
        let next = (self.get() * Self::DECAY + rms * Self::GAIN).clamp(0.0, 1.0);
        self.bits.store(next.to_bits(), Ordering::Relaxed);
        next
    }

    pub fn reset(&self) {
        self.bits.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

/// Root-mean-square amplitude of a block of samples
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Convert `[-1, 1]` float samples to 16-bit little-endian PCM bytes
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|s| {
            let scaled = s.clamp(-1.0, 1.0) * 32768.0;
            scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Encode a frame into the blob format expected by the outbound channel
pub fn encode_frame(frame: &AudioFrame) -> Blob {
    let pcm = encode_pcm16(&frame.samples);
    Blob {
        mime_type: format!("audio/pcm;rate={}", frame.sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(pcm),
    }
}

/// Convert interleaved device audio to mono by averaging channels
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Accumulates arbitrary-sized device buffers into fixed-size frames
#[derive(Debug)]
pub struct FrameSlicer {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameSlicer {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size.max(1) * 2),
        }
    }

    /// Append samples and return every completed frame
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let full = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame::new(full, self.sample_rate));
        }
        frames
    }
}

/// Handle for a running capture pipeline.
///
/// Owns the microphone for the rest of the session; [`CaptureHandle::stop`]
/// stops the backend and waits until it is released.
pub struct CaptureHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CaptureHandle {
    /// Stop the pipeline and release the microphone
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Err(e) = self.task.await {
            error!("Capture task panicked: {}", e);
        }
    }
}

/// Start capturing from `backend`, forwarding encoded frames to `outbound`.
///
/// Fails fast if the backend cannot start; the backend is stopped before the
/// error is returned so no device is left open.
pub async fn start(
    mut backend: Box<dyn CaptureBackend>,
    volume: Arc<VolumeLevel>,
    outbound: mpsc::Sender<Blob>,
) -> Result<CaptureHandle> {
    info!("Starting audio capture on {}", backend.name());

    let mut frames = match backend.start().await {
        Ok(rx) => rx,
        Err(e) => {
            if let Err(stop_err) = backend.stop().await {
                warn!("Failed to release capture backend: {}", stop_err);
            }
            return Err(e).context("Failed to start audio capture");
        }
    };

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        info!("Audio capture task started");
        let mut sent: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        warn!("Capture backend {} ended its stream", backend.name());
                        break;
                    };

                    volume.fold(rms(&frame.samples));

                    // A full queue must not keep shutdown waiting
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        result = outbound.send(encode_frame(&frame)) => {
                            if result.is_err() {
                                debug!("Outbound channel closed, stopping capture");
                                break;
                            }
                        }
                    }
                    sent += 1;
                }
            }
        }

        if let Err(e) = backend.stop().await {
            error!("Failed to stop capture backend: {}", e);
        }
        volume.reset();

        info!("Audio capture task stopped ({} frames sent)", sent);
    });

    Ok(CaptureHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}
