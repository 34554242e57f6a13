//! Sample-rate conversion for captured audio
//!
//! Device and file audio arrive at whatever rate the hardware or the WAV
//! header says; the outbound channel always carries the configured capture
//! rate. [`RateConverter`] bridges the two with rubato's FFT resampler.

use anyhow::{bail, Context, Result};
use rubato::{FftFixedIn, Resampler};

const CHUNK: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Upper bound on silent blocks fed through the filter when flushing
const MAX_TAIL_ROUNDS: usize = 16;

/// Streaming mono sample-rate converter.
///
/// Takes buffers of any size and returns converted samples as soon as a full
/// input chunk is available. The resampler's startup delay is trimmed, so
/// output sample `n` lines up with input time `n / to_rate`.
pub struct RateConverter {
    from_rate: u32,
    to_rate: u32,
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    /// Output samples still owed to the filter delay
    skip: usize,
    received: u64,
    emitted: u64,
}

impl RateConverter {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            bail!("Invalid sample rate conversion {}Hz -> {}Hz", from_rate, to_rate);
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                CHUNK,
                SUB_CHUNKS,
                1,
            )
            .with_context(|| {
                format!("Failed to create {}Hz -> {}Hz resampler", from_rate, to_rate)
            })?;
            Some(resampler)
        };
        let skip = inner.as_ref().map(|r| r.output_delay()).unwrap_or(0);

        Ok(Self {
            from_rate,
            to_rate,
            inner,
            pending: Vec::with_capacity(CHUNK * 2),
            skip,
            received: 0,
            emitted: 0,
        })
    }

    /// True when input and output rates match and samples pass through
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Number of output samples `received` input samples correspond to
    fn expected_len(&self) -> u64 {
        (self.received as f64 * self.to_rate as f64 / self.from_rate as f64).round() as u64
    }

    /// Feed samples and return whatever output is ready
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.received += samples.len() as u64;

        let Some(inner) = self.inner.as_mut() else {
            self.emitted += samples.len() as u64;
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let rest = self.pending.split_off(needed);
            let chunk = std::mem::replace(&mut self.pending, rest);

            let block = inner.process(&[chunk], None).context("Resampling failed")?;
            take_output(&mut self.skip, &mut self.emitted, &mut out, block);
        }
        Ok(out)
    }

    /// Flush buffered input and the filter tail.
    ///
    /// After this, the total output is `received * to_rate / from_rate`
    /// samples, rounded.
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let expected = self.expected_len();
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        if !self.pending.is_empty() {
            let chunk = std::mem::take(&mut self.pending);
            let block = inner
                .process_partial(Some(&[chunk]), None)
                .context("Resampling failed")?;
            take_output(&mut self.skip, &mut self.emitted, &mut out, block);
        }

        let mut rounds = 0;
        while self.emitted < expected && rounds < MAX_TAIL_ROUNDS {
            let block = inner
                .process_partial::<Vec<f32>>(None, None)
                .context("Resampling failed")?;
            take_output(&mut self.skip, &mut self.emitted, &mut out, block);
            rounds += 1;
        }

        if self.emitted > expected {
            let excess = (self.emitted - expected) as usize;
            out.truncate(out.len().saturating_sub(excess));
            self.emitted = expected;
        }
        Ok(out)
    }
}

fn take_output(skip: &mut usize, emitted: &mut u64, out: &mut Vec<f32>, mut block: Vec<Vec<f32>>) {
    let Some(channel) = block.pop() else {
        return;
    };
    let dropped = (*skip).min(channel.len());
    *skip -= dropped;
    *emitted += (channel.len() - dropped) as u64;
    out.extend_from_slice(&channel[dropped..]);
}

/// Convert a complete mono buffer from `from_rate` to `to_rate`
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let mut converter = RateConverter::new(from_rate, to_rate)?;
    let mut out = converter.push(samples)?;
    out.extend(converter.finish()?);
    Ok(out)
}
