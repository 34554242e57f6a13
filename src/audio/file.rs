use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{AudioFrame, CaptureBackend, DeviceConfig};
use super::capture::{downmix, FrameSlicer};
use super::resample::resample;

/// WAV file used as a microphone.
///
/// The file is decoded up front, converted to mono at the capture rate and
/// replayed one frame per frame-duration, like a live device would deliver it.
pub struct FileCapture {
    path: String,
    frames: Vec<AudioFrame>,
    frame_interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl FileCapture {
    pub fn open(path: impl AsRef<Path>, config: &DeviceConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Int if spec.bits_per_sample == 16 => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => bail!(
                "Unsupported WAV sample width: {} bits (expected 16-bit PCM or float)",
                spec.bits_per_sample
            ),
        };

        let mono = downmix(&interleaved, spec.channels);
        let samples = resample(&mono, spec.sample_rate, config.input_sample_rate)?;

        let mut slicer = FrameSlicer::new(config.frame_size, config.input_sample_rate);
        let frames = slicer.push(&samples);

        let frame_interval = Duration::from_secs_f64(
            config.frame_size as f64 / config.input_sample_rate.max(1) as f64,
        );

        info!(
            "Audio file loaded: {}Hz, {} channels, {} frames of {} samples",
            spec.sample_rate,
            spec.channels,
            frames.len(),
            config.frame_size
        );

        Ok(Self {
            path: path.display().to_string(),
            frames,
            frame_interval,
            task: None,
        })
    }

    /// Number of whole frames the file yields
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl CaptureBackend for FileCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            bail!("Already capturing");
        }

        info!("Replaying {} as microphone input", self.path);

        let (tx, rx) = mpsc::channel(32);
        let frames = self.frames.clone();
        let interval = self.frame_interval;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for frame in frames {
                ticker.tick().await;
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Stopped replaying {}", self.path);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
