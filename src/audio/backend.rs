use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::playback::{PlaybackBuffer, SilentOutput};
use crate::config::{AudioConfig, OutputKind, SourceKind};
use crate::error::SessionError;

/// A block of mono PCM samples at the capture sample rate.
///
/// Frames are ephemeral: the capture pipeline measures and encodes each one
/// immediately and then drops it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Audio capture backend trait
///
/// A backend represents an acquired microphone. It is created fresh for every
/// session and stopped exactly once when that session is torn down.
///
/// Implementations:
/// - [`crate::audio::file::FileCapture`]: WAV file played at real-time cadence
/// - `crate::audio::device::CpalMicrophone` (feature `cpal`): system microphone
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that yields fixed-size frames in capture order
    async fn start(&mut self) -> anyhow::Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> anyhow::Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Identifier of a buffer scheduled on an [`OutputDevice`].
pub type BufferId = u64;

/// Playback side of the platform audio facility.
///
/// The device owns the output clock. Buffers are started at an absolute clock
/// position and either run to completion or are stopped early.
pub trait OutputDevice: Send + Sync {
    /// Current position of the output clock
    fn current_time(&self) -> Duration;

    /// Begin playing `buffer` exactly at `at` on the output clock
    fn start_buffer(&mut self, id: BufferId, at: Duration, buffer: &PlaybackBuffer);

    /// Stop a scheduled or playing buffer immediately
    fn stop_buffer(&mut self, id: BufferId);

    /// Release the output device
    fn close(&mut self);

    fn name(&self) -> &str;
}

/// Join a device stream thread that has been told to stop.
///
/// Inside a tokio runtime the join runs on the blocking pool so a slow audio
/// driver cannot stall a worker; outside one it joins inline.
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
pub(crate) fn join_device_thread(thread: std::thread::JoinHandle<()>, what: &'static str) {
    let join = move || {
        if thread.join().is_err() {
            error!("{} thread panicked", what);
        }
        info!("{} released", what);
    };

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}

/// Platform audio facility.
///
/// Every call acquires a new device; nothing is cached between sessions.
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone. Permission problems map to [`SessionError::Permission`].
    fn open_microphone(&self) -> Result<Box<dyn CaptureBackend>, SessionError>;

    /// Open a fresh output context.
    fn open_output(&self) -> Result<Box<dyn OutputDevice>, SessionError>;
}

/// Where microphone audio comes from
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// System default input device (feature `cpal`)
    Microphone,
    /// WAV file replayed as if it were a microphone
    File(PathBuf),
}

/// Where synthesized speech goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSink {
    /// System default output device (feature `cpal`)
    Speaker,
    /// Wall-clock output that produces no sound
    Silent,
}

/// Configuration for the capture and playback devices
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Sample rate expected by the outbound channel
    pub input_sample_rate: u32,
    /// Sample rate of synthesized speech
    pub output_sample_rate: u32,
    /// Samples per captured frame
    pub frame_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_size: 4096,
        }
    }
}

/// Audio device factory backed by the configured sources
pub struct PlatformDevices {
    source: CaptureSource,
    sink: OutputSink,
    config: DeviceConfig,
}

impl PlatformDevices {
    pub fn new(source: CaptureSource, sink: OutputSink, config: DeviceConfig) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }

    /// Build the factory from the `[audio]` configuration section
    pub fn from_config(audio: &AudioConfig) -> anyhow::Result<Self> {
        let source = match audio.source {
            SourceKind::Microphone => CaptureSource::Microphone,
            SourceKind::File => {
                let path = audio.file_path.clone().ok_or_else(|| {
                    anyhow::anyhow!("audio.source = \"file\" requires audio.file_path")
                })?;
                CaptureSource::File(path)
            }
        };
        let sink = match audio.output {
            OutputKind::Speaker => OutputSink::Speaker,
            OutputKind::Silent => OutputSink::Silent,
        };

        Ok(Self::new(
            source,
            sink,
            DeviceConfig {
                input_sample_rate: audio.input_sample_rate,
                output_sample_rate: audio.output_sample_rate,
                frame_size: audio.frame_size,
            },
        ))
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

impl AudioDevices for PlatformDevices {
    fn open_microphone(&self) -> Result<Box<dyn CaptureBackend>, SessionError> {
        match &self.source {
            CaptureSource::File(path) => {
                let capture = super::file::FileCapture::open(path, &self.config)
                    .map_err(|e| SessionError::DeviceUnavailable(format!("{:#}", e)))?;
                Ok(Box::new(capture))
            }

            CaptureSource::Microphone => {
                #[cfg(feature = "cpal")]
                {
                    let mic = super::device::CpalMicrophone::open(&self.config)?;
                    Ok(Box::new(mic))
                }

                #[cfg(not(feature = "cpal"))]
                {
                    Err(SessionError::DeviceUnavailable(
                        "microphone capture requires the `cpal` feature".to_string(),
                    ))
                }
            }
        }
    }

    fn open_output(&self) -> Result<Box<dyn OutputDevice>, SessionError> {
        match self.sink {
            OutputSink::Silent => Ok(Box::new(SilentOutput::new())),

            OutputSink::Speaker => {
                #[cfg(feature = "cpal")]
                {
                    let speaker = super::device::CpalSpeaker::open(&self.config)?;
                    Ok(Box::new(speaker))
                }

                #[cfg(not(feature = "cpal"))]
                {
                    Err(SessionError::DeviceUnavailable(
                        "speaker output requires the `cpal` feature".to_string(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Instant;

    #[tokio::test]
    async fn device_thread_join_does_not_block_the_runtime() {
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let thread = std::thread::spawn(move || {
            let _ = release_rx.recv();
        });

        let started = Instant::now();
        join_device_thread(thread, "Test");
        assert!(started.elapsed() < Duration::from_millis(500));

        release_tx.send(()).unwrap();
    }

    #[test]
    fn device_thread_join_outside_runtime_waits() {
        let thread = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(20)));
        let started = Instant::now();
        join_device_thread(thread, "Test");
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
