// System microphone and speaker via cpal
//
// cpal streams are not Send on every platform, so each stream lives on its own
// thread for its whole life and is controlled over a std channel. Building
// the stream happens when the device is acquired, so permission problems
// surface at connect time instead of as a silent stream later.

use anyhow::{bail, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{
    join_device_thread, AudioFrame, BufferId, CaptureBackend, DeviceConfig, OutputDevice,
};
use super::capture::{downmix, FrameSlicer};
use super::playback::PlaybackBuffer;
use super::resample::RateConverter;
use crate::error::SessionError;

enum Control {
    Play,
    Stop,
}

fn build_error(err: cpal::BuildStreamError) -> SessionError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            SessionError::DeviceUnavailable("device not available".to_string())
        }
        other => SessionError::Permission(other.to_string()),
    }
}

/// Run a stream on a dedicated thread until `Control::Stop` arrives
fn spawn_stream_thread<F>(
    name: &str,
    build: F,
) -> Result<(std_mpsc::Sender<Control>, JoinHandle<()>), SessionError>
where
    F: FnOnce() -> Result<cpal::Stream, SessionError> + Send + 'static,
{
    let (ctl_tx, ctl_rx) = std_mpsc::channel::<Control>();
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), SessionError>>();

    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while let Ok(ctl) = ctl_rx.recv() {
                match ctl {
                    Control::Play => {
                        if let Err(e) = stream.play() {
                            error!("Failed to start audio stream: {}", e);
                        }
                    }
                    Control::Stop => break,
                }
            }

            drop(stream);
        })
        .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok((ctl_tx, handle)),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => Err(SessionError::DeviceUnavailable(
            "audio thread exited during setup".to_string(),
        )),
    }
}

/// System default microphone
pub struct CpalMicrophone {
    control: Option<std_mpsc::Sender<Control>>,
    thread: Option<JoinHandle<()>>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    capturing: bool,
}

impl CpalMicrophone {
    pub fn open(config: &DeviceConfig) -> Result<Self, SessionError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| SessionError::DeviceUnavailable("no input device".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| SessionError::Permission(e.to_string()))?;
        let channels = supported.channels();
        let device_rate = supported.sample_rate().0;
        let stream_config: cpal::StreamConfig = supported.into();

        info!(
            "Microphone opened: {}Hz, {} channels -> {}Hz mono",
            device_rate, channels, config.input_sample_rate
        );

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(64);
        let target_rate = config.input_sample_rate;
        let frame_size = config.frame_size;

        let mut converter = RateConverter::new(device_rate, target_rate)
            .map_err(|e| SessionError::DeviceUnavailable(format!("{:#}", e)))?;

        let (control, thread) = spawn_stream_thread("kiosk-voice-mic", move || {
            let mut slicer = FrameSlicer::new(frame_size, target_rate);
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix(data, channels);
                        let samples = match converter.push(&mono) {
                            Ok(samples) => samples,
                            Err(e) => {
                                warn!("Dropping microphone buffer: {:#}", e);
                                return;
                            }
                        };
                        for frame in slicer.push(&samples) {
                            if frame_tx.try_send(frame).is_err() {
                                warn!("Capture queue full, dropping frame");
                            }
                        }
                    },
                    |err: cpal::StreamError| {
                        error!("cpal input stream error: {}", err);
                    },
                    None,
                )
                .map_err(build_error)
        })?;

        Ok(Self {
            control: Some(control),
            thread: Some(thread),
            frames: Some(frame_rx),
            capturing: false,
        })
    }
}

#[async_trait]
impl CaptureBackend for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let Some(frames) = self.frames.take() else {
            bail!("Already capturing");
        };
        if let Some(control) = &self.control {
            control
                .send(Control::Play)
                .map_err(|_| anyhow::anyhow!("microphone thread is gone"))?;
        }
        self.capturing = true;
        Ok(frames)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Stop);
        }
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await?
                .map_err(|_| anyhow::anyhow!("microphone thread panicked"))?;
            info!("Microphone released");
        }
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

struct MixerVoice {
    id: BufferId,
    start_secs: f64,
    buffer: PlaybackBuffer,
}

#[derive(Default)]
struct Mixer {
    voices: Vec<MixerVoice>,
}

/// System default speaker
pub struct CpalSpeaker {
    device_rate: u32,
    rendered: Arc<AtomicU64>,
    mixer: Arc<Mutex<Mixer>>,
    control: Option<std_mpsc::Sender<Control>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSpeaker {
    pub fn open(_config: &DeviceConfig) -> Result<Self, SessionError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SessionError::DeviceUnavailable("no output device".to_string()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;
        let channels = supported.channels() as usize;
        let device_rate = supported.sample_rate().0;
        let stream_config: cpal::StreamConfig = supported.into();

        let rendered = Arc::new(AtomicU64::new(0));
        let mixer = Arc::new(Mutex::new(Mixer::default()));

        let cb_rendered = Arc::clone(&rendered);
        let cb_mixer = Arc::clone(&mixer);

        let (control, thread) = spawn_stream_thread("kiosk-voice-speaker", move || {
            device
                .build_output_stream(
                    &stream_config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render(out, channels, device_rate, &cb_rendered, &cb_mixer);
                    },
                    |err: cpal::StreamError| {
                        error!("cpal output stream error: {}", err);
                    },
                    None,
                )
                .map_err(build_error)
        })?;

        control
            .send(Control::Play)
            .map_err(|_| SessionError::DeviceUnavailable("speaker thread is gone".to_string()))?;

        info!("Speaker opened: {}Hz, {} channels", device_rate, channels);

        Ok(Self {
            device_rate,
            rendered,
            mixer,
            control: Some(control),
            thread: Some(thread),
        })
    }
}

fn render(
    out: &mut [f32],
    channels: usize,
    device_rate: u32,
    rendered: &AtomicU64,
    mixer: &Mutex<Mixer>,
) {
    let base = rendered.load(Ordering::Acquire);
    let frames = out.len() / channels.max(1);

    let Ok(mut mixer) = mixer.lock() else {
        out.fill(0.0);
        return;
    };

    for (i, frame) in out.chunks_mut(channels.max(1)).enumerate() {
        let t = (base + i as u64) as f64 / device_rate as f64;
        let mut value = 0.0f32;
        for voice in &mixer.voices {
            let offset = t - voice.start_secs;
            if offset < 0.0 {
                continue;
            }
            let idx = (offset * voice.buffer.sample_rate() as f64) as usize;
            if let Some(sample) = voice.buffer.samples().get(idx) {
                value += *sample;
            }
        }
        frame.fill(value.clamp(-1.0, 1.0));
    }

    let now = (base + frames as u64) as f64 / device_rate as f64;
    mixer
        .voices
        .retain(|v| v.start_secs + v.buffer.duration().as_secs_f64() > now);

    rendered.store(base + frames as u64, Ordering::Release);
}

impl OutputDevice for CpalSpeaker {
    fn current_time(&self) -> Duration {
        let frames = self.rendered.load(Ordering::Acquire);
        Duration::from_secs_f64(frames as f64 / self.device_rate as f64)
    }

    fn start_buffer(&mut self, id: BufferId, at: Duration, buffer: &PlaybackBuffer) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.voices.push(MixerVoice {
                id,
                start_secs: at.as_secs_f64(),
                buffer: buffer.clone(),
            });
        }
    }

    fn stop_buffer(&mut self, id: BufferId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.voices.retain(|v| v.id != id);
        }
    }

    fn close(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Stop);
        }
        if let Some(thread) = self.thread.take() {
            join_device_thread(thread, "Speaker");
        }
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.close();
    }
}
