pub mod backend;
pub mod capture;
pub mod file;
pub mod playback;
pub mod resample;

#[cfg(feature = "cpal")]
pub mod device;

pub use backend::{
    AudioDevices, AudioFrame, BufferId, CaptureBackend, CaptureSource, DeviceConfig,
    OutputDevice, OutputSink, PlatformDevices,
};
pub use capture::{CaptureHandle, FrameSlicer, VolumeLevel};
pub use file::FileCapture;
pub use playback::{PlaybackBuffer, PlaybackScheduler, ScheduledBuffer, SilentOutput};
pub use resample::RateConverter;
