pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;

pub use audio::{AudioDevices, AudioFrame, CaptureBackend, OutputDevice, PlatformDevices};
pub use config::Config;
pub use error::SessionError;
pub use http::{create_router, ActionLog, AppState};
pub use live::{LiveTransport, WebSocketTransport};
pub use session::{
    ActionId, ConnectionState, ControllerOptions, Language, SessionConfig, SessionMonitor,
    TranscriptEntry, Voice, VoiceSession,
};
