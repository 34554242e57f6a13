use thiserror::Error;

/// Failures surfaced at the voice session boundary.
///
/// None of these are fatal to the process. The controller records
/// [`SessionError::user_message`] as the single "last error" and returns to
/// `Disconnected`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone access was denied by the platform
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// No usable capture or output device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The remote stream failed to open or broke after opening
    #[error("transport error: {0}")]
    Transport(String),

    /// The action callback rejected a tool call
    #[error("tool dispatch failed: {0}")]
    ToolDispatch(String),

    /// Closing the remote session failed (logged, never propagated)
    #[error("error closing session: {0}")]
    Close(String),

    #[error("API key is missing (looked in {0})")]
    MissingApiKey(String),

    /// The controller task has shut down
    #[error("voice session controller is not running")]
    ControllerStopped,
}

impl SessionError {
    /// Message shown to the kiosk user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Permission(_) => {
                "Microphone access was denied. Please allow microphone access and try again."
                    .to_string()
            }
            SessionError::DeviceUnavailable(detail) => {
                format!("No audio device available: {}", detail)
            }
            SessionError::Transport(_) => {
                "Connection failed. Service might be temporarily unavailable.".to_string()
            }
            SessionError::MissingApiKey(_) => {
                "API Key is missing in environment variables.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}
