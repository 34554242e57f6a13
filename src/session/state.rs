use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use super::config::Voice;
use super::transcript::{TranscriptAssembler, TranscriptEntry};
use crate::audio::VolumeLevel;

/// Connection state of the voice session.
///
/// ```text
/// Disconnected ──connect──▶ Connecting ──opened──▶ Connected
///      ▲                        │                      │
///      │                        └──────error──┬────────┘
///      │                                      ▼
///      └────────────cleanup───────────────  Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// `true` while a session holds devices
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Details of the current session kept for display
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionInfo {
    pub session_id: Option<String>,
    pub voice: Option<Voice>,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Snapshot of everything the presentation layer shows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub voice: Option<Voice>,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since the session reached `Connected`
    pub duration_secs: f64,
    pub volume: f32,
    pub last_error: Option<String>,
    pub transcript_entries: usize,
}

/// Read-only view of the session for callers (UI, HTTP API, tests)
#[derive(Clone)]
pub struct SessionMonitor {
    state: watch::Receiver<ConnectionState>,
    volume: Arc<VolumeLevel>,
    transcript: Arc<RwLock<TranscriptAssembler>>,
    info: Arc<RwLock<SessionInfo>>,
}

/// Write side of [`SessionMonitor`], owned by the controller
pub(crate) struct Reporter {
    state: watch::Sender<ConnectionState>,
    pub volume: Arc<VolumeLevel>,
    pub transcript: Arc<RwLock<TranscriptAssembler>>,
    pub info: Arc<RwLock<SessionInfo>>,
}

pub(crate) fn channel() -> (Reporter, SessionMonitor) {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let volume = Arc::new(VolumeLevel::new());
    let transcript = Arc::new(RwLock::new(TranscriptAssembler::new()));
    let info = Arc::new(RwLock::new(SessionInfo::default()));

    let reporter = Reporter {
        state: state_tx,
        volume: Arc::clone(&volume),
        transcript: Arc::clone(&transcript),
        info: Arc::clone(&info),
    };
    let monitor = SessionMonitor {
        state: state_rx,
        volume,
        transcript,
        info,
    };

    (reporter, monitor)
}

impl Reporter {
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl SessionMonitor {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState) -> anyhow::Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == target)
            .await
            .map_err(|_| anyhow::anyhow!("session controller stopped"))?;
        Ok(())
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().await.entries().to_vec()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.info.read().await.last_error.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.state();
        let info = self.info.read().await.clone();
        let transcript_entries = self.transcript.read().await.len();

        let duration_secs = match (state, info.connected_at) {
            (ConnectionState::Connected, Some(at)) => {
                let elapsed = Utc::now().signed_duration_since(at);
                elapsed.to_std().unwrap_or(Duration::ZERO).as_secs_f64()
            }
            _ => 0.0,
        };

        SessionStatus {
            state,
            session_id: info.session_id,
            voice: info.voice,
            started_at: info.started_at,
            duration_secs,
            volume: self.volume(),
            last_error: info.last_error,
            transcript_entries,
        }
    }
}
