use super::state::{ActionRecord, AppState, PortalSelection};
use crate::error::SessionError;
use crate::session::{ConnectionState, Language, SessionConfig, SessionStatus, Voice};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    /// Voice to use (default: current portal selection)
    pub voice: Option<Voice>,

    /// Portal language (default: current portal selection)
    pub language: Option<Language>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceRequest {
    pub voice: Voice,
}

#[derive(Debug, Deserialize)]
pub struct LanguageRequest {
    pub language: Language,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: SessionStatus,
    pub selection: PortalSelection,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn controller_error(e: SessionError) -> Response {
    error!("Voice session request failed: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

async fn status_response(state: &AppState) -> StatusResponse {
    StatusResponse {
        status: state.session.monitor().status().await,
        selection: *state.selection.read().await,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/connect
/// Start a voice session, replacing any active one
pub async fn connect(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> Response {
    let selection = {
        let mut selection = state.selection.write().await;
        if let Some(voice) = req.voice {
            selection.voice = voice;
        }
        if let Some(language) = req.language {
            selection.language = language;
        }
        *selection
    };

    info!(
        "Connect requested (voice={}, language={})",
        selection.voice, selection.language
    );

    let config = SessionConfig::for_language(selection.voice, selection.language);
    if let Err(e) = state.session.connect(config).await {
        return controller_error(e);
    }

    let response = status_response(&state).await;
    if response.status.state == ConnectionState::Disconnected {
        if let Some(message) = response.status.last_error.clone() {
            return (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse { error: message }),
            )
                .into_response();
        }
    }

    (StatusCode::OK, Json(response)).into_response()
}

/// POST /session/disconnect
pub async fn disconnect(State(state): State<AppState>) -> Response {
    info!("Disconnect requested");

    match state.session.disconnect().await {
        Ok(()) => (StatusCode::OK, Json(status_response(&state).await)).into_response(),
        Err(e) => controller_error(e),
    }
}

/// PUT /session/voice
/// Select a voice; an active session reconnects right away
pub async fn set_voice(
    State(state): State<AppState>,
    Json(req): Json<VoiceRequest>,
) -> Response {
    state.selection.write().await.voice = req.voice;

    match state.session.set_voice(req.voice).await {
        Ok(()) => (StatusCode::OK, Json(status_response(&state).await)).into_response(),
        Err(e) => controller_error(e),
    }
}

/// PUT /session/language
/// Switch the portal language; an active session reconnects after the debounce delay
pub async fn set_language(
    State(state): State<AppState>,
    Json(req): Json<LanguageRequest>,
) -> Response {
    state.selection.write().await.language = req.language;

    match state
        .session
        .set_instruction(req.language.system_instruction())
        .await
    {
        Ok(()) => (StatusCode::OK, Json(status_response(&state).await)).into_response(),
        Err(e) => controller_error(e),
    }
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(status_response(&state).await))
}

/// GET /session/transcript
/// Transcript so far, partial entries included
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript = state.session.monitor().transcript().await;
    (StatusCode::OK, Json(transcript))
}

/// GET /actions
pub async fn get_actions(State(state): State<AppState>) -> impl IntoResponse {
    let actions: Vec<ActionRecord> = state.actions.recent();
    (StatusCode::OK, Json(actions))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
