//! HTTP API for the kiosk portal front end
//!
//! This module provides a REST API around the voice session:
//! - POST /session/connect - Start a voice session
//! - POST /session/disconnect - End it
//! - PUT /session/voice - Change voice (immediate reconnect)
//! - PUT /session/language - Change portal language (debounced reconnect)
//! - GET /session/status - Connection state, volume, last error
//! - GET /session/transcript - Transcript so far
//! - GET /actions - Actions the assistant triggered
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ConnectRequest, ErrorResponse, StatusResponse};
pub use routes::create_router;
pub use state::{ActionLog, ActionRecord, AppState, PortalSelection};
