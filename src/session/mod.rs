//! Realtime voice session
//!
//! This module provides the `VoiceSession` controller that manages:
//! - Session lifecycle (connect, disconnect, reconnect on config change)
//! - Transcript assembly from streamed deltas
//! - Tool-call dispatch into portal actions
//! - Observable state for the presentation layer

pub mod config;
mod controller;
pub mod state;
pub mod tools;
pub mod transcript;

pub use config::{Language, SessionConfig, Voice};
pub use controller::{ControllerOptions, VoiceSession};
pub use state::{ConnectionState, SessionMonitor, SessionStatus};
pub use tools::{action_tool_declaration, ActionGroup, ActionHandler, ActionId, ToolDispatcher};
pub use transcript::{TranscriptAssembler, TranscriptEntry, TranscriptSource};
