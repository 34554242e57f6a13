use async_trait::async_trait;
use tokio::sync::mpsc;

use super::event::InboundEvent;
use super::messages::{Blob, FunctionDeclaration, FunctionResponse};
use crate::error::SessionError;
use crate::session::config::Voice;

/// Everything the remote service needs to start a conversation
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub voice: Voice,
    pub instruction: String,
    pub tools: Vec<FunctionDeclaration>,
}

/// Messages the controller sends after setup
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// One captured audio frame
    Audio(Blob),
    /// Acknowledgements for one tool-call batch
    ToolResponse(Vec<FunctionResponse>),
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Audio(_) => "audio",
            OutboundMessage::ToolResponse(_) => "tool_response",
        }
    }
}

/// An opened duplex stream: a send half plus the inbound event feed.
///
/// `events` yields `Lifecycle::Opened` once the remote accepted the setup.
pub struct LiveConnection {
    pub sink: Box<dyn LiveSink>,
    pub events: mpsc::Receiver<InboundEvent>,
}

/// Connects to the remote conversational-speech service
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Cheap checks run before any device is acquired (credentials, config)
    fn preflight(&self) -> Result<(), SessionError> {
        Ok(())
    }

    /// Open a new session. Never reuses a previous connection.
    async fn open(&self, setup: SessionSetup) -> Result<LiveConnection, SessionError>;
}

/// Send half of an open session
#[async_trait]
pub trait LiveSink: Send + Sync {
    async fn send(&mut self, msg: OutboundMessage) -> Result<(), SessionError>;

    /// Close the session. Safe to call more than once.
    async fn close(&mut self) -> Result<(), SessionError>;
}
