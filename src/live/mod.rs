//! Remote Live API: wire messages, the typed inbound event union, and the
//! transport seam the session controller talks through.

pub mod client;
pub mod event;
pub mod messages;
pub mod transport;

pub use client::WebSocketTransport;
pub use event::{events_from_message, InboundEvent, Lifecycle};
pub use messages::{Blob, FunctionCall, FunctionResponse, ServerMessage};
pub use transport::{LiveConnection, LiveSink, LiveTransport, OutboundMessage, SessionSetup};
