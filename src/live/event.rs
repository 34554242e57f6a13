use super::messages::{FunctionCall, ServerMessage};
use crate::session::transcript::TranscriptSource;

/// Session lifecycle signals reported by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    /// The remote service accepted the setup
    Opened,
    /// The remote side closed the stream
    Closed { reason: Option<String> },
    /// Transport-level failure
    Error(String),
}

/// Everything the remote service can tell the controller, as one tagged union.
///
/// The controller handles these in a single `match`, so adding a variant is a
/// compile error until every consumer deals with it.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Base64 PCM16 speech from the model
    AudioChunk(String),
    TranscriptDelta {
        source: TranscriptSource,
        text: String,
    },
    /// Batch of function calls that must be acknowledged together
    ToolCall(Vec<FunctionCall>),
    TurnComplete,
    /// The user started speaking over the model
    Interrupted,
    /// Server announced an upcoming disconnect
    GoAway { time_left: Option<String> },
    Lifecycle(Lifecycle),
}

impl InboundEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::AudioChunk(_) => "audio",
            InboundEvent::TranscriptDelta { .. } => "transcript",
            InboundEvent::ToolCall(_) => "tool_call",
            InboundEvent::TurnComplete => "turn_complete",
            InboundEvent::Interrupted => "interrupted",
            InboundEvent::GoAway { .. } => "go_away",
            InboundEvent::Lifecycle(_) => "lifecycle",
        }
    }
}

/// Split one server message into events, in the order they must be applied:
/// open, tool calls, transcripts, turn completion, audio, interruption.
pub fn events_from_message(msg: ServerMessage) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(InboundEvent::Lifecycle(Lifecycle::Opened));
    }

    if let Some(tool_call) = msg.tool_call {
        if !tool_call.function_calls.is_empty() {
            events.push(InboundEvent::ToolCall(tool_call.function_calls));
        }
    }

    if let Some(content) = msg.server_content {
        if let Some(input) = content.input_transcription {
            if !input.text.is_empty() {
                events.push(InboundEvent::TranscriptDelta {
                    source: TranscriptSource::User,
                    text: input.text,
                });
            }
        }
        if let Some(output) = content.output_transcription {
            if !output.text.is_empty() {
                events.push(InboundEvent::TranscriptDelta {
                    source: TranscriptSource::Model,
                    text: output.text,
                });
            }
        }

        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    if blob.mime_type.starts_with("audio/") && !blob.data.is_empty() {
                        events.push(InboundEvent::AudioChunk(blob.data));
                    }
                }
            }
        }

        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
    }

    if let Some(go_away) = msg.go_away {
        events.push(InboundEvent::GoAway {
            time_left: go_away.time_left,
        });
    }

    events
}
