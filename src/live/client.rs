use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::event::{events_from_message, InboundEvent, Lifecycle};
use super::messages::{
    ClientMessage, Content, GenerationConfig, PrebuiltVoiceConfig, RealtimeInput, ServerMessage,
    Setup, SpeechConfig, TextPart, Tool, ToolResponse, TranscriptionConfig, VoiceConfig,
};
use super::transport::{LiveConnection, LiveSink, LiveTransport, OutboundMessage, SessionSetup};
use crate::config::LiveConfig;
use crate::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fallback variable checked when the configured key variable is unset
const FALLBACK_KEY_ENV: &str = "API_KEY";

/// Live API over a WebSocket
pub struct WebSocketTransport {
    config: LiveConfig,
}

impl WebSocketTransport {
    pub fn new(config: LiveConfig) -> Self {
        Self { config }
    }

    fn api_key(&self) -> Result<String, SessionError> {
        [self.config.api_key_env.as_str(), FALLBACK_KEY_ENV]
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                SessionError::MissingApiKey(format!(
                    "{} or {}",
                    self.config.api_key_env, FALLBACK_KEY_ENV
                ))
            })
    }

    /// Build the setup message for `setup`
    pub fn setup_message(&self, setup: &SessionSetup) -> ClientMessage {
        ClientMessage::Setup(build_setup(&self.config.model, setup))
    }
}

/// Setup payload: audio responses, chosen voice, both transcriptions, tools
pub fn build_setup(model: &str, setup: &SessionSetup) -> Setup {
    let model = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    };

    Setup {
        model,
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: setup.voice.as_str().to_string(),
                    },
                },
            },
        },
        system_instruction: Content {
            parts: vec![TextPart {
                text: setup.instruction.clone(),
            }],
        },
        tools: vec![Tool {
            function_declarations: setup.tools.clone(),
        }],
        input_audio_transcription: TranscriptionConfig::default(),
        output_audio_transcription: TranscriptionConfig::default(),
    }
}

#[async_trait]
impl LiveTransport for WebSocketTransport {
    fn preflight(&self) -> Result<(), SessionError> {
        self.api_key().map(|_| ())
    }

    async fn open(&self, setup: SessionSetup) -> Result<LiveConnection, SessionError> {
        let key = self.api_key()?;
        let url = format!("{}?key={}", self.config.endpoint, key);

        info!(
            "Connecting to Live API at {} (model={}, voice={})",
            self.config.endpoint,
            self.config.model,
            setup.voice.as_str()
        );

        let (ws, _response) = connect_async(url.as_str()).await?;
        let (mut write, read) = ws.split();

        let payload = serde_json::to_string(&self.setup_message(&setup))
            .map_err(|e| SessionError::Transport(format!("failed to encode setup: {}", e)))?;
        write.send(Message::Text(payload)).await?;

        info!("Setup sent, waiting for the service to accept it");

        let (events_tx, events_rx) = mpsc::channel(256);
        let reader = tokio::spawn(read_loop(read, events_tx));

        Ok(LiveConnection {
            sink: Box::new(WebSocketSink {
                write,
                reader: Some(reader),
                closed: false,
            }),
            events: events_rx,
        })
    }
}

async fn read_loop(mut read: futures::stream::SplitStream<WsStream>, tx: mpsc::Sender<InboundEvent>) {
    debug!("Live API reader started");

    let end = loop {
        let payload = match read.next().await {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(frame))) => {
                break Lifecycle::Closed {
                    reason: frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()),
                };
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!("Live API stream error: {}", e);
                break Lifecycle::Error(e.to_string());
            }
            None => break Lifecycle::Closed { reason: None },
        };

        match serde_json::from_slice::<ServerMessage>(&payload) {
            Ok(msg) => {
                for event in events_from_message(msg) {
                    if tx.send(event).await.is_err() {
                        debug!("Event receiver dropped, stopping reader");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Failed to parse Live API message: {}", e);
            }
        }
    };

    let _ = tx.send(InboundEvent::Lifecycle(end)).await;
    debug!("Live API reader stopped");
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

#[async_trait]
impl LiveSink for WebSocketSink {
    async fn send(&mut self, msg: OutboundMessage) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Transport("session is closed".to_string()));
        }

        let wire = match msg {
            OutboundMessage::Audio(blob) => {
                ClientMessage::RealtimeInput(RealtimeInput { audio: blob })
            }
            OutboundMessage::ToolResponse(function_responses) => {
                ClientMessage::ToolResponse(ToolResponse { function_responses })
            }
        };

        let payload = serde_json::to_string(&wire)
            .map_err(|e| SessionError::Transport(format!("failed to encode message: {}", e)))?;
        self.write.send(Message::Text(payload)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        info!("Closing Live API session");
        self.write
            .close()
            .await
            .map_err(|e| SessionError::Close(e.to_string()))
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
