// Session lifecycle manager
//
// One tokio task owns every resource of the current voice session: the remote
// sink and its event feed, the microphone and capture pipeline, the playback
// scheduler with its output device, and the reconnect timer. Commands from the
// UI, inbound events and captured frames all arrive on that task, so they are
// applied one at a time on a single timeline. A new session is only opened
// after the previous one has been torn down completely.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{SessionConfig, Voice};
use super::state::{self, ConnectionState, Reporter, SessionMonitor};
use super::tools::{action_tool_declaration, ActionHandler, ToolDispatcher};
use crate::audio::capture::{self, CaptureHandle};
use crate::audio::{AudioDevices, CaptureBackend, PlaybackScheduler};
use crate::error::SessionError;
use crate::live::{
    Blob, InboundEvent, Lifecycle, LiveSink, LiveTransport, OutboundMessage, SessionSetup,
};

/// Upper bound for a graceful close before cleanup continues without it
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for one outbound write; a stalled network must not stall commands
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Tuning knobs for [`VoiceSession`]
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Delay before an instruction change triggers a reconnect
    pub reconnect_debounce: Duration,
    /// Sample rate of inbound speech audio
    pub output_sample_rate: u32,
    /// Capacity of the captured-frame queue between capture and send
    pub frame_queue: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            reconnect_debounce: Duration::from_millis(500),
            output_sample_rate: 24000,
            frame_queue: 64,
        }
    }
}

enum Command {
    Connect {
        config: SessionConfig,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SetVoice {
        voice: Voice,
        reply: oneshot::Sender<()>,
    },
    SetInstruction {
        instruction: String,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the realtime voice session controller.
///
/// Cheap to clone. Every method returns once the controller has applied the
/// request; failures of the session itself are reported through
/// [`SessionMonitor`] (state + last error), not as `Err`.
#[derive(Clone)]
pub struct VoiceSession {
    commands: mpsc::Sender<Command>,
    monitor: SessionMonitor,
}

impl VoiceSession {
    /// Spawn the controller task
    pub fn spawn(
        transport: Arc<dyn LiveTransport>,
        devices: Arc<dyn AudioDevices>,
        actions: Arc<dyn ActionHandler>,
        options: ControllerOptions,
    ) -> Self {
        let (reporter, monitor) = state::channel();
        let (commands_tx, commands_rx) = mpsc::channel(32);

        let controller = Controller {
            transport,
            devices,
            dispatcher: ToolDispatcher::new(actions),
            options,
            reporter,
            config: SessionConfig::default(),
            session: None,
            reconnect_at: None,
        };
        tokio::spawn(controller.run(commands_rx));

        Self {
            commands: commands_tx,
            monitor,
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<()>) -> Command,
    ) -> Result<(), SessionError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SessionError::ControllerStopped)?;
        done.await.map_err(|_| SessionError::ControllerStopped)
    }

    /// Tear down any active session, then open a new one with `config`.
    ///
    /// Returns when the attempt has started (`Connecting`) or failed
    /// (`Disconnected` with a last error).
    pub async fn connect(&self, config: SessionConfig) -> Result<(), SessionError> {
        self.request(|reply| Command::Connect { config, reply })
            .await
    }

    /// Close the session and release every device. No-op when idle.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Select a voice; reconnects immediately if connected
    pub async fn set_voice(&self, voice: Voice) -> Result<(), SessionError> {
        self.request(|reply| Command::SetVoice { voice, reply })
            .await
    }

    /// Replace the system instruction; reconnects after the debounce delay if connected
    pub async fn set_instruction(&self, instruction: impl Into<String>) -> Result<(), SessionError> {
        let instruction = instruction.into();
        self.request(|reply| Command::SetInstruction { instruction, reply })
            .await
    }

    /// Disconnect and stop the controller task
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn monitor(&self) -> &SessionMonitor {
        &self.monitor
    }
}

/// Resources of one open session
struct ActiveSession {
    id: String,
    sink: Box<dyn LiveSink>,
    events: mpsc::Receiver<InboundEvent>,
    /// Acquired at connect, handed to the capture pipeline once opened
    microphone: Option<Box<dyn CaptureBackend>>,
    capture: Option<CaptureHandle>,
    frames: Option<mpsc::Receiver<Blob>>,
    playback: PlaybackScheduler,
    /// Sends requested before the remote side opened
    outbound: VecDeque<OutboundMessage>,
    opened: bool,
}

impl ActiveSession {
    async fn send(&mut self, msg: OutboundMessage) -> Result<(), SessionError> {
        if !self.opened {
            debug!("Queueing {} until the session opens", msg.kind());
            self.outbound.push_back(msg);
            return Ok(());
        }

        self.flush().await?;
        self.write(msg).await
    }

    async fn flush(&mut self) -> Result<(), SessionError> {
        while let Some(msg) = self.outbound.pop_front() {
            if let Err(e) = self.write(msg.clone()).await {
                self.outbound.push_front(msg);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn write(&mut self, msg: OutboundMessage) -> Result<(), SessionError> {
        let kind = msg.kind();
        match tokio::time::timeout(SEND_TIMEOUT, self.sink.send(msg)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Transport(format!(
                "sending {} timed out after {:?}",
                kind, SEND_TIMEOUT
            ))),
        }
    }

    /// Release everything the session owns; never fails
    async fn release(mut self) {
        self.playback.teardown();

        // Nobody drains the frame queue from here on
        drop(self.frames.take());
        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }
        if let Some(mut microphone) = self.microphone.take() {
            if let Err(e) = microphone.stop().await {
                error!("Failed to release microphone: {}", e);
            }
        }

        if !self.outbound.is_empty() {
            warn!(
                "Dropping {} unsent messages of session {}",
                self.outbound.len(),
                self.id
            );
        }
    }
}

enum SessionInput {
    Event(Option<InboundEvent>),
    Frame(Blob),
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_input(session: &mut Option<ActiveSession>) -> SessionInput {
    let Some(session) = session.as_mut() else {
        return std::future::pending().await;
    };

    tokio::select! {
        event = session.events.recv() => SessionInput::Event(event),
        Some(frame) = recv_opt(&mut session.frames) => SessionInput::Frame(frame),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

struct Controller {
    transport: Arc<dyn LiveTransport>,
    devices: Arc<dyn AudioDevices>,
    dispatcher: ToolDispatcher,
    options: ControllerOptions,
    reporter: Reporter,
    /// Most recent voice/instruction selected by the caller
    config: SessionConfig,
    session: Option<ActiveSession>,
    /// Pending debounced reconnect
    reconnect_at: Option<Instant>,
}

impl Controller {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Voice session controller started");

        loop {
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        self.disconnect().await;
                        break;
                    }
                },
                input = next_input(&mut self.session) => match input {
                    SessionInput::Event(Some(event)) => self.handle_event(event).await,
                    SessionInput::Event(None) => {
                        self.handle_event(InboundEvent::Lifecycle(Lifecycle::Closed {
                            reason: Some("event stream ended".to_string()),
                        }))
                        .await
                    }
                    SessionInput::Frame(frame) => self.forward_frame(frame).await,
                },
                _ = sleep_until_opt(reconnect_at) => {
                    self.reconnect_at = None;
                    if self.reporter.state().is_active() {
                        info!("Reconnecting with updated instruction");
                        self.connect(self.config.clone()).await;
                    }
                }
            }
        }

        info!("Voice session controller stopped");
    }

    async fn handle_command(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Connect { config, reply } => {
                self.connect(config).await;
                let _ = reply.send(());
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::SetVoice { voice, reply } => {
                self.set_voice(voice).await;
                let _ = reply.send(());
            }
            Command::SetInstruction { instruction, reply } => {
                self.set_instruction(instruction);
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn set_voice(&mut self, voice: Voice) {
        if self.config.voice == voice {
            return;
        }
        self.config.voice = voice;
        info!("Voice changed to {}", voice);

        if self.reporter.state().is_active() {
            self.connect(self.config.clone()).await;
        }
    }

    fn set_instruction(&mut self, instruction: String) {
        if self.config.instruction == instruction {
            return;
        }
        self.config.instruction = instruction;

        if self.reporter.state().is_active() {
            let at = Instant::now() + self.options.reconnect_debounce;
            debug!(
                "Instruction changed, reconnecting in {:?}",
                self.options.reconnect_debounce
            );
            self.reconnect_at = Some(at);
        }
    }

    async fn connect(&mut self, config: SessionConfig) {
        self.disconnect().await;

        self.config = config.clone();
        let session_id = format!("session-{}", Uuid::new_v4());
        info!(
            "Connecting voice session {} (voice={})",
            session_id, config.voice
        );

        self.reporter.set_state(ConnectionState::Connecting);
        {
            let mut info = self.reporter.info.write().await;
            info.session_id = Some(session_id.clone());
            info.voice = Some(config.voice);
            info.started_at = Some(chrono::Utc::now());
            info.connected_at = None;
            info.last_error = None;
        }
        // Partials of an earlier session must not absorb this session's deltas
        self.reporter.transcript.write().await.complete_turn();

        match self.open_session(session_id, &config).await {
            Ok(session) => self.session = Some(session),
            Err(e) => self.fail(e).await,
        }
    }

    async fn open_session(
        &self,
        id: String,
        config: &SessionConfig,
    ) -> Result<ActiveSession, SessionError> {
        self.transport.preflight()?;

        let mut microphone = self.devices.open_microphone()?;

        let output = match self.devices.open_output() {
            Ok(output) => output,
            Err(e) => {
                if let Err(stop_err) = microphone.stop().await {
                    error!("Failed to release microphone: {}", stop_err);
                }
                return Err(e);
            }
        };
        let mut playback = PlaybackScheduler::new(output, self.options.output_sample_rate);

        let setup = SessionSetup {
            voice: config.voice,
            instruction: config.instruction.clone(),
            tools: vec![action_tool_declaration()],
        };

        let connection = match self.transport.open(setup).await {
            Ok(connection) => connection,
            Err(e) => {
                playback.teardown();
                if let Err(stop_err) = microphone.stop().await {
                    error!("Failed to release microphone: {}", stop_err);
                }
                return Err(e);
            }
        };

        Ok(ActiveSession {
            id,
            sink: connection.sink,
            events: connection.events,
            microphone: Some(microphone),
            capture: None,
            frames: None,
            playback,
            outbound: VecDeque::new(),
            opened: false,
        })
    }

    /// Inbound dispatch: every remote event goes through this one match
    async fn handle_event(&mut self, event: InboundEvent) {
        let event = match event {
            InboundEvent::Lifecycle(lifecycle) => {
                self.handle_lifecycle(lifecycle).await;
                return;
            }
            other => other,
        };

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.opened {
            debug!(
                "Dropping {} event received before the session opened",
                event.kind()
            );
            return;
        }

        match event {
            InboundEvent::ToolCall(calls) => {
                let responses = self.dispatcher.handle(&calls);
                if responses.is_empty() {
                    return;
                }
                // The remote turn is blocked until this batch is acknowledged
                if let Err(e) = session.send(OutboundMessage::ToolResponse(responses)).await {
                    self.fail(e).await;
                }
            }
            InboundEvent::TranscriptDelta { source, text } => {
                self.reporter
                    .transcript
                    .write()
                    .await
                    .append_delta(source, &text);
            }
            InboundEvent::AudioChunk(data) => {
                if let Err(e) = session.playback.enqueue_base64(&data) {
                    warn!("Dropping audio chunk: {:#}", e);
                }
            }
            InboundEvent::TurnComplete => {
                self.reporter.transcript.write().await.complete_turn();
            }
            InboundEvent::Interrupted => {
                session.playback.interrupt();
            }
            InboundEvent::GoAway { time_left } => {
                warn!(
                    "Live API will close session {} soon (time left: {})",
                    session.id,
                    time_left.as_deref().unwrap_or("unknown")
                );
            }
            InboundEvent::Lifecycle(_) => {}
        }
    }

    async fn handle_lifecycle(&mut self, lifecycle: Lifecycle) {
        match lifecycle {
            Lifecycle::Opened => self.on_opened().await,
            Lifecycle::Closed { reason } => {
                let opened = self.session.as_ref().map(|s| s.opened).unwrap_or(false);
                if self.session.is_some() && !opened {
                    let reason = reason.unwrap_or_else(|| "closed during setup".to_string());
                    self.fail(SessionError::Transport(reason)).await;
                    return;
                }

                info!(
                    "Live API closed the session ({})",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.disconnect().await;
            }
            Lifecycle::Error(message) => {
                if self.session.is_some() {
                    self.fail(SessionError::Transport(message)).await;
                }
            }
        }
    }

    async fn on_opened(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.opened {
            return;
        }
        session.opened = true;

        let Some(microphone) = session.microphone.take() else {
            return;
        };

        let (frames_tx, frames_rx) = mpsc::channel(self.options.frame_queue);
        match capture::start(microphone, Arc::clone(&self.reporter.volume), frames_tx).await {
            Ok(handle) => {
                session.capture = Some(handle);
                session.frames = Some(frames_rx);
            }
            Err(e) => {
                self.fail(SessionError::Permission(format!("{:#}", e))).await;
                return;
            }
        }

        if let Err(e) = session.flush().await {
            self.fail(e).await;
            return;
        }

        info!("Voice session {} connected", session.id);
        self.reporter.info.write().await.connected_at = Some(chrono::Utc::now());
        self.reporter.set_state(ConnectionState::Connected);
    }

    async fn forward_frame(&mut self, frame: Blob) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.send(OutboundMessage::Audio(frame)).await {
            warn!("Dropping audio frame: {}", e);
        }
    }

    /// Record a failure, clean up, and settle in `Disconnected`
    async fn fail(&mut self, err: SessionError) {
        error!("Voice session failed: {}", err);

        self.reporter.set_state(ConnectionState::Error);
        self.reporter.info.write().await.last_error = Some(err.user_message());

        self.teardown().await;
        self.reporter.set_state(ConnectionState::Disconnected);
    }

    async fn disconnect(&mut self) {
        self.teardown().await;
        if self.reporter.state() != ConnectionState::Disconnected {
            self.reporter.set_state(ConnectionState::Disconnected);
        }
    }

    /// Close the remote session (best effort) and release every resource
    async fn teardown(&mut self) {
        self.reconnect_at = None;

        let Some(mut session) = self.session.take() else {
            return;
        };

        info!("Stopping voice session {}", session.id);

        match tokio::time::timeout(CLOSE_TIMEOUT, session.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Error closing session: {}", e),
            Err(_) => error!("Timed out closing session {}", session.id),
        }

        let id = session.id.clone();
        session.release().await;

        self.reporter.volume.reset();
        self.reporter.info.write().await.connected_at = None;

        info!("Voice session {} stopped", id);
    }
}
