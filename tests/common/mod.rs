// Test doubles for the voice session seams
//
// FakeTransport stands in for the Live API, FakeDevices for microphone and
// speaker. Both count live handles so tests can check that no session ever
// leaks a device or overlaps with the previous one.

#![allow(dead_code)]

use async_trait::async_trait;
use kiosk_voice::audio::{
    AudioDevices, AudioFrame, BufferId, CaptureBackend, OutputDevice, PlaybackBuffer,
};
use kiosk_voice::live::{
    FunctionCall, InboundEvent, Lifecycle, LiveConnection, LiveSink, LiveTransport,
    OutboundMessage, SessionSetup,
};
use kiosk_voice::session::{ActionHandler, ActionId, ControllerOptions, VoiceSession};
use kiosk_voice::SessionError;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

// ============================================================================
// Live transport
// ============================================================================

/// Handle to one fake remote session
#[derive(Clone)]
pub struct RemoteHandle {
    pub events: mpsc::Sender<InboundEvent>,
    pub sent: Arc<Mutex<Vec<OutboundMessage>>>,
    pub closed: Arc<AtomicBool>,
}

impl RemoteHandle {
    pub async fn emit(&self, event: InboundEvent) {
        self.events
            .send(event)
            .await
            .expect("controller dropped the session");
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn tool_responses(&self) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|m| matches!(m, OutboundMessage::ToolResponse(_)))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    pub setups: Arc<Mutex<Vec<SessionSetup>>>,
    pub sessions: Arc<Mutex<Vec<RemoteHandle>>>,
    /// Do not announce `Opened` automatically
    pub manual_open: Arc<AtomicBool>,
    pub missing_key: Arc<AtomicBool>,
    pub refuse: Arc<AtomicBool>,
    pub preflights: Arc<AtomicUsize>,
    /// Make every send hang like a write stuck on network backpressure
    pub stall_sends: Arc<AtomicBool>,
    /// Sends that hit the stall
    pub stalled: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.setups.lock().unwrap().len()
    }

    pub fn last_setup(&self) -> SessionSetup {
        self.setups
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session opened")
    }

    pub fn remote(&self, index: usize) -> RemoteHandle {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn last_remote(&self) -> RemoteHandle {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session opened")
    }
}

#[async_trait]
impl LiveTransport for FakeTransport {
    fn preflight(&self) -> Result<(), SessionError> {
        self.preflights.fetch_add(1, Ordering::SeqCst);
        if self.missing_key.load(Ordering::SeqCst) {
            return Err(SessionError::MissingApiKey("GEMINI_API_KEY".to_string()));
        }
        Ok(())
    }

    async fn open(&self, setup: SessionSetup) -> Result<LiveConnection, SessionError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::Transport("connection refused".to_string()));
        }

        self.setups.lock().unwrap().push(setup);

        let (tx, rx) = mpsc::channel(64);
        if !self.manual_open.load(Ordering::SeqCst) {
            tx.send(InboundEvent::Lifecycle(Lifecycle::Opened))
                .await
                .expect("receiver alive");
        }

        let handle = RemoteHandle {
            events: tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.sessions.lock().unwrap().push(handle.clone());

        Ok(LiveConnection {
            sink: Box::new(FakeSink {
                remote: handle,
                stall: Arc::clone(&self.stall_sends),
                stalled: Arc::clone(&self.stalled),
            }),
            events: rx,
        })
    }
}

struct FakeSink {
    remote: RemoteHandle,
    stall: Arc<AtomicBool>,
    stalled: Arc<AtomicUsize>,
}

#[async_trait]
impl LiveSink for FakeSink {
    async fn send(&mut self, msg: OutboundMessage) -> Result<(), SessionError> {
        if self.stall.load(Ordering::SeqCst) {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        if self.remote.is_closed() {
            return Err(SessionError::Transport("session is closed".to_string()));
        }
        self.remote.sent.lock().unwrap().push(msg);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.remote.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Audio devices
// ============================================================================

/// Live/peak counters for one device kind
#[derive(Default)]
pub struct Gauge {
    live: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
}

impl Gauge {
    fn acquire(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct FakeDevices {
    pub microphones: Arc<Gauge>,
    pub outputs: Arc<Gauge>,
    pub deny_microphone: Arc<AtomicBool>,
    pub no_output: Arc<AtomicBool>,
    /// Frame feed of the most recently started microphone
    pub frames: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn speak(&self, samples: Vec<f32>) {
        let tx = self
            .frames
            .lock()
            .unwrap()
            .clone()
            .expect("microphone not capturing");
        tx.send(AudioFrame::new(samples, 16000))
            .await
            .expect("capture pipeline alive");
    }
}

impl AudioDevices for FakeDevices {
    fn open_microphone(&self) -> Result<Box<dyn CaptureBackend>, SessionError> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(SessionError::Permission("NotAllowedError".to_string()));
        }
        self.microphones.acquire();
        Ok(Box::new(FakeMicrophone {
            gauge: Arc::clone(&self.microphones),
            feed: Arc::clone(&self.frames),
            held: true,
            capturing: false,
        }))
    }

    fn open_output(&self) -> Result<Box<dyn OutputDevice>, SessionError> {
        if self.no_output.load(Ordering::SeqCst) {
            return Err(SessionError::DeviceUnavailable("no speaker".to_string()));
        }
        self.outputs.acquire();
        Ok(Box::new(FakeOutput {
            gauge: Arc::clone(&self.outputs),
            epoch: Instant::now(),
            open: true,
        }))
    }
}

struct FakeMicrophone {
    gauge: Arc<Gauge>,
    feed: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    held: bool,
    capturing: bool,
}

#[async_trait]
impl CaptureBackend for FakeMicrophone {
    async fn start(&mut self) -> anyhow::Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(16);
        *self.feed.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.capturing = false;
        *self.feed.lock().unwrap() = None;
        if self.held {
            self.held = false;
            self.gauge.release();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

struct FakeOutput {
    gauge: Arc<Gauge>,
    epoch: Instant,
    open: bool,
}

impl OutputDevice for FakeOutput {
    fn current_time(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn start_buffer(&mut self, _id: BufferId, _at: Duration, _buffer: &PlaybackBuffer) {}

    fn stop_buffer(&mut self, _id: BufferId) {}

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.gauge.release();
        }
    }

    fn name(&self) -> &str {
        "fake output"
    }
}

/// Output device whose clock only moves when the test says so
#[derive(Clone, Default)]
pub struct ManualClock {
    pub now: Arc<Mutex<Duration>>,
    pub started: Arc<Mutex<Vec<(BufferId, Duration)>>>,
    pub stopped: Arc<Mutex<Vec<BufferId>>>,
    pub closed: Arc<AtomicUsize>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        *self.now.lock().unwrap() = now;
    }

    pub fn device(&self) -> Box<dyn OutputDevice> {
        Box::new(self.clone())
    }
}

impl OutputDevice for ManualClock {
    fn current_time(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn start_buffer(&mut self, id: BufferId, at: Duration, _buffer: &PlaybackBuffer) {
        self.started.lock().unwrap().push((id, at));
    }

    fn stop_buffer(&mut self, id: BufferId) {
        self.stopped.lock().unwrap().push(id);
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "manual clock"
    }
}

// ============================================================================
// Actions and helpers
// ============================================================================

#[derive(Clone, Default)]
pub struct RecordedActions {
    pub actions: Arc<Mutex<Vec<ActionId>>>,
}

impl RecordedActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn taken(&self) -> Vec<ActionId> {
        self.actions.lock().unwrap().clone()
    }
}

impl ActionHandler for RecordedActions {
    fn on_action(&self, action: ActionId) -> anyhow::Result<()> {
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}

pub struct Harness {
    pub session: VoiceSession,
    pub transport: FakeTransport,
    pub devices: FakeDevices,
    pub actions: RecordedActions,
}

pub fn harness() -> Harness {
    harness_with(FakeTransport::new(), FakeDevices::new())
}

pub fn harness_with(transport: FakeTransport, devices: FakeDevices) -> Harness {
    harness_with_options(transport, devices, ControllerOptions::default())
}

pub fn harness_with_options(
    transport: FakeTransport,
    devices: FakeDevices,
    options: ControllerOptions,
) -> Harness {
    let actions = RecordedActions::new();
    let session = VoiceSession::spawn(
        Arc::new(transport.clone()),
        Arc::new(devices.clone()),
        Arc::new(actions.clone()),
        options,
    );

    Harness {
        session,
        transport,
        devices,
        actions,
    }
}

pub fn trigger(id: &str, action_id: &str) -> FunctionCall {
    FunctionCall {
        id: id.to_string(),
        name: "trigger_action".to_string(),
        args: json!({ "action_id": action_id }),
    }
}

/// Let the controller task drain what is already queued
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Poll `check` until it holds, failing after about a second
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub async fn wait_for(session: &VoiceSession, state: kiosk_voice::ConnectionState) {
    tokio::time::timeout(
        Duration::from_secs(5),
        session.monitor().wait_for_state(state),
    )
    .await
    .unwrap_or_else(|_| panic!("session never reached {:?}", state))
    .expect("controller stopped");
}
