use crate::audio_io::{AudioBackend, CaptureConfig, CaptureStream};
use crate::error::{SessionError, TransportError};
use crate::events::{Command, EventSink, SessionEvent};
use crate::generic_types::{FunctionCall, ServerEvent, SessionSetup};
use crate::mode::{Mode, build_instruction, profile_for};
use crate::playback::PlaybackScheduler;
use crate::realtime_api::{LiveTransport, TransportConnector};
use crate::session_state::{ConnectionPhase, SessionState, SessionView};
use crate::tools;
use crate::topic::TopicContent;
use recall_native_utils::audio::{self, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use tokio::sync::{mpsc, watch};

/// Samples per microphone block sent upstream.
pub const CAPTURE_BLOCK_SIZE: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// The presentation side's grip on a running [`SessionOrchestrator`].
///
/// Dropping every handle stops the orchestrator after it has disconnected.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
    has_credential: bool,
}

impl SessionHandle {
    /// Requests a connection, in `mode` or in the current mode when `None`.
    ///
    /// Fails right away with [`SessionError::Config`] when no credential is
    /// configured; the orchestrator still records that error in the view.
    /// Device and transport failures happen later and only show up through
    /// [`SessionView::error`].
    pub async fn connect(&self, mode: Option<Mode>) -> Result<(), SessionError> {
        self.commands
            .send(Command::Connect(mode))
            .await
            .map_err(|_| SessionError::Stopped)?;
        if !self.has_credential {
            return Err(missing_credential());
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.commands
            .send(Command::Disconnect)
            .await
            .map_err(|_| SessionError::Stopped)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }
}

/// Resources that exist only while a session is open.
struct LiveSession {
    transport: Box<dyn LiveTransport>,
    capture: Box<dyn CaptureStream>,
    playback: PlaybackScheduler,
}

impl LiveSession {
    async fn release(mut self) {
        if let Err(e) = self.transport.close().await {
            tracing::warn!("Transport did not close cleanly: {}", e);
        }
        self.playback.shutdown();
        self.capture.close();
    }
}

/// Owns the session state machine and every live resource.
///
/// All inputs, whether commands from the presentation layer or events from
/// the transport and audio devices, are processed one at a time by
/// [`SessionOrchestrator::run`], so state has a single writer.
pub struct SessionOrchestrator {
    credential: SecretString,
    topic: TopicContent,
    connector: Box<dyn TransportConnector>,
    backend: Box<dyn AudioBackend>,
    state: SessionState,
    live: Option<LiveSession>,
    /// Bumped on every connect attempt; events carrying an older value are stale.
    generation: u64,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<SessionEvent>,
    events_tx: mpsc::Sender<SessionEvent>,
    view: watch::Sender<SessionView>,
}

impl SessionOrchestrator {
    pub fn new(
        credential: SecretString,
        topic: TopicContent,
        connector: Box<dyn TransportConnector>,
        backend: Box<dyn AudioBackend>,
    ) -> (Self, SessionHandle) {
        let state = SessionState::new(Mode::Intro);
        let (view_tx, view_rx) = watch::channel(state.view());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let orchestrator = Self {
            credential,
            topic,
            connector,
            backend,
            state,
            live: None,
            generation: 0,
            commands: command_rx,
            events: events_rx,
            events_tx,
            view: view_tx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            view: view_rx,
            has_credential: !orchestrator.credential.expose_secret().trim().is_empty(),
        };
        (orchestrator, handle)
    }

    /// Processes commands and events until every [`SessionHandle`] is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("All session handles dropped, shutting down.");
                        self.disconnect().await;
                        break;
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        tracing::debug!("Handling command: {:?}", command);
        match command {
            Command::Connect(mode) => self.connect(mode).await,
            Command::Disconnect => self.disconnect().await,
        }
    }

    fn publish(&self) {
        self.view.send_replace(self.state.view());
    }

    async fn connect(&mut self, mode: Option<Mode>) {
        if self.state.phase != ConnectionPhase::Idle {
            tracing::debug!("Ignoring connect request while {:?}.", self.state.phase);
            return;
        }
        let mode = mode.unwrap_or(self.state.active_mode);
        self.state.last_error = None;

        if self.credential.expose_secret().trim().is_empty() {
            let error = missing_credential();
            tracing::error!("Cannot connect: {}", error);
            self.state.last_error = Some(error.to_string());
            self.publish();
            return;
        }

        self.generation += 1;
        self.state.phase = ConnectionPhase::Connecting;
        self.publish();
        tracing::info!("Connecting in {} mode (session {}).", mode, self.generation);

        match self.establish(mode).await {
            Ok(Some(live)) => {
                self.live = Some(live);
                self.state.active_mode = mode;
                self.state.phase = ConnectionPhase::Open;
                tracing::info!("Session open as {}.", profile_for(mode).label);
            }
            Ok(None) => {
                self.state.phase = ConnectionPhase::Idle;
                tracing::info!("Connect abandoned before the session opened.");
            }
            Err(e) => {
                tracing::error!("Failed to connect: {}", e);
                self.state.last_error = Some(e.to_string());
                self.state.phase = ConnectionPhase::Idle;
            }
        }
        self.state.volume = 0.0;
        self.publish();
    }

    /// Acquires microphone, speaker and transport in that order, releasing
    /// whatever was already acquired if a later step fails. `Ok(None)` means a
    /// disconnect arrived while the transport was opening.
    async fn establish(&mut self, mode: Mode) -> Result<Option<LiveSession>, SessionError> {
        let sink = EventSink::new(self.generation, self.events_tx.clone());

        let capture_config = CaptureConfig {
            sample_rate: INPUT_SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
        };
        let mut capture = self.backend.open_capture(capture_config, sink.clone())?;

        let playback = match self.backend.open_playback(OUTPUT_SAMPLE_RATE, sink.clone()) {
            Ok(context) => PlaybackScheduler::new(context),
            Err(e) => {
                capture.close();
                return Err(e.into());
            }
        };

        let profile = profile_for(mode);
        let setup = SessionSetup {
            voice: profile.voice,
            instructions: build_instruction(mode, &self.topic),
            tools: vec![tools::switch_mode_declaration()],
        };
        let opening = self.connector.open(&self.credential, setup, sink);
        let transport = match guarded(&mut self.commands, opening).await {
            Some(Ok(transport)) => transport,
            Some(Err(e)) => {
                playback.shutdown();
                capture.close();
                return Err(e.into());
            }
            None => {
                playback.shutdown();
                capture.close();
                return Ok(None);
            }
        };

        let mut live = LiveSession {
            transport,
            capture,
            playback,
        };
        if let Err(e) = live.capture.start() {
            live.release().await;
            return Err(e.into());
        }
        Ok(Some(live))
    }

    async fn disconnect(&mut self) {
        let Some(live) = self.live.take() else {
            tracing::debug!("Disconnect requested with no live session.");
            return;
        };
        self.state.phase = ConnectionPhase::Closing;
        self.publish();

        live.release().await;

        self.state.volume = 0.0;
        self.state.phase = ConnectionPhase::Idle;
        self.publish();
        tracing::info!("Session {} closed.", self.generation);
    }

    /// Records a fatal session error and tears everything down.
    async fn fail(&mut self, error: SessionError) {
        tracing::error!("Session failed: {}", error);
        self.state.last_error = Some(error.to_string());
        self.disconnect().await;
        self.publish();
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        if self.live.is_none() || event.generation() != self.generation {
            tracing::trace!("Discarding event from session {}.", event.generation());
            return;
        }
        match event {
            SessionEvent::CaptureBlock { samples, .. } => self.on_capture_block(samples).await,
            SessionEvent::PlaybackEnded { handle, .. } => {
                if let Some(live) = self.live.as_mut() {
                    live.playback.finished(handle);
                }
            }
            SessionEvent::Server { event, .. } => self.on_server_event(event).await,
        }
    }

    async fn on_capture_block(&mut self, samples: Vec<f32>) {
        self.state.volume = audio::display_level(&samples);
        self.publish();

        let Some(live) = self.live.as_mut() else {
            return;
        };
        let sent = live
            .transport
            .send_audio(audio::encode_for_upload(&samples))
            .await;
        if let Err(e) = sent {
            self.fail(e.into()).await;
        }
    }

    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Audio(chunk) => {
                let Some(live) = self.live.as_mut() else {
                    return;
                };
                match live.playback.enqueue_wire(&chunk.data) {
                    Ok(start) => tracing::trace!("Scheduled model audio at {:.3}s.", start),
                    Err(e) => tracing::warn!("Dropping undecodable audio chunk: {}", e),
                }
            }
            ServerEvent::Interrupted => {
                tracing::debug!("Model interrupted, flushing playback.");
                if let Some(live) = self.live.as_mut() {
                    live.playback.interrupt();
                }
            }
            ServerEvent::TurnComplete => tracing::debug!("Model turn complete."),
            ServerEvent::ToolCall(calls) => self.on_tool_call(calls).await,
            ServerEvent::Closed(Some(reason)) => {
                self.fail(TransportError::Closed(reason).into()).await
            }
            ServerEvent::Closed(None) => {
                tracing::info!("Server closed the session.");
                self.disconnect().await;
            }
            ServerEvent::Error(message) => self.fail(TransportError::Io(message).into()).await,
        }
    }

    async fn on_tool_call(&mut self, calls: Vec<FunctionCall>) {
        let mut target = None;
        for call in calls {
            match tools::parse_switch_mode(&call) {
                Ok(mode) => {
                    target = Some((call, mode));
                    break;
                }
                Err(rejection) => tracing::warn!("Ignoring tool call: {}", rejection),
            }
        }
        if let Some((call, mode)) = target {
            self.switch_mode(call, mode).await;
        }
    }

    /// Acknowledges the call, then reconnects with the new persona.
    async fn switch_mode(&mut self, call: FunctionCall, mode: Mode) {
        tracing::info!("Switching mode: {} -> {}", self.state.active_mode, mode);
        if let Some(live) = self.live.as_mut() {
            let acknowledged = live
                .transport
                .send_tool_response(tools::switch_acknowledgement(&call))
                .await;
            if let Err(e) = acknowledged {
                tracing::warn!("Failed to acknowledge mode switch: {}", e);
            }
        }
        self.state.active_mode = mode;
        self.publish();

        self.disconnect().await;
        self.connect(Some(mode)).await;
    }
}

fn missing_credential() -> SessionError {
    SessionError::Config("missing credential".to_string())
}

/// Drives `fut` while watching for commands. A disconnect, or every handle
/// going away, abandons the future; further connect requests are ignored.
async fn guarded<F: Future>(commands: &mut mpsc::Receiver<Command>, fut: F) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            output = &mut fut => return Some(output),
            command = commands.recv() => match command {
                Some(Command::Connect(_)) => {
                    tracing::debug!("Already connecting, ignoring connect request.")
                }
                Some(Command::Disconnect) | None => return None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_io::{PlaybackContext, PlaybackHandle};
    use crate::error::DeviceError;
    use crate::generic_types::{AudioChunk, FunctionResponse};
    use crate::mode::Voice;
    use async_trait::async_trait;
    use recall_native_utils::audio::{MediaBlob, PcmBuffer};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Everything the fakes observed, shared with the test body.
    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
        setups: Vec<SessionSetup>,
        acks: Vec<FunctionResponse>,
        audio_sent: Vec<MediaBlob>,
        opens: usize,
        open_now: usize,
        max_open: usize,
        capture_open: usize,
        capture_started: bool,
        capture_config: Option<CaptureConfig>,
        playback_open: usize,
        scheduled: Vec<f64>,
        stopped: usize,
        clock: f64,
        deny_mic: bool,
        hang_open: bool,
        reject_open: bool,
    }

    type Shared = Arc<Mutex<Recorder>>;

    struct FakeConnector(Shared);

    #[async_trait]
    impl TransportConnector for FakeConnector {
        async fn open(
            &self,
            _credential: &SecretString,
            setup: SessionSetup,
            _sink: EventSink,
        ) -> Result<Box<dyn LiveTransport>, TransportError> {
            let (hang, reject) = {
                let recorder = self.0.lock().unwrap();
                (recorder.hang_open, recorder.reject_open)
            };
            if hang {
                std::future::pending::<()>().await;
            }
            if reject {
                return Err(TransportError::Rejected("API key not valid".to_string()));
            }
            let mut recorder = self.0.lock().unwrap();
            recorder.log.push(format!("open {}", setup.voice.as_str()));
            recorder.opens += 1;
            recorder.open_now += 1;
            recorder.max_open = recorder.max_open.max(recorder.open_now);
            recorder.setups.push(setup);
            Ok(Box::new(FakeTransport(self.0.clone())))
        }
    }

    struct FakeTransport(Shared);

    #[async_trait]
    impl LiveTransport for FakeTransport {
        async fn send_audio(&mut self, chunk: MediaBlob) -> Result<(), TransportError> {
            self.0.lock().unwrap().audio_sent.push(chunk);
            Ok(())
        }

        async fn send_tool_response(
            &mut self,
            response: FunctionResponse,
        ) -> Result<(), TransportError> {
            let mut recorder = self.0.lock().unwrap();
            recorder.log.push(format!("ack {}", response.name));
            recorder.acks.push(response);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            let mut recorder = self.0.lock().unwrap();
            recorder.log.push("close".to_string());
            recorder.open_now -= 1;
            Ok(())
        }
    }

    struct FakeBackend(Shared);

    impl AudioBackend for FakeBackend {
        fn open_capture(
            &mut self,
            config: CaptureConfig,
            _sink: EventSink,
        ) -> Result<Box<dyn CaptureStream>, DeviceError> {
            let mut recorder = self.0.lock().unwrap();
            if recorder.deny_mic {
                return Err(DeviceError::PermissionDenied(
                    "Permission denied by system".to_string(),
                ));
            }
            recorder.capture_open += 1;
            recorder.capture_config = Some(config);
            Ok(Box::new(FakeCapture(self.0.clone())))
        }

        fn open_playback(
            &mut self,
            _sample_rate: u32,
            _sink: EventSink,
        ) -> Result<Box<dyn PlaybackContext>, DeviceError> {
            self.0.lock().unwrap().playback_open += 1;
            Ok(Box::new(FakePlayback {
                recorder: self.0.clone(),
                next: 0,
            }))
        }
    }

    struct FakeCapture(Shared);

    impl CaptureStream for FakeCapture {
        fn start(&mut self) -> Result<(), DeviceError> {
            self.0.lock().unwrap().capture_started = true;
            Ok(())
        }

        fn close(&mut self) {
            self.0.lock().unwrap().capture_open -= 1;
        }
    }

    struct FakePlayback {
        recorder: Shared,
        next: u64,
    }

    impl PlaybackContext for FakePlayback {
        fn current_time(&self) -> f64 {
            self.recorder.lock().unwrap().clock
        }

        fn schedule(&mut self, _buffer: PcmBuffer, start_at: f64) -> PlaybackHandle {
            self.next += 1;
            self.recorder.lock().unwrap().scheduled.push(start_at);
            PlaybackHandle(self.next)
        }

        fn stop(&mut self, _handle: PlaybackHandle) {
            self.recorder.lock().unwrap().stopped += 1;
        }

        fn close(&mut self) {
            self.recorder.lock().unwrap().playback_open -= 1;
        }
    }

    fn orchestrator_with(credential: &str) -> (SessionOrchestrator, SessionHandle, Shared) {
        let recorder = Shared::default();
        let (orchestrator, handle) = SessionOrchestrator::new(
            SecretString::from(credential.to_string()),
            TopicContent::photosynthesis(),
            Box::new(FakeConnector(recorder.clone())),
            Box::new(FakeBackend(recorder.clone())),
        );
        (orchestrator, handle, recorder)
    }

    fn switch_call(mode: &str) -> ServerEvent {
        ServerEvent::ToolCall(vec![FunctionCall {
            id: Some("fc-1".to_string()),
            name: "switchMode".to_string(),
            args: json!({ "mode": mode }),
        }])
    }

    fn server(orchestrator: &SessionOrchestrator, event: ServerEvent) -> SessionEvent {
        SessionEvent::Server {
            generation: orchestrator.generation,
            event,
        }
    }

    /// 0.1 s of silence at the output rate, as the server would send it.
    fn model_audio() -> ServerEvent {
        ServerEvent::Audio(AudioChunk {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: audio::encode_for_upload(&vec![0.0; 2400]).data,
        })
    }

    #[tokio::test]
    async fn test_connect_in_intro_opens_with_greeter_persona() {
        // --- Arrange ---
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");

        // --- Act ---
        orchestrator.connect(None).await;

        // --- Assert ---
        let view = handle.view();
        assert!(view.is_connected());
        assert_eq!(view.mode, Mode::Intro);
        assert_eq!(view.error, None);

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.setups.len(), 1);
        assert_eq!(recorder.setups[0].voice, Voice::Zephyr);
        assert!(recorder.setups[0].instructions.contains("Photosynthesis"));
        assert_eq!(recorder.setups[0].tools[0].name, "switchMode");
        assert!(recorder.capture_started);
        assert_eq!(
            recorder.capture_config,
            Some(CaptureConfig {
                sample_rate: 16000,
                block_size: 4096
            })
        );
    }

    #[tokio::test]
    async fn test_switch_mode_acknowledges_then_reconnects() {
        // --- Arrange ---
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        // --- Act ---
        let event = server(&orchestrator, switch_call("quiz"));
        orchestrator.handle_event(event).await;

        // --- Assert ---
        let view = handle.view();
        assert!(view.is_connected());
        assert_eq!(view.mode, Mode::Quiz);

        let recorder = recorder.lock().unwrap();
        assert_eq!(
            recorder.log,
            vec!["open Zephyr", "ack switchMode", "close", "open Kore"]
        );
        assert_eq!(recorder.acks[0].id.as_deref(), Some("fc-1"));
        assert_eq!(
            recorder.acks[0].response,
            json!({"result": "Switching mode now..."})
        );
        assert!(recorder.setups[1].instructions.contains("QUIZ MODE"));
        assert_eq!(recorder.max_open, 1);
    }

    #[tokio::test]
    async fn test_invalid_switch_target_changes_nothing() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        let event = server(&orchestrator, switch_call("nonsense_mode"));
        orchestrator.handle_event(event).await;

        let view = handle.view();
        assert!(view.is_connected());
        assert_eq!(view.mode, Mode::Intro);
        let recorder = recorder.lock().unwrap();
        assert!(recorder.acks.is_empty());
        assert_eq!(recorder.log, vec!["open Zephyr"]);
    }

    #[tokio::test]
    async fn test_first_valid_switch_wins() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        let calls = vec![
            FunctionCall {
                id: None,
                name: "lookUp".to_string(),
                args: json!({}),
            },
            FunctionCall {
                id: Some("a".to_string()),
                name: "switchMode".to_string(),
                args: json!({"mode": "teach_back"}),
            },
            FunctionCall {
                id: Some("b".to_string()),
                name: "switchMode".to_string(),
                args: json!({"mode": "learn"}),
            },
        ];
        let event = server(&orchestrator, ServerEvent::ToolCall(calls));
        orchestrator.handle_event(event).await;

        assert_eq!(handle.view().mode, Mode::TeachBack);
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.acks.len(), 1);
        assert_eq!(recorder.acks[0].id.as_deref(), Some("a"));
        assert_eq!(recorder.setups[1].voice, Voice::Fenrir);
    }

    #[tokio::test]
    async fn test_denied_microphone_leaves_nothing_allocated() {
        // --- Arrange ---
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        recorder.lock().unwrap().deny_mic = true;

        // --- Act ---
        orchestrator.connect(Some(Mode::Quiz)).await;

        // --- Assert ---
        let view = handle.view();
        assert_eq!(view.phase, ConnectionPhase::Idle);
        assert_eq!(view.mode, Mode::Intro);
        assert_eq!(
            view.error.as_deref(),
            Some("microphone access denied: Permission denied by system")
        );
        assert!(orchestrator.live.is_none());
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.opens, 0);
        assert_eq!(recorder.capture_open, 0);
        assert_eq!(recorder.playback_open, 0);
    }

    #[tokio::test]
    async fn test_missing_credential_is_a_configuration_error() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("  ");

        orchestrator.connect(Some(Mode::Learn)).await;

        let view = handle.view();
        assert_eq!(view.phase, ConnectionPhase::Idle);
        assert_eq!(view.mode, Mode::Intro);
        assert_eq!(
            view.error.as_deref(),
            Some("configuration error: missing credential")
        );
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.capture_open, 0);
        assert_eq!(recorder.opens, 0);
    }

    #[tokio::test]
    async fn test_handle_rejects_connect_without_credential() {
        // --- Arrange ---
        let (orchestrator, handle, recorder) = orchestrator_with("");

        // --- Act ---
        let result = handle.connect(Some(Mode::Quiz)).await;
        let view = handle.subscribe();
        drop(handle);
        orchestrator.run().await;

        // --- Assert ---
        assert!(matches!(result, Err(SessionError::Config(_))));
        let last = view.borrow().clone();
        assert_eq!(last.mode, Mode::Intro);
        assert_eq!(
            last.error.as_deref(),
            Some("configuration error: missing credential")
        );
        assert_eq!(recorder.lock().unwrap().opens, 0);
    }

    #[tokio::test]
    async fn test_rejected_transport_releases_devices() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("bad-key");
        recorder.lock().unwrap().reject_open = true;

        orchestrator.connect(None).await;

        let view = handle.view();
        assert_eq!(view.phase, ConnectionPhase::Idle);
        assert_eq!(
            view.error.as_deref(),
            Some("connection rejected: API key not valid")
        );
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.capture_open, 0);
        assert_eq!(recorder.playback_open, 0);
    }

    #[tokio::test]
    async fn test_connect_clears_previous_error() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        recorder.lock().unwrap().reject_open = true;
        orchestrator.connect(None).await;
        assert!(handle.view().error.is_some());

        recorder.lock().unwrap().reject_open = false;
        orchestrator.connect(None).await;

        assert!(handle.view().is_connected());
        assert_eq!(handle.view().error, None);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        // --- Arrange ---
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        // --- Act ---
        orchestrator.disconnect().await;
        orchestrator.disconnect().await;

        // --- Assert ---
        let view = handle.view();
        assert_eq!(view.phase, ConnectionPhase::Idle);
        assert_eq!(view.volume, 0.0);
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.log, vec!["open Zephyr", "close"]);
        assert_eq!(recorder.capture_open, 0);
        assert_eq!(recorder.playback_open, 0);
    }

    #[tokio::test]
    async fn test_connect_while_open_is_ignored() {
        let (mut orchestrator, _handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        orchestrator.connect(Some(Mode::Quiz)).await;

        assert_eq!(orchestrator.state.active_mode, Mode::Intro);
        assert_eq!(recorder.lock().unwrap().opens, 1);
    }

    #[tokio::test]
    async fn test_rapid_switches_never_hold_two_transports() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        for mode in ["quiz", "teach_back", "learn", "quiz"] {
            let event = server(&orchestrator, switch_call(mode));
            orchestrator.handle_event(event).await;
        }

        assert_eq!(handle.view().mode, Mode::Quiz);
        assert!(handle.view().is_connected());
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.opens, 5);
        assert_eq!(recorder.open_now, 1);
        assert_eq!(recorder.max_open, 1);
        assert_eq!(recorder.capture_open, 1);
        assert_eq!(recorder.playback_open, 1);
    }

    #[tokio::test]
    async fn test_capture_block_is_streamed_and_metered() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        let block = SessionEvent::CaptureBlock {
            generation: orchestrator.generation,
            samples: vec![0.1; CAPTURE_BLOCK_SIZE],
        };
        orchestrator.handle_event(block).await;

        assert!((handle.view().volume - 0.5).abs() < 1e-4);
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.audio_sent.len(), 1);
        assert_eq!(recorder.audio_sent[0].mime_type, "audio/pcm;rate=16000");
    }

    #[tokio::test]
    async fn test_model_audio_is_chained_and_interruptible() {
        // --- Arrange ---
        let (mut orchestrator, _handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;
        recorder.lock().unwrap().clock = 1.0;

        // --- Act ---
        for _ in 0..2 {
            let event = server(&orchestrator, model_audio());
            orchestrator.handle_event(event).await;
        }
        let event = server(&orchestrator, ServerEvent::Interrupted);
        orchestrator.handle_event(event).await;
        recorder.lock().unwrap().clock = 1.05;
        let event = server(&orchestrator, model_audio());
        orchestrator.handle_event(event).await;

        // --- Assert ---
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.stopped, 2);
        assert_eq!(recorder.scheduled.len(), 3);
        assert!((recorder.scheduled[0] - 1.0).abs() < 1e-9);
        assert!((recorder.scheduled[1] - 1.1).abs() < 1e-9);
        assert!((recorder.scheduled[2] - 1.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_undecodable_audio_is_dropped() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        let bad = ServerEvent::Audio(AudioChunk {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: "AQID".to_string(),
        });
        let event = server(&orchestrator, bad);
        orchestrator.handle_event(event).await;

        assert!(handle.view().is_connected());
        assert!(recorder.lock().unwrap().scheduled.is_empty());
    }

    #[tokio::test]
    async fn test_remote_error_releases_and_surfaces() {
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        let event = server(&orchestrator, ServerEvent::Error("socket reset".to_string()));
        orchestrator.handle_event(event).await;

        let view = handle.view();
        assert_eq!(view.phase, ConnectionPhase::Idle);
        assert_eq!(view.error.as_deref(), Some("connection error: socket reset"));
        assert_eq!(recorder.lock().unwrap().open_now, 0);
    }

    #[tokio::test]
    async fn test_remote_close_with_reason_is_an_error() {
        let (mut orchestrator, handle, _recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        let event = server(&orchestrator, ServerEvent::Closed(Some("quota".to_string())));
        orchestrator.handle_event(event).await;

        assert_eq!(handle.view().phase, ConnectionPhase::Idle);
        assert_eq!(
            handle.view().error.as_deref(),
            Some("connection closed: quota")
        );
    }

    #[tokio::test]
    async fn test_remote_close_without_reason_is_quiet() {
        let (mut orchestrator, handle, _recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;

        let event = server(&orchestrator, ServerEvent::Closed(None));
        orchestrator.handle_event(event).await;

        assert_eq!(handle.view().phase, ConnectionPhase::Idle);
        assert_eq!(handle.view().error, None);
    }

    #[tokio::test]
    async fn test_stale_events_are_discarded() {
        // --- Arrange ---
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        orchestrator.connect(None).await;
        let old_generation = orchestrator.generation;
        let event = server(&orchestrator, switch_call("learn"));
        orchestrator.handle_event(event).await;

        // --- Act ---
        orchestrator
            .handle_event(SessionEvent::Server {
                generation: old_generation,
                event: ServerEvent::Error("late failure".to_string()),
            })
            .await;

        // --- Assert ---
        assert!(handle.view().is_connected());
        assert_eq!(handle.view().mode, Mode::Learn);
        assert_eq!(recorder.lock().unwrap().open_now, 1);
    }

    #[tokio::test]
    async fn test_disconnect_abandons_pending_connect() {
        // --- Arrange ---
        let (mut orchestrator, handle, recorder) = orchestrator_with("test-key");
        recorder.lock().unwrap().hang_open = true;
        handle.connect(Some(Mode::Quiz)).await.unwrap();
        handle.disconnect().await.unwrap();

        // --- Act ---
        orchestrator.connect(None).await;

        // --- Assert ---
        let view = handle.view();
        assert_eq!(view.phase, ConnectionPhase::Idle);
        assert_eq!(view.error, None);
        assert!(orchestrator.live.is_none());
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.capture_open, 0);
        assert_eq!(recorder.playback_open, 0);
    }

    #[tokio::test]
    async fn test_run_disconnects_when_handles_drop() {
        // --- Arrange ---
        let (orchestrator, handle, recorder) = orchestrator_with("test-key");
        let mut view = handle.subscribe();
        handle.connect(Some(Mode::Learn)).await.unwrap();
        drop(handle);

        // --- Act ---
        orchestrator.run().await;

        // --- Assert ---
        let last = view.borrow_and_update().clone();
        assert_eq!(last.phase, ConnectionPhase::Idle);
        assert_eq!(last.mode, Mode::Learn);
        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.log, vec!["open Zephyr", "close"]);
    }
}
