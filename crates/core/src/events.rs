use crate::audio_io::PlaybackHandle;
use crate::generic_types::ServerEvent;
use crate::mode::Mode;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Requests from the presentation side.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Connect in the given mode, or the current one.
    Connect(Option<Mode>),
    Disconnect,
}

/// Inputs produced by a live session, tagged with the generation of the
/// session that produced them so late arrivals can be told apart.
#[derive(Debug)]
pub enum SessionEvent {
    Server {
        generation: u64,
        event: ServerEvent,
    },
    CaptureBlock {
        generation: u64,
        samples: Vec<f32>,
    },
    PlaybackEnded {
        generation: u64,
        handle: PlaybackHandle,
    },
}

impl SessionEvent {
    pub fn generation(&self) -> u64 {
        match self {
            SessionEvent::Server { generation, .. }
            | SessionEvent::CaptureBlock { generation, .. }
            | SessionEvent::PlaybackEnded { generation, .. } => *generation,
        }
    }
}

/// Where transports and audio callbacks deliver their events.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for room in the queue. Returns false once the orchestrator is gone.
    pub async fn server_event(&self, event: ServerEvent) -> bool {
        self.tx
            .send(SessionEvent::Server {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }

    /// Never blocks; safe to call from an audio callback.
    pub fn capture_block(&self, samples: Vec<f32>) {
        let event = SessionEvent::CaptureBlock {
            generation: self.generation,
            samples,
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Dropping capture block, session is falling behind.")
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Never blocks; safe to call from an audio callback.
    pub fn playback_ended(&self, handle: PlaybackHandle) {
        let event = SessionEvent::PlaybackEnded {
            generation: self.generation,
            handle,
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Dropping end of playback {:?}, session is falling behind.", handle)
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
