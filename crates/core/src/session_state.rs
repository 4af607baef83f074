use crate::mode::{Mode, profile_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Open,
    Closing,
}

/// The orchestrator's mutable state. Nothing else writes to it.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: ConnectionPhase,
    pub active_mode: Mode,
    /// Level of the last captured block, in [0, 1].
    pub volume: f32,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new(mode: Mode) -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            active_mode: mode,
            volume: 0.0,
            last_error: None,
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            mode: self.active_mode,
            volume: self.volume,
            error: self.last_error.clone(),
        }
    }
}

/// A read-only snapshot published to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub phase: ConnectionPhase,
    pub mode: Mode,
    pub volume: f32,
    pub error: Option<String>,
}

impl SessionView {
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Open
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == ConnectionPhase::Connecting
    }

    pub fn mode_label(&self) -> &'static str {
        profile_for(self.mode).label
    }
}
