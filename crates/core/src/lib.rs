//! Session logic for the voice tutor: personas, tool dispatch, playback
//! scheduling and the orchestrator that owns a live session.
//!
//! Nothing in this crate talks to a socket or a sound card directly. Providers
//! plug in through [`realtime_api`] and devices through [`audio_io`].

pub mod audio_io;
pub mod error;
pub mod events;
pub mod generic_types;
pub mod mode;
pub mod orchestrator;
pub mod playback;
pub mod realtime_api;
pub mod session_state;
pub mod tools;
pub mod topic;

pub use error::SessionError;
pub use mode::Mode;
pub use orchestrator::{SessionHandle, SessionOrchestrator};
pub use session_state::{ConnectionPhase, SessionView};
