use crate::error::TransportError;
use crate::events::EventSink;
use crate::generic_types::{FunctionResponse, SessionSetup};
use async_trait::async_trait;
use recall_native_utils::audio::MediaBlob;
use secrecy::SecretString;

/// An open realtime session with a provider.
///
/// Inbound traffic does not come back through this trait: the connector is
/// handed an [`EventSink`] and pushes [`crate::generic_types::ServerEvent`]s into it.
#[async_trait]
pub trait LiveTransport: Send {
    /// Streams one encoded microphone block.
    async fn send_audio(&mut self, chunk: MediaBlob) -> Result<(), TransportError>;

    /// Answers a tool call received from the model.
    async fn send_tool_response(&mut self, response: FunctionResponse)
    -> Result<(), TransportError>;

    /// Closes gracefully and resolves once the connection is fully released.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens [`LiveTransport`]s. One connector lives for the whole process.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Opens a session configured with `setup`. Resolves only once the
    /// provider has acknowledged the setup.
    async fn open(
        &self,
        credential: &SecretString,
        setup: SessionSetup,
        sink: EventSink,
    ) -> Result<Box<dyn LiveTransport>, TransportError>;
}
