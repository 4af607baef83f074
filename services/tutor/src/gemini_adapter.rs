use async_trait::async_trait;
use gemini_realtime::types::{
    Blob, FunctionDeclaration as WireDeclaration, FunctionResponse as WireResponse,
    ServerEvent as WireEvent, ServerMessage, Setup,
};
use gemini_realtime::{GeminiClient, ServerRx};
use recall_core::error::TransportError;
use recall_core::events::EventSink;
use recall_core::generic_types::{
    AudioChunk, FunctionCall, FunctionResponse, ServerEvent, SessionSetup,
};
use recall_core::realtime_api::{LiveTransport, TransportConnector};
use recall_native_utils::audio::MediaBlob;
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;

/// Opens Gemini Live sessions for the orchestrator.
pub struct GeminiConnector {
    base_url: String,
    model: String,
}

impl GeminiConnector {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl TransportConnector for GeminiConnector {
    async fn open(
        &self,
        credential: &SecretString,
        setup: SessionSetup,
        sink: EventSink,
    ) -> Result<Box<dyn LiveTransport>, TransportError> {
        let config = gemini_realtime::Config::builder()
            .with_base_url(&self.base_url)
            .with_api_key(SecretString::from(credential.expose_secret().to_string()))
            .with_model(&self.model)
            .build();

        let mut client = gemini_realtime::connect(&config, wire_setup(&self.model, setup))
            .await
            .map_err(|e| TransportError::Rejected(format!("{:#}", e)))?;
        let events = client
            .server_events()
            .map_err(|e| TransportError::Io(format!("{:#}", e)))?;
        let forwarder = tokio::spawn(forward_events(events, sink));

        Ok(Box::new(GeminiTransport {
            client: Some(client),
            forwarder,
        }))
    }
}

/// An adapter that implements the generic `LiveTransport` trait for the `gemini_realtime::GeminiClient`.
pub struct GeminiTransport {
    client: Option<GeminiClient>,
    // Translates the client's events into the orchestrator's queue.
    forwarder: JoinHandle<()>,
}

impl GeminiTransport {
    fn client(&self) -> Result<&GeminiClient, TransportError> {
        self.client
            .as_ref()
            .ok_or_else(|| TransportError::Closed("session already closed".to_string()))
    }
}

#[async_trait]
impl LiveTransport for GeminiTransport {
    async fn send_audio(&mut self, chunk: MediaBlob) -> Result<(), TransportError> {
        self.client()?
            .send_realtime_input(Blob {
                mime_type: chunk.mime_type,
                data: chunk.data,
            })
            .await
            .map_err(|e| TransportError::Io(format!("{:#}", e)))
    }

    async fn send_tool_response(
        &mut self,
        response: FunctionResponse,
    ) -> Result<(), TransportError> {
        self.client()?
            .send_tool_response(vec![WireResponse {
                id: response.id,
                name: response.name,
                response: response.response,
            }])
            .await
            .map_err(|e| TransportError::Io(format!("{:#}", e)))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let result = client
            .close()
            .await
            .map_err(|e| TransportError::Io(format!("{:#}", e)));
        // Whatever is still buffered belongs to a session nobody listens to anymore.
        self.forwarder.abort();
        result
    }
}

impl Drop for GeminiTransport {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn wire_setup(model: &str, setup: SessionSetup) -> Setup {
    let declarations = setup
        .tools
        .into_iter()
        .map(|tool| WireDeclaration {
            name: tool.name,
            description: tool.description,
            parameters: tool.parameters,
        })
        .collect();
    Setup::new(model)
        .with_voice(setup.voice.as_str())
        .with_system_instruction(&setup.instructions)
        .with_function_declarations(declarations)
}

async fn forward_events(mut events: ServerRx, sink: EventSink) {
    while let Some(event) = events.recv().await {
        for translated in translate(event) {
            if !sink.server_event(translated).await {
                tracing::debug!("Session event queue closed, stopping Gemini forwarder.");
                return;
            }
        }
    }
    tracing::debug!("Gemini event stream ended for session {}.", sink.generation());
}

/// Maps one client event onto the provider-neutral events, in the order the
/// orchestrator should see them: audio, then interruption, then turn end.
pub fn translate(event: WireEvent) -> Vec<ServerEvent> {
    match event {
        WireEvent::Message(message) => translate_message(message),
        WireEvent::Closed { reason } => vec![ServerEvent::Closed(reason)],
        WireEvent::Error(e) => vec![ServerEvent::Error(e)],
    }
}

fn translate_message(message: ServerMessage) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                match (part.inline_data, part.text) {
                    (Some(blob), _) if blob.mime_type.starts_with("audio/") => {
                        events.push(ServerEvent::Audio(AudioChunk {
                            mime_type: blob.mime_type,
                            data: blob.data,
                        }))
                    }
                    (Some(blob), _) => {
                        tracing::debug!("Ignoring inline data of type {}.", blob.mime_type)
                    }
                    (None, Some(text)) => tracing::debug!("Model text: {}", text),
                    (None, None) => {}
                }
            }
        }
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(tool_call) = message.tool_call {
        let calls = tool_call
            .function_calls
            .into_iter()
            .map(|call| FunctionCall {
                id: call.id,
                name: call.name,
                args: call.args,
            })
            .collect();
        events.push(ServerEvent::ToolCall(calls));
    }

    if let Some(cancellation) = message.tool_call_cancellation {
        tracing::debug!("Server cancelled tool calls: {:?}", cancellation.ids);
    }

    if let Some(go_away) = message.go_away {
        tracing::warn!(
            "Gemini will end the session soon (time left: {}).",
            go_away.time_left.as_deref().unwrap_or("unknown")
        );
    }

    events
}
