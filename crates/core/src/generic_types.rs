use crate::mode::Voice;
use serde_json::Value;

/// Everything a provider needs to open a session with a given persona.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub voice: Voice,
    pub instructions: String,
    pub tools: Vec<FunctionDeclaration>,
}

/// A tool the model may call, with its parameters as a JSON schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    pub args: Value,
}

/// The reply to a [`FunctionCall`]; `id` and `name` echo the call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

/// A chunk of model speech as received, still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub mime_type: String,
    pub data: String,
}

/// Generic events that any realtime provider can emit back to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Audio(AudioChunk),
    Interrupted,
    TurnComplete,
    ToolCall(Vec<FunctionCall>),
    /// The remote side closed the session, with its reason if it gave one.
    Closed(Option<String>),
    Error(String),
}
