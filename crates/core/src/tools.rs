use crate::generic_types::{FunctionCall, FunctionDeclaration, FunctionResponse};
use crate::mode::Mode;
use serde_json::json;

pub const SWITCH_MODE_TOOL: &str = "switchMode";
const SWITCH_MODE_RESULT: &str = "Switching mode now...";

/// Why a tool call was not acted on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolCallRejection {
    #[error("unknown tool {0:?}")]
    UnknownTool(String),
    #[error("missing string argument \"mode\"")]
    MissingMode,
    #[error("mode {0:?} is not a valid switch target")]
    InvalidMode(String),
}

/// The single tool registered with every session.
pub fn switch_mode_declaration() -> FunctionDeclaration {
    let targets: Vec<&str> = Mode::ALL
        .iter()
        .filter(|m| m.is_switch_target())
        .map(|m| m.as_str())
        .collect();
    FunctionDeclaration {
        name: SWITCH_MODE_TOOL.to_string(),
        description: "Switch the learning mode of the application.".to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "mode": {
                    "type": "STRING",
                    "enum": targets,
                    "description": "The mode to switch to.",
                }
            },
            "required": ["mode"],
        }),
    }
}

/// Extracts the target mode from a `switchMode` call.
pub fn parse_switch_mode(call: &FunctionCall) -> Result<Mode, ToolCallRejection> {
    if call.name != SWITCH_MODE_TOOL {
        return Err(ToolCallRejection::UnknownTool(call.name.clone()));
    }
    let raw = call
        .args
        .get("mode")
        .and_then(|v| v.as_str())
        .ok_or(ToolCallRejection::MissingMode)?;
    match raw.parse::<Mode>() {
        Ok(mode) if mode.is_switch_target() => Ok(mode),
        _ => Err(ToolCallRejection::InvalidMode(raw.to_string())),
    }
}

/// The acknowledgement sent before the session is torn down for a switch.
pub fn switch_acknowledgement(call: &FunctionCall) -> FunctionResponse {
    FunctionResponse {
        id: call.id.clone(),
        name: call.name.clone(),
        response: json!({ "result": SWITCH_MODE_RESULT }),
    }
}
