//! Terminal status line and keyboard commands.

use recall_core::mode::{Mode, UnknownMode};
use recall_core::session_state::{ConnectionPhase, SessionView};

const METER_WIDTH: usize = 20;

/// What the user typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Connect(Option<Mode>),
    Disconnect,
    Quit,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command {0:?} (try: c [mode], d, q)")]
    Unknown(String),
    #[error(transparent)]
    Mode(#[from] UnknownMode),
}

pub const HELP: &str = "Commands: c [learn|quiz|teach_back] to connect, d to disconnect, q to quit. \
Try saying \"Switch to Quiz Mode\" or \"Let's Learn\".";

/// Parses one line of input. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<UserCommand>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "c" | "connect" => match words.next() {
            Some(mode) => UserCommand::Connect(Some(mode.parse()?)),
            None => UserCommand::Connect(None),
        },
        "d" | "disconnect" => UserCommand::Disconnect,
        "q" | "quit" | "exit" => UserCommand::Quit,
        _ => return Err(CommandError::Unknown(verb.to_string())),
    };
    Ok(Some(command))
}

/// Renders the session as a single status line.
pub fn render(view: &SessionView) -> String {
    let title = match view.mode {
        Mode::Intro => "Welcome",
        _ => view.mode_label(),
    };
    let status = match view.phase {
        ConnectionPhase::Idle => "Disconnected",
        ConnectionPhase::Connecting => "Connecting...",
        ConnectionPhase::Open => "Connected",
        ConnectionPhase::Closing => "Closing...",
    };
    let level = if view.is_connected() { view.volume } else { 0.0 };
    let filled = ((level.clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize).min(METER_WIDTH);

    let mut line = format!(
        "[{}] {} |{}{}|",
        title,
        status,
        "#".repeat(filled),
        " ".repeat(METER_WIDTH - filled)
    );
    if let Some(error) = &view.error {
        line.push_str(" error: ");
        line.push_str(error);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(phase: ConnectionPhase, mode: Mode, volume: f32) -> SessionView {
        SessionView {
            phase,
            mode,
            volume,
            error: None,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("   "), Ok(None));
        assert_eq!(parse_command("c"), Ok(Some(UserCommand::Connect(None))));
        assert_eq!(
            parse_command("c quiz"),
            Ok(Some(UserCommand::Connect(Some(Mode::Quiz))))
        );
        assert_eq!(parse_command("D"), Ok(Some(UserCommand::Disconnect)));
        assert_eq!(parse_command("quit"), Ok(Some(UserCommand::Quit)));
        assert!(matches!(parse_command("c karaoke"), Err(CommandError::Mode(_))));
        assert_eq!(
            parse_command("dance"),
            Err(CommandError::Unknown("dance".to_string()))
        );
    }

    #[test]
    fn test_render_idle_intro() {
        let line = render(&view(ConnectionPhase::Idle, Mode::Intro, 0.7));
        assert_eq!(line, format!("[Welcome] Disconnected |{}|", " ".repeat(20)));
    }

    #[test]
    fn test_render_open_session_shows_level() {
        let line = render(&view(ConnectionPhase::Open, Mode::Quiz, 0.5));
        assert_eq!(
            line,
            format!("[Alicia (Quiz)] Connected |{}{}|", "#".repeat(10), " ".repeat(10))
        );
    }

    #[test]
    fn test_render_appends_error() {
        let mut v = view(ConnectionPhase::Idle, Mode::Learn, 0.0);
        v.error = Some("microphone access denied: nope".to_string());
        let line = render(&v);
        assert!(line.starts_with("[Matthew (Learn)] Disconnected"));
        assert!(line.ends_with("error: microphone access denied: nope"));
    }
}
