use crate::tools::SWITCH_MODE_TOOL;
use crate::topic::TopicContent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The pedagogical modes the tutor can run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Intro,
    Learn,
    Quiz,
    TeachBack,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Intro, Mode::Learn, Mode::Quiz, Mode::TeachBack];

    /// The name used on the wire and in tool arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Intro => "intro",
            Mode::Learn => "learn",
            Mode::Quiz => "quiz",
            Mode::TeachBack => "teach_back",
        }
    }

    /// Whether the model may ask to switch into this mode.
    pub fn is_switch_target(&self) -> bool {
        !matches!(self, Mode::Intro)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode: {0:?}")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intro" => Ok(Mode::Intro),
            "learn" => Ok(Mode::Learn),
            "quiz" => Ok(Mode::Quiz),
            "teach_back" => Ok(Mode::TeachBack),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

/// Prebuilt voices offered by the realtime endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Zephyr,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Zephyr => "Zephyr",
        }
    }
}

/// Everything that makes up a persona.
#[derive(Clone, Copy)]
pub struct ModeProfile {
    pub voice: Voice,
    pub label: &'static str,
    pub instruction: fn(&TopicContent) -> String,
}

impl fmt::Debug for ModeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeProfile")
            .field("voice", &self.voice)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

pub fn profile_for(mode: Mode) -> ModeProfile {
    match mode {
        Mode::Intro => ModeProfile {
            voice: Voice::Zephyr,
            label: "Greeter",
            instruction: intro_instruction,
        },
        Mode::Learn => ModeProfile {
            voice: Voice::Zephyr,
            label: "Matthew (Learn)",
            instruction: learn_instruction,
        },
        Mode::Quiz => ModeProfile {
            voice: Voice::Kore,
            label: "Alicia (Quiz)",
            instruction: quiz_instruction,
        },
        Mode::TeachBack => ModeProfile {
            voice: Voice::Fenrir,
            label: "Ken (Teach Back)",
            instruction: teach_back_instruction,
        },
    }
}

pub fn build_instruction(mode: Mode, topic: &TopicContent) -> String {
    (profile_for(mode).instruction)(topic)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn intro_instruction(content: &TopicContent) -> String {
    format!(
        r#"You are a helpful "Active Recall Coach".
Your goal is to greet the user and ask them which learning mode they want to start with:
1. Learn Mode (where you explain concepts).
2. Quiz Mode (where you test their knowledge).
3. Teach-Back Mode (where they explain to you).

The topic today is: {title}.

If the user selects a mode, you MUST use the "{tool}" tool to change the mode.
Do not start teaching yet. Just route the user."#,
        title = content.title,
        tool = SWITCH_MODE_TOOL,
    )
}

fn learn_instruction(content: &TopicContent) -> String {
    format!(
        r#"You are in LEARN MODE. You are "Matthew".
Your goal is to explain the topic: {title}.
Here is the content: {content}.

Explain the concepts clearly and engagingly. Use analogies.
Pause frequently to ensure the user understands.
If the user wants to switch modes, use the "{tool}" tool."#,
        title = content.title,
        content = to_json(content),
        tool = SWITCH_MODE_TOOL,
    )
}

fn quiz_instruction(content: &TopicContent) -> String {
    format!(
        r#"You are in QUIZ MODE. You are "Alicia".
Your goal is to quiz the user on: {title}.
Here are some questions: {questions}.

Ask ONE question at a time. Wait for the user's answer.
Give feedback (Correct/Incorrect) and explain briefly if they are wrong.
Then ask the next question.
If the user wants to switch modes, use the "{tool}" tool."#,
        title = content.title,
        questions = to_json(&content.quiz_questions),
        tool = SWITCH_MODE_TOOL,
    )
}

fn teach_back_instruction(content: &TopicContent) -> String {
    format!(
        r#"You are in TEACH-BACK MODE. You are "Ken".
Your goal is to ask the user to explain concepts back to you about: {title}.
Here is the content: {concepts}.

Pick a concept and ask the user to explain it to you as if you were a beginner.
Give qualitative feedback on their explanation. Did they miss key details? Was it clear?
If the user wants to switch modes, use the "{tool}" tool."#,
        title = content.title,
        concepts = to_json(&content.key_concepts),
        tool = SWITCH_MODE_TOOL,
    )
}
