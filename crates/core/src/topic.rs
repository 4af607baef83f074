use serde::{Deserialize, Serialize};

/// The subject matter every persona teaches from. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicContent {
    pub title: String,
    pub description: String,
    pub key_concepts: Vec<KeyConcept>,
    pub quiz_questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyConcept {
    pub term: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub answer: String,
}

impl KeyConcept {
    fn new(term: &str, definition: &str) -> Self {
        Self {
            term: term.to_string(),
            definition: definition.to_string(),
        }
    }
}

impl QuizQuestion {
    fn new(question: &str, answer: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: answer.to_string(),
        }
    }
}

impl TopicContent {
    /// The built-in lesson.
    pub fn photosynthesis() -> Self {
        Self {
            title: "Photosynthesis".to_string(),
            description: "The process by which plants use sunlight, water, and carbon dioxide to create oxygen and energy in the form of sugar.".to_string(),
            key_concepts: vec![
                KeyConcept::new(
                    "Chlorophyll",
                    "A green pigment responsible for the absorption of light to provide energy for photosynthesis.",
                ),
                KeyConcept::new(
                    "Stomata",
                    "Tiny pores in plant leaves that facilitate gas exchange (CO2 in, O2 out).",
                ),
                KeyConcept::new(
                    "Light-dependent Reactions",
                    "The first stage of photosynthesis, occurring in the thylakoid membranes, requiring direct light to produce ATP.",
                ),
                KeyConcept::new(
                    "Calvin Cycle",
                    "The set of chemical reactions that take place in chloroplasts during photosynthesis, not requiring light directly.",
                ),
            ],
            quiz_questions: vec![
                QuizQuestion::new(
                    "What is the primary byproduct of photosynthesis that is released into the atmosphere?",
                    "Oxygen",
                ),
                QuizQuestion::new(
                    "Where exactly does the Calvin Cycle take place?",
                    "In the stroma of the chloroplast.",
                ),
                QuizQuestion::new(
                    "Which pigment is primarily responsible for absorbing light energy?",
                    "Chlorophyll",
                ),
            ],
        }
    }
}
