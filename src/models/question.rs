use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i32,
    #[serde(default)]
    pub position: i32,
    pub prompt: String,
    #[serde(default = "default_points")]
    pub points: i32,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

fn default_points() -> i32 {
    1
}

/// One variant per grading rule; each carries only the fields its rule needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice {
        options: Vec<String>,
        /// Must match one entry of `options`.
        correct_option: String,
    },
    TrueFalse {
        correct: bool,
    },
    ShortAnswer {
        /// Canonical answer, compared after trim + case fold.
        accepted: String,
    },
    Essay,
}

impl Question {
    pub fn is_auto_scorable(&self) -> bool {
        !matches!(self.kind, QuestionKind::Essay)
    }
}
