use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-question grading outcome, persisted alongside the attempt so the
/// manual-review flow can fold essay grades in later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedAnswer {
    pub question_id: i32,
    pub submitted: Option<String>,
    pub points_earned: i32,
    pub max_points: i32,
    pub is_correct: bool,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Points earned across questions gradable without human judgment.
    pub auto_score: i32,
    /// Maximum points across those same questions.
    pub max_auto_scorable: i32,
    /// Maximum points across the whole exam, essays included.
    pub max_score: i32,
    /// False whenever at least one answer still needs manual review.
    pub is_fully_scored: bool,
    pub graded: Vec<GradedAnswer>,
}

impl ScoreSummary {
    pub fn percentage(&self) -> Decimal {
        if self.max_score <= 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.auto_score) * Decimal::ONE_HUNDRED / Decimal::from(self.max_score))
            .round_dp(2)
    }

    /// Rebuilds the totals from the per-question rows, used after a manual
    /// grade mutates one of them.
    pub fn from_graded(graded: Vec<GradedAnswer>) -> Self {
        let auto_score = graded.iter().map(|g| g.points_earned).sum();
        let max_score = graded.iter().map(|g| g.max_points).sum();
        let max_auto_scorable = graded
            .iter()
            .filter(|g| !g.needs_review)
            .map(|g| g.max_points)
            .sum();
        let is_fully_scored = graded.iter().all(|g| !g.needs_review);
        Self {
            auto_score,
            max_auto_scorable,
            max_score,
            is_fully_scored,
            graded,
        }
    }
}
