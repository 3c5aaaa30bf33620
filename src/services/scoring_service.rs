use std::collections::HashMap;

use crate::models::answer::Answer;
use crate::models::question::{Question, QuestionKind};
use crate::models::score::{GradedAnswer, ScoreSummary};

pub struct ScoringService;

impl ScoringService {
    /// Grades a finalized attempt. Unanswered questions score zero; a
    /// submitted value whose shape does not fit the question type is
    /// incorrect, never an error. Essays contribute zero to the automated
    /// subtotal and leave the summary provisional.
    pub fn grade(questions: &[Question], answers: &[Answer]) -> ScoreSummary {
        let by_question: HashMap<i32, &Answer> =
            answers.iter().map(|a| (a.question_id, a)).collect();

        let mut auto_score = 0;
        let mut max_auto_scorable = 0;
        let mut max_score = 0;
        let mut is_fully_scored = true;
        let mut graded = Vec::with_capacity(questions.len());

        for question in questions {
            max_score += question.points;
            let submitted = by_question.get(&question.id).map(|a| a.value.as_str());

            let (is_correct, needs_review) = match &question.kind {
                QuestionKind::SingleChoice { correct_option, .. } => {
                    let correct =
                        submitted.map(str::trim) == Some(correct_option.trim());
                    (correct, false)
                }
                QuestionKind::TrueFalse { correct } => {
                    let parsed = match submitted.map(|s| s.trim().to_ascii_lowercase()) {
                        Some(s) if s == "true" => Some(true),
                        Some(s) if s == "false" => Some(false),
                        _ => None,
                    };
                    (parsed == Some(*correct), false)
                }
                QuestionKind::ShortAnswer { accepted } => {
                    let correct = submitted
                        .map(normalize)
                        .map(|s| !s.is_empty() && s == normalize(accepted))
                        .unwrap_or(false);
                    (correct, false)
                }
                QuestionKind::Essay => (false, true),
            };

            if needs_review {
                is_fully_scored = false;
            } else {
                max_auto_scorable += question.points;
            }
            let points_earned = if is_correct { question.points } else { 0 };
            auto_score += points_earned;

            graded.push(GradedAnswer {
                question_id: question.id,
                submitted: submitted.map(str::to_string),
                points_earned,
                max_points: question.points,
                is_correct,
                needs_review,
            });
        }

        ScoreSummary {
            auto_score,
            max_auto_scorable,
            max_score,
            is_fully_scored,
            graded,
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}
