use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::score::{GradedAnswer, ScoreSummary};
use crate::services::answer_buffer::AnswerBuffer;
use crate::services::scoring_service::ScoringService;
use crate::store::{AttemptStore, FinalizeOutcome, QuestionCatalog};
use crate::utils::time;

/// Attempt lifecycle orchestration: start, the two finalize paths, and the
/// post-finalize scoring hand-off. Manual submit and timer expiry share one
/// finalize entry point guarded by the store's compare-and-set, so whichever
/// trigger arrives second becomes a no-op.
#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn AttemptStore>,
    catalog: Arc<dyn QuestionCatalog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResults {
    pub attempt_id: Uuid,
    pub status: AttemptStatus,
    pub score: Option<Decimal>,
    pub max_score: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub passed: Option<bool>,
    /// False means "pending review": an essay grade is still outstanding.
    pub is_fully_scored: bool,
    pub time_spent_minutes: Option<i64>,
}

impl AttemptService {
    pub fn new(store: Arc<dyn AttemptStore>, catalog: Arc<dyn QuestionCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Starts a new attempt. Rejected outside the exam's publication window
    /// or once the attempt limit is exhausted; a prior unfinished attempt is
    /// abandoned (terminal, unscored) before the next one is numbered.
    pub async fn start_attempt(&self, exam_id: Uuid, student_id: Uuid) -> Result<Attempt> {
        let exam = self.catalog.get_exam(exam_id).await?;
        let now = time::now();
        if !exam.window_contains(now) {
            return Err(Error::OutOfWindow);
        }

        let taken = self.store.count_attempts(exam_id, student_id).await?;
        let next_number = taken as i32 + 1;
        if next_number > exam.max_attempts {
            return Err(Error::AttemptLimitExceeded);
        }

        if let Some(open) = self.store.find_in_progress(exam_id, student_id).await? {
            tracing::info!(
                attempt_id = %open.id,
                attempt_number = open.attempt_number,
                "abandoning unfinished attempt before starting a new one"
            );
            let elapsed = (now - open.started_at).num_seconds().max(0) as i32;
            self.store
                .finalize_attempt(open.id, AttemptStatus::Abandoned, now, elapsed)
                .await?;
        }

        let attempt = self
            .store
            .create_attempt(exam_id, student_id, next_number, now)
            .await?;
        tracing::info!(
            attempt_id = %attempt.id,
            %exam_id,
            %student_id,
            attempt_number = next_number,
            "attempt started"
        );
        Ok(attempt)
    }

    /// Re-fetches an attempt for a session that reopened. If the deadline
    /// already passed while no countdown was running, the attempt expires
    /// right here instead of resuming a stale countdown.
    pub async fn resume_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        if attempt.is_terminal() {
            return Ok(attempt);
        }

        let exam = self.catalog.get_exam(attempt.exam_id).await?;
        if time::now() >= attempt.deadline(exam.duration_minutes) {
            tracing::info!(%attempt_id, "deadline passed while session was away, expiring");
            let outcome = self.finalize(attempt_id, AttemptStatus::Expired).await?;
            return Ok(outcome.into_attempt());
        }
        Ok(attempt)
    }

    /// Manual submit. A flush failure keeps the attempt in progress so the
    /// client can retry with its drafts intact.
    pub async fn submit(&self, attempt_id: Uuid, buffer: &AnswerBuffer) -> Result<FinalizeOutcome> {
        buffer.flush(self.store.as_ref()).await?;
        self.finalize(attempt_id, AttemptStatus::Submitted).await
    }

    /// Timer expiry. Buffered answers get one final best-effort flush;
    /// expiry itself never waits on a broken store connection.
    pub async fn expire(&self, attempt_id: Uuid, buffer: &AnswerBuffer) -> Result<FinalizeOutcome> {
        if let Err(err) = buffer.flush(self.store.as_ref()).await {
            tracing::warn!(
                %attempt_id,
                error = %err,
                "final flush before expiry failed, submitting flushed answers only"
            );
        }
        self.finalize(attempt_id, AttemptStatus::Expired).await
    }

    async fn finalize(&self, attempt_id: Uuid, to: AttemptStatus) -> Result<FinalizeOutcome> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        let now = time::now();
        let time_spent = (now - attempt.started_at).num_seconds().max(0) as i32;

        match self
            .store
            .finalize_attempt(attempt_id, to, now, time_spent)
            .await?
        {
            FinalizeOutcome::Finalized(finalized) => {
                tracing::info!(%attempt_id, status = %to, time_spent, "attempt finalized");
                // Scoring faults must not fail the submission itself.
                if let Err(err) = self.score(&finalized).await {
                    tracing::error!(
                        %attempt_id,
                        error = %err,
                        "scoring failed, attempt stays finalized with score pending"
                    );
                }
                Ok(FinalizeOutcome::Finalized(
                    self.store.get_attempt(attempt_id).await?,
                ))
            }
            FinalizeOutcome::AlreadyFinalized(existing) => {
                tracing::debug!(
                    %attempt_id,
                    status = %existing.status,
                    "duplicate finalize ignored"
                );
                Ok(FinalizeOutcome::AlreadyFinalized(existing))
            }
        }
    }

    async fn score(&self, attempt: &Attempt) -> Result<()> {
        let exam = self.catalog.get_exam(attempt.exam_id).await?;
        let questions = self.catalog.get_questions(attempt.exam_id).await?;
        let answers = self.store.get_answers(attempt.id).await?;

        let summary = ScoringService::grade(&questions, &answers);
        let passed = summary
            .is_fully_scored
            .then(|| summary.percentage() >= exam.passing_score);
        self.store
            .set_score(attempt.id, &summary, passed)
            .await
            .map_err(|e| Error::ScoringFailed(e.to_string()))?;
        Ok(())
    }

    /// Retries scoring for a finalized attempt whose score was left null by
    /// an earlier scoring fault.
    pub async fn rescore(&self, attempt_id: Uuid) -> Result<Attempt> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        if !attempt.is_terminal() {
            return Err(Error::Invalid(
                "Cannot score an attempt that is still in progress".to_string(),
            ));
        }
        self.score(&attempt).await?;
        self.store.get_attempt(attempt_id).await
    }

    /// Folds a manual essay grade into the stored breakdown and re-derives
    /// the attempt's totals. Once no row needs review the score stops being
    /// provisional.
    pub async fn record_essay_grade(
        &self,
        attempt_id: Uuid,
        question_id: i32,
        points: i32,
    ) -> Result<Attempt> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        if !attempt.is_terminal() {
            return Err(Error::Invalid(
                "Cannot grade an attempt that is still in progress".to_string(),
            ));
        }

        let graded_json = attempt.graded_answers.ok_or_else(|| {
            Error::NotFound(format!("Attempt {} has no graded answers", attempt_id))
        })?;
        let mut graded: Vec<GradedAnswer> = serde_json::from_value(graded_json)?;

        let row = graded
            .iter_mut()
            .find(|g| g.question_id == question_id)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Question {} not present in attempt {}",
                    question_id, attempt_id
                ))
            })?;
        let points = points.clamp(0, row.max_points);
        row.points_earned = points;
        row.is_correct = points == row.max_points;
        row.needs_review = false;

        let summary = ScoreSummary::from_graded(graded);
        let exam = self.catalog.get_exam(attempt.exam_id).await?;
        let passed = summary
            .is_fully_scored
            .then(|| summary.percentage() >= exam.passing_score);
        self.store.set_score(attempt_id, &summary, passed).await?;

        tracing::info!(%attempt_id, question_id, points, "manual grade recorded");
        self.store.get_attempt(attempt_id).await
    }

    /// What the results screen reads.
    pub async fn results(&self, attempt_id: Uuid) -> Result<AttemptResults> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        Ok(AttemptResults {
            attempt_id: attempt.id,
            status: attempt.status,
            score: attempt.score,
            max_score: attempt.max_score,
            percentage: attempt.percentage,
            passed: attempt.passed,
            is_fully_scored: attempt.fully_scored.unwrap_or(false),
            time_spent_minutes: attempt.time_spent_minutes(),
        })
    }

    pub async fn get_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        self.store.get_attempt(attempt_id).await
    }

    pub(crate) fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    pub(crate) fn catalog(&self) -> &Arc<dyn QuestionCatalog> {
        &self.catalog
    }
}
