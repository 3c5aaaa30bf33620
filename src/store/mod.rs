pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::models::answer::Answer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::models::score::ScoreSummary;

pub use memory::MemoryStore;
pub use postgres::{PgAttemptStore, PgProgressStore, PgQuestionCatalog};

/// Outcome of the single-finalize compare-and-set.
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// This caller won the transition; the attempt carries the new status.
    Finalized(Attempt),
    /// Someone else finalized first; the attempt is returned untouched.
    AlreadyFinalized(Attempt),
}

impl FinalizeOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, FinalizeOutcome::Finalized(_))
    }

    pub fn attempt(&self) -> &Attempt {
        match self {
            FinalizeOutcome::Finalized(a) | FinalizeOutcome::AlreadyFinalized(a) => a,
        }
    }

    pub fn into_attempt(self) -> Attempt {
        match self {
            FinalizeOutcome::Finalized(a) | FinalizeOutcome::AlreadyFinalized(a) => a,
        }
    }
}

/// Read-only access to an exam and its ordered question set.
#[async_trait]
pub trait QuestionCatalog: Send + Sync {
    async fn get_exam(&self, exam_id: Uuid) -> Result<Exam>;

    /// Questions ordered by position.
    async fn get_questions(&self, exam_id: Uuid) -> Result<Vec<Question>>;
}

/// Durable attempt and answer records. The only shared resource across
/// concurrent sessions; `finalize_attempt` serializes terminal transitions.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn create_attempt(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
        attempt_number: i32,
        started_at: DateTime<Utc>,
    ) -> Result<Attempt>;

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Attempt>;

    async fn find_in_progress(&self, exam_id: Uuid, student_id: Uuid) -> Result<Option<Attempt>>;

    async fn count_attempts(&self, exam_id: Uuid, student_id: Uuid) -> Result<i64>;

    /// Creates or overwrites one answer. Writing an unchanged value is a
    /// no-op; writing against a terminal attempt is `AttemptAlreadyFinalized`.
    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        question_id: i32,
        value: &str,
        answered_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Persisted answers ordered by question id.
    async fn get_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>>;

    /// Compare-and-set from `in_progress` to a terminal status. Succeeds for
    /// exactly one caller per attempt lifetime.
    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        to: AttemptStatus,
        completed_at: DateTime<Utc>,
        time_spent_seconds: i32,
    ) -> Result<FinalizeOutcome>;

    async fn set_score(
        &self,
        attempt_id: Uuid,
        summary: &ScoreSummary,
        passed: Option<bool>,
    ) -> Result<()>;
}

/// Source counters and derived percentage for course completion.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// `(completed, total)` lesson counts for the pair.
    async fn lesson_counts(&self, student_id: Uuid, course_id: Uuid) -> Result<(i64, i64)>;

    async fn set_completion_percent(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        percent: Decimal,
    ) -> Result<()>;

    async fn completion_percent(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Decimal>>;
}
