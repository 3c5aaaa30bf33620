use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::models::score::ScoreSummary;
use crate::store::{AttemptStore, FinalizeOutcome, ProgressStore, QuestionCatalog};

/// In-memory implementation of all three store traits. Backs the test suite
/// and embedded setups that do not need durability.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    exams: HashMap<Uuid, Exam>,
    questions: HashMap<Uuid, Vec<Question>>,
    attempts: HashMap<Uuid, Attempt>,
    answers: HashMap<Uuid, BTreeMap<i32, Answer>>,
    lesson_counts: HashMap<(Uuid, Uuid), (i64, i64)>,
    completion: HashMap<(Uuid, Uuid), Decimal>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_exam(&self, exam: Exam, mut questions: Vec<Question>) {
        questions.sort_by_key(|q| q.position);
        let mut inner = self.inner.lock().unwrap();
        inner.questions.insert(exam.id, questions);
        inner.exams.insert(exam.id, exam);
    }

    pub fn set_lesson_counts(&self, student_id: Uuid, course_id: Uuid, completed: i64, total: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .lesson_counts
            .insert((student_id, course_id), (completed, total));
    }

    /// Test hook: rewinds an attempt's start time, e.g. to simulate a
    /// session resumed long after its deadline.
    pub fn backdate_attempt(&self, attempt_id: Uuid, started_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(attempt) = inner.attempts.get_mut(&attempt_id) {
            attempt.started_at = started_at;
        }
    }
}

#[async_trait]
impl QuestionCatalog for MemoryStore {
    async fn get_exam(&self, exam_id: Uuid) -> Result<Exam> {
        let inner = self.inner.lock().unwrap();
        inner
            .exams
            .get(&exam_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))
    }

    async fn get_questions(&self, exam_id: Uuid) -> Result<Vec<Question>> {
        let inner = self.inner.lock().unwrap();
        inner
            .questions
            .get(&exam_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", exam_id)))
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn create_attempt(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
        attempt_number: i32,
        started_at: DateTime<Utc>,
    ) -> Result<Attempt> {
        let mut inner = self.inner.lock().unwrap();
        let open_exists = inner.attempts.values().any(|a| {
            a.exam_id == exam_id
                && a.student_id == student_id
                && a.status == AttemptStatus::InProgress
        });
        if open_exists {
            return Err(Error::Invalid(
                "An in-progress attempt already exists for this exam".to_string(),
            ));
        }

        let attempt = Attempt {
            id: Uuid::new_v4(),
            exam_id,
            student_id,
            attempt_number,
            status: AttemptStatus::InProgress,
            started_at,
            completed_at: None,
            time_spent_seconds: None,
            score: None,
            max_score: None,
            percentage: None,
            passed: None,
            fully_scored: None,
            graded_answers: None,
            created_at: Some(started_at),
            updated_at: Some(started_at),
        };
        inner.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        let inner = self.inner.lock().unwrap();
        inner
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    async fn find_in_progress(&self, exam_id: Uuid, student_id: Uuid) -> Result<Option<Attempt>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .attempts
            .values()
            .find(|a| {
                a.exam_id == exam_id
                    && a.student_id == student_id
                    && a.status == AttemptStatus::InProgress
            })
            .cloned())
    }

    async fn count_attempts(&self, exam_id: Uuid, student_id: Uuid) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .attempts
            .values()
            .filter(|a| a.exam_id == exam_id && a.student_id == student_id)
            .count() as i64)
    }

    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        question_id: i32,
        value: &str,
        answered_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let attempt = inner
            .attempts
            .get(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        if attempt.is_terminal() {
            return Err(Error::AttemptAlreadyFinalized);
        }

        let answers = inner.answers.entry(attempt_id).or_default();
        match answers.get_mut(&question_id) {
            // Unchanged value stays a no-op, last-modified included.
            Some(existing) if existing.value == value => {}
            Some(existing) => {
                existing.value = value.to_string();
                existing.answered_at = answered_at;
            }
            None => {
                answers.insert(
                    question_id,
                    Answer {
                        question_id,
                        value: value.to_string(),
                        answered_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .answers
            .get(&attempt_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        to: AttemptStatus,
        completed_at: DateTime<Utc>,
        time_spent_seconds: i32,
    ) -> Result<FinalizeOutcome> {
        if !to.is_terminal() {
            return Err(Error::Invalid(format!(
                "Cannot finalize an attempt to {}",
                to
            )));
        }

        let mut inner = self.inner.lock().unwrap();
        let attempt = inner
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;

        if attempt.status != AttemptStatus::InProgress {
            return Ok(FinalizeOutcome::AlreadyFinalized(attempt.clone()));
        }

        attempt.status = to;
        attempt.completed_at = Some(completed_at);
        attempt.time_spent_seconds = Some(time_spent_seconds);
        attempt.updated_at = Some(completed_at);
        Ok(FinalizeOutcome::Finalized(attempt.clone()))
    }

    async fn set_score(
        &self,
        attempt_id: Uuid,
        summary: &ScoreSummary,
        passed: Option<bool>,
    ) -> Result<()> {
        let graded = serde_json::to_value(&summary.graded)?;
        let mut inner = self.inner.lock().unwrap();
        let attempt = inner
            .attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;

        attempt.score = Some(Decimal::from(summary.auto_score));
        attempt.max_score = Some(Decimal::from(summary.max_score));
        attempt.percentage = Some(summary.percentage());
        attempt.passed = passed;
        attempt.fully_scored = Some(summary.is_fully_scored);
        attempt.graded_answers = Some(graded);
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn lesson_counts(&self, student_id: Uuid, course_id: Uuid) -> Result<(i64, i64)> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .lesson_counts
            .get(&(student_id, course_id))
            .copied()
            .unwrap_or((0, 0)))
    }

    async fn set_completion_percent(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        percent: Decimal,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.completion.insert((student_id, course_id), percent);
        Ok(())
    }

    async fn completion_percent(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Decimal>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.completion.get(&(student_id, course_id)).copied())
    }
}
