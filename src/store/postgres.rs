use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::models::score::ScoreSummary;
use crate::store::{AttemptStore, FinalizeOutcome, ProgressStore, QuestionCatalog};

#[derive(Debug, FromRow)]
struct ExamRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    duration_minutes: i32,
    passing_score: Decimal,
    max_attempts: i32,
    opens_at: Option<DateTime<Utc>>,
    closes_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<ExamRow> for Exam {
    fn from(row: ExamRow) -> Self {
        Exam {
            id: row.id,
            title: row.title,
            description: row.description,
            duration_minutes: row.duration_minutes,
            passing_score: row.passing_score,
            max_attempts: row.max_attempts,
            opens_at: row.opens_at,
            closes_at: row.closes_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AttemptRow {
    id: Uuid,
    exam_id: Uuid,
    student_id: Uuid,
    attempt_number: i32,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    time_spent_seconds: Option<i32>,
    score: Option<Decimal>,
    max_score: Option<Decimal>,
    percentage: Option<Decimal>,
    passed: Option<bool>,
    fully_scored: Option<bool>,
    graded_answers: Option<JsonValue>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = Error;

    fn try_from(row: AttemptRow) -> Result<Self> {
        Ok(Attempt {
            id: row.id,
            exam_id: row.exam_id,
            student_id: row.student_id,
            attempt_number: row.attempt_number,
            status: row.status.parse()?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            time_spent_seconds: row.time_spent_seconds,
            score: row.score,
            max_score: row.max_score,
            percentage: row.percentage,
            passed: row.passed,
            fully_scored: row.fully_scored,
            graded_answers: row.graded_answers,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AnswerRow {
    question_id: i32,
    value: String,
    answered_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PgQuestionCatalog {
    pool: PgPool,
}

impl PgQuestionCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionCatalog for PgQuestionCatalog {
    async fn get_exam(&self, exam_id: Uuid) -> Result<Exam> {
        let row = sqlx::query_as::<_, ExamRow>(
            r#"SELECT id, title, description, duration_minutes, passing_score,
                      max_attempts, opens_at, closes_at, created_at, updated_at
               FROM exams WHERE id = $1"#,
        )
        .bind(exam_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_questions(&self, exam_id: Uuid) -> Result<Vec<Question>> {
        let questions_json: JsonValue =
            sqlx::query_scalar(r#"SELECT questions FROM exams WHERE id = $1"#)
                .bind(exam_id)
                .fetch_one(&self.pool)
                .await?;

        let mut questions: Vec<Question> = serde_json::from_value(questions_json)?;
        questions.sort_by_key(|q| q.position);
        Ok(questions)
    }
}

#[derive(Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn create_attempt(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
        attempt_number: i32,
        started_at: DateTime<Utc>,
    ) -> Result<Attempt> {
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            INSERT INTO attempts (id, exam_id, student_id, attempt_number, status, started_at)
            VALUES ($1, $2, $3, $4, 'in_progress', $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(exam_id)
        .bind(student_id)
        .bind(attempt_number)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Attempt> {
        let row = sqlx::query_as::<_, AttemptRow>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn find_in_progress(&self, exam_id: Uuid, student_id: Uuid) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"SELECT * FROM attempts
               WHERE exam_id = $1 AND student_id = $2 AND status = 'in_progress'"#,
        )
        .bind(exam_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Attempt::try_from).transpose()
    }

    async fn count_attempts(&self, exam_id: Uuid, student_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM attempts WHERE exam_id = $1 AND student_id = $2"#,
        )
        .bind(exam_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        question_id: i32,
        value: &str,
        answered_at: DateTime<Utc>,
    ) -> Result<()> {
        // Guard and write in one statement, so a finalize landing between a
        // status check and the write cannot let a late answer through.
        // Unchanged values keep their original answered_at.
        let result = sqlx::query(
            r#"
            INSERT INTO attempt_answers (attempt_id, question_id, value, answered_at)
            SELECT $1, $2, $3, $4
            WHERE EXISTS (
                SELECT 1 FROM attempts WHERE id = $1 AND status = 'in_progress'
            )
            ON CONFLICT (attempt_id, question_id)
            DO UPDATE SET
                value = EXCLUDED.value,
                answered_at = CASE
                    WHEN attempt_answers.value IS DISTINCT FROM EXCLUDED.value
                    THEN EXCLUDED.answered_at
                    ELSE attempt_answers.answered_at
                END
            "#,
        )
        .bind(attempt_id)
        .bind(question_id)
        .bind(value)
        .bind(answered_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let status: Option<String> =
                sqlx::query_scalar(r#"SELECT status FROM attempts WHERE id = $1"#)
                    .bind(attempt_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match status {
                // Terminal states never revert, so this read is stable.
                Some(_) => Err(Error::AttemptAlreadyFinalized),
                None => Err(Error::NotFound(format!("Attempt {} not found", attempt_id))),
            };
        }
        Ok(())
    }

    async fn get_answers(&self, attempt_id: Uuid) -> Result<Vec<Answer>> {
        let rows = sqlx::query_as::<_, AnswerRow>(
            r#"SELECT question_id, value, answered_at
               FROM attempt_answers WHERE attempt_id = $1 ORDER BY question_id"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Answer {
                question_id: r.question_id,
                value: r.value,
                answered_at: r.answered_at,
            })
            .collect())
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

        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            UPDATE attempts
            SET status = $2, completed_at = $3, time_spent_seconds = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(to.as_str())
        .bind(completed_at)
        .bind(time_spent_seconds)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(FinalizeOutcome::Finalized(row.try_into()?)),
            // Lost the race; hand back whoever won.
            None => Ok(FinalizeOutcome::AlreadyFinalized(
                self.get_attempt(attempt_id).await?,
            )),
        }
    }

    async fn set_score(
        &self,
        attempt_id: Uuid,
        summary: &ScoreSummary,
        passed: Option<bool>,
    ) -> Result<()> {
        let graded = serde_json::to_value(&summary.graded)?;
        sqlx::query(
            r#"
            UPDATE attempts
            SET score = $2, max_score = $3, percentage = $4, passed = $5,
                fully_scored = $6, graded_answers = $7, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(Decimal::from(summary.auto_score))
        .bind(Decimal::from(summary.max_score))
        .bind(summary.percentage())
        .bind(passed)
        .bind(summary.is_fully_scored)
        .bind(graded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgProgressStore {
    pool: PgPool,
}

impl PgProgressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressStore for PgProgressStore {
    async fn lesson_counts(&self, student_id: Uuid, course_id: Uuid) -> Result<(i64, i64)> {
        let (completed, total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM lesson_completions lc
                 JOIN lessons l ON l.id = lc.lesson_id
                 WHERE lc.student_id = $1 AND l.course_id = $2),
                (SELECT COUNT(*) FROM lessons WHERE course_id = $2)
            "#,
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((completed, total))
    }

    async fn set_completion_percent(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        percent: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE enrollments
            SET completion_percent = $3, updated_at = NOW()
            WHERE student_id = $1 AND course_id = $2
            "#,
        )
        .bind(student_id)
        .bind(course_id)
        .bind(percent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn completion_percent(
        &self,
        student_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Decimal>> {
        let percent = sqlx::query_scalar(
            r#"SELECT completion_percent FROM enrollments
               WHERE student_id = $1 AND course_id = $2"#,
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(percent)
    }
}
