use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::models::progress::CourseProgress;
use crate::store::ProgressStore;

/// Derives a 0-100 completion percentage for a (student, course) pair from
/// the lesson counters. Recomputed on lesson-completion and
/// attempt-finalization events; safe to call redundantly.
#[derive(Clone)]
pub struct ProgressService {
    store: Arc<dyn ProgressStore>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }

    pub async fn recompute(&self, student_id: Uuid, course_id: Uuid) -> Result<Decimal> {
        let (completed, total) = self.store.lesson_counts(student_id, course_id).await?;
        let percent = if total <= 0 {
            Decimal::ZERO
        } else {
            (Decimal::from(completed) * Decimal::ONE_HUNDRED / Decimal::from(total))
                .round_dp(2)
                .min(Decimal::ONE_HUNDRED)
        };

        self.store
            .set_completion_percent(student_id, course_id, percent)
            .await?;
        tracing::debug!(%student_id, %course_id, %percent, "course progress recomputed");
        Ok(percent)
    }

    pub async fn on_lesson_completed(&self, student_id: Uuid, course_id: Uuid) -> Result<Decimal> {
        self.recompute(student_id, course_id).await
    }

    pub async fn on_attempt_finalized(&self, student_id: Uuid, course_id: Uuid) -> Result<Decimal> {
        self.recompute(student_id, course_id).await
    }

    /// What the enrollment screen reads.
    pub async fn snapshot(&self, student_id: Uuid, course_id: Uuid) -> Result<CourseProgress> {
        let (completed, total) = self.store.lesson_counts(student_id, course_id).await?;
        let percent = self
            .store
            .completion_percent(student_id, course_id)
            .await?
            .unwrap_or(Decimal::ZERO);
        Ok(CourseProgress {
            student_id,
            course_id,
            completed_lessons: completed,
            total_lessons: total,
            percent,
        })
    }
}
