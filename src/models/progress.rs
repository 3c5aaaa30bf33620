use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseProgress {
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub completed_lessons: i64,
    pub total_lessons: i64,
    pub percent: Decimal,
}
