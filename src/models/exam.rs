use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub passing_score: Decimal,
    pub max_attempts: i32,
    /// Publication window. An open bound means no restriction on that side.
    pub opens_at: Option<DateTime<Utc>>,
    pub closes_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Exam {
    pub fn window_contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(opens_at) = self.opens_at {
            if at < opens_at {
                return false;
            }
        }
        if let Some(closes_at) = self.closes_at {
            if at > closes_at {
                return false;
            }
        }
        true
    }
}
