use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted answer for one question of one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: i32,
    pub value: String,
    pub answered_at: DateTime<Utc>,
}
