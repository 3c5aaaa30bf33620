use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds left until `deadline`, clamped at zero.
pub fn remaining_seconds(deadline: DateTime<Utc>) -> i64 {
    (deadline - now()).num_seconds().max(0)
}
