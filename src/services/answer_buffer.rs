use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::store::AttemptStore;
use crate::utils::time;

#[derive(Debug, Clone)]
struct Draft {
    value: String,
    modified_at: DateTime<Utc>,
    dirty: bool,
}

/// Per-question draft answers for one active attempt. Navigating between
/// questions only touches this map, so no draft is lost between flushes.
/// Shareable between the UI path and the expiry callback.
pub struct AnswerBuffer {
    attempt_id: Uuid,
    drafts: Mutex<BTreeMap<i32, Draft>>,
}

impl AnswerBuffer {
    pub fn new(attempt_id: Uuid) -> Self {
        Self {
            attempt_id,
            drafts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Overwrites the draft for `question_id`. No correctness validation.
    pub fn set(&self, question_id: i32, value: impl Into<String>) {
        let mut drafts = self.drafts.lock().unwrap();
        drafts.insert(
            question_id,
            Draft {
                value: value.into(),
                modified_at: time::now(),
                dirty: true,
            },
        );
    }

    /// Loads already-persisted answers as clean drafts, so a resumed session
    /// sees them without re-flushing. A local edit made before the preload
    /// wins over the stored value.
    pub fn preload(&self, answers: &[Answer]) {
        let mut drafts = self.drafts.lock().unwrap();
        for answer in answers {
            drafts.entry(answer.question_id).or_insert_with(|| Draft {
                value: answer.value.clone(),
                modified_at: answer.answered_at,
                dirty: false,
            });
        }
    }

    pub fn get(&self, question_id: i32) -> Option<String> {
        let drafts = self.drafts.lock().unwrap();
        drafts.get(&question_id).map(|d| d.value.clone())
    }

    /// Questions with a non-empty draft. Matches the number of answers a
    /// successful flush will persist.
    pub fn answered_count(&self) -> usize {
        let drafts = self.drafts.lock().unwrap();
        drafts.values().filter(|d| !d.value.trim().is_empty()).count()
    }

    pub fn has_unflushed(&self) -> bool {
        let drafts = self.drafts.lock().unwrap();
        drafts
            .values()
            .any(|d| d.dirty && !d.value.trim().is_empty())
    }

    /// Persists dirty non-empty drafts in question order. Store failures map
    /// to `FlushFailed` and leave the drafts dirty, so a retried flush
    /// converges; a store reporting the attempt finalized ends the flush
    /// quietly (answers are read-only history from then on).
    pub async fn flush(&self, store: &dyn AttemptStore) -> Result<usize> {
        let pending: Vec<(i32, String, DateTime<Utc>)> = {
            let drafts = self.drafts.lock().unwrap();
            drafts
                .iter()
                .filter(|(_, d)| d.dirty && !d.value.trim().is_empty())
                .map(|(id, d)| (*id, d.value.clone(), d.modified_at))
                .collect()
        };

        let mut written = 0usize;
        for (question_id, value, modified_at) in pending {
            match store
                .upsert_answer(self.attempt_id, question_id, &value, modified_at)
                .await
            {
                Ok(()) => {
                    let mut drafts = self.drafts.lock().unwrap();
                    if let Some(draft) = drafts.get_mut(&question_id) {
                        // Only clear the flag if no newer edit landed meanwhile.
                        if draft.value == value {
                            draft.dirty = false;
                        }
                    }
                    written += 1;
                }
                Err(Error::AttemptAlreadyFinalized) => {
                    tracing::debug!(
                        attempt_id = %self.attempt_id,
                        "attempt finalized mid-flush, remaining drafts kept as history"
                    );
                    return Ok(written);
                }
                Err(err) => {
                    tracing::warn!(
                        attempt_id = %self.attempt_id,
                        question_id,
                        error = %err,
                        "draft flush failed, drafts retained for retry"
                    );
                    return Err(Error::FlushFailed(err.to_string()));
                }
            }
        }
        Ok(written)
    }
}
