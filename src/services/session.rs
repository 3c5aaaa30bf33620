use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::Result;
use crate::models::attempt::Attempt;
use crate::models::exam::Exam;
use crate::models::question::Question;
use crate::services::answer_buffer::AnswerBuffer;
use crate::services::attempt_service::{AttemptResults, AttemptService};
use crate::services::countdown::CountdownScheduler;
use crate::store::AttemptStore;

/// One student's live exam-taking session: the attempt, its draft buffer,
/// and the countdown bound to it. Page-level UI drives this type directly.
pub struct ExamSession {
    service: AttemptService,
    scheduler: Arc<CountdownScheduler>,
    buffer: Arc<AnswerBuffer>,
    attempt: Attempt,
    exam: Exam,
    questions: Vec<Question>,
    active: Arc<AtomicBool>,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl ExamSession {
    /// Starts a fresh attempt and binds a session to it.
    pub async fn open(
        service: AttemptService,
        scheduler: Arc<CountdownScheduler>,
        exam_id: Uuid,
        student_id: Uuid,
    ) -> Result<Self> {
        let attempt = service.start_attempt(exam_id, student_id).await?;
        Self::bind(service, scheduler, attempt).await
    }

    /// Re-attaches to an existing attempt, e.g. after a closed tab. An
    /// attempt whose deadline passed while nobody was watching comes back
    /// already expired.
    pub async fn resume(
        service: AttemptService,
        scheduler: Arc<CountdownScheduler>,
        attempt_id: Uuid,
    ) -> Result<Self> {
        let attempt = service.resume_attempt(attempt_id).await?;
        Self::bind(service, scheduler, attempt).await
    }

    async fn bind(
        service: AttemptService,
        scheduler: Arc<CountdownScheduler>,
        attempt: Attempt,
    ) -> Result<Self> {
        let exam = service.catalog().get_exam(attempt.exam_id).await?;
        let questions = service.catalog().get_questions(attempt.exam_id).await?;
        let buffer = Arc::new(AnswerBuffer::new(attempt.id));
        if !attempt.is_terminal() {
            // A resumed attempt already has persisted answers; surface them
            // as clean drafts so counts and reads match what will be scored.
            buffer.preload(&service.store().get_answers(attempt.id).await?);
        }
        let active = Arc::new(AtomicBool::new(!attempt.is_terminal()));
        Ok(Self {
            service,
            scheduler,
            buffer,
            attempt,
            exam,
            questions,
            active,
            autosave: Mutex::new(None),
        })
    }

    pub fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    pub fn exam(&self) -> &Exam {
        &self.exam
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.attempt.deadline(self.exam.duration_minutes)
    }

    pub fn remaining_seconds(&self) -> i64 {
        crate::utils::time::remaining_seconds(self.deadline())
    }

    pub fn save_answer(&self, question_id: i32, value: impl Into<String>) {
        self.buffer.set(question_id, value);
    }

    pub fn answer(&self, question_id: i32) -> Option<String> {
        self.buffer.get(question_id)
    }

    pub fn answered_count(&self) -> usize {
        self.buffer.answered_count()
    }

    /// Opportunistic flush, e.g. on question navigation.
    pub async fn flush(&self) -> Result<usize> {
        self.buffer.flush(self.service.store().as_ref()).await
    }

    /// Arms the countdown for this attempt. The expiry callback performs the
    /// same flush-and-finalize sequence as a manual submit, just with the
    /// `expired` status.
    pub fn start_countdown<T>(&self, on_tick: T)
    where
        T: Fn(i64) + Send + 'static,
    {
        if self.attempt.is_terminal() {
            return;
        }
        let service = self.service.clone();
        let buffer = self.buffer.clone();
        let active = self.active.clone();
        let attempt_id = self.attempt.id;
        self.scheduler.start(
            attempt_id,
            self.deadline(),
            on_tick,
            move || async move {
                match service.expire(attempt_id, &buffer).await {
                    Ok(outcome) if outcome.is_finalized() => {
                        tracing::info!(%attempt_id, "attempt expired by countdown");
                    }
                    Ok(_) => {
                        tracing::debug!(
                            %attempt_id,
                            "countdown fired after the attempt was already finalized"
                        );
                    }
                    Err(err) => {
                        tracing::error!(%attempt_id, error = %err, "expiry finalize failed");
                    }
                }
                active.store(false, Ordering::SeqCst);
            },
        );
    }

    /// Background flush loop. Failures are retried on the next interval with
    /// drafts intact.
    pub fn start_autosave(&self, every: Duration) {
        let mut guard = self.autosave.lock().unwrap();
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let store = self.service.store().clone();
        let buffer = self.buffer.clone();
        let active = self.active.clone();
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            while active.load(Ordering::SeqCst) {
                interval.tick().await;
                if !buffer.has_unflushed() {
                    continue;
                }
                if let Err(err) = buffer.flush(store.as_ref()).await {
                    tracing::warn!(error = %err, "autosave flush failed, will retry");
                }
            }
        }));
    }

    /// Autosave at the configured interval. Requires an initialized
    /// configuration.
    pub fn start_autosave_default(&self) {
        let every = crate::config::get_config().autosave_interval_seconds;
        self.start_autosave(Duration::from_secs(every));
    }

    fn stop_autosave(&self) {
        if let Some(handle) = self.autosave.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Manual submit. On a lost race with the countdown the duplicate
    /// finalize is swallowed and the session simply reflects the terminal
    /// attempt. A flush failure leaves the attempt in progress and the
    /// countdown armed, so the student can retry without losing time
    /// authority.
    pub async fn submit(&mut self) -> Result<Attempt> {
        let outcome = self.service.submit(self.attempt.id, &self.buffer).await?;
        self.scheduler.cancel(self.attempt.id);
        self.active.store(false, Ordering::SeqCst);
        self.stop_autosave();
        self.attempt = outcome.into_attempt();
        Ok(self.attempt.clone())
    }

    /// Re-reads the attempt, e.g. after the countdown expired it.
    pub async fn refresh(&mut self) -> Result<&Attempt> {
        self.attempt = self.service.get_attempt(self.attempt.id).await?;
        if self.attempt.is_terminal() {
            self.active.store(false, Ordering::SeqCst);
        }
        Ok(&self.attempt)
    }

    pub async fn results(&self) -> Result<AttemptResults> {
        self.service.results(self.attempt.id).await
    }

    /// Detaches from the attempt without finalizing it; the attempt stays
    /// in progress and can be resumed until its deadline passes.
    pub fn close(&self) {
        self.scheduler.cancel(self.attempt.id);
        self.active.store(false, Ordering::SeqCst);
        self.stop_autosave();
    }
}
