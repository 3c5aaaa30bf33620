use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use assessment_engine::error::Error;
use assessment_engine::models::attempt::AttemptStatus;
use assessment_engine::models::exam::Exam;
use assessment_engine::models::question::{Question, QuestionKind};
use assessment_engine::services::answer_buffer::AnswerBuffer;
use assessment_engine::services::attempt_service::AttemptService;
use assessment_engine::services::countdown::CountdownScheduler;
use assessment_engine::services::session::ExamSession;
use assessment_engine::store::{AttemptStore, MemoryStore};
use assessment_engine::Engine;

fn seed_exam(
    store: &MemoryStore,
    choice: usize,
    essays: usize,
    duration_minutes: i32,
    max_attempts: i32,
) -> Exam {
    let now = chrono::Utc::now();
    let exam = Exam {
        id: Uuid::new_v4(),
        title: "Integration exam".into(),
        description: None,
        duration_minutes,
        passing_score: Decimal::new(50, 0),
        max_attempts,
        opens_at: Some(now - ChronoDuration::hours(1)),
        closes_at: Some(now + ChronoDuration::hours(1)),
        created_at: Some(now),
        updated_at: Some(now),
    };

    let mut questions = Vec::new();
    for i in 0..choice {
        let id = i as i32 + 1;
        questions.push(Question {
            id,
            position: id,
            prompt: format!("choice question {}", id),
            points: 1,
            kind: QuestionKind::SingleChoice {
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_option: "d".into(),
            },
        });
    }
    for i in 0..essays {
        let id = (choice + i) as i32 + 1;
        questions.push(Question {
            id,
            position: id,
            prompt: format!("essay question {}", id),
            points: 5,
            kind: QuestionKind::Essay,
        });
    }

    store.insert_exam(exam.clone(), questions);
    exam
}

#[tokio::test]
async fn normal_submit_scores_and_finalizes() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 5, 0, 60, 1);
    let engine = Engine::in_memory(store.clone());
    let student = Uuid::new_v4();

    let mut session = engine.open_session(exam.id, student).await.unwrap();
    for q in 1..=5 {
        session.save_answer(q, "d");
    }
    assert_eq!(session.answered_count(), 5);

    let attempt = session.submit().await.unwrap();
    assert_eq!(attempt.status, AttemptStatus::Submitted);
    assert!(attempt.completed_at.is_some());

    let results = session.results().await.unwrap();
    assert_eq!(results.score, Some(Decimal::from(5)));
    assert_eq!(results.max_score, Some(Decimal::from(5)));
    assert_eq!(results.percentage, Some(Decimal::ONE_HUNDRED));
    assert_eq!(results.passed, Some(true));
    assert!(results.is_fully_scored);
    assert_eq!(results.time_spent_minutes, Some(0));
}

#[tokio::test]
async fn countdown_expiry_submits_flushed_answers() {
    let store = Arc::new(MemoryStore::new());
    // Zero duration: the deadline is the start instant, so the first tick
    // already sees remaining <= 0.
    let exam = seed_exam(&store, 5, 0, 0, 1);
    let engine = Engine::in_memory(store.clone());
    let student = Uuid::new_v4();

    let mut session = engine.open_session(exam.id, student).await.unwrap();
    for q in 1..=3 {
        session.save_answer(q, "d");
    }
    session.start_countdown(|_| {});

    tokio::time::sleep(Duration::from_millis(200)).await;
    let attempt = session.refresh().await.unwrap();
    assert_eq!(attempt.status, AttemptStatus::Expired);

    let results = session.results().await.unwrap();
    assert_eq!(results.score, Some(Decimal::from(3)));
    assert_eq!(results.max_score, Some(Decimal::from(5)));
    assert!(results.is_fully_scored);

    let answers = store.get_answers(results.attempt_id).await.unwrap();
    assert_eq!(answers.len(), 3);
}

#[tokio::test]
async fn submit_and_expiry_race_finalizes_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 2, 0, 60, 1);
    let service = AttemptService::new(store.clone(), store.clone());
    let student = Uuid::new_v4();

    let attempt = service.start_attempt(exam.id, student).await.unwrap();
    let buffer = AnswerBuffer::new(attempt.id);
    buffer.set(1, "d");

    let (manual, timer) = tokio::join!(
        service.submit(attempt.id, &buffer),
        service.expire(attempt.id, &buffer),
    );
    let manual = manual.unwrap();
    let timer = timer.unwrap();

    assert!(
        manual.is_finalized() ^ timer.is_finalized(),
        "exactly one finalize path must win"
    );

    let settled = service.get_attempt(attempt.id).await.unwrap();
    assert!(matches!(
        settled.status,
        AttemptStatus::Submitted | AttemptStatus::Expired
    ));
    // The losing path observed the winner's record, not a second transition.
    let loser = if manual.is_finalized() { &timer } else { &manual };
    assert_eq!(loser.attempt().status, settled.status);
    assert_eq!(loser.attempt().completed_at, settled.completed_at);
}

#[tokio::test]
async fn duplicate_submit_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 2, 0, 60, 1);
    let service = AttemptService::new(store.clone(), store.clone());
    let attempt = service
        .start_attempt(exam.id, Uuid::new_v4())
        .await
        .unwrap();
    let buffer = AnswerBuffer::new(attempt.id);
    buffer.set(1, "d");

    let first = service.submit(attempt.id, &buffer).await.unwrap();
    assert!(first.is_finalized());
    let first_attempt = service.get_attempt(attempt.id).await.unwrap();

    let second = service.submit(attempt.id, &buffer).await.unwrap();
    assert!(!second.is_finalized());

    let after = service.get_attempt(attempt.id).await.unwrap();
    assert_eq!(after.completed_at, first_attempt.completed_at);
    assert_eq!(after.score, first_attempt.score);
    assert_eq!(after.status, AttemptStatus::Submitted);
}

#[tokio::test]
async fn attempt_limit_is_enforced() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 1, 0, 60, 1);
    let service = AttemptService::new(store.clone(), store.clone());
    let student = Uuid::new_v4();

    let attempt = service.start_attempt(exam.id, student).await.unwrap();
    let buffer = AnswerBuffer::new(attempt.id);
    service.submit(attempt.id, &buffer).await.unwrap();

    let err = service.start_attempt(exam.id, student).await.unwrap_err();
    assert!(matches!(err, Error::AttemptLimitExceeded));
}

#[tokio::test]
async fn starting_outside_publication_window_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let mut exam = seed_exam(&store, 1, 0, 60, 1);
    exam.closes_at = Some(chrono::Utc::now() - ChronoDuration::minutes(5));
    store.insert_exam(
        exam.clone(),
        vec![Question {
            id: 1,
            position: 1,
            prompt: "q".into(),
            points: 1,
            kind: QuestionKind::TrueFalse { correct: true },
        }],
    );

    let service = AttemptService::new(store.clone(), store.clone());
    let err = service
        .start_attempt(exam.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OutOfWindow));
}

#[tokio::test]
async fn starting_again_abandons_the_open_attempt() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 2, 0, 60, 3);
    let service = AttemptService::new(store.clone(), store.clone());
    let student = Uuid::new_v4();

    let first = service.start_attempt(exam.id, student).await.unwrap();
    let second = service.start_attempt(exam.id, student).await.unwrap();
    assert_eq!(second.attempt_number, 2);

    let first = service.get_attempt(first.id).await.unwrap();
    assert_eq!(first.status, AttemptStatus::Abandoned);
    // Abandoned attempts are never scored.
    assert_eq!(first.score, None);
}

#[tokio::test]
async fn resume_after_deadline_expires_immediately() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 3, 0, 60, 1);
    let service = AttemptService::new(store.clone(), store.clone());
    let student = Uuid::new_v4();

    let attempt = service.start_attempt(exam.id, student).await.unwrap();
    let buffer = AnswerBuffer::new(attempt.id);
    buffer.set(1, "d");
    buffer.flush(store.as_ref()).await.unwrap();

    store.backdate_attempt(attempt.id, chrono::Utc::now() - ChronoDuration::hours(2));

    let resumed = service.resume_attempt(attempt.id).await.unwrap();
    assert_eq!(resumed.status, AttemptStatus::Expired);
    assert_eq!(resumed.score, Some(Decimal::from(1)));
}

#[tokio::test]
async fn resume_session_on_terminal_attempt_is_read_only() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 2, 0, 60, 1);
    let engine = Engine::in_memory(store.clone());
    let student = Uuid::new_v4();

    let mut session = engine.open_session(exam.id, student).await.unwrap();
    session.save_answer(1, "d");
    let attempt = session.submit().await.unwrap();

    let resumed = engine.resume_session(attempt.id).await.unwrap();
    assert_eq!(resumed.attempt().status, AttemptStatus::Submitted);
    // Answers are history now; a late write is swallowed, not persisted.
    resumed.save_answer(2, "d");
    assert_eq!(resumed.flush().await.unwrap(), 0);
    let answers = store.get_answers(attempt.id).await.unwrap();
    assert_eq!(answers.len(), 1);
}

#[tokio::test]
async fn essay_mix_stays_provisional_until_manually_graded() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 4, 1, 60, 1);
    let engine = Engine::in_memory(store.clone());
    let student = Uuid::new_v4();

    let mut session = engine.open_session(exam.id, student).await.unwrap();
    for q in 1..=4 {
        session.save_answer(q, "d");
    }
    session.save_answer(5, "a thoughtful essay");
    session.submit().await.unwrap();

    let results = session.results().await.unwrap();
    assert_eq!(results.score, Some(Decimal::from(4)));
    assert_eq!(results.max_score, Some(Decimal::from(9)));
    assert!(!results.is_fully_scored);
    assert_eq!(results.passed, None);

    let graded = engine
        .attempt_service
        .record_essay_grade(results.attempt_id, 5, 5)
        .await
        .unwrap();
    assert_eq!(graded.score, Some(Decimal::from(9)));
    assert_eq!(graded.fully_scored, Some(true));
    assert_eq!(graded.passed, Some(true));
    assert_eq!(graded.percentage, Some(Decimal::ONE_HUNDRED));
}

/// Delegating store whose writes can be switched off, to exercise flush
/// failure semantics.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
    score_failing: AtomicBool,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            score_failing: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_score_failing(&self, failing: bool) {
        self.score_failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AttemptStore for FlakyStore {
    async fn create_attempt(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
        attempt_number: i32,
        started_at: DateTime<Utc>,
    ) -> assessment_engine::error::Result<assessment_engine::models::attempt::Attempt> {
        self.inner
            .create_attempt(exam_id, student_id, attempt_number, started_at)
            .await
    }

    async fn get_attempt(
        &self,
        attempt_id: Uuid,
    ) -> assessment_engine::error::Result<assessment_engine::models::attempt::Attempt> {
        self.inner.get_attempt(attempt_id).await
    }

    async fn find_in_progress(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
    ) -> assessment_engine::error::Result<Option<assessment_engine::models::attempt::Attempt>>
    {
        self.inner.find_in_progress(exam_id, student_id).await
    }

    async fn count_attempts(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
    ) -> assessment_engine::error::Result<i64> {
        self.inner.count_attempts(exam_id, student_id).await
    }

    async fn upsert_answer(
        &self,
        attempt_id: Uuid,
        question_id: i32,
        value: &str,
        answered_at: DateTime<Utc>,
    ) -> assessment_engine::error::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("store unavailable".into()));
        }
        self.inner
            .upsert_answer(attempt_id, question_id, value, answered_at)
            .await
    }

    async fn get_answers(
        &self,
        attempt_id: Uuid,
    ) -> assessment_engine::error::Result<Vec<assessment_engine::models::answer::Answer>> {
        self.inner.get_answers(attempt_id).await
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        to: AttemptStatus,
        completed_at: DateTime<Utc>,
        time_spent_seconds: i32,
    ) -> assessment_engine::error::Result<assessment_engine::store::FinalizeOutcome> {
        self.inner
            .finalize_attempt(attempt_id, to, completed_at, time_spent_seconds)
            .await
    }

    async fn set_score(
        &self,
        attempt_id: Uuid,
        summary: &assessment_engine::models::score::ScoreSummary,
        passed: Option<bool>,
    ) -> assessment_engine::error::Result<()> {
        if self.score_failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("store unavailable".into()));
        }
        self.inner.set_score(attempt_id, summary, passed).await
    }
}

#[tokio::test]
async fn flush_failure_keeps_drafts_and_attempt_in_progress() {
    let memory = Arc::new(MemoryStore::new());
    let exam = seed_exam(&memory, 2, 0, 60, 1);
    let flaky = Arc::new(FlakyStore::new(memory.clone()));
    let service = AttemptService::new(flaky.clone(), memory.clone());

    let attempt = service
        .start_attempt(exam.id, Uuid::new_v4())
        .await
        .unwrap();
    let buffer = AnswerBuffer::new(attempt.id);
    buffer.set(1, "d");
    buffer.set(2, "d");

    flaky.set_failing(true);
    let err = service.submit(attempt.id, &buffer).await.unwrap_err();
    assert!(matches!(err, Error::FlushFailed(_)));

    // Nothing was finalized and the drafts are still pending.
    let unchanged = service.get_attempt(attempt.id).await.unwrap();
    assert_eq!(unchanged.status, AttemptStatus::InProgress);
    assert!(buffer.has_unflushed());

    // The retried submit converges once the store recovers.
    flaky.set_failing(false);
    let outcome = service.submit(attempt.id, &buffer).await.unwrap();
    assert!(outcome.is_finalized());
    assert_eq!(
        outcome.attempt().score,
        Some(Decimal::from(2)),
        "both drafts made it into the finalized attempt"
    );
}

#[tokio::test]
async fn scoring_failure_leaves_attempt_finalized_until_rescored() {
    let memory = Arc::new(MemoryStore::new());
    let exam = seed_exam(&memory, 2, 0, 60, 1);
    let flaky = Arc::new(FlakyStore::new(memory.clone()));
    let service = AttemptService::new(flaky.clone(), memory.clone());

    let attempt = service
        .start_attempt(exam.id, Uuid::new_v4())
        .await
        .unwrap();
    let buffer = AnswerBuffer::new(attempt.id);
    buffer.set(1, "d");
    buffer.set(2, "d");

    // The submission itself must survive a scoring fault.
    flaky.set_score_failing(true);
    let outcome = service.submit(attempt.id, &buffer).await.unwrap();
    assert!(outcome.is_finalized());
    assert_eq!(outcome.attempt().status, AttemptStatus::Submitted);
    assert_eq!(outcome.attempt().score, None);
    assert_eq!(outcome.attempt().passed, None);

    flaky.set_score_failing(false);
    let rescored = service.rescore(attempt.id).await.unwrap();
    assert_eq!(rescored.score, Some(Decimal::from(2)));
    assert_eq!(rescored.percentage, Some(Decimal::ONE_HUNDRED));
    assert_eq!(rescored.passed, Some(true));
}

#[tokio::test]
async fn resume_restores_persisted_answers() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 3, 0, 60, 1);
    let engine = Engine::in_memory(store.clone());
    let student = Uuid::new_v4();

    let session = engine.open_session(exam.id, student).await.unwrap();
    let attempt_id = session.attempt().id;
    session.save_answer(1, "d");
    session.save_answer(2, "b");
    session.flush().await.unwrap();
    session.close();

    let resumed = engine.resume_session(attempt_id).await.unwrap();
    assert_eq!(resumed.answered_count(), 2);
    assert_eq!(resumed.answer(1).as_deref(), Some("d"));
    assert_eq!(resumed.answer(2).as_deref(), Some("b"));
    // Nothing is dirty until the student edits again.
    assert_eq!(resumed.flush().await.unwrap(), 0);

    resumed.save_answer(2, "d");
    assert_eq!(resumed.flush().await.unwrap(), 1);
}

#[tokio::test]
async fn answer_writes_after_finalize_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 2, 0, 60, 1);
    let service = AttemptService::new(store.clone(), store.clone());
    let attempt = service
        .start_attempt(exam.id, Uuid::new_v4())
        .await
        .unwrap();
    let buffer = AnswerBuffer::new(attempt.id);
    buffer.set(1, "d");
    service.submit(attempt.id, &buffer).await.unwrap();

    let err = store
        .upsert_answer(attempt.id, 2, "late", chrono::Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AttemptAlreadyFinalized));
    assert_eq!(store.get_answers(attempt.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn answers_flushed_before_finalize_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 3, 0, 60, 1);
    let service = AttemptService::new(store.clone(), store.clone());
    let attempt = service
        .start_attempt(exam.id, Uuid::new_v4())
        .await
        .unwrap();

    let buffer = AnswerBuffer::new(attempt.id);
    buffer.set(1, "a");
    buffer.flush(store.as_ref()).await.unwrap();
    buffer.set(1, "d");
    buffer.set(3, "d");
    service.submit(attempt.id, &buffer).await.unwrap();

    let answers = store.get_answers(attempt.id).await.unwrap();
    let values: Vec<_> = answers
        .iter()
        .map(|a| (a.question_id, a.value.clone()))
        .collect();
    assert_eq!(values, vec![(1, "d".to_string()), (3, "d".to_string())]);
}

#[tokio::test]
async fn autosave_persists_drafts_in_the_background() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 2, 0, 60, 1);
    let engine = Engine::in_memory(store.clone());

    let session = engine
        .open_session(exam.id, Uuid::new_v4())
        .await
        .unwrap();
    session.start_autosave(Duration::from_millis(20));
    session.save_answer(1, "d");

    tokio::time::sleep(Duration::from_millis(150)).await;
    let answers = store.get_answers(session.attempt().id).await.unwrap();
    assert_eq!(answers.len(), 1);
    session.close();
}

#[tokio::test]
async fn manual_submit_cancels_the_countdown() {
    let store = Arc::new(MemoryStore::new());
    let exam = seed_exam(&store, 1, 0, 60, 1);
    let service = AttemptService::new(store.clone(), store.clone());
    let scheduler = Arc::new(CountdownScheduler::with_tick(Duration::from_millis(10)));

    let mut session = ExamSession::open(service, scheduler.clone(), exam.id, Uuid::new_v4())
        .await
        .unwrap();
    session.save_answer(1, "d");
    session.start_countdown(|_| {});
    let attempt_id = session.attempt().id;
    assert!(scheduler.is_running(attempt_id));

    session.submit().await.unwrap();
    assert!(!scheduler.is_running(attempt_id));
}
