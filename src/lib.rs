pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::services::attempt_service::AttemptService;
use crate::services::countdown::CountdownScheduler;
use crate::services::progress_service::ProgressService;
use crate::services::session::ExamSession;
use crate::store::{
    AttemptStore, MemoryStore, PgAttemptStore, PgProgressStore, PgQuestionCatalog, ProgressStore,
    QuestionCatalog,
};

/// Wires the stores, services and the shared countdown scheduler together.
/// Page-level UI holds one of these and opens sessions from it.
#[derive(Clone)]
pub struct Engine {
    pub attempt_service: AttemptService,
    pub progress_service: ProgressService,
    pub scheduler: Arc<CountdownScheduler>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        catalog: Arc<dyn QuestionCatalog>,
        progress_store: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            attempt_service: AttemptService::new(store, catalog),
            progress_service: ProgressService::new(progress_store),
            scheduler: Arc::new(CountdownScheduler::new()),
        }
    }

    /// Postgres-backed engine over one shared pool. Requires an initialized
    /// configuration, like the pool itself.
    pub fn postgres(pool: PgPool) -> Self {
        let tick = std::time::Duration::from_millis(config::get_config().countdown_tick_ms);
        Self {
            attempt_service: AttemptService::new(
                Arc::new(PgAttemptStore::new(pool.clone())),
                Arc::new(PgQuestionCatalog::new(pool.clone())),
            ),
            progress_service: ProgressService::new(Arc::new(PgProgressStore::new(pool))),
            scheduler: Arc::new(CountdownScheduler::with_tick(tick)),
        }
    }

    /// Engine over a single in-memory store, for tests and embedding.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self::new(store.clone(), store.clone(), store)
    }

    pub async fn open_session(&self, exam_id: Uuid, student_id: Uuid) -> Result<ExamSession> {
        ExamSession::open(
            self.attempt_service.clone(),
            self.scheduler.clone(),
            exam_id,
            student_id,
        )
        .await
    }

    pub async fn resume_session(&self, attempt_id: Uuid) -> Result<ExamSession> {
        ExamSession::resume(
            self.attempt_service.clone(),
            self.scheduler.clone(),
            attempt_id,
        )
        .await
    }
}
