use crate::config::AppConfig;
use crate::db::executor::DuckDbExecutor;
use crate::generate::QueryGenerator;
use crate::llm::LlmManager;
use crate::schema::catalog::SchemaCatalog;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared application state for the web server. Each session owns one
/// QueryGenerator behind its own mutex, so conversation state has a single
/// writer per session.
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<SchemaCatalog>,
    pub llm: Arc<LlmManager>,
    pub executor: Arc<DuckDbExecutor>,
    sessions: RwLock<HashMap<String, Arc<Mutex<QueryGenerator>>>>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        catalog: Arc<SchemaCatalog>,
        llm: Arc<LlmManager>,
        executor: Arc<DuckDbExecutor>,
    ) -> Self {
        Self {
            config,
            catalog,
            llm,
            executor,
            sessions: RwLock::new(HashMap::new()),
            startup_time: chrono::Utc::now(),
        }
    }

    /// Fetch the session's generator, creating it on first use.
    pub async fn session(&self, session_id: &str) -> Arc<Mutex<QueryGenerator>> {
        if let Some(generator) = self.sessions.read().await.get(session_id) {
            return Arc::clone(generator);
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(QueryGenerator::new(
                Arc::clone(&self.llm),
                &self.catalog,
                &self.config,
            )))
        }))
    }

    /// Drop a session's conversation history. Returns false for unknown ids.
    pub async fn clear_session(&self, session_id: &str) -> bool {
        let generator = {
            let sessions = self.sessions.read().await;
            sessions.get(session_id).cloned()
        };

        match generator {
            Some(generator) => {
                generator.lock().await.clear_conversation();
                true
            }
            None => false,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
