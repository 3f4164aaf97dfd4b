use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::orchestrator_job::BackupDeps;
use crate::types::BackupSession;

pub type SharedState = Arc<AppState>;

#[derive(Clone)]
pub struct AppState {
    /// Sessions whose progress stream has not been opened yet.
    pub sessions: Arc<RwLock<HashMap<Uuid, BackupSession>>>,
    pub deps: Arc<BackupDeps>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig, deps: Arc<BackupDeps>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            deps,
            config,
        }
    }

    pub async fn insert_session(&self, session: BackupSession) {
        self.sessions.write().await.insert(session.id, session);
    }

    /// Remove and return a pending session; a session can be taken once.
    pub async fn take_session(&self, id: Uuid) -> Option<BackupSession> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn pending_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions created before `cutoff`; returns how many were dropped.
    pub async fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.created_at >= cutoff);
        before - sessions.len()
    }
}
