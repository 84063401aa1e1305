use std::collections::HashMap;

use async_trait::async_trait;
use leviathan_core::domain::history::{Role, SessionId, Turn};
use leviathan_core::errors::HistoryError;
use tokio::sync::RwLock;

/// Ordered, session-scoped conversation log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, session: &SessionId, role: Role, text: &str) -> Result<(), HistoryError>;
    async fn get_all(&self, session: &SessionId) -> Result<Vec<Turn>, HistoryError>;
    async fn clear(&self, session: &SessionId) -> Result<(), HistoryError>;
}

#[derive(Default)]
pub struct InMemoryHistoryStore {
    sessions: RwLock<HashMap<SessionId, Vec<Turn>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(
        &self,
        session: &SessionId,
        role: Role,
        text: &str,
    ) -> Result<(), HistoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session.clone()).or_default().push(Turn::new(role, text));
        Ok(())
    }

    async fn get_all(&self, session: &SessionId) -> Result<Vec<Turn>, HistoryError> {
        Ok(self.sessions.read().await.get(session).cloned().unwrap_or_default())
    }

    async fn clear(&self, session: &SessionId) -> Result<(), HistoryError> {
        self.sessions.write().await.remove(session);
        Ok(())
    }
}
