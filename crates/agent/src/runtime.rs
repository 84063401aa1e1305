use std::sync::Arc;

use leviathan_core::config::AppConfig;
use leviathan_core::decision_matrix::DecisionMatrix;
use leviathan_core::domain::history::{SessionId, Turn};
use leviathan_core::domain::result::PipelineResult;
use leviathan_core::errors::{
    DecisionMatrixError, GatewayError, HistoryError, InferenceError, PipelineError,
    PromptBookError,
};
use leviathan_core::prompts::PromptBook;
use thiserror::Error;
use tracing::info;

use crate::gateway::LanguageModelGateway;
use crate::history::{HistoryStore, InMemoryHistoryStore};
use crate::inference::{HttpInferenceTransport, RemoteInferenceClient};
use crate::llm::client_from_config;
use crate::pipeline::{CallPolicy, LeviathanPipeline};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    PromptBook(#[from] PromptBookError),
    #[error(transparent)]
    DecisionMatrix(#[from] DecisionMatrixError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Everything a surface needs to serve conversations.
pub struct AgentRuntime {
    pipeline: Arc<LeviathanPipeline>,
}

impl AgentRuntime {
    pub fn new(pipeline: LeviathanPipeline) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }

    /// Wires the HTTP-backed pipeline from configuration, with in-memory
    /// history.
    pub fn from_config(config: &AppConfig) -> Result<Self, RuntimeError> {
        let book = PromptBook::load_or_default(&config.pipeline.prompt_file)?;
        let matrix = DecisionMatrix::parse(book.decision_matrix_text())?;

        let gateway = LanguageModelGateway::new(&book, client_from_config(&config.llm)?)?;
        let transport = HttpInferenceTransport::from_config(&config.inference)?;
        let inference = RemoteInferenceClient::new(Arc::new(transport));
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());

        let pipeline = LeviathanPipeline::new(
            gateway,
            inference,
            matrix,
            history,
            config.pipeline.working_language.clone(),
            CallPolicy::from_config(&config.pipeline),
        )?;

        info!(
            event_name = "runtime.initialized",
            prompt_file = %config.pipeline.prompt_file.display(),
            llm_model = %config.llm.model,
            missing_intents = pipeline.matrix().missing_intents().len(),
            "agent runtime ready"
        );
        Ok(Self::new(pipeline))
    }

    pub async fn handle_message(
        &self,
        session: &SessionId,
        text: &str,
    ) -> Result<PipelineResult, PipelineError> {
        self.pipeline.run(session, text).await
    }

    pub async fn history(&self, session: &SessionId) -> Result<Vec<Turn>, HistoryError> {
        self.pipeline.history().get_all(session).await
    }

    pub async fn end_session(&self, session: &SessionId) -> Result<(), HistoryError> {
        self.pipeline.history().clear(session).await
    }

    pub fn matrix(&self) -> &DecisionMatrix {
        self.pipeline.matrix()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use leviathan_core::config::AppConfig;
    use leviathan_core::domain::intent::IntentLabel;

    use super::{AgentRuntime, RuntimeError};

    #[test]
    fn builds_from_default_config_without_a_prompt_file() {
        let mut config = AppConfig::default();
        config.pipeline.prompt_file = PathBuf::from("/nonexistent/leviathan/prompt.json");

        let runtime = AgentRuntime::from_config(&config).expect("runtime");
        assert_eq!(runtime.matrix().missing_intents(), vec![IntentLabel::Feedback]);
    }

    #[test]
    fn broken_prompt_books_stop_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prompt.json");
        fs::write(&path, r#"{"leviathan": {"decision_matrix": "intent|knowledge_base"}}"#)
            .expect("write");

        let mut config = AppConfig::default();
        config.pipeline.prompt_file = path;

        assert!(matches!(AgentRuntime::from_config(&config), Err(RuntimeError::DecisionMatrix(_))));
    }
}
