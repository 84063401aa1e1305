//! Per-utterance decision pipeline.
//!
//! Stages run strictly in order: sentiment, intent, decision, then entity
//! extraction when the decision matrix asks for it. Each stage either yields
//! its typed output or ends the turn with a [`PipelineError`] naming the
//! stage. The one exception is a malformed contextualization answer, which
//! degrades to the unrefined NER entities.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use leviathan_core::config::PipelineConfig;
use leviathan_core::decision_matrix::DecisionMatrix;
use leviathan_core::domain::decision::{ActionPlan, DecisionOutcome};
use leviathan_core::domain::entity::{render_entities, ContextualizedEntities, Entity};
use leviathan_core::domain::history::{render_history, Role, SessionId};
use leviathan_core::domain::intent::IntentLabel;
use leviathan_core::domain::result::PipelineResult;
use leviathan_core::domain::sentiment::SentimentResult;
use leviathan_core::errors::{DecisionMatrixError, PipelineError, PipelineStage, StageError};
use leviathan_core::model_output::strip_backslashes;
use leviathan_core::prompts::TemplateId;
use tracing::{info, warn};

use crate::gateway::{template_variables, LanguageModelGateway, TemplateVariables};
use crate::history::HistoryStore;
use crate::inference::RemoteInferenceClient;

/// Timeout and retry budget applied to every remote call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), max_retries: 1 }
    }
}

impl CallPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.remote_timeout_secs),
            max_retries: config.max_retries,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    SentimentAnalyzed,
    IntentResolved,
    DecisionResolved,
    EntitiesExtracted,
    Merged,
    Done,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::SentimentAnalyzed => "sentiment_analyzed",
            Self::IntentResolved => "intent_resolved",
            Self::DecisionResolved => "decision_resolved",
            Self::EntitiesExtracted => "entities_extracted",
            Self::Merged => "merged",
            Self::Done => "done",
        }
    }
}

pub struct LeviathanPipeline {
    gateway: LanguageModelGateway,
    inference: RemoteInferenceClient,
    matrix: DecisionMatrix,
    matrix_text: String,
    history: Arc<dyn HistoryStore>,
    working_language: String,
    policy: CallPolicy,
}

impl LeviathanPipeline {
    pub fn new(
        gateway: LanguageModelGateway,
        inference: RemoteInferenceClient,
        matrix: DecisionMatrix,
        history: Arc<dyn HistoryStore>,
        working_language: impl Into<String>,
        policy: CallPolicy,
    ) -> Result<Self, DecisionMatrixError> {
        let matrix_text = matrix.to_text()?;
        Ok(Self {
            gateway,
            inference,
            matrix,
            matrix_text,
            history,
            working_language: working_language.into(),
            policy,
        })
    }

    pub fn matrix(&self) -> &DecisionMatrix {
        &self.matrix
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub async fn run(
        &self,
        session: &SessionId,
        utterance: &str,
    ) -> Result<PipelineResult, PipelineError> {
        self.transition(session, PipelineState::Start);
        match self.execute(session, utterance).await {
            Ok(result) => {
                self.transition(session, PipelineState::Done);
                Ok(result)
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.stage_failed",
                    session_id = %session,
                    stage = error.stage.as_str(),
                    retryable = error.retryable(),
                    error = %error.cause,
                    "pipeline turn failed"
                );
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        session: &SessionId,
        utterance: &str,
    ) -> Result<PipelineResult, PipelineError> {
        let sentiment = self.analyze_sentiment(utterance).await?;
        self.transition(session, PipelineState::SentimentAnalyzed);

        let translation = sentiment.translation.as_str();
        let inference = &self.inference;
        let intent = self
            .call_remote(PipelineStage::Intent, move || inference.classify_intent(translation))
            .await?;
        self.transition(session, PipelineState::IntentResolved);

        let decision = self.decide(intent, translation).await?;
        self.transition(session, PipelineState::DecisionResolved);

        let result = if decision.requires_entity_extraction() {
            let entities = self.extract_entities(session, translation).await?;
            self.transition(session, PipelineState::EntitiesExtracted);
            PipelineResult::new(decision, sentiment).with_entities(entities)
        } else {
            PipelineResult::new(decision, sentiment)
        };
        self.transition(session, PipelineState::Merged);

        Ok(result)
    }

    async fn analyze_sentiment(&self, utterance: &str) -> Result<SentimentResult, PipelineError> {
        let variables = template_variables([
            ("input", utterance.to_string()),
            ("language", self.working_language.clone()),
        ]);
        let output = self
            .complete(PipelineStage::Sentiment, TemplateId::SentimentAnalysis, &variables)
            .await?;

        let (sentiment, raw_aggressiveness) = SentimentResult::from_model_output_with_raw(&output)
            .map_err(|error| PipelineError::new(PipelineStage::Sentiment, error))?;
        if raw_aggressiveness != i64::from(sentiment.aggressiveness) {
            warn!(
                raw_aggressiveness,
                clamped = sentiment.aggressiveness,
                "aggressiveness outside 1..=5 was clamped"
            );
        }
        Ok(sentiment)
    }

    async fn decide(
        &self,
        intent: IntentLabel,
        translation: &str,
    ) -> Result<DecisionOutcome, PipelineError> {
        let route = self
            .matrix
            .resolve(intent)
            .map_err(|error| PipelineError::new(PipelineStage::Decision, error))?;

        let variables = template_variables([
            ("input", translation.to_string()),
            ("intent_type", intent.to_string()),
            ("decision_matrix", self.matrix_text.clone()),
        ]);
        let output =
            self.complete(PipelineStage::Decision, TemplateId::IntentReasoning, &variables).await?;
        let plan = ActionPlan::from_model_output(&output)
            .map_err(|error| PipelineError::new(PipelineStage::Decision, error))?;

        if plan.entity_extraction != route.requires_entity_extraction {
            warn!(
                intent = %intent,
                matrix = route.requires_entity_extraction,
                model = plan.entity_extraction,
                "reasoning disagrees with the decision matrix on entity extraction"
            );
        }

        Ok(DecisionOutcome { intent, route, plan })
    }

    async fn extract_entities(
        &self,
        session: &SessionId,
        translation: &str,
    ) -> Result<Vec<Entity>, PipelineError> {
        let stage = PipelineStage::Entities;
        let inference = &self.inference;
        let detected =
            self.call_remote(stage, move || inference.extract_entities(translation)).await?;

        let history = &self.history;
        let turns = self.call_remote(stage, move || history.get_all(session)).await?;

        let variables = template_variables([
            ("conversation_history", render_history(&turns)),
            ("question", translation.to_string()),
            ("entities", render_entities(&detected)),
        ]);
        let output = self.complete(stage, TemplateId::EntityContextualization, &variables).await?;
        let output = strip_backslashes(&output);

        // Appended before parsing and never rolled back.
        self.history
            .append(session, Role::User, translation)
            .await
            .map_err(|error| PipelineError::new(stage, error))?;
        self.history
            .append(session, Role::Assistant, &output)
            .await
            .map_err(|error| PipelineError::new(stage, error))?;

        match ContextualizedEntities::from_model_output(&output) {
            Ok(refined) => Ok(refined.entities),
            Err(error) => {
                warn!(
                    session_id = %session,
                    error = %error,
                    "contextualization output unusable; returning unrefined entities"
                );
                Ok(detected)
            }
        }
    }

    async fn complete(
        &self,
        stage: PipelineStage,
        template: TemplateId,
        variables: &TemplateVariables,
    ) -> Result<String, PipelineError> {
        let gateway = &self.gateway;
        self.call_remote(stage, move || gateway.complete(template, variables)).await
    }

    /// Runs `operation` under the call policy. Only retryable failures are
    /// attempted again.
    async fn call_remote<T, E, F, Fut>(
        &self,
        stage: PipelineStage,
        mut operation: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<StageError>,
    {
        let mut attempt = 0;
        loop {
            let failure = match tokio::time::timeout(self.policy.timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error.into(),
                Err(_) => StageError::Timeout {
                    millis: u64::try_from(self.policy.timeout.as_millis()).unwrap_or(u64::MAX),
                },
            };

            if failure.is_retryable() && attempt < self.policy.max_retries {
                attempt += 1;
                warn!(
                    stage = stage.as_str(),
                    attempt,
                    error = %failure,
                    "remote call failed; retrying"
                );
                continue;
            }

            return Err(PipelineError::new(stage, failure));
        }
    }

    fn transition(&self, session: &SessionId, state: PipelineState) {
        info!(
            event_name = "pipeline.stage_completed",
            session_id = %session,
            stage = state.as_str(),
            "pipeline state reached"
        );
    }
}
