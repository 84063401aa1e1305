use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leviathan_agent::gateway::LanguageModelGateway;
use leviathan_agent::history::InMemoryHistoryStore;
use leviathan_agent::inference::{InferenceTransport, RemoteInferenceClient};
use leviathan_agent::llm::LlmClient;
use leviathan_agent::pipeline::{CallPolicy, LeviathanPipeline};
use leviathan_agent::runtime::AgentRuntime;
use leviathan_core::decision_matrix::DecisionMatrix;
use leviathan_core::domain::inference::{LabeledSpan, ModelKind};
use leviathan_core::errors::{GatewayError, InferenceError};
use leviathan_core::prompts::PromptBook;

pub const COMPLETE_MATRIX: &str = "intent|knowledge_base|entity_extraction\n\
inventory|graph|true\n\
checkout|graph|false\n\
irrelevant|null|false\n\
conversational|null|false\n\
feedback|embedding|false\n\
postSale|embedding|true";

pub const SENTIMENT: &str = r#"{"language": "english", "sentiment": "neutral", "aggressiveness": 1, "translation": "I want to pay"}"#;
pub const CHECKOUT_PLAN: &str = r#"{"knowledge_base": {"type": "graph", "shouldUse": true}, "action_type": {"intent": "checkout", "action": "process_checkout"}}"#;

pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    delay: Duration,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, GatewayError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies.lock().expect("replies").pop_front().ok_or_else(|| {
            GatewayError::Unavailable { message: "connection refused".into(), timeout: false }
        })
    }
}

/// Classifies every utterance as `checkout`.
struct CheckoutClassifier;

#[async_trait]
impl InferenceTransport for CheckoutClassifier {
    async fn infer(
        &self,
        model: ModelKind,
        _text: &str,
        _label_map: Option<&[String]>,
    ) -> Result<Vec<LabeledSpan>, InferenceError> {
        match model {
            ModelKind::Intent => Ok(vec![LabeledSpan::label("LABEL_1")]),
            ModelKind::Ner => Ok(Vec::new()),
        }
    }
}

pub fn runtime_with_matrix(matrix: &str, replies: &[&str]) -> Arc<AgentRuntime> {
    build(matrix, replies, Duration::ZERO, CallPolicy { max_retries: 0, ..CallPolicy::default() })
}

pub fn slow_runtime(policy_timeout: Duration) -> Arc<AgentRuntime> {
    build(
        COMPLETE_MATRIX,
        &[SENTIMENT],
        Duration::from_secs(5),
        CallPolicy { timeout: policy_timeout, max_retries: 0 },
    )
}

fn build(matrix: &str, replies: &[&str], delay: Duration, policy: CallPolicy) -> Arc<AgentRuntime> {
    let llm = Arc::new(ScriptedLlm {
        replies: Mutex::new(replies.iter().map(|reply| (*reply).to_string()).collect()),
        delay,
    });
    let gateway = LanguageModelGateway::new(&PromptBook::default(), llm).expect("gateway");
    let pipeline = LeviathanPipeline::new(
        gateway,
        RemoteInferenceClient::new(Arc::new(CheckoutClassifier)),
        DecisionMatrix::parse(matrix).expect("matrix"),
        Arc::new(InMemoryHistoryStore::new()),
        "english",
        policy,
    )
    .expect("pipeline");
    Arc::new(AgentRuntime::new(pipeline))
}
