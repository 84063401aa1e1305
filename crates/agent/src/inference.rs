//! Client for the remote intent and NER classifiers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leviathan_core::config::{InferenceConfig, ServiceEndpoint};
use leviathan_core::domain::entity::Entity;
use leviathan_core::domain::inference::{merge_ner_spans, LabeledSpan, ModelKind, NerLabelMap};
use leviathan_core::domain::intent::{IntentLabel, IntentLabelMap};
use leviathan_core::errors::InferenceError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The HTTP boundary: one call per model, raw labeled spans back.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    async fn infer(
        &self,
        model: ModelKind,
        text: &str,
        label_map: Option<&[String]>,
    ) -> Result<Vec<LabeledSpan>, InferenceError>;
}

struct Endpoint {
    url: String,
    token: Option<SecretString>,
    timeout: Duration,
}

impl Endpoint {
    fn from_config(endpoint: &ServiceEndpoint) -> Self {
        Self {
            url: format!("{}/infer", endpoint.base_url.trim_end_matches('/')),
            token: endpoint.token.clone(),
            timeout: Duration::from_secs(endpoint.timeout_secs),
        }
    }
}

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    label_map: Option<&'a [String]>,
}

/// Classifier pipelines answer either with a flat span list or with one list
/// per input text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferResponse {
    Flat(Vec<LabeledSpan>),
    Batched(Vec<Vec<LabeledSpan>>),
}

impl InferResponse {
    fn into_spans(self) -> Vec<LabeledSpan> {
        match self {
            Self::Flat(spans) => spans,
            Self::Batched(batches) => batches.into_iter().next().unwrap_or_default(),
        }
    }
}

pub struct HttpInferenceTransport {
    client: reqwest::Client,
    intent: Endpoint,
    ner: Endpoint,
}

impl HttpInferenceTransport {
    pub fn from_config(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder().build().map_err(|error| {
            InferenceError::Unavailable {
                model: ModelKind::Intent,
                message: error.to_string(),
                timeout: false,
            }
        })?;
        Ok(Self {
            client,
            intent: Endpoint::from_config(&config.intent),
            ner: Endpoint::from_config(&config.ner),
        })
    }

    fn endpoint(&self, model: ModelKind) -> &Endpoint {
        match model {
            ModelKind::Intent => &self.intent,
            ModelKind::Ner => &self.ner,
        }
    }
}

#[async_trait]
impl InferenceTransport for HttpInferenceTransport {
    async fn infer(
        &self,
        model: ModelKind,
        text: &str,
        label_map: Option<&[String]>,
    ) -> Result<Vec<LabeledSpan>, InferenceError> {
        let endpoint = self.endpoint(model);
        let unavailable = |message: String, timeout: bool| InferenceError::Unavailable {
            model,
            message,
            timeout,
        };

        let mut request = self
            .client
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .json(&InferRequest { text, label_map });
        if let Some(token) = &endpoint.token {
            request = request.bearer_auth(token.expose_secret());
        }

        debug!(model = %model, url = %endpoint.url, "calling inference service");
        let response = request
            .send()
            .await
            .map_err(|error| unavailable(error.to_string(), error.is_timeout()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| unavailable(error.to_string(), error.is_timeout()))?;
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}: {body}"), false));
        }

        serde_json::from_str::<InferResponse>(&body).map(InferResponse::into_spans).map_err(
            |error| InferenceError::MalformedResponse { model, message: error.to_string() },
        )
    }
}

/// Typed operations over the raw inference boundary.
pub struct RemoteInferenceClient {
    transport: Arc<dyn InferenceTransport>,
    intent_labels: IntentLabelMap,
    ner_labels: NerLabelMap,
}

impl RemoteInferenceClient {
    pub fn new(transport: Arc<dyn InferenceTransport>) -> Self {
        Self::with_label_maps(transport, IntentLabelMap::default(), NerLabelMap::default())
    }

    pub fn with_label_maps(
        transport: Arc<dyn InferenceTransport>,
        intent_labels: IntentLabelMap,
        ner_labels: NerLabelMap,
    ) -> Self {
        Self { transport, intent_labels, ner_labels }
    }

    /// Returns the highest-scoring label (or the first, when unscored).
    pub async fn classify_intent(&self, text: &str) -> Result<IntentLabel, InferenceError> {
        let spans = self.transport.infer(ModelKind::Intent, text, None).await?;
        let top = spans
            .iter()
            .reduce(|best, span| match (best.score, span.score) {
                (Some(best_score), Some(score)) if score > best_score => span,
                _ => best,
            })
            .ok_or(InferenceError::EmptyResult { model: ModelKind::Intent })?;

        let intent = self.intent_labels.map(&top.label)?;
        debug!(raw_label = %top.label, intent = %intent, "intent classified");
        Ok(intent)
    }

    pub async fn extract_entities(&self, text: &str) -> Result<Vec<Entity>, InferenceError> {
        let spans =
            self.transport.infer(ModelKind::Ner, text, Some(self.ner_labels.labels())).await?;
        merge_ner_spans(text, &spans, &self.ner_labels)
    }
}
