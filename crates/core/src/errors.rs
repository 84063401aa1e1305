use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::inference::ModelKind;
use crate::domain::intent::IntentLabel;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("template `{template}` is missing required variable `{variable}`")]
    TemplateVariable { template: String, variable: String },
    #[error("template `{template}` failed to render: {message}")]
    Render { template: String, message: String },
    #[error("language model unavailable: {message}")]
    Unavailable { message: String, timeout: bool },
    #[error("could not parse `{template}` output: {message}")]
    ResponseParse { template: String, message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("{model} inference service unavailable: {message}")]
    Unavailable { model: ModelKind, message: String, timeout: bool },
    #[error("intent classifier returned unmapped label `{0}`")]
    UnknownIntentLabel(String),
    #[error("ner model returned unknown tag `{0}`")]
    UnknownNerTag(String),
    #[error("{model} inference service returned no labels")]
    EmptyResult { model: ModelKind },
    #[error("{model} inference response is malformed: {message}")]
    MalformedResponse { model: ModelKind, message: String },
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("table is empty")]
    EmptyTable,
    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCountMismatch { line: usize, expected: usize, found: usize },
    #[error("cell at row {row}, column {column} contains a delimiter or line break")]
    DelimiterInCell { row: usize, column: usize },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionMatrixError {
    #[error("decision matrix has no row for intent `{intent}`")]
    Incomplete { intent: IntentLabel },
    #[error(transparent)]
    Parse(#[from] CodecError),
    #[error("decision matrix is missing the `{0}` column")]
    MissingColumn(String),
    #[error("decision matrix line {line}: {message}")]
    InvalidRow { line: usize, message: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PromptBookError {
    #[error("failed to read prompt book {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse prompt book {path}: {message}")]
    Parse { path: String, message: String },
    #[error("prompt book has no `{0}` section")]
    MissingSection(String),
    #[error("prompt book key `{key}` must be a string")]
    InvalidKey { key: String },
    #[error("failed to write prompt book {path}: {message}")]
    Write { path: String, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Sentiment,
    Intent,
    Decision,
    Entities,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sentiment => "sentiment",
            Self::Intent => "intent",
            Self::Decision => "decision",
            Self::Entities => "entities",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    DecisionMatrix(#[from] DecisionMatrixError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("remote call timed out after {millis}ms")]
    Timeout { millis: u64 },
}

impl StageError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(error) => error.is_retryable(),
            Self::Inference(error) => error.is_retryable(),
            Self::History(_) | Self::Timeout { .. } => true,
            Self::DecisionMatrix(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Gateway(GatewayError::Unavailable { timeout: true, .. })
                | Self::Inference(InferenceError::Unavailable { timeout: true, .. })
        )
    }
}

/// A failed utterance, tagged with the stage that failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("pipeline failed at {stage} stage: {cause}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    #[source]
    pub cause: StageError,
}

impl PipelineError {
    pub fn new(stage: PipelineStage, cause: impl Into<StageError>) -> Self {
        Self { stage, cause: cause.into() }
    }

    pub fn retryable(&self) -> bool {
        self.cause.is_retryable()
    }

    /// The one message a chat surface shows for a failed turn.
    pub fn user_message(&self) -> String {
        let step = match self.stage {
            PipelineStage::Sentiment => "understanding your message",
            PipelineStage::Intent => "working out what you need",
            PipelineStage::Decision => "deciding how to help",
            PipelineStage::Entities => "picking out the products you mentioned",
        };
        if self.retryable() {
            format!("Something went wrong while {step} ({} stage). Please try again.", self.stage)
        } else {
            format!("Something went wrong while {step} ({} stage).", self.stage)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DecisionMatrixError, GatewayError, InferenceError, PipelineError, PipelineStage,
        StageError,
    };
    use crate::domain::inference::ModelKind;
    use crate::domain::intent::IntentLabel;

    #[test]
    fn transport_failures_are_retryable() {
        let error = PipelineError::new(
            PipelineStage::Intent,
            InferenceError::Unavailable {
                model: ModelKind::Intent,
                message: "connection refused".into(),
                timeout: false,
            },
        );
        assert!(error.retryable());
        assert!(error.user_message().contains("intent stage"));
        assert!(error.user_message().ends_with("Please try again."));
    }

    #[test]
    fn parse_and_matrix_failures_are_not_retryable() {
        let parse = PipelineError::new(
            PipelineStage::Sentiment,
            GatewayError::ResponseParse { template: "sentiment_analysis".into(), message: "x".into() },
        );
        assert!(!parse.retryable());

        let matrix = PipelineError::new(
            PipelineStage::Decision,
            DecisionMatrixError::Incomplete { intent: IntentLabel::Feedback },
        );
        assert!(!matrix.retryable());
        assert_eq!(matrix.to_string(), "pipeline failed at decision stage: decision matrix has no row for intent `feedback`");
    }

    #[test]
    fn timeouts_are_reported_as_such() {
        assert!(StageError::Timeout { millis: 10 }.is_timeout());
        assert!(StageError::from(GatewayError::Unavailable { message: "slow".into(), timeout: true })
            .is_timeout());
        assert!(!StageError::from(GatewayError::Unavailable { message: "down".into(), timeout: false })
            .is_timeout());
    }

    #[test]
    fn stage_names_serialize_in_snake_case() {
        let value = serde_json::to_value(PipelineStage::Entities).expect("serialize");
        assert_eq!(value, serde_json::json!("entities"));
    }
}
