pub mod config;
pub mod decision_matrix;
pub mod domain;
pub mod errors;
pub mod model_output;
pub mod prompts;
pub mod table;

pub use decision_matrix::DecisionMatrix;
pub use domain::decision::{ActionPlan, DecisionMatrixEntry, DecisionOutcome, KnowledgeBase};
pub use domain::entity::{Entity, EntityType, Relevance};
pub use domain::history::{Role, SessionId, Turn};
pub use domain::inference::{LabeledSpan, ModelKind, NerLabelMap};
pub use domain::intent::{IntentLabel, IntentLabelMap};
pub use domain::result::PipelineResult;
pub use domain::sentiment::{DetectedLanguage, SentimentResult};
pub use errors::{
    CodecError, DecisionMatrixError, GatewayError, HistoryError, InferenceError, PipelineError,
    PipelineStage, PromptBookError, StageError,
};
pub use prompts::{PromptBook, TemplateId};
pub use table::DelimitedTable;
