use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::domain::intent::IntentLabel;
use crate::errors::GatewayError;
use crate::model_output::parse_model_json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum KnowledgeBase {
    Graph,
    Embedding,
    Null,
}

impl KnowledgeBase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graph => "graph",
            Self::Embedding => "embedding",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeBase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "graph" => Ok(Self::Graph),
            "embedding" | "embeddings" => Ok(Self::Embedding),
            "null" | "none" | "" => Ok(Self::Null),
            other => Err(format!("unknown knowledge base `{other}`")),
        }
    }
}

impl TryFrom<String> for KnowledgeBase {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Routing policy for one intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionMatrixEntry {
    pub intent: IntentLabel,
    pub knowledge_base: KnowledgeBase,
    pub requires_entity_extraction: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseChoice {
    #[serde(rename = "type")]
    pub kind: KnowledgeBase,
    #[serde(rename = "shouldUse", default)]
    pub should_use: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionType {
    pub intent: String,
    pub action: String,
}

/// The model's reasoning about what to do with a classified utterance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub knowledge_base: KnowledgeBaseChoice,
    pub action_type: ActionType,
    #[serde(default)]
    pub entity_extraction: bool,
}

impl ActionPlan {
    pub fn from_model_output(text: &str) -> Result<Self, GatewayError> {
        parse_model_json("intent_reasoning", text)
    }
}

/// Everything the decision stage settled on.
///
/// Serialises the matrix route at the top level, where it cannot be confused
/// with the model's own opinion; the raw plan is kept under `plan`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub intent: IntentLabel,
    pub route: DecisionMatrixEntry,
    pub plan: ActionPlan,
}

impl DecisionOutcome {
    pub fn requires_entity_extraction(&self) -> bool {
        self.route.requires_entity_extraction
    }
}

impl Serialize for DecisionOutcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Document<'a> {
            intent: IntentLabel,
            knowledge_base: KnowledgeBase,
            requires_entity_extraction: bool,
            action_type: &'a ActionType,
            plan: &'a ActionPlan,
        }

        Document {
            intent: self.intent,
            knowledge_base: self.route.knowledge_base,
            requires_entity_extraction: self.route.requires_entity_extraction,
            action_type: &self.plan.action_type,
            plan: &self.plan,
        }
        .serialize(serializer)
    }
}
