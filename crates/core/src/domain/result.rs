use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::domain::decision::DecisionOutcome;
use crate::domain::entity::Entity;
use crate::domain::sentiment::SentimentResult;

/// The structured answer for one utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineResult {
    pub decision: DecisionOutcome,
    pub sentiment: SentimentResult,
    pub entities: Option<Vec<Entity>>,
}

impl PipelineResult {
    pub fn new(decision: DecisionOutcome, sentiment: SentimentResult) -> Self {
        Self { decision, sentiment, entities: None }
    }

    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Flattens the layers into one object: decision, then sentiment, then
    /// entities, later keys overriding earlier ones.
    pub fn to_document(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut document = Map::new();
        merge_into(&mut document, serde_json::to_value(&self.decision)?);
        merge_into(&mut document, serde_json::to_value(&self.sentiment)?);
        if let Some(entities) = &self.entities {
            document.insert("entities".to_string(), serde_json::to_value(entities)?);
        }
        Ok(document)
    }
}

/// Shallow merge; non-object layers are ignored.
pub fn merge_into(target: &mut Map<String, Value>, layer: Value) {
    if let Value::Object(fields) = layer {
        for (key, value) in fields {
            target.insert(key, value);
        }
    }
}

impl Serialize for PipelineResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let document = self.to_document().map_err(serde::ser::Error::custom)?;
        document.serialize(serializer)
    }
}
