//! The prompt book: prompt templates and the decision matrix, kept together in
//! one JSON file so operators can edit both without a rebuild.
//!
//! ```json
//! { "leviathan": { "sentiment_prompt": "...", "thinking_prompt": "...",
//!                  "entities_prompt": "...", "decision_matrix": "..." } }
//! ```
//!
//! Unknown keys, at the top level or inside the `leviathan` section, survive a
//! load/save cycle untouched.

use std::fmt;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::decision_matrix::DEFAULT_DECISION_MATRIX;
use crate::errors::PromptBookError;

pub const SECTION: &str = "leviathan";
pub const DECISION_MATRIX_KEY: &str = "decision_matrix";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TemplateId {
    SentimentAnalysis,
    IntentReasoning,
    EntityContextualization,
}

impl TemplateId {
    pub const ALL: [TemplateId; 3] =
        [Self::SentimentAnalysis, Self::IntentReasoning, Self::EntityContextualization];

    pub fn name(&self) -> &'static str {
        match self {
            Self::SentimentAnalysis => "sentiment_analysis",
            Self::IntentReasoning => "intent_reasoning",
            Self::EntityContextualization => "entity_contextualization",
        }
    }

    /// Key of the template text inside the prompt book section.
    pub fn key(&self) -> &'static str {
        match self {
            Self::SentimentAnalysis => "sentiment_prompt",
            Self::IntentReasoning => "thinking_prompt",
            Self::EntityContextualization => "entities_prompt",
        }
    }

    pub fn required_variables(&self) -> &'static [&'static str] {
        match self {
            Self::SentimentAnalysis => &["input", "language"],
            Self::IntentReasoning => &["input", "intent_type", "decision_matrix"],
            Self::EntityContextualization => &["conversation_history", "question", "entities"],
        }
    }

    pub fn default_text(&self) -> &'static str {
        match self {
            Self::SentimentAnalysis => DEFAULT_SENTIMENT_PROMPT,
            Self::IntentReasoning => DEFAULT_THINKING_PROMPT,
            Self::EntityContextualization => DEFAULT_ENTITIES_PROMPT,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const DEFAULT_SENTIMENT_PROMPT: &str = r#"You are a multilingual customer care analyst for an online store.
Analyse the customer message below.
Message: {{ input }}
Answer with a single JSON object and nothing else, using these keys:
"language": the language the message is written in,
"sentiment": one word describing the customer's mood,
"aggressiveness": an integer from 1 (calm) to 5 (hostile),
"translation": the message translated to {{ language }}."#;

const DEFAULT_THINKING_PROMPT: &str = r#"You are the routing brain of an e-commerce assistant.
The intent classifier labelled the customer request as: {{ intent_type }}
Use this decision matrix (columns separated by |) to choose a knowledge base and an action:
{{ decision_matrix }}
Customer request: {{ input }}
Answer with a single JSON object and nothing else, shaped like
{"knowledge_base": {"type": "graph|embedding|null", "shouldUse": true}, "action_type": {"intent": "<intent>", "action": "<action>"}, "entity_extraction": true}"#;

const DEFAULT_ENTITIES_PROMPT: &str = r#"You are an AI agent tracking entities across a shopping conversation.
Use the entities found by the NER model and the conversation history to decide whether the user's current question refers to earlier entities or introduces new ones.
Conversation history:
{{ conversation_history }}
User input:
{{ question }}
Entities:
{{ entities }}
Answer with a single JSON object and nothing else:
{"entities": [{"type": "<entity type>", "value": "<value>", "relevance": "current|previous|irrelevant", "context": "<how the entity relates to the question and the history>"}]}
Keep previous entities only when they are linked to the current question."#;

#[derive(Clone, Debug, PartialEq)]
pub struct PromptBook {
    root: Map<String, Value>,
}

impl Default for PromptBook {
    fn default() -> Self {
        let mut section = Map::new();
        for template in TemplateId::ALL {
            section.insert(template.key().to_string(), Value::from(template.default_text()));
        }
        section.insert(DECISION_MATRIX_KEY.to_string(), Value::from(DEFAULT_DECISION_MATRIX));

        let mut root = Map::new();
        root.insert(SECTION.to_string(), Value::Object(section));
        Self { root }
    }
}

impl PromptBook {
    pub fn load(path: &Path) -> Result<Self, PromptBookError> {
        let raw = fs::read_to_string(path).map_err(|error| PromptBookError::Read {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_json(&raw).map_err(|error| match error {
            PromptBookError::Parse { message, .. } => {
                PromptBookError::Parse { path: path.display().to_string(), message }
            }
            other => other,
        })
    }

    /// Loads `path` when it exists, otherwise the built-in book.
    pub fn load_or_default(path: &Path) -> Result<Self, PromptBookError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, PromptBookError> {
        let value: Value = serde_json::from_str(raw).map_err(|error| PromptBookError::Parse {
            path: "<inline>".to_string(),
            message: error.to_string(),
        })?;
        let Value::Object(root) = value else {
            return Err(PromptBookError::Parse {
                path: "<inline>".to_string(),
                message: "top level must be a JSON object".to_string(),
            });
        };

        let book = Self { root };
        let section = book.section().ok_or_else(|| PromptBookError::MissingSection(SECTION.into()))?;
        for (key, value) in section {
            if !value.is_string() {
                return Err(PromptBookError::InvalidKey { key: key.clone() });
            }
        }
        Ok(book)
    }

    fn section(&self) -> Option<&Map<String, Value>> {
        self.root.get(SECTION).and_then(Value::as_object)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.section().and_then(|section| section.get(key)).and_then(Value::as_str)
    }

    /// Template text for `template`, falling back to the built-in text when
    /// the book does not carry one.
    pub fn template(&self, template: TemplateId) -> &str {
        self.text(template.key()).unwrap_or_else(|| template.default_text())
    }

    pub fn is_customized(&self, template: TemplateId) -> bool {
        self.text(template.key()).is_some()
    }

    pub fn decision_matrix_text(&self) -> &str {
        self.text(DECISION_MATRIX_KEY).unwrap_or(DEFAULT_DECISION_MATRIX)
    }

    pub fn with_decision_matrix(mut self, text: impl Into<String>) -> Self {
        let section = self
            .root
            .entry(SECTION.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !section.is_object() {
            *section = Value::Object(Map::new());
        }
        if let Value::Object(section) = section {
            section.insert(DECISION_MATRIX_KEY.to_string(), Value::String(text.into()));
        }
        self
    }

    pub fn to_json(&self) -> Result<String, PromptBookError> {
        serde_json::to_string_pretty(&self.root).map_err(|error| PromptBookError::Write {
            path: "<inline>".to_string(),
            message: error.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), PromptBookError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|error| PromptBookError::Write {
            path: path.display().to_string(),
            message: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;

    use super::{PromptBook, TemplateId};
    use crate::decision_matrix::{DecisionMatrix, DEFAULT_DECISION_MATRIX};
    use crate::errors::PromptBookError;

    #[test]
    fn default_templates_mention_every_required_variable() {
        let book = PromptBook::default();
        for template in TemplateId::ALL {
            let text = book.template(template);
            for variable in template.required_variables() {
                assert!(
                    text.contains(&format!("{{{{ {variable} }}}}")),
                    "{template} should use {variable}"
                );
            }
        }
        assert!(DecisionMatrix::parse(book.decision_matrix_text()).is_ok());
    }

    #[test]
    fn missing_prompts_fall_back_to_defaults() {
        let book = PromptBook::from_json(
            r#"{"leviathan": {"sentiment_prompt": "custom {{ input }} {{ language }}"}}"#,
        )
        .expect("book");

        assert_eq!(book.template(TemplateId::SentimentAnalysis), "custom {{ input }} {{ language }}");
        assert!(book.is_customized(TemplateId::SentimentAnalysis));
        assert!(!book.is_customized(TemplateId::IntentReasoning));
        assert_eq!(book.decision_matrix_text(), DEFAULT_DECISION_MATRIX);
    }

    #[test]
    fn rejects_books_without_a_section_or_with_non_string_values() {
        assert_eq!(
            PromptBook::from_json(r#"{"other": {}}"#),
            Err(PromptBookError::MissingSection("leviathan".into()))
        );
        assert_eq!(
            PromptBook::from_json(r#"{"leviathan": {"thinking_prompt": 3}}"#),
            Err(PromptBookError::InvalidKey { key: "thinking_prompt".into() })
        );
        assert!(matches!(PromptBook::from_json("[]"), Err(PromptBookError::Parse { .. })));
    }

    #[test]
    fn saving_a_new_matrix_keeps_every_other_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prompt.json");
        fs::write(
            &path,
            r#"{"leviathan": {"sentiment_prompt": "s", "thinking_prompt": "t", "decision_matrix": "old", "notes": "keep me"}, "other_app": {"x": 1}}"#,
        )
        .expect("write");

        let book = PromptBook::load(&path).expect("load").with_decision_matrix("intent|knowledge_base|entity_extraction");
        book.save(&path).expect("save");

        let saved: Value = serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(saved["leviathan"]["decision_matrix"], "intent|knowledge_base|entity_extraction");
        assert_eq!(saved["leviathan"]["sentiment_prompt"], "s");
        assert_eq!(saved["leviathan"]["notes"], "keep me");
        assert_eq!(saved["other_app"]["x"], 1);
    }

    #[test]
    fn load_or_default_uses_built_in_book_for_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let book = PromptBook::load_or_default(&dir.path().join("absent.json")).expect("book");
        assert_eq!(book, PromptBook::default());
    }
}
