use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::entity::{Entity, EntityType};
use crate::errors::InferenceError;

/// The remote classifiers Leviathan knows how to call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Intent,
    Ner,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Ner => "ner",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of an inference response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabeledSpan {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl LabeledSpan {
    pub fn label(label: impl Into<String>) -> Self {
        Self { label: label.into(), score: None, word: None, start: None, end: None }
    }

    pub fn word(label: impl Into<String>, word: impl Into<String>) -> Self {
        Self { word: Some(word.into()), ..Self::label(label) }
    }

    pub fn with_offsets(mut self, start: usize, end: usize) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn to_human(&self) -> String {
        match &self.word {
            Some(word) => format!("{}: {}", self.label, word),
            None => self.label.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NerTag {
    Outside,
    Begin(EntityType),
    Inside(EntityType),
}

impl NerTag {
    pub fn entity_type(&self) -> Option<EntityType> {
        match self {
            Self::Outside => None,
            Self::Begin(entity_type) | Self::Inside(entity_type) => Some(*entity_type),
        }
    }
}

/// Maps tag ids emitted by the NER model to semantic tags.
///
/// The model emits two ids per entity type (begin, inside). The label list is
/// kept verbatim because the NER service expects it alongside each request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NerLabelMap {
    labels: Vec<String>,
    tags: Vec<NerTag>,
}

impl Default for NerLabelMap {
    fn default() -> Self {
        let mut labels = vec!["O".to_string()];
        for entity_type in EntityType::ALL {
            labels.push(entity_type.as_str().to_string());
            labels.push(entity_type.as_str().to_string());
        }
        match Self::from_labels(labels) {
            Ok(map) => map,
            Err(_) => Self { labels: Vec::new(), tags: Vec::new() },
        }
    }
}

impl NerLabelMap {
    /// Builds the map from an ordered label list.
    ///
    /// Accepts `O`, explicit `B-`/`I-` prefixes, or bare entity names where
    /// the first of a consecutive pair is the begin tag and the second the
    /// inside tag.
    pub fn from_labels(labels: Vec<String>) -> Result<Self, InferenceError> {
        let mut tags = Vec::with_capacity(labels.len());
        for label in &labels {
            let trimmed = label.trim();
            let tag = if trimmed.eq_ignore_ascii_case("o") {
                NerTag::Outside
            } else if let Some(name) = trimmed.strip_prefix("B-") {
                NerTag::Begin(parse_entity_type(name)?)
            } else if let Some(name) = trimmed.strip_prefix("I-") {
                NerTag::Inside(parse_entity_type(name)?)
            } else {
                let entity_type = parse_entity_type(trimmed)?;
                match tags.last() {
                    Some(NerTag::Begin(previous)) if *previous == entity_type => {
                        NerTag::Inside(entity_type)
                    }
                    _ => NerTag::Begin(entity_type),
                }
            };
            tags.push(tag);
        }

        Ok(Self { labels, tags })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Resolves a raw tag id (`LABEL_3`, `3`, `B-PRODUCT_TYPE`, `PRODUCT_TYPE`).
    pub fn resolve(&self, raw: &str) -> Result<NerTag, InferenceError> {
        let trimmed = raw.trim();
        let index = trimmed.strip_prefix("LABEL_").unwrap_or(trimmed).parse::<usize>().ok();
        if let Some(index) = index {
            return self
                .tags
                .get(index)
                .copied()
                .ok_or_else(|| InferenceError::UnknownNerTag(raw.to_string()));
        }

        if trimmed.eq_ignore_ascii_case("o") {
            return Ok(NerTag::Outside);
        }
        if let Some(name) = trimmed.strip_prefix("B-") {
            return parse_entity_type(name).map(NerTag::Begin);
        }
        if let Some(name) = trimmed.strip_prefix("I-") {
            return parse_entity_type(name).map(NerTag::Inside);
        }
        parse_entity_type(trimmed).map(NerTag::Begin)
    }
}

fn parse_entity_type(name: &str) -> Result<EntityType, InferenceError> {
    name.parse::<EntityType>().map_err(|_| InferenceError::UnknownNerTag(name.to_string()))
}

struct PendingEntity {
    entity_type: EntityType,
    value: String,
    start: Option<usize>,
    end: Option<usize>,
}

/// Collapses raw NER spans into entities.
///
/// An inside tag directly following a span of the same type extends it, so a
/// multi-token mention yields one entity instead of one per token. Spans
/// tagged `O` are dropped and break any running entity.
pub fn merge_ner_spans(
    text: &str,
    spans: &[LabeledSpan],
    label_map: &NerLabelMap,
) -> Result<Vec<Entity>, InferenceError> {
    let mut entities = Vec::new();
    let mut pending: Option<PendingEntity> = None;

    for span in spans {
        let tag = label_map.resolve(&span.label)?;
        let Some(entity_type) = tag.entity_type() else {
            if let Some(done) = pending.take() {
                entities.push(finish(text, done));
            }
            continue;
        };

        let Some(word) = span_text(text, span) else {
            return Err(InferenceError::MalformedResponse {
                model: ModelKind::Ner,
                message: format!("span `{}` carries neither a word nor offsets", span.label),
            });
        };

        let continues = matches!(tag, NerTag::Inside(_))
            && pending.as_ref().is_some_and(|current| current.entity_type == entity_type);

        if continues {
            if let Some(current) = pending.as_mut() {
                extend(current, &word, span);
            }
            continue;
        }

        if let Some(done) = pending.take() {
            entities.push(finish(text, done));
        }
        pending = Some(PendingEntity {
            entity_type,
            value: word.trim_start_matches("##").to_string(),
            start: span.start,
            end: span.end,
        });
    }

    if let Some(done) = pending.take() {
        entities.push(finish(text, done));
    }

    Ok(entities)
}

fn span_text(text: &str, span: &LabeledSpan) -> Option<String> {
    if let Some(word) = &span.word {
        return Some(word.clone());
    }
    match (span.start, span.end) {
        (Some(start), Some(end)) => text.get(start..end).map(str::to_string),
        _ => None,
    }
}

fn extend(current: &mut PendingEntity, word: &str, span: &LabeledSpan) {
    if let Some(piece) = word.strip_prefix("##") {
        current.value.push_str(piece);
    } else {
        current.value.push(' ');
        current.value.push_str(word);
    }
    current.end = match (current.end, span.end) {
        (Some(_), Some(end)) => Some(end),
        _ => None,
    };
}

fn finish(text: &str, pending: PendingEntity) -> Entity {
    let value = match (pending.start, pending.end) {
        (Some(start), Some(end)) => {
            text.get(start..end).map(str::to_string).unwrap_or(pending.value)
        }
        _ => pending.value,
    };
    Entity::detected(pending.entity_type, value.trim())
}
