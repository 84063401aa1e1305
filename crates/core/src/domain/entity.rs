use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::model_output::parse_model_json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum EntityType {
    ProductQuantity,
    ProductType,
    ProductCharacteristics,
    ProductBrand,
    ProductGender,
    ProductSize,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        Self::ProductQuantity,
        Self::ProductType,
        Self::ProductCharacteristics,
        Self::ProductBrand,
        Self::ProductGender,
        Self::ProductSize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductQuantity => "PRODUCT_QUANTITY",
            Self::ProductType => "PRODUCT_TYPE",
            Self::ProductCharacteristics => "PRODUCT_CHARACTERISTICS",
            Self::ProductBrand => "PRODUCT_BRAND",
            Self::ProductGender => "PRODUCT_GENDER",
            Self::ProductSize => "PRODUCT_SIZE",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|entity_type| entity_type.as_str() == normalized)
            .ok_or_else(|| format!("unknown entity type `{}`", value.trim()))
    }
}

impl TryFrom<String> for EntityType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Whether an entity belongs to the current question or an earlier turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Relevance {
    #[default]
    Current,
    Previous,
    Irrelevant,
}

impl FromStr for Relevance {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "current" => Ok(Self::Current),
            "previous" => Ok(Self::Previous),
            "irrelevant" => Ok(Self::Irrelevant),
            other => Err(format!("unknown relevance `{other}`")),
        }
    }
}

impl TryFrom<String> for Relevance {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub value: String,
    #[serde(default)]
    pub relevance: Relevance,
    #[serde(default)]
    pub context: String,
}

impl Entity {
    /// An entity fresh out of the NER model: current, no context yet.
    pub fn detected(entity_type: EntityType, value: impl Into<String>) -> Self {
        Self {
            entity_type,
            value: value.into(),
            relevance: Relevance::Current,
            context: String::new(),
        }
    }

    pub fn to_human(&self) -> String {
        format!("{}: {}", self.entity_type, self.value)
    }
}

/// The `entity_contextualization` template output.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ContextualizedEntities {
    pub entities: Vec<Entity>,
}

impl ContextualizedEntities {
    pub fn from_model_output(text: &str) -> Result<Self, GatewayError> {
        parse_model_json("entity_contextualization", text)
    }
}

/// Renders entities for a prompt, separated by two spaces.
pub fn render_entities(entities: &[Entity]) -> String {
    entities.iter().map(Entity::to_human).collect::<Vec<_>>().join("  ")
}
