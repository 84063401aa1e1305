use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::InferenceError;

/// Coarse purpose behind an utterance, as produced by the intent classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntentLabel {
    #[serde(rename = "inventory")]
    Inventory,
    #[serde(rename = "checkout")]
    Checkout,
    #[serde(rename = "irrelevant")]
    Irrelevant,
    #[serde(rename = "conversational")]
    Conversational,
    #[serde(rename = "feedback")]
    Feedback,
    #[serde(rename = "postSale")]
    PostSale,
}

impl IntentLabel {
    pub const ALL: [IntentLabel; 6] = [
        Self::Inventory,
        Self::Checkout,
        Self::Irrelevant,
        Self::Conversational,
        Self::Feedback,
        Self::PostSale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inventory => "inventory",
            Self::Checkout => "checkout",
            Self::Irrelevant => "irrelevant",
            Self::Conversational => "conversational",
            Self::Feedback => "feedback",
            Self::PostSale => "postSale",
        }
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentLabel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
        Self::ALL
            .into_iter()
            .find(|label| label.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| format!("unknown intent `{}`", value.trim()))
    }
}

/// Translates raw classifier labels (`LABEL_0`, ...) into [`IntentLabel`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentLabelMap {
    labels: BTreeMap<String, IntentLabel>,
}

impl Default for IntentLabelMap {
    fn default() -> Self {
        Self::new(
            IntentLabel::ALL
                .into_iter()
                .enumerate()
                .map(|(index, label)| (format!("LABEL_{index}"), label)),
        )
    }
}

impl IntentLabelMap {
    pub fn new(entries: impl IntoIterator<Item = (String, IntentLabel)>) -> Self {
        Self { labels: entries.into_iter().collect() }
    }

    pub fn map(&self, raw_label: &str) -> Result<IntentLabel, InferenceError> {
        self.labels
            .get(raw_label.trim())
            .copied()
            .ok_or_else(|| InferenceError::UnknownIntentLabel(raw_label.to_string()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
