use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::GatewayError;
use crate::model_output::parse_model_json;

pub const MIN_AGGRESSIVENESS: u8 = 1;
pub const MAX_AGGRESSIVENESS: u8 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DetectedLanguage {
    English,
    Spanish,
    Portuguese,
    French,
    German,
    Italian,
    Other(String),
}

impl DetectedLanguage {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "english" | "en" => Self::English,
            "spanish" | "es" | "español" => Self::Spanish,
            "portuguese" | "pt" | "português" => Self::Portuguese,
            "french" | "fr" => Self::French,
            "german" | "de" => Self::German,
            "italian" | "it" => Self::Italian,
            _ => Self::Other(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::English => "english",
            Self::Spanish => "spanish",
            Self::Portuguese => "portuguese",
            Self::French => "french",
            Self::German => "german",
            Self::Italian => "italian",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for DetectedLanguage {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<DetectedLanguage> for String {
    fn from(value: DetectedLanguage) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SentimentResult {
    #[serde(rename = "language")]
    pub detected_language: DetectedLanguage,
    pub sentiment: String,
    pub aggressiveness: u8,
    pub translation: String,
}

#[derive(Debug, Deserialize)]
struct RawSentiment {
    language: String,
    sentiment: String,
    aggressiveness: Value,
    translation: String,
}

impl SentimentResult {
    /// Parses the `sentiment_analysis` template output.
    ///
    /// Aggressiveness is clamped into `1..=5`; a non-integer aggressiveness or
    /// an empty translation is rejected.
    pub fn from_model_output(text: &str) -> Result<Self, GatewayError> {
        Self::from_model_output_with_raw(text).map(|(result, _)| result)
    }

    /// Like [`SentimentResult::from_model_output`], also returning the
    /// aggressiveness exactly as the model reported it.
    pub fn from_model_output_with_raw(text: &str) -> Result<(Self, i64), GatewayError> {
        let raw: RawSentiment = parse_model_json("sentiment_analysis", text)?;

        let aggressiveness = parse_aggressiveness(&raw.aggressiveness).ok_or_else(|| {
            GatewayError::ResponseParse {
                template: "sentiment_analysis".to_string(),
                message: format!("aggressiveness `{}` is not an integer", raw.aggressiveness),
            }
        })?;

        let translation = raw.translation.trim().to_string();
        if translation.is_empty() {
            return Err(GatewayError::ResponseParse {
                template: "sentiment_analysis".to_string(),
                message: "translation is empty".to_string(),
            });
        }

        let result = Self {
            detected_language: DetectedLanguage::parse(&raw.language),
            sentiment: raw.sentiment.trim().to_string(),
            aggressiveness: clamp_aggressiveness(aggressiveness),
            translation,
        };
        Ok((result, aggressiveness))
    }
}

fn parse_aggressiveness(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn clamp_aggressiveness(value: i64) -> u8 {
    value.clamp(i64::from(MIN_AGGRESSIVENESS), i64::from(MAX_AGGRESSIVENESS)) as u8
}
