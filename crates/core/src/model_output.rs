//! Helpers for reading structured answers out of free-form model text.
//!
//! Chat models are asked for JSON but routinely wrap it in prose or code
//! fences. Everything here is strict about the final shape: if no JSON object
//! can be located, or it does not match the expected schema, the caller gets a
//! [`GatewayError::ResponseParse`] instead of a default value.

use serde::de::DeserializeOwned;

use crate::errors::GatewayError;

/// Returns the outermost `{ ... }` slice of `text`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Drops every backslash from model output.
pub fn strip_backslashes(text: &str) -> String {
    text.replace('\\', "")
}

pub fn parse_model_json<T>(template: &str, text: &str) -> Result<T, GatewayError>
where
    T: DeserializeOwned,
{
    let json = extract_json_object(text).ok_or_else(|| GatewayError::ResponseParse {
        template: template.to_string(),
        message: "response did not contain a JSON object".to_string(),
    })?;

    serde_json::from_str::<T>(json).map_err(|error| GatewayError::ResponseParse {
        template: template.to_string(),
        message: error.to_string(),
    })
}
