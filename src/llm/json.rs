use crate::error::{CareSheetError, Result};
use serde_json::{Map, Value};

/// Removes a markdown code fence around the model output, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    if let Some((_, rest)) = raw.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    let mut parts = raw.split("```");
    if let (Some(_), Some(inner)) = (parts.next(), parts.next()) {
        return inner.trim();
    }
    raw.trim()
}

/// Trims every line, drops empty ones and joins the rest with a space. Repairs
/// output where the model broke a string value across raw newlines.
pub fn collapse_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses model output into a JSON object.
///
/// Code fences are stripped first. If parsing fails, one more attempt is made
/// on the line-collapsed text. A top-level array yields its first element.
pub fn parse_model_json(raw: &str) -> Result<Map<String, Value>> {
    let cleaned = strip_code_fence(raw);

    let value = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => value,
        Err(first) => serde_json::from_str::<Value>(&collapse_lines(cleaned)).map_err(|e| {
            CareSheetError::Parse(format!("{} (after line repair: {})", first, e))
        })?,
    };

    let value = match value {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| CareSheetError::Parse("model returned an empty array".to_string()))?,
        other => other,
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(CareSheetError::Parse(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}
