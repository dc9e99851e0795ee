// src/services/json_output.rs
use serde::de::DeserializeOwned;

/// Removes a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parses model output as JSON. Falls back to the span between the first `{`
/// and the last `}` when the model wrapped the object in prose.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let cleaned = strip_code_fences(text);
    match serde_json::from_str(cleaned) {
        Ok(value) => Ok(value),
        Err(first) => {
            let start = cleaned.find('{');
            let end = cleaned.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&cleaned[start..=end]).map_err(|e| e.to_string())
                }
                _ => Err(first.to_string()),
            }
        }
    }
}
