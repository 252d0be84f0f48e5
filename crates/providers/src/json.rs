//! Strict JSON extraction from model output.
//!
//! Structured callers (classifier, voter, decomposer) require valid
//! JSON. Models occasionally wrap it in a code fence or preamble text;
//! this module tolerates that wrapping but nothing else — output with no
//! parsable JSON is a provider error.

use mando_domain::error::{Error, Result};
use serde_json::Value;

/// Extract the JSON value from a model response.
///
/// Accepts, in order: the raw text as JSON, a ```-fenced block, and the
/// outermost `{…}` / `[…]` span. Anything else errors.
pub fn extract_json(provider: &str, text: &str) -> Result<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = strip_code_fence(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced) {
            return Ok(value);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(span) = outermost_span(trimmed, open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(span) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(120).collect();
    Err(Error::Provider {
        provider: provider.to_owned(),
        message: format!("response is not valid JSON: {preview}"),
    })
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // Skip an optional language tag on the fence line.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    let end = body.rfind("```")?;
    Some(body[..end].trim())
}

fn outermost_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
