//! Tolerant parsing of model output into [`RawTriple`]s.
//!
//! Model responses are untrusted text. They may carry a reasoning preamble,
//! markdown fences or prose around the JSON, and the JSON itself may be a
//! bare array or an object wrapping one. Entries that do not fit the triple
//! schema are dropped individually.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::schema::RawTriple;

static REASONING_PREAMBLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^.*?assistantfinal").expect("valid regex"));
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?").expect("valid regex"));

const LIST_KEYS: [&str; 4] = ["triples", "triplets", "relations", "relationships"];

pub fn clean_response(raw: &str) -> String {
    let text = REASONING_PREAMBLE.replace(raw, "");
    let text = CODE_FENCE.replace_all(&text, "");
    text.trim().to_string()
}

pub fn parse_triples(raw: &str) -> Result<Vec<RawTriple>> {
    let cleaned = clean_response(raw);
    let value = parse_json_payload(&cleaned)?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            match LIST_KEYS.iter().find_map(|key| map.remove(*key)) {
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(ExtractError::MalformedExtraction(
                        "triple list is not an array".to_string(),
                    ));
                }
                // A single triple object on its own
                None if map.contains_key("head") || map.contains_key("subject") => {
                    vec![Value::Object(map)]
                }
                None => {
                    return Err(ExtractError::MalformedExtraction(
                        "object has no triple list".to_string(),
                    ));
                }
            }
        }
        other => {
            return Err(ExtractError::MalformedExtraction(format!(
                "expected array or object, got {other}"
            )));
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawTriple>(item) {
            Ok(triple) => Some(triple),
            Err(e) => {
                debug!(error = %e, "Skipping entry that is not a triple");
                None
            }
        })
        .collect())
}

/// Parse the whole text as JSON, or failing that the outermost `[...]`/`{...}` span in it
fn parse_json_payload(text: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let start = text.find(['[', '{']);
    let end = text.rfind([']', '}']);
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Ok(value);
            }
        }
    }

    let preview: String = text.chars().take(80).collect();
    Err(ExtractError::MalformedExtraction(format!(
        "no JSON payload in response: {preview:?}"
    )))
}
