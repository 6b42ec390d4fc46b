//! Response parsing: structured JSON first, keyword spotting second, `wait` last.
//!
//! The model's output is untrusted free text. `parse` always returns a usable
//! [`Decision`]; it never fails the loop.

use serde_json::{Map, Value};
use tracing::warn;

use crate::actions;
use crate::types::{Decision, NOT_PROVIDED, WAIT_ACTION};

const FALLBACK_SCENE: &str = "Parsing failed, used fallback.";
const UNDETERMINED_REASONING: &str = "Unable to determine action";

/// Turn raw reasoner text into a decision.
pub fn parse(raw_text: &str) -> Decision {
    match extract_object(raw_text) {
        Some(Ok(obj)) => decision_from_object(&obj),
        Some(Err(e)) => {
            warn!("JSON parsing failed ({}), using fallback", e);
            fallback(raw_text)
        }
        None => fallback(raw_text),
    }
}

/// Decode the text between the first `{` and the last `}`.
/// `None` when there is no such span.
fn extract_object(text: &str) -> Option<Result<Map<String, Value>, String>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return Some(Err("closing brace precedes opening brace".to_string()));
    }
    Some(
        match serde_json::from_str::<Value>(&text[start..=end]) {
            Ok(Value::Object(obj)) => Ok(obj),
            Ok(other) => Err(format!("expected an object, got {}", other)),
            Err(e) => Err(e.to_string()),
        },
    )
}

fn decision_from_object(obj: &Map<String, Value>) -> Decision {
    Decision {
        scene_description: text_field(obj, "scene_description")
            .unwrap_or_else(|| NOT_PROVIDED.to_string()),
        current_location: text_field(obj, "current_location"),
        pokemon_visible: list_field(obj, "pokemon_visible"),
        menu_state: text_field(obj, "menu_state"),
        health_status: text_field(obj, "health_status"),
        action: text_field(obj, "action").unwrap_or_else(|| NOT_PROVIDED.to_string()),
        reasoning: text_field(obj, "reasoning").unwrap_or_else(|| NOT_PROVIDED.to_string()),
        panic_level: int_field(obj, "panic_level"),
        objectives: list_field(obj, "objectives"),
        confidence: int_field(obj, "confidence"),
        error: None,
    }
}

/// Keyword-spot the canonical vocabulary, in table order.
fn fallback(text: &str) -> Decision {
    let lowered = text.to_lowercase();
    match actions::vocabulary().find(|action| lowered.contains(action)) {
        Some(action) => Decision {
            action: action.to_string(),
            reasoning: text.to_string(),
            scene_description: FALLBACK_SCENE.to_string(),
            confidence: Some(3),
            ..Default::default()
        },
        None => Decision {
            action: WAIT_ACTION.to_string(),
            reasoning: UNDETERMINED_REASONING.to_string(),
            scene_description: text.to_string(),
            confidence: Some(1),
            ..Default::default()
        },
    }
}

// ── Lenient field access ──

pub(crate) fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(value_text)
}

fn list_field(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(value_text).collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn int_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    obj.get(key).and_then(value_int)
}

/// Integers, floats (truncated), numeric strings and booleans; anything else is absent.
pub(crate) fn value_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
