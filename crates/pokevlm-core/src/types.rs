//! Core types: LoopPhase, GameState, HistoryEntry, Decision.

use serde::{Deserialize, Deserializer, Serialize};

use crate::parser::{value_int, value_text};

// ── Loop phase ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Capturing,
    Reasoning,
    Parsing,
    Updating,
    StuckCheck,
    Acting,
    Cooldown,
    Stopped,
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopPhase::Capturing => write!(f, "capturing"),
            LoopPhase::Reasoning => write!(f, "reasoning"),
            LoopPhase::Parsing => write!(f, "parsing"),
            LoopPhase::Updating => write!(f, "updating"),
            LoopPhase::StuckCheck => write!(f, "stuck_check"),
            LoopPhase::Acting => write!(f, "acting"),
            LoopPhase::Cooldown => write!(f, "cooldown"),
            LoopPhase::Stopped => write!(f, "stopped"),
        }
    }
}

// ── Persisted session state ──

/// One past decision, kept for diagnostics.
///
/// Decoding is lenient: a malformed entry degrades field by field instead of
/// failing the whole snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryEntry {
    #[serde(deserialize_with = "lenient_text")]
    pub timestamp: String,
    #[serde(deserialize_with = "lenient_text")]
    pub reasoning: String,
    #[serde(deserialize_with = "lenient_text")]
    pub action: String,
    #[serde(deserialize_with = "lenient_int")]
    pub confidence: i64,
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_text(&value).unwrap_or_default())
}

fn lenient_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_int(&value).unwrap_or(0))
}

/// Belief state about the session. Field names are the on-disk format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    pub current_location: String,
    pub party_pokemon: Vec<String>,
    pub inventory: Vec<String>,
    pub objectives: Vec<String>,
    pub panic_mode: bool,
    pub stuck_counter: u32,
    pub last_action: String,
    pub reasoning_history: Vec<HistoryEntry>,
}

// ── Decision ──

/// Placeholder for required decision fields the model left out.
pub const NOT_PROVIDED: &str = "Not provided";

/// The action that means "do nothing this iteration".
pub const WAIT_ACTION: &str = "wait";

/// Outcome of interpreting one reasoner response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub scene_description: String,
    pub current_location: Option<String>,
    pub pokemon_visible: Vec<String>,
    pub menu_state: Option<String>,
    pub health_status: Option<String>,
    pub action: String,
    pub reasoning: String,
    /// 0-10 as reported; not clamped.
    pub panic_level: Option<i64>,
    pub objectives: Vec<String>,
    /// 0-10 as reported; not clamped.
    pub confidence: Option<i64>,
    /// Diagnostic text when the reasoner call itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Decision {
    /// Degenerate decision used when the reasoner could not be reached.
    pub fn analysis_failed(error: impl std::fmt::Display) -> Self {
        Self {
            action: WAIT_ACTION.to_string(),
            reasoning: "Analysis failed".to_string(),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Whether this decision asks for no button press.
    pub fn is_wait(&self) -> bool {
        self.action == WAIT_ACTION
    }
}
