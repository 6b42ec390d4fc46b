//! Game state store: belief state about the session, persisted as JSON between runs.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::error::StateError;
use crate::types::{Decision, GameState, HistoryEntry, WAIT_ACTION};

/// Default reasoning-history cap.
pub const HISTORY_LIMIT: usize = 50;

/// Panic level at or above which panic mode turns on.
pub const PANIC_ON_LEVEL: i64 = 7;
/// Panic level at or below which panic mode turns off. Levels in between keep the flag.
pub const PANIC_OFF_LEVEL: i64 = 3;

const UNKNOWN_LOCATION: &str = "Unknown";

/// Owns the single `GameState` and its snapshot path.
#[derive(Debug)]
pub struct GameStateStore {
    pub path: PathBuf,
    state: GameState,
    history_limit: usize,
}

impl GameStateStore {
    /// Fresh, empty state bound to `path`.
    pub fn new(path: impl Into<PathBuf>, history_limit: usize) -> Self {
        Self {
            path: path.into(),
            state: GameState::default(),
            history_limit,
        }
    }

    /// Load the snapshot at `path`, or start fresh. Never fails.
    pub fn restore(path: impl Into<PathBuf>, history_limit: usize) -> Self {
        let mut store = Self::new(path, history_limit);
        if !store.path.is_file() {
            info!(
                "No saved game state at {}, starting fresh",
                store.path.display()
            );
            return store;
        }
        match Self::load(&store.path) {
            Ok(state) => {
                store.state = state;
                store.trim_history();
                info!(
                    "Loaded game state from {} ({} history entries)",
                    store.path.display(),
                    store.state.reasoning_history.len()
                );
            }
            Err(e) => error!("Couldn't load game state: {}", e),
        }
        store
    }

    /// Read and decode a snapshot.
    pub fn load(path: &Path) -> Result<GameState, StateError> {
        let content = std::fs::read_to_string(path).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StateError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the snapshot.
    pub fn persist(&self) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(&self.state).map_err(|source| {
            StateError::Format {
                path: self.path.clone(),
                source,
            }
        })?;
        std::fs::write(&self.path, json).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the snapshot, logging instead of propagating failure.
    pub fn save(&self) {
        match self.persist() {
            Ok(()) => info!("Saved game state to {}", self.path.display()),
            Err(e) => error!("Couldn't save game state: {}", e),
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Fold one decision into the state.
    pub fn update(&mut self, decision: &Decision) {
        let action = if decision.action.is_empty() {
            WAIT_ACTION.to_string()
        } else {
            decision.action.clone()
        };

        let s = &mut self.state;
        s.current_location = decision
            .current_location
            .clone()
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

        if action == s.last_action {
            s.stuck_counter = s.stuck_counter.saturating_add(1);
        } else {
            s.stuck_counter = 0;
        }
        s.last_action = action.clone();

        let panic_level = decision.panic_level.unwrap_or(0);
        if panic_level >= PANIC_ON_LEVEL {
            if !s.panic_mode {
                warn!("PANIC MODE ACTIVATED (level {})", panic_level);
            }
            s.panic_mode = true;
        } else if panic_level <= PANIC_OFF_LEVEL {
            s.panic_mode = false;
        }

        let reasoning = match decision.error {
            Some(ref err) => format!("{}: {}", decision.reasoning, err),
            None => decision.reasoning.clone(),
        };
        s.reasoning_history.push(HistoryEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            reasoning,
            action,
            confidence: decision.confidence.unwrap_or(0),
        });
        self.trim_history();
    }

    pub fn reset_stuck_counter(&mut self) {
        self.state.stuck_counter = 0;
    }

    fn trim_history(&mut self) {
        let history = &mut self.state.reasoning_history;
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
    }
}
