//! Prompt text sent alongside each frame.

use crate::types::GameState;

const RESPONSE_FORMAT: &str = r#"Expected JSON format:
{
    "scene_description": "...",
    "current_location": "...",
    "pokemon_visible": [...],
    "menu_state": "...",
    "health_status": "...",
    "action": "...",
    "reasoning": "...",
    "panic_level": 0-10,
    "objectives": [...],
    "confidence": 0-10
}"#;

/// Analysis prompt reflecting the current belief state.
pub fn analysis_prompt(state: &GameState) -> String {
    format!(
        "You are an AI playing Pokemon FireRed. Analyze this screenshot and provide a JSON response.\n\n\
        Current Game State:\n\
        - Location: {}\n\
        - Last Action: {}\n\
        - Stuck Counter: {}\n\
        - Panic Mode: {}\n\n\
        {}",
        state.current_location,
        state.last_action,
        state.stuck_counter,
        state.panic_mode,
        RESPONSE_FORMAT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_reflects_state() {
        let state = GameState {
            current_location: "Pewter City".into(),
            last_action: "left".into(),
            stuck_counter: 4,
            panic_mode: true,
            ..Default::default()
        };
        let prompt = analysis_prompt(&state);
        assert!(prompt.contains("- Location: Pewter City"));
        assert!(prompt.contains("- Last Action: left"));
        assert!(prompt.contains("- Stuck Counter: 4"));
        assert!(prompt.contains("- Panic Mode: true"));
    }

    #[test]
    fn test_prompt_lists_every_field() {
        let prompt = analysis_prompt(&GameState::default());
        for field in [
            "scene_description",
            "current_location",
            "pokemon_visible",
            "menu_state",
            "health_status",
            "action",
            "reasoning",
            "panic_level",
            "objectives",
            "confidence",
        ] {
            assert!(prompt.contains(&format!("\"{}\"", field)), "missing {}", field);
        }
    }
}
