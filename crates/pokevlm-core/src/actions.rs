//! Action map: canonical action names, phrase normalization, button codes.

use serde::{Deserialize, Serialize};

/// A physical button on the emulated handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    A,
    B,
    Start,
    Select,
    Up,
    Down,
    Left,
    Right,
    L,
    R,
}

impl Button {
    /// Android key event name sent to the emulator.
    pub fn keycode(self) -> &'static str {
        match self {
            Button::A => "KEYCODE_BUTTON_A",
            Button::B => "KEYCODE_BUTTON_B",
            Button::Start => "KEYCODE_BUTTON_START",
            Button::Select => "KEYCODE_BUTTON_SELECT",
            Button::Up => "KEYCODE_DPAD_UP",
            Button::Down => "KEYCODE_DPAD_DOWN",
            Button::Left => "KEYCODE_DPAD_LEFT",
            Button::Right => "KEYCODE_DPAD_RIGHT",
            Button::L => "KEYCODE_BUTTON_L1",
            Button::R => "KEYCODE_BUTTON_R1",
        }
    }

    /// Canonical action name for this button.
    pub fn name(self) -> &'static str {
        ACTION_TABLE
            .iter()
            .find(|(_, b)| *b == self)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }
}

impl std::fmt::Display for Button {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Canonical actions, in lookup order. The fallback parser scans this order too.
pub const ACTION_TABLE: &[(&str, Button)] = &[
    ("a", Button::A),
    ("b", Button::B),
    ("start", Button::Start),
    ("select", Button::Select),
    ("up", Button::Up),
    ("down", Button::Down),
    ("left", Button::Left),
    ("right", Button::Right),
    ("l", Button::L),
    ("r", Button::R),
];

/// Buttons tried at random when the loop is stuck.
pub const RECOVERY_ACTIONS: &[Button] = &[
    Button::Up,
    Button::Down,
    Button::Left,
    Button::Right,
    Button::B,
    Button::Start,
];

/// Free-form phrases and verb aliases the model tends to emit.
const NORMALIZATIONS: &[(&str, &str)] = &[
    ("walk up", "up"),
    ("go up", "up"),
    ("move up", "up"),
    ("move_up", "up"),
    ("go_up", "up"),
    ("walk down", "down"),
    ("go down", "down"),
    ("move down", "down"),
    ("move_down", "down"),
    ("go_down", "down"),
    ("walk left", "left"),
    ("go left", "left"),
    ("move left", "left"),
    ("move_left", "left"),
    ("go_left", "left"),
    ("walk right", "right"),
    ("go right", "right"),
    ("move right", "right"),
    ("move_right", "right"),
    ("go_right", "right"),
    ("press a", "a"),
    ("press_a", "a"),
    ("press b", "b"),
    ("press_b", "b"),
    ("press start", "start"),
    ("press_start", "start"),
    ("press select", "select"),
    ("press_select", "select"),
];

/// Lowercase, trim, and rewrite known phrases to canonical tokens.
/// Unknown input comes back lowercased and trimmed.
pub fn normalize(raw: &str) -> String {
    let cleaned = raw.trim().to_lowercase();
    NORMALIZATIONS
        .iter()
        .find(|(phrase, _)| *phrase == cleaned)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(cleaned)
}

/// Look up a canonical action.
pub fn resolve(action: &str) -> Option<Button> {
    ACTION_TABLE
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, b)| *b)
}

/// Canonical action names in table order.
pub fn vocabulary() -> impl Iterator<Item = &'static str> {
    ACTION_TABLE.iter().map(|(name, _)| *name)
}
