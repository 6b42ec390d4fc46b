//! Configuration: optional YAML config + env var overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Known provider presets
const PROVIDER_PRESETS: &[(&str, Option<&str>)] = &[
    ("gemini", Some("https://generativelanguage.googleapis.com/v1beta")),
    ("openai", Some("https://api.openai.com/v1")),
    ("openrouter", Some("https://openrouter.ai/api/v1")),
    ("custom", None),
];

/// Provider-specific API key env vars
const PROVIDER_KEY_ENV_VARS: &[(&str, &str)] = &[
    ("gemini", "GEMINI_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("custom", "OPENAI_API_KEY"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// "gemini" | "openai" | "openrouter" | "custom"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Vision model name
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (set here or via env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL (auto-set for known providers)
    #[serde(default)]
    pub base_url: Option<String>,

    /// adb serial of the emulator
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Path to the adb binary (looked up on PATH when unset)
    #[serde(default)]
    pub adb_path: Option<String>,

    /// Abort at startup when the device isn't listed by `adb devices`
    #[serde(default)]
    pub require_device: bool,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Pause between iterations
    #[serde(default = "default_loop_delay_ms")]
    pub loop_delay_ms: u64,

    /// Pause after each button press
    #[serde(default = "default_button_hold_ms")]
    pub button_hold_ms: u64,

    /// Pause after a stuck-recovery press
    #[serde(default = "default_stuck_recovery_ms")]
    pub stuck_recovery_ms: u64,

    /// Repeats of the same action tolerated before a random press
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: u32,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Game state snapshot, relative to the project root
    #[serde(default = "default_state_path")]
    pub state_path: String,

    /// Where the latest frame is copied for inspection (none to disable)
    #[serde(default = "default_screenshot_path")]
    pub screenshot_path: Option<String>,

    /// Max output tokens per model call
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Resolved project root (set at load time, not serialized from YAML)
    #[serde(skip)]
    pub project_root: PathBuf,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-2.0-flash-exp".into()
}
fn default_device_name() -> String {
    "emulator-5554".into()
}
fn default_max_iterations() -> u32 {
    500
}
fn default_loop_delay_ms() -> u64 {
    2000
}
fn default_button_hold_ms() -> u64 {
    100
}
fn default_stuck_recovery_ms() -> u64 {
    1000
}
fn default_stuck_threshold() -> u32 {
    10
}
fn default_history_limit() -> usize {
    crate::state::HISTORY_LIMIT
}
fn default_state_path() -> String {
    "game_state.json".into()
}
fn default_screenshot_path() -> Option<String> {
    Some("current_screen.png".into())
}
fn default_max_output_tokens() -> u32 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Load config from a YAML file with env var overrides.
    pub fn load(config_path: &Path) -> Result<Self> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Load from `project_root/config.yaml` if present, else defaults. Env vars apply
    /// either way, with `project_root/.env` filling in anything the process env lacks.
    pub fn load_from_dir(project_root: &Path) -> Result<Self> {
        Self::load_from_dir_with_env(project_root, |key| std::env::var(key).ok())
    }

    /// `load_from_dir` with an injectable process-env lookup.
    pub fn load_from_dir_with_env(
        project_root: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let dotenv = read_dotenv(project_root)?;
        let lookup = |key: &str| env(key).or_else(|| dotenv.get(key).cloned());

        let config_path = project_root.join("config.yaml");
        if config_path.is_file() {
            return Self::load_with_env(&config_path, lookup);
        }
        let mut config = Config {
            project_root: project_root.to_path_buf(),
            ..Default::default()
        };
        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    /// `load` with an injectable env lookup.
    pub fn load_with_env(config_path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;

        let mut config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&content).context("Failed to parse config.yaml")?
        };

        // Resolve project root from config file location
        let parent = config_path.parent().unwrap_or(Path::new("."));
        config.project_root = parent
            .canonicalize()
            .unwrap_or_else(|_| parent.to_path_buf());

        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(p) = env("POKEVLM_PROVIDER") {
            self.provider = p;
        }

        // Base URL: env var > config > provider preset
        if let Some(url) = env("POKEVLM_BASE_URL") {
            self.base_url = Some(url);
        } else if self.base_url.is_none() {
            self.base_url = PROVIDER_PRESETS
                .iter()
                .find(|(p, _)| *p == self.provider)
                .and_then(|(_, url)| url.map(String::from));
        }

        // API key: provider-specific env var > config
        let provider_key_var = PROVIDER_KEY_ENV_VARS
            .iter()
            .find(|(p, _)| *p == self.provider)
            .map(|(_, var)| *var);
        if let Some(key) = provider_key_var.and_then(|var| env(var)) {
            if !key.trim().is_empty() {
                self.api_key = Some(key);
            }
        }

        if let Some(m) = env("POKEVLM_MODEL") {
            self.model = m;
        }
        if let Some(d) = env("POKEVLM_DEVICE") {
            self.device_name = d;
        }
        if let Some(adb) = env("POKEVLM_ADB") {
            self.adb_path = Some(adb);
        }
        if let Some(path) = env("POKEVLM_STATE_PATH") {
            self.state_path = path;
        }
        if let Some(n) = env("POKEVLM_MAX_ITERATIONS").and_then(|v| v.trim().parse().ok()) {
            self.max_iterations = n;
        }
        if let Some(ms) = env("POKEVLM_LOOP_DELAY_MS").and_then(|v| v.trim().parse().ok()) {
            self.loop_delay_ms = ms;
        }
    }

    fn validate(&self) -> Result<()> {
        if !PROVIDER_PRESETS.iter().any(|(p, _)| *p == self.provider) {
            anyhow::bail!(
                "Unknown provider '{}' (expected gemini, openai, openrouter or custom)",
                self.provider
            );
        }
        if self.provider == "custom" && self.base_url.is_none() {
            anyhow::bail!(
                "Provider 'custom' requires base_url in config.yaml or POKEVLM_BASE_URL env var"
            );
        }
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            let var = PROVIDER_KEY_ENV_VARS
                .iter()
                .find(|(p, _)| *p == self.provider)
                .map(|(_, var)| *var)
                .unwrap_or("GEMINI_API_KEY");
            anyhow::bail!(
                "No API key for provider '{}': set {} or api_key in config.yaml",
                self.provider,
                var
            );
        }
        Ok(())
    }

    /// Resolve a configured path against the project root.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.project_root.join(p)
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.resolve_path(&self.state_path)
    }

    pub fn screenshot_file(&self) -> Option<PathBuf> {
        self.screenshot_path.as_deref().map(|p| self.resolve_path(p))
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }

    pub fn button_hold(&self) -> Duration {
        Duration::from_millis(self.button_hold_ms)
    }

    pub fn stuck_recovery(&self) -> Duration {
        Duration::from_millis(self.stuck_recovery_ms)
    }
}

/// Key/value pairs from `dir/.env`; empty when there is no such file.
pub fn read_dotenv(dir: &Path) -> Result<HashMap<String, String>> {
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let vars = dotenvy::from_path_iter(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .collect::<Result<HashMap<_, _>, _>>()
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    info!("Loaded {} variable(s) from {}", vars.len(), path.display());
    Ok(vars)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            device_name: default_device_name(),
            adb_path: None,
            require_device: false,
            max_iterations: default_max_iterations(),
            loop_delay_ms: default_loop_delay_ms(),
            button_hold_ms: default_button_hold_ms(),
            stuck_recovery_ms: default_stuck_recovery_ms(),
            stuck_threshold: default_stuck_threshold(),
            history_limit: default_history_limit(),
            state_path: default_state_path(),
            screenshot_path: default_screenshot_path(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            project_root: PathBuf::new(),
        }
    }
}
