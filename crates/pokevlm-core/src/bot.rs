//! The decision loop: capture, reason, parse, update, unstick, act, cool down.

use std::time::Duration;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::actions::{self, Button, RECOVERY_ACTIONS};
use crate::config::Config;
use crate::device::DeviceController;
use crate::error::DeviceError;
use crate::parser;
use crate::prompts;
use crate::providers::VisionReasoner;
use crate::state::GameStateStore;
use crate::types::{Decision, GameState, LoopPhase};

/// Repeat count above which the summary warns about a possible stuck state.
pub const STUCK_WARN_LEVEL: u32 = 5;

/// Messages that can be sent TO the loop from outside.
#[derive(Debug)]
pub enum BotCommand {
    Stop,
}

/// What one iteration ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No frame, so nothing was decided.
    CaptureFailed,
    /// Stuck: a random recovery button was pressed instead of the decided action.
    Recovered(Button),
    Pressed(Button),
    Waited,
    /// The decided action doesn't map to a button.
    Unresolved(String),
}

/// The loop. Owns the state store, the device, the reasoner and the RNG.
pub struct Bot {
    pub phase: LoopPhase,
    pub iteration: u32,

    config: Config,
    device: Box<dyn DeviceController>,
    reasoner: Box<dyn VisionReasoner>,
    store: GameStateStore,
    rng: StdRng,

    command_tx: mpsc::Sender<BotCommand>,
    command_rx: mpsc::Receiver<BotCommand>,
}

impl Bot {
    pub fn new(
        config: Config,
        device: Box<dyn DeviceController>,
        reasoner: Box<dyn VisionReasoner>,
        store: GameStateStore,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        Self {
            phase: LoopPhase::Capturing,
            iteration: 0,
            config,
            device,
            reasoner,
            store,
            rng: StdRng::from_entropy(),
            command_tx,
            command_rx,
        }
    }

    /// Replace the randomness source used for stuck recovery.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn command_sender(&self) -> mpsc::Sender<BotCommand> {
        self.command_tx.clone()
    }

    pub fn state(&self) -> &GameState {
        self.store.state()
    }

    pub fn store(&self) -> &GameStateStore {
        &self.store
    }

    fn set_phase(&mut self, phase: LoopPhase) {
        self.phase = phase;
        debug!("phase: {}", phase);
    }

    fn stop_requested(&mut self) -> bool {
        let mut stop = false;
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                BotCommand::Stop => stop = true,
            }
        }
        stop
    }

    /// Sleep, waking early on `Stop`. Returns true when stopped.
    async fn cooldown(&mut self, pause: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(pause) => false,
            cmd = self.command_rx.recv() => matches!(cmd, Some(BotCommand::Stop)),
        }
    }

    // ── Main loop ──

    /// Run until `max_iterations` or `Stop`, then persist the state.
    pub async fn run(&mut self) {
        let max = self.config.max_iterations;
        info!("Starting the game loop ({} iterations max).", max);

        while self.iteration < max {
            if self.stop_requested() {
                info!("Interrupted, stopping.");
                break;
            }

            self.iteration += 1;
            info!("Iteration {}/{}", self.iteration, max);

            let pause = match self.run_iteration().await {
                // Recovery already paused; go straight to the next frame.
                Ok(IterationOutcome::Recovered(_)) => None,
                Ok(_) => Some(self.config.loop_delay()),
                Err(e) => {
                    error!("Error during loop: {:#}", e);
                    Some(self.config.loop_delay())
                }
            };

            if let Some(pause) = pause {
                self.set_phase(LoopPhase::Cooldown);
                if self.cooldown(pause).await {
                    info!("Interrupted, stopping.");
                    break;
                }
            }
        }

        self.set_phase(LoopPhase::Stopped);
        info!("Game loop finished after {} iterations.", self.iteration);
        self.store.save();
    }

    /// One pass through capture → act. Cooldown is the caller's job.
    async fn run_iteration(&mut self) -> anyhow::Result<IterationOutcome> {
        self.set_phase(LoopPhase::Capturing);
        let frame = match self.device.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                error!("Screenshot failed, skipping iteration: {}", e);
                return Ok(IterationOutcome::CaptureFailed);
            }
        };

        self.set_phase(LoopPhase::Reasoning);
        let prompt = prompts::analysis_prompt(self.store.state());
        let reply = self.reasoner.infer(&prompt, &frame).await;

        self.set_phase(LoopPhase::Parsing);
        let decision = match reply {
            Ok(text) => parser::parse(&text),
            Err(e) => {
                error!("Analysis failed: {}", e);
                Decision::analysis_failed(e)
            }
        };

        self.set_phase(LoopPhase::Updating);
        self.store.update(&decision);
        self.log_analysis(&decision);

        self.set_phase(LoopPhase::StuckCheck);
        if self.store.state().stuck_counter > self.config.stuck_threshold {
            let button = self.recover().await;
            return Ok(IterationOutcome::Recovered(button));
        }

        self.set_phase(LoopPhase::Acting);
        self.act(&decision).await
    }

    async fn press(&self, button: Button) -> Result<(), DeviceError> {
        self.device.send_button(button).await?;
        tokio::time::sleep(self.config.button_hold()).await;
        Ok(())
    }

    /// Press a random recovery button and reset the stuck counter.
    async fn recover(&mut self) -> Button {
        warn!(
            "AI seems stuck ({} repeats of {:?}). Trying random input.",
            self.store.state().stuck_counter,
            self.store.state().last_action
        );
        let button = RECOVERY_ACTIONS
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(Button::B);
        if let Err(e) = self.press(button).await {
            error!("Recovery input failed: {}", e);
        }
        self.store.reset_stuck_counter();
        tokio::time::sleep(self.config.stuck_recovery()).await;
        button
    }

    async fn act(&self, decision: &Decision) -> anyhow::Result<IterationOutcome> {
        if decision.is_wait() {
            return Ok(IterationOutcome::Waited);
        }
        let action = actions::normalize(&decision.action);
        match actions::resolve(&action) {
            Some(button) => {
                self.press(button)
                    .await
                    .with_context(|| format!("Input failed for {}", button))?;
                Ok(IterationOutcome::Pressed(button))
            }
            None => {
                warn!("Unknown action: {:?}", decision.action);
                Ok(IterationOutcome::Unresolved(decision.action.clone()))
            }
        }
    }

    fn log_analysis(&self, decision: &Decision) {
        let or_na = |v: Option<i64>| v.map_or_else(|| "N/A".to_string(), |n| n.to_string());

        info!("Analysis Summary:");
        info!("   Scene: {}", decision.scene_description);
        info!("   Action: {}", decision.action);
        info!("   Confidence: {}/10", or_na(decision.confidence));
        info!("   Panic Level: {}/10", or_na(decision.panic_level));
        info!("   Reasoning: {}", decision.reasoning);

        let state = self.store.state();
        if state.panic_mode {
            warn!("AI is in PANIC MODE!");
        }
        if state.stuck_counter > STUCK_WARN_LEVEL {
            warn!(
                "Possible stuck state detected ({} repeats)",
                state.stuck_counter
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonerError;
    use crate::state::HISTORY_LIMIT;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default, Clone)]
    struct FakeDevice {
        fail_capture: bool,
        fail_press: bool,
        captures: Arc<AtomicUsize>,
        pressed: Arc<Mutex<Vec<Button>>>,
    }

    #[async_trait]
    impl DeviceController for FakeDevice {
        async fn capture(&self) -> Result<Vec<u8>, DeviceError> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            if self.fail_capture {
                return Err(DeviceError::EmptyCapture);
            }
            Ok(b"\x89PNG fake frame".to_vec())
        }

        async fn send_button(&self, button: Button) -> Result<(), DeviceError> {
            if self.fail_press {
                return Err(DeviceError::CommandFailed {
                    status: "exit status: 1".into(),
                    stderr: "error: device offline".into(),
                });
            }
            self.pressed.lock().unwrap().push(button);
            Ok(())
        }
    }

    /// Replies with scripted results, then repeats `default`.
    struct FakeReasoner {
        script: Mutex<VecDeque<Result<String, String>>>,
        default: String,
        calls: Arc<AtomicUsize>,
    }

    impl FakeReasoner {
        fn always(reply: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default: reply.to_string(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn scripted(script: Vec<Result<&str, &str>>, default: &str) -> Self {
            let script = script
                .into_iter()
                .map(|r| r.map(String::from).map_err(String::from))
                .collect();
            Self {
                script: Mutex::new(script),
                default: default.to_string(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl VisionReasoner for FakeReasoner {
        async fn infer(&self, prompt: &str, image: &[u8]) -> Result<String, ReasonerError> {
            assert!(prompt.contains("Current Game State"));
            assert!(!image.is_empty());
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(ReasonerError::InvalidResponse(msg)),
                None => Ok(self.default.clone()),
            }
        }
    }

    fn test_config(max_iterations: u32) -> Config {
        Config {
            api_key: Some("test".into()),
            max_iterations,
            ..Default::default()
        }
    }

    fn make_bot(max: u32, device: FakeDevice, reasoner: FakeReasoner, dir: &TempDir) -> Bot {
        let store = GameStateStore::new(dir.path().join("game_state.json"), HISTORY_LIMIT);
        Bot::new(test_config(max), Box::new(device), Box::new(reasoner), store)
            .with_rng(StdRng::seed_from_u64(7))
    }

    #[tokio::test(start_paused = true)]
    async fn test_structured_decision_is_pressed() {
        let dir = TempDir::new().unwrap();
        let device = FakeDevice::default();
        let pressed = device.pressed.clone();
        let reasoner = FakeReasoner::always(
            r#"{"action": "Go Up", "reasoning": "door north", "current_location": "Oak's Lab", "confidence": 9}"#,
        );
        let mut bot = make_bot(1, device, reasoner, &dir);

        bot.run().await;

        assert_eq!(*pressed.lock().unwrap(), vec![Button::Up]);
        assert_eq!(bot.iteration, 1);
        assert_eq!(bot.phase, LoopPhase::Stopped);
        assert_eq!(bot.state().current_location, "Oak's Lab");
        assert_eq!(bot.state().last_action, "Go Up");
        assert_eq!(bot.state().reasoning_history[0].confidence, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_text_falls_back_to_keyword() {
        let dir = TempDir::new().unwrap();
        let device = FakeDevice::default();
        let pressed = device.pressed.clone();
        let mut bot = make_bot(1, device, FakeReasoner::always("I will move left"), &dir);

        bot.run().await;

        assert_eq!(*pressed.lock().unwrap(), vec![Button::Left]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_unknown_actions_press_nothing() {
        let dir = TempDir::new().unwrap();
        let device = FakeDevice::default();
        let pressed = device.pressed.clone();
        let reasoner = FakeReasoner::scripted(
            vec![Ok(r#"{"action": "wait"}"#), Ok(r#"{"action": "jump"}"#)],
            "???",
        );
        let mut bot = make_bot(3, device, reasoner, &dir);

        assert_eq!(bot.run_iteration().await.unwrap(), IterationOutcome::Waited);
        assert_eq!(
            bot.run_iteration().await.unwrap(),
            IterationOutcome::Unresolved("jump".into())
        );
        assert_eq!(bot.run_iteration().await.unwrap(), IterationOutcome::Waited);
        assert!(pressed.lock().unwrap().is_empty());
        assert_eq!(bot.state().reasoning_history.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_skips_reasoning() {
        let dir = TempDir::new().unwrap();
        let device = FakeDevice {
            fail_capture: true,
            ..Default::default()
        };
        let captures = device.captures.clone();
        let reasoner = FakeReasoner::always(r#"{"action": "a"}"#);
        let calls = reasoner.calls.clone();
        let mut bot = make_bot(3, device, reasoner, &dir);

        bot.run().await;

        assert_eq!(bot.iteration, 3);
        assert_eq!(captures.load(Ordering::SeqCst), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(bot.state().reasoning_history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reasoner_error_becomes_wait() {
        let dir = TempDir::new().unwrap();
        let device = FakeDevice::default();
        let pressed = device.pressed.clone();
        let reasoner = FakeReasoner::scripted(vec![Err("HTTP 503")], "???");
        let mut bot = make_bot(1, device, reasoner, &dir);

        bot.run().await;

        assert!(pressed.lock().unwrap().is_empty());
        let entry = &bot.state().reasoning_history[0];
        assert_eq!(entry.action, "wait");
        assert!(entry.reasoning.starts_with("Analysis failed"));
        assert!(entry.reasoning.contains("HTTP 503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_triggers_one_recovery_press() {
        let dir = TempDir::new().unwrap();
        let device = FakeDevice::default();
        let pressed = device.pressed.clone();
        let mut bot = make_bot(12, device, FakeReasoner::always(r#"{"action": "a"}"#), &dir);

        let start = tokio::time::Instant::now();
        bot.run().await;
        let elapsed = start.elapsed();

        let pressed = pressed.lock().unwrap().clone();
        assert_eq!(pressed.len(), 12);
        assert!(pressed[..11].iter().all(|b| *b == Button::A));
        assert!(RECOVERY_ACTIONS.contains(&pressed[11]));
        assert_eq!(bot.state().stuck_counter, 0);

        // 11 × (hold + cooldown) + (hold + recovery), no cooldown after recovering.
        let expected = Duration::from_millis(11 * (100 + 2000) + 100 + 1000);
        assert!(elapsed >= expected);
        assert!(elapsed < expected + Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_choice_follows_seed() {
        async fn recovery_press(seed: u64) -> Button {
            let dir = TempDir::new().unwrap();
            let device = FakeDevice::default();
            let pressed = device.pressed.clone();
            let mut bot = make_bot(12, device, FakeReasoner::always(r#"{"action": "a"}"#), &dir)
                .with_rng(StdRng::seed_from_u64(seed));
            bot.run().await;
            let last = *pressed.lock().unwrap().last().unwrap();
            last
        }

        assert_eq!(recovery_press(42).await, recovery_press(42).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_failure_does_not_stop_loop() {
        let dir = TempDir::new().unwrap();
        let device = FakeDevice {
            fail_press: true,
            ..Default::default()
        };
        let captures = device.captures.clone();
        let mut bot = make_bot(3, device, FakeReasoner::always(r#"{"action": "b"}"#), &dir);

        bot.run().await;

        assert_eq!(bot.iteration, 3);
        assert_eq!(captures.load(Ordering::SeqCst), 3);
        assert_eq!(bot.state().reasoning_history.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_persists_state() {
        let dir = TempDir::new().unwrap();
        let mut bot = make_bot(
            2,
            FakeDevice::default(),
            FakeReasoner::always(r#"{"action": "right", "current_location": "Route 2"}"#),
            &dir,
        );

        bot.run().await;

        let saved = GameStateStore::load(&dir.path().join("game_state.json")).unwrap();
        assert_eq!(&saved, bot.state());
        assert_eq!(saved.stuck_counter, 1);
        assert_eq!(saved.current_location, "Route 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_run_persists_without_iterating() {
        let dir = TempDir::new().unwrap();
        let device = FakeDevice::default();
        let captures = device.captures.clone();
        let mut bot = make_bot(10, device, FakeReasoner::always("a"), &dir);

        bot.command_sender().send(BotCommand::Stop).await.unwrap();
        bot.run().await;

        assert_eq!(bot.iteration, 0);
        assert_eq!(captures.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("game_state.json").is_file());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_cooldown() {
        let dir = TempDir::new().unwrap();
        let mut bot = make_bot(
            100,
            FakeDevice::default(),
            FakeReasoner::always(r#"{"action": "down"}"#),
            &dir,
        );
        let tx = bot.command_sender();

        let handle = tokio::spawn(async move {
            bot.run().await;
            bot
        });
        tokio::time::sleep(Duration::from_millis(3000)).await;
        tx.send(BotCommand::Stop).await.unwrap();
        let bot = handle.await.unwrap();

        assert_eq!(bot.iteration, 2);
        assert_eq!(bot.phase, LoopPhase::Stopped);
        assert!(dir.path().join("game_state.json").is_file());
    }
}
