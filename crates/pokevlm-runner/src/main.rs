//! pokevlm: drives an emulator with a vision-language model until done or Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info, warn};

use pokevlm_core::bot::{Bot, BotCommand};
use pokevlm_core::config::Config;
use pokevlm_core::device::AdbDevice;
use pokevlm_core::providers;
use pokevlm_core::state::GameStateStore;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("POKEVLM_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = match Config::load_from_dir(&project_root) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let device = AdbDevice::from_config(&config);
    if let Err(e) = device.ensure_connected(config.require_device).await {
        error!("Device {} unavailable: {}", device.serial(), e);
        return ExitCode::FAILURE;
    }

    let reasoner = match providers::build_reasoner(&config) {
        Ok(r) => r,
        Err(e) => {
            error!("Couldn't set up the reasoner: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = GameStateStore::restore(config.state_file(), config.history_limit);
    let mut bot = Bot::new(config, Box::new(device), reasoner, store);

    let stop = bot.command_sender();
    // First Ctrl-C stops cleanly; a second one exits without waiting.
    tokio::spawn(async move {
        let mut stopping = false;
        while tokio::signal::ctrl_c().await.is_ok() {
            if stopping {
                warn!("Second Ctrl-C, exiting without saving.");
                std::process::exit(130);
            }
            info!("Ctrl-C received, stopping after the current step.");
            let _ = stop.send(BotCommand::Stop).await;
            stopping = true;
        }
    });

    bot.run().await;
    info!("State saved to {}", bot.store().path.display());
    ExitCode::SUCCESS
}
