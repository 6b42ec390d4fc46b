//! pokevlm-core: the emulator automation loop, no binary concerns.
//!
//! A screenshot goes to a vision-language model, the reply is parsed into a
//! [`types::Decision`], the belief state is updated, and the chosen action is
//! pressed on the device. The loop lives in [`bot`]; devices and models sit
//! behind the [`device::DeviceController`] and [`providers::VisionReasoner`] traits.

pub mod actions;
pub mod bot;
pub mod config;
pub mod device;
pub mod error;
pub mod parser;
pub mod prompts;
pub mod providers;
pub mod state;
pub mod types;
