//! Error types at the device, reasoner and persistence seams.

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the emulated device.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Device command failed ({status}): {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("Screen capture returned no image data")]
    EmptyCapture,

    #[error("Device {0} not found")]
    NotFound(String),
}

/// Failures calling the vision-language model.
#[derive(Error, Debug)]
pub enum ReasonerError {
    #[error("API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API call failed: HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Response blocked: {0}")]
    Blocked(String),
}

/// Failures reading or writing the state snapshot.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed state in {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
