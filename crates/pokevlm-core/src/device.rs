//! Device control: screen capture and button presses on the emulator.
//!
//! [`DeviceController`] is the seam the loop talks to; [`AdbDevice`] implements it
//! by shelling out to `adb`.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::actions::Button;
use crate::config::Config;
use crate::error::DeviceError;

const PNG_MAGIC: &[u8] = b"\x89PNG";

/// Screen capture and button input for one device.
#[async_trait]
pub trait DeviceController: Send + Sync {
    /// Grab the current frame as PNG bytes.
    async fn capture(&self) -> Result<Vec<u8>, DeviceError>;

    /// Press and release one button.
    async fn send_button(&self, button: Button) -> Result<(), DeviceError>;
}

/// One line of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: String,
}

/// Parse the output of `adb devices`.
pub fn parse_device_list(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?.to_string();
            let state = parts.next().unwrap_or("unknown").to_string();
            Some(DeviceEntry { serial, state })
        })
        .collect()
}

/// An emulator reached through the `adb` command-line tool.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb: PathBuf,
    serial: String,
    screenshot_path: Option<PathBuf>,
}

impl AdbDevice {
    pub fn new(adb: impl Into<PathBuf>, serial: impl Into<String>) -> Self {
        Self {
            adb: adb.into(),
            serial: serial.into(),
            screenshot_path: None,
        }
    }

    /// Build from config: explicit adb path, else `adb` on PATH.
    pub fn from_config(config: &Config) -> Self {
        let adb = config
            .adb_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| which::which("adb").ok())
            .unwrap_or_else(|| PathBuf::from("adb"));
        let mut device = Self::new(adb, config.device_name.clone());
        device.screenshot_path = config.screenshot_file();
        device
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, DeviceError> {
        debug!("adb {}", args.join(" "));
        let output = Command::new(&self.adb)
            .args(args)
            .output()
            .await
            .map_err(|source| DeviceError::Spawn {
                program: self.adb.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeviceError::CommandFailed {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(500).collect(),
            });
        }
        Ok(output.stdout)
    }

    /// Devices currently known to adb.
    pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>, DeviceError> {
        let stdout = self.run(&["devices"]).await?;
        Ok(parse_device_list(&String::from_utf8_lossy(&stdout)))
    }

    /// Check that our serial is attached and online. Logs the listing when it isn't.
    pub async fn check_connection(&self) -> Result<(), DeviceError> {
        let devices = self.list_devices().await?;
        if devices
            .iter()
            .any(|d| d.serial == self.serial && d.state == "device")
        {
            info!("Connected to {}", self.serial);
            return Ok(());
        }

        if devices.is_empty() {
            info!("Available devices: (none)");
        } else {
            info!("Available devices:");
            for d in &devices {
                info!("  {}\t{}", d.serial, d.state);
            }
        }
        Err(DeviceError::NotFound(self.serial.clone()))
    }

    /// Startup check. A missing device is fatal only when `require_device` is set;
    /// otherwise it's logged and captures fail until the emulator shows up.
    pub async fn ensure_connected(&self, require_device: bool) -> Result<(), DeviceError> {
        match self.check_connection().await {
            Ok(()) => Ok(()),
            Err(e) if require_device => Err(e),
            Err(e) => {
                warn!("Device {} unavailable, continuing anyway: {}", self.serial, e);
                Ok(())
            }
        }
    }

    async fn keep_frame(&self, frame: &[u8]) {
        if let Some(ref path) = self.screenshot_path {
            if let Err(e) = tokio::fs::write(path, frame).await {
                debug!("Couldn't write {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait]
impl DeviceController for AdbDevice {
    async fn capture(&self) -> Result<Vec<u8>, DeviceError> {
        let frame = self
            .run(&["-s", &self.serial, "exec-out", "screencap", "-p"])
            .await?;
        if frame.is_empty() {
            return Err(DeviceError::EmptyCapture);
        }
        if !frame.starts_with(PNG_MAGIC) {
            let head = String::from_utf8_lossy(&frame[..frame.len().min(120)]).to_string();
            return Err(DeviceError::CommandFailed {
                status: "not a PNG".to_string(),
                stderr: head,
            });
        }
        self.keep_frame(&frame).await;
        Ok(frame)
    }

    async fn send_button(&self, button: Button) -> Result<(), DeviceError> {
        self.run(&[
            "-s",
            &self.serial,
            "shell",
            "input",
            "keyevent",
            button.keycode(),
        ])
        .await?;
        info!("Sent input: {}", button);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let out = "List of devices attached\nemulator-5554\tdevice\nemulator-5556\toffline\n\n";
        let devices = parse_device_list(out);
        assert_eq!(
            devices,
            vec![
                DeviceEntry {
                    serial: "emulator-5554".into(),
                    state: "device".into()
                },
                DeviceEntry {
                    serial: "emulator-5556".into(),
                    state: "offline".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_device_list_skips_daemon_noise() {
        let out = "* daemon not running; starting now at tcp:5037\n* daemon started successfully\nList of devices attached\n";
        assert!(parse_device_list(out).is_empty());
    }

    #[test]
    fn test_from_config_uses_explicit_adb_and_serial() {
        let config = Config {
            adb_path: Some("/opt/android/platform-tools/adb".into()),
            device_name: "emulator-5560".into(),
            screenshot_path: None,
            ..Default::default()
        };
        let device = AdbDevice::from_config(&config);
        assert_eq!(device.adb, PathBuf::from("/opt/android/platform-tools/adb"));
        assert_eq!(device.serial(), "emulator-5560");
        assert!(device.screenshot_path.is_none());
    }

    #[tokio::test]
    async fn test_missing_device_policy() {
        let device = AdbDevice::new("/nonexistent/adb-binary", "emulator-5554");
        assert!(device.ensure_connected(false).await.is_ok());
        assert!(matches!(
            device.ensure_connected(true).await,
            Err(DeviceError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_keep_frame_writes_latest_copy() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("current_screen.png");
        let mut device = AdbDevice::new("adb", "emulator-5554");
        device.screenshot_path = Some(path.clone());

        device.keep_frame(b"\x89PNG first").await;
        device.keep_frame(b"\x89PNG second").await;
        assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG second");

        // Unwritable destination is logged, not fatal
        device.screenshot_path = Some(dir.path().join("missing").join("frame.png"));
        device.keep_frame(b"\x89PNG third").await;
    }

    #[tokio::test]
    async fn test_missing_adb_binary_is_spawn_error() {
        let device = AdbDevice::new("/nonexistent/adb-binary", "emulator-5554");
        match device.capture().await {
            Err(DeviceError::Spawn { .. }) => {}
            other => panic!("expected spawn error, got {:?}", other),
        }
        assert!(device.send_button(Button::A).await.is_err());
    }
}
