// Transport settings and their JSON persistence

use crate::types::{TelemetryError, TelemetryResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SETTINGS_FILE: &str = "settings.json";

pub const SUPPORTED_BAUDRATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 10_000;

/// Serial Modbus parameters used by the live backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    pub usb_port: String,
    pub baudrate: u32,
    pub initial_address: u16,
    pub count: u16,
    /// Response timeout in milliseconds
    pub timeout: u64,
    pub unit_id: u8,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            usb_port: String::new(),
            baudrate: 9600,
            initial_address: 100,
            count: 2,
            timeout: 1000,
            unit_id: 10,
        }
    }
}

impl TransportSettings {
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.usb_port.trim().is_empty() {
            return Err(TelemetryError::validation("USB port is required"));
        }
        if !SUPPORTED_BAUDRATES.contains(&self.baudrate) {
            return Err(TelemetryError::validation(format!(
                "unsupported baudrate {}",
                self.baudrate
            )));
        }
        if self.count < 1 {
            return Err(TelemetryError::validation("register count must be at least 1"));
        }
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.timeout) {
            return Err(TelemetryError::validation(format!(
                "timeout must be between {} and {} ms",
                MIN_TIMEOUT_MS, MAX_TIMEOUT_MS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub modbus: TransportSettings,
}

impl Settings {
    pub fn validate(&self) -> TelemetryResult<()> {
        self.modbus.validate()
    }

    pub fn apply(&mut self, patch: SettingsPatch) {
        let modbus = &mut self.modbus;
        if let Some(usb_port) = patch.usb_port {
            modbus.usb_port = usb_port;
        }
        if let Some(baudrate) = patch.baudrate {
            modbus.baudrate = baudrate;
        }
        if let Some(initial_address) = patch.initial_address {
            modbus.initial_address = initial_address;
        }
        if let Some(count) = patch.count {
            modbus.count = count;
        }
        if let Some(timeout) = patch.timeout {
            modbus.timeout = timeout;
        }
        if let Some(unit_id) = patch.unit_id {
            modbus.unit_id = unit_id;
        }
    }
}

/// Partial update merged over the stored settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub usb_port: Option<String>,
    pub baudrate: Option<u32>,
    pub initial_address: Option<u16>,
    pub count: Option<u16>,
    pub timeout: Option<u64>,
    pub unit_id: Option<u8>,
}

/// Get the application configuration directory
pub fn get_app_config_dir() -> TelemetryResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| TelemetryError::validation("Could not find config directory"))?;

    let app_config_dir = config_dir.join("distill");
    fs::create_dir_all(&app_config_dir)?;

    Ok(app_config_dir)
}

/// Settings persisted as pretty JSON on disk
pub struct SettingsStore {
    settings: Arc<RwLock<Settings>>,
    path: PathBuf,
}

impl SettingsStore {
    /// Open the store in the user's config directory
    pub fn open_default() -> TelemetryResult<Self> {
        Self::open(get_app_config_dir()?.join(SETTINGS_FILE))
    }

    /// Load settings from `path`, writing defaults if the file is missing or
    /// unreadable
    pub fn open(path: impl Into<PathBuf>) -> TelemetryResult<Self> {
        let path = path.into();
        let settings = match Self::read(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings at {} unusable ({}), writing defaults", path.display(), e);
                let settings = Settings::default();
                Self::write(&path, &settings)?;
                settings
            }
        };

        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            path,
        })
    }

    fn read(path: &Path) -> TelemetryResult<Settings> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write(path: &Path, settings: &Settings) -> TelemetryResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Merge `patch` into the stored settings and persist the result
    pub fn update(&self, patch: SettingsPatch) -> TelemetryResult<Settings> {
        let mut settings = self.settings.write();
        let mut updated = settings.clone();
        updated.apply(patch);
        Self::write(&self.path, &updated)?;
        *settings = updated.clone();
        log::info!("Settings saved to {}", self.path.display());
        Ok(updated)
    }
}
