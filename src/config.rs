//! # Configuration
//!
//! The device reads a single TOML file, by default `~/.gatelock/config.toml`. A missing
//! file is written with defaults on first start so the installation crew has something
//! to edit. Every section falls back to its defaults when omitted.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::controller::{Color, ControllerSettings, SecurityCode};
use crate::led::LedLayout;
use crate::mqtt::LinkSettings;

const CONFIG_DIR: &str = ".gatelock";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// One of trace, debug, info, warn, error
    pub log_level: String,
    pub broker: BrokerConfig,
    pub buttons: ButtonConfig,
    pub leds: LedConfig,
    pub lock: LockConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Inbound topic carrying a JSON array of colors
    pub code_topic: String,
    /// Outbound topic receiving "UNLOCK"
    pub unlock_topic: String,
    pub handshake_timeout_ms: u64,
    pub frame_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ButtonConfig {
    pub red_pin: u8,
    pub green_pin: u8,
    pub blue_pin: u8,
    pub debounce_ms: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LedConfig {
    /// Rung segments followed by the result segment
    pub segments: Vec<usize>,
    pub spi_bus: u8,
    pub brightness: u8,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    pub default_code: Vec<Color>,
    pub tick_ms: u64,
    pub error_backoff_ms: u64,
    pub status_log_interval_s: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            broker: BrokerConfig::default(),
            buttons: ButtonConfig::default(),
            leds: LedConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "homeassistant.local".to_string(),
            port: 1883,
            client_id: "gate-controller".to_string(),
            user: None,
            password: None,
            code_topic: "lock/code".to_string(),
            unlock_topic: "lock/status".to_string(),
            handshake_timeout_ms: 10_000,
            frame_timeout_ms: 500,
            reconnect_interval_ms: 5_000,
            connect_attempts: 5,
            connect_backoff_ms: 2_000,
        }
    }
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            red_pin: 18,
            green_pin: 19,
            blue_pin: 5,
            debounce_ms: 200,
        }
    }
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            segments: vec![9, 9, 9, 36],
            spi_bus: 0,
            brightness: 255,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_code: SecurityCode::default().as_slice().to_vec(),
            tick_ms: 50,
            error_backoff_ms: 1_000,
            status_log_interval_s: 60,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads `path`, writing a default file there first if nothing exists yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No configuration at {}, writing defaults", path.display());
            Self::default().save(path)?;
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)
            .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.security_code()?;
        self.led_layout()?;
        let pins = [
            self.buttons.red_pin,
            self.buttons.green_pin,
            self.buttons.blue_pin,
        ];
        if pins[0] == pins[1] || pins[1] == pins[2] || pins[0] == pins[2] {
            return Err(eyre!("Button pins must be distinct, got {:?}", pins));
        }
        if self.broker.code_topic.is_empty() || self.broker.unlock_topic.is_empty() {
            return Err(eyre!("Broker topics must not be empty"));
        }
        Ok(())
    }

    pub fn security_code(&self) -> Result<SecurityCode> {
        SecurityCode::new(self.lock.default_code.clone())
            .map_err(|e| eyre!("Invalid default code: {}", e))
    }

    pub fn led_layout(&self) -> Result<LedLayout> {
        LedLayout::new(self.leds.segments.clone()).map_err(|e| eyre!("{}", e))
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            client_id: self.broker.client_id.clone(),
            user: self.broker.user.clone(),
            password: self.broker.password.clone(),
            handshake_timeout: Duration::from_millis(self.broker.handshake_timeout_ms),
            frame_timeout: Duration::from_millis(self.broker.frame_timeout_ms),
            ..LinkSettings::default()
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            code_topic: self.broker.code_topic.clone(),
            unlock_topic: self.broker.unlock_topic.clone(),
            tick_interval: Duration::from_millis(self.lock.tick_ms),
            error_backoff: Duration::from_millis(self.lock.error_backoff_ms),
            reconnect_interval: Duration::from_millis(self.broker.reconnect_interval_ms),
            connect_attempts: self.broker.connect_attempts,
            connect_backoff: Duration::from_millis(self.broker.connect_backoff_ms),
            status_log_interval: Duration::from_secs(self.lock.status_log_interval_s),
        }
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
