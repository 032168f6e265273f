// Timeouts, bus defaults, board configuration
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::messages::SetupRequest;
use crate::motor::bus::BusConfig;
use crate::motor::datagram::DeviceAddress;
use crate::motor::error::{Result, Tmc2209Error};

// TMC2209 UART auto-bauds; 115200 is the common choice
pub const DEFAULT_BAUDRATE: u32 = 115_200;

// Reply window for one read transaction on the slow half-duplex link
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(20);

// Extra attempts after a read times out
pub const DEFAULT_RETRIES: u32 = 3;

// Status polling rate for `watch`
pub const STATUS_POLL_HZ: u64 = 5;

// Hold current as a fraction of run current when not given explicitly
pub const DEFAULT_HOLD_MULTIPLIER: f32 = 0.5;

// Serial port used when neither --port nor a config file is given
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

fn default_baudrate() -> u32 {
    DEFAULT_BAUDRATE
}

fn default_reply_timeout_ms() -> u64 {
    DEFAULT_REPLY_TIMEOUT.as_millis() as u64
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_echo() -> bool {
    true
}

fn default_hold_multiplier() -> f32 {
    DEFAULT_HOLD_MULTIPLIER
}

/// One driver on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StepperConfig {
    #[serde(default)]
    pub name: String,
    /// 0-3, set by the MS1/MS2 pins
    pub uart_address: u8,
    /// Ohms
    pub sense_resistor: f32,
    #[serde(default)]
    pub reverse_direction: bool,
    #[serde(default = "default_hold_multiplier")]
    pub hold_multiplier: f32,
    /// Applied after initialization
    #[serde(default)]
    pub setup: SetupRequest,
}

impl StepperConfig {
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("stepper@{}", self.uart_address)
        } else {
            self.name.clone()
        }
    }
}

/// One UART with its drivers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_echo")]
    pub echo: bool,
    pub steppers: Vec<StepperConfig>,
}

impl BoardConfig {
    /// Load and validate a JSON board description
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: BoardConfig = serde_json::from_str(&text)
            .map_err(|e| Tmc2209Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Single-driver board, used when only a port is given on the command line
    pub fn single(port: &str, stepper: StepperConfig) -> Self {
        Self {
            port: port.to_string(),
            baudrate: DEFAULT_BAUDRATE,
            reply_timeout_ms: default_reply_timeout_ms(),
            retries: DEFAULT_RETRIES,
            echo: true,
            steppers: vec![stepper],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.steppers.is_empty() {
            return Err(Tmc2209Error::Config(
                "at least one stepper is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stepper in &self.steppers {
            DeviceAddress::new(stepper.uart_address)?;
            if !seen.insert(stepper.uart_address) {
                return Err(Tmc2209Error::Config(format!(
                    "duplicate uart_address {}",
                    stepper.uart_address
                )));
            }
            if !stepper.sense_resistor.is_finite() || stepper.sense_resistor <= 0.0 {
                return Err(Tmc2209Error::Config(format!(
                    "{}: sense_resistor must be positive, got {}",
                    stepper.display_name(),
                    stepper.sense_resistor
                )));
            }
            if !(0.0..=1.0).contains(&stepper.hold_multiplier) {
                return Err(Tmc2209Error::Config(format!(
                    "{}: hold_multiplier must be within 0..=1, got {}",
                    stepper.display_name(),
                    stepper.hold_multiplier
                )));
            }
        }
        Ok(())
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            retries: self.retries,
            echo: self.echo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD_JSON: &str = r#"{
        "port": "/dev/ttyAMA0",
        "steppers": [
            { "name": "x", "uart_address": 0, "sense_resistor": 0.11,
              "setup": { "microsteps": 16, "current": 0.8 } },
            { "name": "y", "uart_address": 1, "sense_resistor": 0.11,
              "reverse_direction": true }
        ]
    }"#;

    #[test]
    fn test_parse_board_with_defaults() {
        let config: BoardConfig = serde_json::from_str(BOARD_JSON).unwrap();
        config.validate().unwrap();

        assert_eq!(config.baudrate, DEFAULT_BAUDRATE);
        assert_eq!(config.retries, DEFAULT_RETRIES);
        assert!(config.echo);
        assert_eq!(config.steppers.len(), 2);
        assert_eq!(config.steppers[0].setup.microsteps, Some(16));
        assert_eq!(config.steppers[1].hold_multiplier, DEFAULT_HOLD_MULTIPLIER);
        assert!(config.steppers[1].reverse_direction);
        assert_eq!(config.bus_config().reply_timeout, DEFAULT_REPLY_TIMEOUT);
    }

    #[test]
    fn test_rejects_duplicate_address() {
        let mut config: BoardConfig = serde_json::from_str(BOARD_JSON).unwrap();
        config.steppers[1].uart_address = 0;
        assert!(matches!(config.validate(), Err(Tmc2209Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_address_and_resistor() {
        let mut config: BoardConfig = serde_json::from_str(BOARD_JSON).unwrap();
        config.steppers[0].uart_address = 4;
        assert!(matches!(
            config.validate(),
            Err(Tmc2209Error::InvalidAddress(4))
        ));

        let mut config: BoardConfig = serde_json::from_str(BOARD_JSON).unwrap();
        config.steppers[0].sense_resistor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hold_multiplier_bounds() {
        let mut config: BoardConfig = serde_json::from_str(BOARD_JSON).unwrap();
        config.steppers[0].hold_multiplier = 0.0;
        config.validate().unwrap();
        config.steppers[0].hold_multiplier = 1.0;
        config.validate().unwrap();
        config.steppers[0].hold_multiplier = 1.01;
        assert!(matches!(config.validate(), Err(Tmc2209Error::Config(_))));
        config.steppers[0].hold_multiplier = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_and_legacy_names() {
        let empty = r#"{ "port": "/dev/ttyS0", "steppers": [] }"#;
        let config: BoardConfig = serde_json::from_str(empty).unwrap();
        assert!(config.validate().is_err());

        let legacy = r#"{ "port": "/dev/ttyS0",
            "steppers": [{ "tmc_address": 0, "r_shunt": 0.11 }] }"#;
        assert!(serde_json::from_str::<BoardConfig>(legacy).is_err());
    }

    #[test]
    fn test_display_name() {
        let config: BoardConfig = serde_json::from_str(BOARD_JSON).unwrap();
        assert_eq!(config.steppers[0].display_name(), "x");
        let mut unnamed = config.steppers[1].clone();
        unnamed.name.clear();
        assert_eq!(unnamed.display_name(), "stepper@1");
    }
}
