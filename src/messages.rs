// Message types exchanged with the CLI and configuration files

use serde::{Deserialize, Serialize};

use crate::motor::StatusFields;

// Setup request for one driver: every field is optional and only present
// fields are written. Values may come from a config file or be computed at
// run time; the driver treats both the same.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SetupRequest {
    /// One of 256, 128, 64, 32, 16, 8, 4, 2, or 0 for full steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microsteps: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcool_threshold: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stall_threshold: Option<i64>,
    /// Run current in amps RMS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f32>,
    /// Hold current in amps RMS; defaults to run current * hold multiplier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_current: Option<f32>,
}

impl SetupRequest {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Fields from `self`, falling back to `other` where absent
    pub fn or(&self, other: &SetupRequest) -> SetupRequest {
        SetupRequest {
            microsteps: self.microsteps.or(other.microsteps),
            tcool_threshold: self.tcool_threshold.or(other.tcool_threshold),
            stall_threshold: self.stall_threshold.or(other.stall_threshold),
            current: self.current.or(other.current),
            hold_current: self.hold_current.or(other.hold_current),
        }
    }
}

/// Overall state of one driver, derived from its status registers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DriverHealth {
    Ok,
    Warning,
    Fault,
    Unresponsive,
}

impl From<&StatusFields> for DriverHealth {
    fn from(status: &StatusFields) -> Self {
        if status.has_fault() {
            DriverHealth::Fault
        } else if status.otpw || status.ola || status.olb || status.stall {
            DriverHealth::Warning
        } else {
            DriverHealth::Ok
        }
    }
}

// Status snapshot printed by `status` and `watch`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub address: u8,
    pub health: DriverHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_request_from_json() {
        let req: SetupRequest =
            serde_json::from_str(r#"{"microsteps": 16, "current": 0.8}"#).unwrap();
        assert_eq!(req.microsteps, Some(16));
        assert_eq!(req.current, Some(0.8));
        assert_eq!(req.stall_threshold, None);
        assert!(!req.is_empty());
        assert!(SetupRequest::default().is_empty());
    }

    #[test]
    fn test_setup_request_or() {
        let flags = SetupRequest {
            microsteps: Some(8),
            ..SetupRequest::default()
        };
        let file = SetupRequest {
            microsteps: Some(16),
            current: Some(0.6),
            ..SetupRequest::default()
        };
        let merged = flags.or(&file);
        assert_eq!(merged.microsteps, Some(8));
        assert_eq!(merged.current, Some(0.6));
        assert_eq!(merged.stall_threshold, None);
    }

    #[test]
    fn test_setup_request_rejects_unknown_fields() {
        assert!(serde_json::from_str::<SetupRequest>(r#"{"r_shunt": 0.11}"#).is_err());
    }

    #[test]
    fn test_health_from_status() {
        let ok = StatusFields::default();
        assert_eq!(DriverHealth::from(&ok), DriverHealth::Ok);

        let hot = StatusFields {
            otpw: true,
            ..StatusFields::default()
        };
        assert_eq!(DriverHealth::from(&hot), DriverHealth::Warning);

        let shorted = StatusFields {
            s2ga: true,
            ..StatusFields::default()
        };
        assert_eq!(DriverHealth::from(&shorted), DriverHealth::Fault);
    }

    #[test]
    fn test_health_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&DriverHealth::Unresponsive).unwrap(),
            "\"unresponsive\""
        );
    }
}
