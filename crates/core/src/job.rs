//! Backup jobs as delivered by the control plane.

use std::fmt;
use std::str::FromStr;

use crate::error::UnknownDevice;

/// A request to back up one device.
///
/// Every field is non-empty once constructed through the queue parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Control-plane identifier, used as the status callback key.
    pub id: String,
    /// Host name or IP address of the device.
    pub address: String,
    /// Device kind token exactly as published (e.g. `"ubnt"`).
    pub device: String,
}

impl Job {
    /// Resolve the device token to a supported kind.
    pub fn device_kind(&self) -> Result<DeviceKind, UnknownDevice> {
        self.device.parse()
    }
}

/// Device families this worker can back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Ubiquiti airOS devices; running config lives at `/tmp/system.cfg`.
    Ubnt,
}

impl DeviceKind {
    pub fn token(&self) -> &'static str {
        match self {
            DeviceKind::Ubnt => "ubnt",
        }
    }

    /// Default absolute path of the configuration file on the device.
    pub fn default_remote_path(&self) -> &'static str {
        match self {
            DeviceKind::Ubnt => "/tmp/system.cfg",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for DeviceKind {
    type Err = UnknownDevice;

    /// Tokens are matched exactly; `"UBNT"` is not `"ubnt"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ubnt" => Ok(DeviceKind::Ubnt),
            other => Err(UnknownDevice(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(device: &str) -> Job {
        Job {
            id: "1".into(),
            address: "10.0.0.5".into(),
            device: device.into(),
        }
    }

    #[test]
    fn ubnt_is_recognised() {
        assert_eq!(job("ubnt").device_kind(), Ok(DeviceKind::Ubnt));
        assert_eq!(DeviceKind::Ubnt.to_string(), "ubnt");
    }

    #[test]
    fn device_tokens_are_case_sensitive() {
        let err = job("UBNT").device_kind().unwrap_err();
        assert_eq!(err, UnknownDevice("UBNT".into()));
    }

    #[test]
    fn unknown_device_message_names_the_token() {
        let err = job("mikrotik").device_kind().unwrap_err();
        assert_eq!(err.to_string(), "Unknown device field mikrotik");
    }
}
