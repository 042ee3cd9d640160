//! Network device name validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{NetbedError, NetbedResult};

/// A validated Linux network device name.
///
/// Device names must:
/// - Be 1-15 bytes long (`IFNAMSIZ` minus the terminating NUL)
/// - Not contain `/`, `:` or whitespace
/// - Not be `.` or `..`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceName(String);

impl DeviceName {
    /// Maximum length of a device name in bytes.
    pub const MAX_LENGTH: usize = 15;

    /// Create a new device name, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`NetbedError::InvalidDeviceName`] if the name cannot name a Linux device.
    pub fn new(name: impl Into<String>) -> NetbedResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the device name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> NetbedResult<()> {
        let reject = |reason: &str| {
            Err(NetbedError::InvalidDeviceName {
                name: name.to_string(),
                reason: reason.to_string(),
            })
        };

        if name.is_empty() {
            return reject("name is empty");
        }
        if name.len() > Self::MAX_LENGTH {
            return reject("longer than 15 bytes");
        }
        if name == "." || name == ".." {
            return reject("reserved name");
        }
        if name
            .chars()
            .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
        {
            return reject("contains '/', ':' or whitespace");
        }

        Ok(())
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceName {
    type Err = NetbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceName {
    type Error = NetbedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceName> for String {
    fn from(name: DeviceName) -> Self {
        name.0
    }
}

impl AsRef<str> for DeviceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
