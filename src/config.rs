//! Service configuration file
//!
//! ```json
//! {
//!   "service": [
//!     {
//!       "host": "0.0.0.0",
//!       "connect": "192.168.1.20",
//!       "port": 452,
//!       "input_device_name": "USB Microphone",
//!       "output_device_name": "Speakers",
//!       "share": true,
//!       "listen": true
//!     }
//!   ]
//! }
//! ```
//!
//! Every field of an entry is optional. Missing device names select the
//! system default device.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::constants::{DEFAULT_ADDRESS, DEFAULT_PORT};
use crate::error::ConfigError;
use crate::network::Endpoint;

/// Top-level configuration: one entry per service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service: Vec<ServiceEntry>,
}

/// One share/listen pair bound to one pair of devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEntry {
    /// Address the share channel binds to
    pub host: String,

    /// Address the listen channel connects to
    pub connect: String,

    /// Port used for both directions
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device_name: Option<String>,

    /// Stream the input device to peers that connect
    pub share: bool,

    /// Connect to the peer and play what it shares
    pub listen: bool,
}

impl Default for ServiceEntry {
    fn default() -> Self {
        Self {
            host: DEFAULT_ADDRESS.to_string(),
            connect: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            input_device_name: None,
            output_device_name: None,
            share: true,
            listen: true,
        }
    }
}

impl ServiceEntry {
    pub fn share_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn listen_endpoint(&self) -> Endpoint {
        Endpoint::new(self.connect.clone(), self.port)
    }

    /// Short description for logs
    pub fn label(&self) -> String {
        match (self.share, self.listen) {
            (true, true) => format!("share {} / listen {}", self.share_endpoint(), self.listen_endpoint()),
            (true, false) => format!("share {}", self.share_endpoint()),
            (false, true) => format!("listen {}", self.listen_endpoint()),
            (false, false) => "inactive".to_string(),
        }
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid(format!("service {}: port must not be 0", index)));
        }
        if !self.share && !self.listen {
            return Err(ConfigError::Invalid(format!(
                "service {}: neither share nor listen is enabled",
                index
            )));
        }
        if self.share && self.host.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("service {}: empty host", index)));
        }
        if self.listen && self.connect.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("service {}: empty connect address", index)));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service: vec![ServiceEntry::default()],
        }
    }
}

impl ServiceConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read `path`, or write the default configuration there if it does not exist
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let io_error = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        if path.exists() {
            let json = fs::read_to_string(path).map_err(io_error)?;
            return Self::from_json(&json);
        }

        let config = Self::default();
        fs::write(path, config.to_json()?).map_err(io_error)?;
        tracing::info!("Wrote default configuration to {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.is_empty() {
            return Err(ConfigError::Invalid("no service configured".to_string()));
        }
        for (index, entry) in self.service.iter().enumerate() {
            entry.validate(index)?;
        }
        Ok(())
    }
}
