//! Configuration types for the route sync agent

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::trigger::SyncMode;

/// Supported cloud providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Azure,
    Aws,
    Gcp,
}

impl FromStr for CloudProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "azure" => Ok(Self::Azure),
            "aws" => Ok(Self::Aws),
            "gcp" => Ok(Self::Gcp),
            other => Err(Error::config(format!(
                "unsupported cloud provider {other:?} (expected azure, aws or gcp)"
            ))),
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Azure => "azure",
            Self::Aws => "aws",
            Self::Gcp => "gcp",
        };
        f.write_str(name)
    }
}

/// Agent configuration, assembled from CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Target cloud provider.
    pub provider: CloudProvider,

    /// Kernel route table polling interval, seconds.
    pub netlink_poll_secs: u64,

    /// Cloud route table sync interval (periodic mode), seconds.
    pub sync_interval_secs: u64,

    /// Sync on change signals instead of the periodic timer.
    pub event_mode: bool,
}

impl SyncConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.netlink_poll_secs == 0 {
            return Err(Error::config("netlink polling interval must be > 0"));
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::config("cloud sync interval must be > 0"));
        }
        Ok(())
    }

    /// Kernel polling interval as a [`Duration`].
    pub fn netlink_poll_interval(&self) -> Duration {
        Duration::from_secs(self.netlink_poll_secs)
    }

    /// The trigger mode this configuration selects.
    pub fn sync_mode(&self) -> SyncMode {
        if self.event_mode {
            SyncMode::Event
        } else {
            SyncMode::Periodic(Duration::from_secs(self.sync_interval_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing() {
        assert_eq!("azure".parse::<CloudProvider>().unwrap(), CloudProvider::Azure);
        assert_eq!("aws".parse::<CloudProvider>().unwrap(), CloudProvider::Aws);
        assert_eq!("gcp".parse::<CloudProvider>().unwrap(), CloudProvider::Gcp);
        assert!("digitalocean".parse::<CloudProvider>().is_err());
        assert!("".parse::<CloudProvider>().is_err());
    }

    #[test]
    fn validation_rejects_zero_intervals() {
        let config = SyncConfig {
            provider: CloudProvider::Azure,
            netlink_poll_secs: 0,
            sync_interval_secs: 10,
            event_mode: false,
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            netlink_poll_secs: 10,
            sync_interval_secs: 0,
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sync_mode_selection() {
        let mut config = SyncConfig {
            provider: CloudProvider::Gcp,
            netlink_poll_secs: 10,
            sync_interval_secs: 30,
            event_mode: false,
        };
        assert_eq!(
            config.sync_mode(),
            SyncMode::Periodic(Duration::from_secs(30))
        );

        config.event_mode = true;
        assert_eq!(config.sync_mode(), SyncMode::Event);
    }
}
