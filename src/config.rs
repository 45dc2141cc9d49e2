use crate::cl_util::{DevicePreference, PlatformCriteria};
use crate::error::{Error, Result};
use std::env;

/// Environment variable selecting the device: `host`, `gpu`, `require-gpu` or `cpu`.
pub const DEVICE_ENV: &str = "RUSTY_NNET_DEVICE";
/// Environment variable holding the number of command queues to open.
pub const QUEUES_ENV: &str = "RUSTY_NNET_QUEUES";
pub const DEFAULT_QUEUE_COUNT: usize = 2;

/// How to pick and open the compute device.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub preference: DevicePreference,
    pub queue_count: usize,
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            preference: DevicePreference::Host,
            queue_count: DEFAULT_QUEUE_COUNT,
        }
    }
}

pub fn parse_preference(value: &str) -> Result<DevicePreference> {
    match value.trim().to_lowercase().as_str() {
        "host" => Ok(DevicePreference::Host),
        "gpu" => Ok(DevicePreference::PreferGpu),
        "require-gpu" => Ok(DevicePreference::RequireGpu),
        "cpu" => Ok(DevicePreference::RequireCpu),
        other => Err(Error::Format(format!(
            "unknown device preference \"{}\" in {}",
            other, DEVICE_ENV
        ))),
    }
}

impl DeviceConfig {
    /// Reads the configuration from the environment, falling back to the defaults for unset
    /// variables.
    pub fn from_env() -> Result<DeviceConfig> {
        let mut config = DeviceConfig::default();
        if let Ok(value) = env::var(DEVICE_ENV) {
            config.preference = parse_preference(&value)?;
        }
        if let Ok(value) = env::var(QUEUES_ENV) {
            config.queue_count = value.trim().parse().map_err(|_| {
                Error::Format(format!("{} must be a positive integer, got \"{}\"", QUEUES_ENV, value))
            })?;
        }
        Ok(config)
    }

    pub fn criteria(&self) -> PlatformCriteria {
        PlatformCriteria::new(self.preference)
    }
}
