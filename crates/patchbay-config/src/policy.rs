//! Tunable limits of the routing core.

use serde::{Deserialize, Serialize};
use std::path::Path;

use patchbay_core::{HalVersion, SAMPLE_RATE_HZ_DEFAULT, SAMPLE_RATE_HZ_MAX, Uid};

use crate::error::{ConfigError, write_with_parents};
use crate::validation::{ValidationError, ValidationResult, check_range, collect};

/// Settings of the routing core. Every field has a default, so an empty
/// file is a valid configuration.
///
/// # TOML Format
///
/// ```toml
/// registry_capacity = 64
/// max_patch_sinks = 8
/// min_hw_bridge_version = "3.0"
/// max_mixer_sample_rate = 192000
/// default_sample_rate = 48000
/// max_mixer_channel_count = 2
/// system_uid = 1000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Maximum number of simultaneously available devices.
    pub registry_capacity: usize,

    /// Maximum number of sink ports in one patch.
    pub max_patch_sinks: usize,

    /// Oldest module driver version that may bridge devices in hardware.
    pub min_hw_bridge_version: String,

    /// A failed direct open below this rate falls back to the mixer.
    pub max_mixer_sample_rate: u32,

    /// Rate a request is assumed to use when it does not say.
    pub default_sample_rate: u32,

    /// PCM requests with more channels try a direct stream first.
    pub max_mixer_channel_count: u32,

    /// Caller allowed to release any patch.
    pub system_uid: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            registry_capacity: 64,
            max_patch_sinks: 8,
            min_hw_bridge_version: "3.0".to_string(),
            max_mixer_sample_rate: SAMPLE_RATE_HZ_MAX,
            default_sample_rate: SAMPLE_RATE_HZ_DEFAULT,
            max_mixer_channel_count: 2,
            system_uid: 1000,
        }
    }
}

impl PolicyConfig {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "policy_config_loaded");
        Ok(config)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: PolicyConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the settings to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_with_parents(path.as_ref(), &self.to_toml()?)
    }

    /// Convert the settings to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every field.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        let checks = [
            check_range("registry_capacity", self.registry_capacity as u64, 1, 4096),
            check_range("max_patch_sinks", self.max_patch_sinks as u64, 1, 32),
            check_range(
                "max_mixer_sample_rate",
                self.max_mixer_sample_rate.into(),
                8000,
                768_000,
            ),
            check_range(
                "default_sample_rate",
                self.default_sample_rate.into(),
                8000,
                self.max_mixer_sample_rate.into(),
            ),
            check_range(
                "max_mixer_channel_count",
                self.max_mixer_channel_count.into(),
                1,
                32,
            ),
        ];
        errors.extend(checks.into_iter().filter_map(Result::err));
        if self.min_hw_bridge_version.parse::<HalVersion>().is_err() {
            errors.push(ValidationError::InvalidValue {
                field: "min_hw_bridge_version".to_string(),
                reason: format!("'{}' is not a MAJOR.MINOR version", self.min_hw_bridge_version),
            });
        }
        collect(errors)
    }

    /// Parsed [`Self::min_hw_bridge_version`]; an unparsable value (rejected
    /// by [`Self::validate`]) disables hardware bridging.
    pub fn hw_bridge_version(&self) -> HalVersion {
        self.min_hw_bridge_version
            .parse()
            .unwrap_or(HalVersion::new(u16::MAX, u16::MAX))
    }

    /// [`Self::system_uid`] as a handle.
    pub fn system_uid(&self) -> Uid {
        Uid::new(self.system_uid)
    }
}
