//! Hardware topology declarations.
//!
//! A topology file lists the hardware modules of a platform, the devices each
//! one declares, its mix ports (I/O profiles) and the routes wiring them. It is
//! the serialized form of a [`ProfileCatalog`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use patchbay_core::{
    AudioFormat, AudioProfile, ChannelMask, DeclaredDevice, DeviceKey, DeviceType, HalVersion,
    HwModule, InputFlags, IoFlags, IoProfile, IoRole, OutputFlags, PortRole, ProfileCatalog, Route,
    RoutePort,
};

use crate::error::{ConfigError, write_with_parents};
use crate::validation::{ValidationError, check_range, collect, parse_named};

/// A whole platform.
///
/// # TOML Format
///
/// ```toml
/// [[modules]]
/// name = "primary"
/// version = "3.0"
///
/// [[modules.devices]]
/// name = "Speaker"
/// type = "out_speaker"
/// attached = true
///
/// [[modules.outputs]]
/// name = "primary output"
/// flags = "primary|fast"
///
/// [[modules.outputs.profiles]]
/// format = "pcm_16_bit"
/// rates = [48000]
/// masks = ["out_stereo"]
///
/// [[modules.routes]]
/// sink = "Speaker"
/// sources = ["primary output"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TopologyConfig {
    /// Hardware modules in declaration order.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

/// One hardware module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfig {
    /// Unique module name.
    pub name: String,
    /// Driver interface version, `MAJOR.MINOR`.
    #[serde(default = "default_version")]
    pub version: String,
    /// Declared devices.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Playback mix ports.
    #[serde(default)]
    pub outputs: Vec<MixPortConfig>,
    /// Capture mix ports.
    #[serde(default)]
    pub inputs: Vec<MixPortConfig>,
    /// Routes between ports, by name.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_version() -> String {
    "2.0".to_string()
}

/// A declared device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Name, unique in the module; referenced by mix ports and routes.
    pub name: String,
    /// Device type name (`out_speaker`, `in_builtin_mic`, ...).
    #[serde(rename = "type")]
    pub device_type: String,
    /// Address; empty matches any address of the type.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    /// Attached from boot.
    #[serde(default)]
    pub attached: bool,
    /// Exposes a gain controller.
    #[serde(default)]
    pub gain_control: bool,
    /// Encoded formats the device can carry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encoded_formats: Vec<String>,
}

/// A mix port: one I/O profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MixPortConfig {
    /// Name, unique in the module.
    pub name: String,
    /// Flags joined by `|`.
    #[serde(default)]
    pub flags: String,
    /// Reachable device names; derived from the routes when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    /// Supported configurations.
    #[serde(default)]
    pub profiles: Vec<AudioProfileConfig>,
    /// Maximum concurrently open streams (0 = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_open_count: Option<u32>,
    /// Maximum concurrently active streams (0 = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_active_count: Option<u32>,
    /// Settling time after a device change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_mute_duration_ms: Option<u32>,
}

/// Rates and masks for one format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AudioProfileConfig {
    /// Format name; empty for dynamic profiles.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    /// Sample rates in Hz.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rates: Vec<u32>,
    /// Channel mask names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masks: Vec<String>,
    /// Queried from the hardware when a device connects.
    #[serde(default, skip_serializing_if = "is_false")]
    pub dynamic: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// A route: every source can feed the sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfig {
    /// Device or mix port name.
    pub sink: String,
    /// Device or mix port names.
    pub sources: Vec<String>,
}

impl TopologyConfig {
    /// Load a topology from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load a topology from a TOML string. Names are checked by [`Self::into_catalog`].
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the topology to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        write_with_parents(path.as_ref(), &self.to_toml()?)
    }

    /// Convert the topology to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolves every name and builds the catalog.
    ///
    /// All problems are collected; more than one is reported as
    /// [`ValidationError::Multiple`].
    pub fn into_catalog(self) -> Result<ProfileCatalog, ConfigError> {
        let mut errors = Vec::new();
        let mut catalog = ProfileCatalog::new();
        let mut seen = Vec::new();
        for module in self.modules {
            if seen.contains(&module.name) {
                errors.push(ValidationError::Duplicate {
                    kind: "module",
                    name: module.name.clone(),
                    module: String::new(),
                });
                continue;
            }
            seen.push(module.name.clone());
            if let Some(built) = module.build(&mut errors) {
                catalog.add_module(built);
            }
        }
        collect(errors)?;
        tracing::debug!(modules = catalog.modules().len(), "topology_built");
        Ok(catalog)
    }
}

impl ModuleConfig {
    fn build(self, errors: &mut Vec<ValidationError>) -> Option<HwModule> {
        let before = errors.len();
        let version = parse_named::<HalVersion>("driver version", &self.version, errors);
        let mut module = HwModule::new(self.name.clone(), version.unwrap_or_default());

        let mut device_keys: BTreeMap<String, DeviceKey> = BTreeMap::new();
        for device in &self.devices {
            if device_keys.contains_key(&device.name) {
                errors.push(self.duplicate("device", &device.name));
                continue;
            }
            let Some(device_type) = parse_named::<DeviceType>("device type", &device.device_type, errors)
            else {
                continue;
            };
            let encoded_formats = device
                .encoded_formats
                .iter()
                .filter_map(|f| parse_named::<AudioFormat>("format", f, errors))
                .collect();
            let key = DeviceKey::new(device_type, device.address.clone());
            device_keys.insert(device.name.clone(), key.clone());
            module.devices.push(DeclaredDevice {
                key,
                name: device.name.clone(),
                attached_at_boot: device.attached,
                has_gain_control: device.gain_control,
                encoded_formats,
            });
        }

        let mix_names: Vec<&str> = self
            .outputs
            .iter()
            .chain(&self.inputs)
            .map(|p| p.name.as_str())
            .collect();
        for (i, name) in mix_names.iter().enumerate() {
            if mix_names[..i].contains(name) {
                errors.push(self.duplicate("mix port", name));
            }
        }

        let resolve_port = |name: &str, errors: &mut Vec<ValidationError>| {
            if let Some(key) = device_keys.get(name) {
                Some(RoutePort::Device(key.clone()))
            } else if mix_names.contains(&name) {
                Some(RoutePort::Mix(name.to_string()))
            } else {
                errors.push(ValidationError::UnknownName {
                    kind: "route port",
                    name: format!("{}/{name}", self.name),
                });
                None
            }
        };
        for route in &self.routes {
            let sink = resolve_port(&route.sink, errors);
            let sources: Vec<RoutePort> = route
                .sources
                .iter()
                .filter_map(|s| resolve_port(s, errors))
                .collect();
            if let Some(sink) = sink {
                module.routes.push(Route { sink, sources });
            }
        }

        for (role, ports) in [(IoRole::Output, &self.outputs), (IoRole::Input, &self.inputs)] {
            for port in ports {
                if let Some(profile) = port.build(role, &module, &device_keys, errors) {
                    match role {
                        IoRole::Output => module.outputs.push(profile),
                        IoRole::Input => module.inputs.push(profile),
                    }
                }
            }
        }

        (errors.len() == before).then_some(module)
    }

    fn duplicate(&self, kind: &'static str, name: &str) -> ValidationError {
        ValidationError::Duplicate {
            kind,
            name: name.to_string(),
            module: self.name.clone(),
        }
    }
}

impl MixPortConfig {
    fn build(
        &self,
        role: IoRole,
        module: &HwModule,
        device_keys: &BTreeMap<String, DeviceKey>,
        errors: &mut Vec<ValidationError>,
    ) -> Option<IoProfile> {
        let flags = match role {
            IoRole::Output => {
                IoFlags::Output(parse_named::<OutputFlags>("output flags", &self.flags, errors)?)
            }
            IoRole::Input => {
                IoFlags::Input(parse_named::<InputFlags>("input flags", &self.flags, errors)?)
            }
        };
        let mut profile = IoProfile::new(self.name.clone(), flags);
        if let Some(max_open) = self.max_open_count {
            profile.max_open_count = max_open;
        }
        if let Some(max_active) = self.max_active_count {
            profile.max_active_count = max_active;
        }
        profile.recommended_mute_duration_ms = self.recommended_mute_duration_ms;

        let expected = match role {
            IoRole::Output => PortRole::Sink,
            IoRole::Input => PortRole::Source,
        };
        if self.devices.is_empty() {
            profile.supported_devices = match role {
                IoRole::Output => module.devices_routed_from_mix(&self.name),
                IoRole::Input => module.devices_routed_to_mix(&self.name),
            };
        }
        for name in &self.devices {
            match device_keys.get(name) {
                Some(key) if key.device_type.role() == expected => {
                    profile.supported_devices.push(key.clone());
                }
                Some(key) => errors.push(ValidationError::InvalidValue {
                    field: format!("{}/{}", module.name, self.name),
                    reason: format!("{role} port cannot reach {}", key.device_type),
                }),
                None => errors.push(ValidationError::UnknownName {
                    kind: "device",
                    name: format!("{}/{name}", module.name),
                }),
            }
        }

        for audio in &self.profiles {
            if let Some(built) = audio.build(&format!("{}/{}", module.name, self.name), errors) {
                profile.audio_profiles.push(built);
            }
        }
        Some(profile)
    }
}

impl AudioProfileConfig {
    fn build(&self, field: &str, errors: &mut Vec<ValidationError>) -> Option<AudioProfile> {
        if self.dynamic {
            return Some(AudioProfile::dynamic());
        }
        let format = parse_named::<AudioFormat>("format", &self.format, errors)?;
        if self.rates.is_empty() || self.masks.is_empty() {
            errors.push(ValidationError::InvalidValue {
                field: field.to_string(),
                reason: "a fixed audio profile needs rates and masks".to_string(),
            });
            return None;
        }
        for rate in &self.rates {
            if let Err(e) = check_range("sample rate", (*rate).into(), 1000, 768_000) {
                errors.push(e);
            }
        }
        let masks = self
            .masks
            .iter()
            .filter_map(|m| parse_named::<ChannelMask>("channel mask", m, errors))
            .collect();
        Some(AudioProfile::new(format, self.rates.clone(), masks))
    }
}
