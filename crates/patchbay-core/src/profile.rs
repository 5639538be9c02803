//! Hardware modules and the I/O profiles they declare.
//!
//! A [`ProfileCatalog`] is the static description of the platform: which
//! modules exist, which devices each can reach, which stream configurations
//! each can open and how devices are wired to each other inside the module.
//! Only the open/active counters and dynamic audio profiles change at runtime.

use core::fmt;
use core::str::FromStr;

use crate::audio::{AudioConfig, AudioFormat, ChannelMask};
use crate::device::DeviceKey;
use crate::flags::{IoFlags, IoRole, OutputFlags};
use crate::handle::{ModuleId, ProfileId};

/// Version of a module's driver interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HalVersion {
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
}

impl HalVersion {
    /// Creates a version.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for HalVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for HalVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid driver version '{s}'"))
        };
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

/// The rates and masks a profile supports for one format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioProfile {
    /// Sample encoding.
    pub format: AudioFormat,
    /// Supported rates, ascending.
    pub sample_rates: Vec<u32>,
    /// Supported channel masks.
    pub channel_masks: Vec<ChannelMask>,
    /// Filled in from the hardware when a device connects.
    pub dynamic: bool,
}

impl AudioProfile {
    /// A fixed audio profile.
    pub fn new(format: AudioFormat, sample_rates: Vec<u32>, channel_masks: Vec<ChannelMask>) -> Self {
        let mut sample_rates = sample_rates;
        sample_rates.sort_unstable();
        sample_rates.dedup();
        Self {
            format,
            sample_rates,
            channel_masks,
            dynamic: false,
        }
    }

    /// An empty placeholder queried from the hardware at connection time.
    pub fn dynamic() -> Self {
        Self {
            format: AudioFormat::Default,
            sample_rates: Vec::new(),
            channel_masks: Vec::new(),
            dynamic: true,
        }
    }

    /// Nothing is known yet.
    pub fn is_empty(&self) -> bool {
        !self.format.is_valid() || self.sample_rates.is_empty() || self.channel_masks.is_empty()
    }

    /// Whether `config` is one of the declared tuples.
    pub fn declares(&self, config: &AudioConfig) -> bool {
        self.format == config.format
            && self.sample_rates.contains(&config.sample_rate)
            && self.channel_masks.contains(&config.channel_mask)
    }

    /// Every declared tuple.
    pub fn configs(&self) -> impl Iterator<Item = AudioConfig> + '_ {
        self.sample_rates.iter().flat_map(move |rate| {
            self.channel_masks
                .iter()
                .map(move |mask| AudioConfig::new(*rate, self.format, *mask))
        })
    }
}

/// A capability descriptor for one kind of stream a module can open.
#[derive(Debug, Clone, PartialEq)]
pub struct IoProfile {
    /// Name, unique within the module.
    pub name: String,
    /// Flags every stream opened from this profile runs with.
    pub flags: IoFlags,
    /// Devices this profile can reach.
    pub supported_devices: Vec<DeviceKey>,
    /// Supported tuples, grouped by format.
    pub audio_profiles: Vec<AudioProfile>,
    /// Maximum number of concurrently open streams; 0 means unlimited.
    pub max_open_count: u32,
    /// Maximum number of concurrently active streams; 0 means unlimited.
    pub max_active_count: u32,
    /// How long the hardware needs to settle after a device change.
    pub recommended_mute_duration_ms: Option<u32>,
    open_count: u32,
    active_count: u32,
}

impl IoProfile {
    /// Creates a profile with a single open and active slot for direct and
    /// capture profiles, unlimited otherwise.
    pub fn new(name: impl Into<String>, flags: IoFlags) -> Self {
        let limit = match flags {
            IoFlags::Output(f) if !f.contains(OutputFlags::DIRECT) => 0,
            _ => 1,
        };
        Self {
            name: name.into(),
            flags,
            supported_devices: Vec::new(),
            audio_profiles: Vec::new(),
            max_open_count: limit,
            max_active_count: limit,
            recommended_mute_duration_ms: None,
            open_count: 0,
            active_count: 0,
        }
    }

    /// Builder: adds a reachable device.
    #[must_use]
    pub fn with_device(mut self, key: DeviceKey) -> Self {
        self.supported_devices.push(key);
        self
    }

    /// Builder: adds an audio profile.
    #[must_use]
    pub fn with_audio_profile(mut self, profile: AudioProfile) -> Self {
        self.audio_profiles.push(profile);
        self
    }

    /// Builder: sets the open and active limits.
    #[must_use]
    pub fn with_limits(mut self, max_open: u32, max_active: u32) -> Self {
        self.max_open_count = max_open;
        self.max_active_count = max_active;
        self
    }

    /// Builder: sets the recommended mute duration.
    #[must_use]
    pub fn with_mute_duration(mut self, ms: u32) -> Self {
        self.recommended_mute_duration_ms = Some(ms);
        self
    }

    /// Output or input.
    pub fn role(&self) -> IoRole {
        self.flags.role()
    }

    /// Playback flags, empty for capture profiles.
    pub fn output_flags(&self) -> OutputFlags {
        self.flags.output()
    }

    /// Whether some declaration of this profile covers `device`.
    pub fn supports_device(&self, device: &DeviceKey) -> bool {
        self.supported_devices.iter().any(|d| d.covers(device))
    }

    /// Whether every device of `devices` is covered. An empty set always is.
    pub fn supports_all_devices(&self, devices: &[DeviceKey]) -> bool {
        devices.iter().all(|d| self.supports_device(d))
    }

    /// Whether `config` is one of the declared tuples.
    pub fn declares(&self, config: &AudioConfig) -> bool {
        self.audio_profiles.iter().any(|p| p.declares(config))
    }

    /// Whether any audio profile is filled in at connection time.
    pub fn has_dynamic_audio_profiles(&self) -> bool {
        self.audio_profiles.iter().any(|p| p.dynamic)
    }

    /// Replaces the dynamic placeholders with capabilities reported by the hardware.
    pub fn import_capabilities(&mut self, reported: Vec<AudioProfile>) {
        self.audio_profiles.retain(|p| !p.dynamic || p.is_empty());
        for mut profile in reported {
            profile.dynamic = true;
            if !self.audio_profiles.contains(&profile) {
                self.audio_profiles.push(profile);
            }
        }
    }

    /// Forgets the capabilities imported for a device that went away.
    pub fn clear_dynamic(&mut self) {
        self.audio_profiles.retain(|p| !p.dynamic || p.is_empty());
    }

    /// First declared tuple, used as the stream configuration when the
    /// request leaves everything to the profile.
    pub fn first_config(&self) -> Option<AudioConfig> {
        self.audio_profiles
            .iter()
            .filter(|p| !p.is_empty())
            .find_map(|p| p.configs().next())
    }

    /// Number of open streams.
    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    /// Number of active streams.
    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    /// Whether one more stream may be opened.
    pub fn can_open_new_io(&self) -> bool {
        self.max_open_count == 0 || self.open_count < self.max_open_count
    }

    /// Whether one more stream may become active.
    pub fn can_start_new_io(&self) -> bool {
        self.max_active_count == 0 || self.active_count < self.max_active_count
    }

    /// Records an opened stream.
    pub fn note_opened(&mut self) {
        self.open_count += 1;
    }

    /// Records a closed stream.
    pub fn note_closed(&mut self) {
        self.open_count = self.open_count.saturating_sub(1);
    }

    /// Records a stream that became active.
    pub fn note_started(&mut self) {
        self.active_count += 1;
    }

    /// Records a stream that became idle.
    pub fn note_stopped(&mut self) {
        self.active_count = self.active_count.saturating_sub(1);
    }
}

/// A device a module declares, possibly attached from boot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredDevice {
    /// Type and address (an empty address matches any address of the type).
    pub key: DeviceKey,
    /// Human readable name.
    pub name: String,
    /// Permanently attached (speaker, built-in mic, ...).
    pub attached_at_boot: bool,
    /// Exposes a gain controller.
    pub has_gain_control: bool,
    /// Encoded formats the device can carry.
    pub encoded_formats: Vec<AudioFormat>,
}

impl DeclaredDevice {
    /// A declared device with no special capabilities.
    pub fn new(key: DeviceKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            attached_at_boot: false,
            has_gain_control: false,
            encoded_formats: Vec::new(),
        }
    }
}

/// One end of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePort {
    /// A device port.
    Device(DeviceKey),
    /// A mix port, named after an I/O profile.
    Mix(String),
}

/// A physical connection inside a module: every source can feed the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// The consuming end.
    pub sink: RoutePort,
    /// The producing ends.
    pub sources: Vec<RoutePort>,
}

/// A hardware module and everything it declares.
#[derive(Debug, Clone, PartialEq)]
pub struct HwModule {
    /// Position in the catalog, assigned by [`ProfileCatalog::add_module`].
    pub id: ModuleId,
    /// Name, unique in the catalog.
    pub name: String,
    /// Driver interface version.
    pub hal_version: HalVersion,
    /// Declared devices.
    pub devices: Vec<DeclaredDevice>,
    /// Playback profiles.
    pub outputs: Vec<IoProfile>,
    /// Capture profiles.
    pub inputs: Vec<IoProfile>,
    /// Internal routes.
    pub routes: Vec<Route>,
}

impl HwModule {
    /// An empty module.
    pub fn new(name: impl Into<String>, hal_version: HalVersion) -> Self {
        Self {
            id: ModuleId::new(0),
            name: name.into(),
            hal_version,
            devices: Vec::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Profiles of one direction.
    pub fn profiles(&self, role: IoRole) -> &[IoProfile] {
        match role {
            IoRole::Output => &self.outputs,
            IoRole::Input => &self.inputs,
        }
    }

    /// The declaration covering a concrete device, if this module has one.
    pub fn declared_device(&self, key: &DeviceKey) -> Option<&DeclaredDevice> {
        self.devices.iter().find(|d| d.key.covers(key))
    }

    /// Whether a route wires the `source` device directly to the `sink` device.
    pub fn has_direct_route(&self, source: &DeviceKey, sink: &DeviceKey) -> bool {
        self.routes.iter().any(|route| {
            matches!(&route.sink, RoutePort::Device(k) if k.covers(sink))
                && route
                    .sources
                    .iter()
                    .any(|s| matches!(s, RoutePort::Device(k) if k.covers(source)))
        })
    }

    /// Sink devices routed from the named mix port.
    pub fn devices_routed_from_mix(&self, mix: &str) -> Vec<DeviceKey> {
        self.routes
            .iter()
            .filter(|r| r.sources.iter().any(|s| matches!(s, RoutePort::Mix(m) if m == mix)))
            .filter_map(|r| match &r.sink {
                RoutePort::Device(k) => Some(k.clone()),
                RoutePort::Mix(_) => None,
            })
            .collect()
    }

    /// Source devices routed into the named mix port.
    pub fn devices_routed_to_mix(&self, mix: &str) -> Vec<DeviceKey> {
        self.routes
            .iter()
            .filter(|r| matches!(&r.sink, RoutePort::Mix(m) if m == mix))
            .flat_map(|r| r.sources.iter())
            .filter_map(|s| match s {
                RoutePort::Device(k) => Some(k.clone()),
                RoutePort::Mix(_) => None,
            })
            .collect()
    }
}

/// Every hardware module of the platform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileCatalog {
    modules: Vec<HwModule>,
}

impl ProfileCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module and returns its id.
    pub fn add_module(&mut self, mut module: HwModule) -> ModuleId {
        let id = ModuleId::new(self.modules.len() as u32);
        module.id = id;
        self.modules.push(module);
        id
    }

    /// All modules in declaration order.
    pub fn modules(&self) -> &[HwModule] {
        &self.modules
    }

    /// Looks a module up.
    pub fn module(&self, id: ModuleId) -> Option<&HwModule> {
        self.modules.get(id.raw() as usize)
    }

    /// Looks a module up by name.
    pub fn module_by_name(&self, name: &str) -> Option<&HwModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Looks a profile up.
    pub fn profile(&self, id: ProfileId) -> Option<&IoProfile> {
        self.module(id.module)?.profiles(id.role).get(id.index)
    }

    /// Mutable profile lookup, for counters and dynamic capabilities.
    pub fn profile_mut(&mut self, id: ProfileId) -> Option<&mut IoProfile> {
        let module = self.modules.get_mut(id.module.raw() as usize)?;
        match id.role {
            IoRole::Output => module.outputs.get_mut(id.index),
            IoRole::Input => module.inputs.get_mut(id.index),
        }
    }

    /// Every profile of one direction, in module then declaration order.
    pub fn profiles(&self, role: IoRole) -> impl Iterator<Item = (ProfileId, &IoProfile)> {
        self.modules.iter().flat_map(move |module| {
            module
                .profiles(role)
                .iter()
                .enumerate()
                .map(move |(index, profile)| {
                    (
                        ProfileId {
                            module: module.id,
                            role,
                            index,
                        },
                        profile,
                    )
                })
        })
    }

    /// Profiles of one direction that reach `device`.
    pub fn profiles_for_device<'a>(
        &'a self,
        role: IoRole,
        device: &'a DeviceKey,
    ) -> impl Iterator<Item = (ProfileId, &'a IoProfile)> + 'a {
        self.profiles(role)
            .filter(move |(_, profile)| profile.supports_device(device))
    }

    /// The module declaring a concrete device and its declaration.
    pub fn find_declared_device(&self, key: &DeviceKey) -> Option<(ModuleId, &DeclaredDevice)> {
        self.modules
            .iter()
            .find_map(|m| m.declared_device(key).map(|d| (m.id, d)))
    }

    /// The profile flagged PRIMARY, if any.
    pub fn primary_output_profile(&self) -> Option<ProfileId> {
        self.profiles(IoRole::Output)
            .find(|(_, p)| p.output_flags().contains(OutputFlags::PRIMARY))
            .map(|(id, _)| id)
    }

    /// Module hosting the primary output profile.
    pub fn primary_module(&self) -> Option<ModuleId> {
        self.primary_output_profile().map(|id| id.module)
    }
}
