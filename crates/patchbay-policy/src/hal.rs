//! The hardware boundary.
//!
//! Everything the routing core asks of the audio hardware goes through
//! [`AudioHal`]: opening and closing streams, installing patches, announcing
//! device connection changes and querying capabilities. The core treats each
//! call as blocking but bounded and never calls back into itself from here.
//!
//! Listener notifications ([`AudioHal::on_port_list_changed`],
//! [`AudioHal::on_patch_list_changed`], [`AudioHal::invalidate_clients`]) are
//! fire-and-forget.

use patchbay_core::{
    AudioConfig, AudioProfile, AudioSource, ClientId, DeviceKey, HalError, HwPatchHandle,
    InputFlags, IoHandle, ModuleId, OutputFlags, StrategyId,
};

/// Connection phase announced to the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceConnectedState {
    /// The device just became available.
    Connected,
    /// The device is about to go away; drain and stop using it.
    PrepareToDisconnect,
    /// The device is gone.
    Disconnected,
}

/// A freshly opened hardware stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedStream {
    /// Hardware I/O handle.
    pub io: IoHandle,
    /// Configuration the hardware settled on.
    pub config: AudioConfig,
    /// Reported latency.
    pub latency_ms: u32,
}

/// Parameters of [`AudioHal::open_output`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputOpen<'a> {
    /// Module hosting the profile.
    pub module: ModuleId,
    /// Profile name, as declared.
    pub profile: &'a str,
    /// Initial devices.
    pub devices: &'a [DeviceKey],
    /// Requested configuration.
    pub config: AudioConfig,
    /// Stream flags.
    pub flags: OutputFlags,
}

/// Parameters of [`AudioHal::open_input`].
#[derive(Debug, Clone, PartialEq)]
pub struct InputOpen<'a> {
    /// Module hosting the profile.
    pub module: ModuleId,
    /// Profile name, as declared.
    pub profile: &'a str,
    /// Capture device.
    pub device: &'a DeviceKey,
    /// Requested configuration.
    pub config: AudioConfig,
    /// Stream flags.
    pub flags: InputFlags,
    /// Capture source of the first client.
    pub source: AudioSource,
}

/// One end of a hardware patch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HwPort {
    /// A device port.
    Device(DeviceKey),
    /// A mix port of an open stream.
    Mix(IoHandle),
}

/// A patch as the hardware sees it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HwPatch {
    /// Source ports.
    pub sources: Vec<HwPort>,
    /// Sink ports.
    pub sinks: Vec<HwPort>,
}

/// Calls the routing core makes into the audio hardware.
pub trait AudioHal {
    /// Opens a playback stream.
    fn open_output(&mut self, request: &OutputOpen<'_>) -> Result<OpenedStream, HalError>;

    /// Opens a stream mirroring two playback streams.
    fn open_duplicate_output(&mut self, first: IoHandle, second: IoHandle) -> Result<IoHandle, HalError>;

    /// Closes a playback stream.
    fn close_output(&mut self, io: IoHandle);

    /// Opens a capture stream.
    fn open_input(&mut self, request: &InputOpen<'_>) -> Result<OpenedStream, HalError>;

    /// Closes a capture stream.
    fn close_input(&mut self, io: IoHandle);

    /// Installs a patch, or reconfigures `previous` in place.
    fn create_patch(
        &mut self,
        patch: &HwPatch,
        previous: Option<HwPatchHandle>,
    ) -> Result<HwPatchHandle, HalError>;

    /// Removes a patch.
    fn release_patch(&mut self, handle: HwPatchHandle) -> Result<(), HalError>;

    /// Announces a connection change.
    fn set_device_connected_state(
        &mut self,
        device: &DeviceKey,
        state: DeviceConnectedState,
    ) -> Result<(), HalError>;

    /// Reads the audio profiles a connected device supports.
    fn query_device_capabilities(
        &mut self,
        module: ModuleId,
        device: &DeviceKey,
    ) -> Result<Vec<AudioProfile>, HalError>;

    /// Mutes or unmutes one strategy on a stream after `delay_ms`.
    fn set_strategy_mute(&mut self, io: IoHandle, strategy: StrategyId, muted: bool, delay_ms: u32);

    /// Devices or streams were added or removed.
    fn on_port_list_changed(&mut self);

    /// Patches were installed or released.
    fn on_patch_list_changed(&mut self);

    /// The given clients lost their stream and must reconnect.
    fn invalidate_clients(&mut self, clients: &[ClientId]);
}
