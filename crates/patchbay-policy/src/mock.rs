//! In-memory hardware boundary and pacer for tests.
//!
//! [`MockHal`] hands out sequential handles, journals every call and fails
//! the next call of a chosen operation on request. [`RecordingPacer`]
//! records mute waits instead of sleeping.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use patchbay_core::{
    AudioConfig, AudioProfile, ClientId, DeviceKey, HalError, HalOp, HwPatchHandle, IoHandle,
    ModuleId, OutputFlags, StrategyId,
};

use crate::hal::{AudioHal, DeviceConnectedState, HwPatch, InputOpen, OpenedStream, OutputOpen};
use crate::mute::Pacer;

/// A call received by [`MockHal`].
#[derive(Debug, Clone, PartialEq)]
pub enum HalCall {
    /// `open_output`; `io` is `None` when the call failed.
    OpenOutput {
        /// Profile name.
        profile: String,
        /// Initial devices.
        devices: Vec<DeviceKey>,
        /// Requested configuration.
        config: AudioConfig,
        /// Stream flags.
        flags: OutputFlags,
        /// Handle returned.
        io: Option<IoHandle>,
    },
    /// `open_duplicate_output`.
    OpenDuplicateOutput {
        /// First mirrored stream.
        first: IoHandle,
        /// Second mirrored stream.
        second: IoHandle,
    },
    /// `close_output`.
    CloseOutput(IoHandle),
    /// `open_input`; `io` is `None` when the call failed.
    OpenInput {
        /// Profile name.
        profile: String,
        /// Capture device.
        device: DeviceKey,
        /// Handle returned.
        io: Option<IoHandle>,
    },
    /// `close_input`.
    CloseInput(IoHandle),
    /// `create_patch`.
    CreatePatch {
        /// The patch.
        patch: HwPatch,
        /// Handle of the patch being reconfigured.
        previous: Option<HwPatchHandle>,
    },
    /// `release_patch`.
    ReleasePatch(HwPatchHandle),
    /// `set_device_connected_state`.
    SetConnectedState {
        /// The device.
        device: DeviceKey,
        /// Announced state.
        state: DeviceConnectedState,
    },
    /// `query_device_capabilities`.
    QueryCapabilities(DeviceKey),
    /// `set_strategy_mute`.
    SetStrategyMute {
        /// Target stream.
        io: IoHandle,
        /// Target strategy.
        strategy: StrategyId,
        /// Mute or unmute.
        muted: bool,
        /// Delay before it applies.
        delay_ms: u32,
    },
}

/// Scriptable in-memory [`AudioHal`].
#[derive(Debug, Clone)]
pub struct MockHal {
    journal: Vec<HalCall>,
    failures: Vec<(HalOp, i32)>,
    next_io: u32,
    next_patch: u32,
    latency_ms: u32,
    capabilities: BTreeMap<String, Vec<AudioProfile>>,
    open_ios: BTreeSet<IoHandle>,
    installed: BTreeMap<HwPatchHandle, HwPatch>,
    invalidated: Vec<ClientId>,
    port_notifications: u32,
    patch_notifications: u32,
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHal {
    /// A boundary reporting 20 ms of latency for every stream.
    pub fn new() -> Self {
        Self {
            journal: Vec::new(),
            failures: Vec::new(),
            next_io: 0,
            next_patch: 0,
            latency_ms: 20,
            capabilities: BTreeMap::new(),
            open_ios: BTreeSet::new(),
            installed: BTreeMap::new(),
            invalidated: Vec::new(),
            port_notifications: 0,
            patch_notifications: 0,
        }
    }

    /// Builder: latency reported for opened streams.
    #[must_use]
    pub fn with_latency(mut self, latency_ms: u32) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Profiles reported when `device` is queried.
    pub fn set_capabilities(&mut self, device: &DeviceKey, profiles: Vec<AudioProfile>) {
        self.capabilities.insert(device.to_string(), profiles);
    }

    /// Makes the next call of `op` fail with `status`.
    pub fn fail_next(&mut self, op: HalOp, status: i32) {
        self.failures.push((op, status));
    }

    /// Every call received so far.
    pub fn journal(&self) -> &[HalCall] {
        &self.journal
    }

    /// Forgets the journal.
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Clients invalidated so far, in order.
    pub fn invalidated(&self) -> &[ClientId] {
        &self.invalidated
    }

    /// Number of streams currently open.
    pub fn open_stream_count(&self) -> usize {
        self.open_ios.len()
    }

    /// Patches currently installed.
    pub fn installed_patches(&self) -> impl Iterator<Item = (&HwPatchHandle, &HwPatch)> {
        self.installed.iter()
    }

    /// `(io, strategy, muted, delay_ms)` of every mute command.
    pub fn mute_commands(&self) -> Vec<(IoHandle, StrategyId, bool, u32)> {
        self.journal
            .iter()
            .filter_map(|call| match *call {
                HalCall::SetStrategyMute {
                    io,
                    strategy,
                    muted,
                    delay_ms,
                } => Some((io, strategy, muted, delay_ms)),
                _ => None,
            })
            .collect()
    }

    /// Port list notifications received.
    pub fn port_notifications(&self) -> u32 {
        self.port_notifications
    }

    /// Patch list notifications received.
    pub fn patch_notifications(&self) -> u32 {
        self.patch_notifications
    }

    fn take_failure(&mut self, op: HalOp) -> Result<(), HalError> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(i) => {
                let (_, status) = self.failures.remove(i);
                Err(HalError::new(op, status))
            }
            None => Ok(()),
        }
    }

    fn allocate_io(&mut self) -> IoHandle {
        self.next_io += 1;
        let io = IoHandle::new(self.next_io);
        self.open_ios.insert(io);
        io
    }
}

impl AudioHal for MockHal {
    fn open_output(&mut self, request: &OutputOpen<'_>) -> Result<OpenedStream, HalError> {
        let result = match self.take_failure(HalOp::OpenOutput) {
            Ok(()) => Ok(OpenedStream {
                io: self.allocate_io(),
                config: request.config,
                latency_ms: self.latency_ms,
            }),
            Err(err) => Err(err),
        };
        self.journal.push(HalCall::OpenOutput {
            profile: request.profile.to_string(),
            devices: request.devices.to_vec(),
            config: request.config,
            flags: request.flags,
            io: result.as_ref().ok().map(|o| o.io),
        });
        result
    }

    fn open_duplicate_output(&mut self, first: IoHandle, second: IoHandle) -> Result<IoHandle, HalError> {
        self.journal.push(HalCall::OpenDuplicateOutput { first, second });
        self.take_failure(HalOp::OpenDuplicateOutput)?;
        Ok(self.allocate_io())
    }

    fn close_output(&mut self, io: IoHandle) {
        self.open_ios.remove(&io);
        self.journal.push(HalCall::CloseOutput(io));
    }

    fn open_input(&mut self, request: &InputOpen<'_>) -> Result<OpenedStream, HalError> {
        let result = match self.take_failure(HalOp::OpenInput) {
            Ok(()) => Ok(OpenedStream {
                io: self.allocate_io(),
                config: request.config,
                latency_ms: self.latency_ms,
            }),
            Err(err) => Err(err),
        };
        self.journal.push(HalCall::OpenInput {
            profile: request.profile.to_string(),
            device: request.device.clone(),
            io: result.as_ref().ok().map(|o| o.io),
        });
        result
    }

    fn close_input(&mut self, io: IoHandle) {
        self.open_ios.remove(&io);
        self.journal.push(HalCall::CloseInput(io));
    }

    fn create_patch(
        &mut self,
        patch: &HwPatch,
        previous: Option<HwPatchHandle>,
    ) -> Result<HwPatchHandle, HalError> {
        self.journal.push(HalCall::CreatePatch {
            patch: patch.clone(),
            previous,
        });
        self.take_failure(HalOp::CreatePatch)?;
        let handle = match previous {
            Some(h) if self.installed.contains_key(&h) => h,
            _ => {
                self.next_patch += 1;
                HwPatchHandle::new(self.next_patch)
            }
        };
        self.installed.insert(handle, patch.clone());
        Ok(handle)
    }

    fn release_patch(&mut self, handle: HwPatchHandle) -> Result<(), HalError> {
        self.journal.push(HalCall::ReleasePatch(handle));
        self.take_failure(HalOp::ReleasePatch)?;
        match self.installed.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(HalError::new(HalOp::ReleasePatch, -22)),
        }
    }

    fn set_device_connected_state(
        &mut self,
        device: &DeviceKey,
        state: DeviceConnectedState,
    ) -> Result<(), HalError> {
        self.journal.push(HalCall::SetConnectedState {
            device: device.clone(),
            state,
        });
        self.take_failure(match state {
            DeviceConnectedState::Connected => HalOp::DeviceConnect,
            DeviceConnectedState::PrepareToDisconnect => HalOp::DevicePrepareDisconnect,
            DeviceConnectedState::Disconnected => HalOp::DeviceDisconnect,
        })
    }

    fn query_device_capabilities(
        &mut self,
        _module: ModuleId,
        device: &DeviceKey,
    ) -> Result<Vec<AudioProfile>, HalError> {
        self.journal.push(HalCall::QueryCapabilities(device.clone()));
        self.take_failure(HalOp::QueryCapabilities)?;
        Ok(self
            .capabilities
            .get(&device.to_string())
            .cloned()
            .unwrap_or_default())
    }

    fn set_strategy_mute(&mut self, io: IoHandle, strategy: StrategyId, muted: bool, delay_ms: u32) {
        self.journal.push(HalCall::SetStrategyMute {
            io,
            strategy,
            muted,
            delay_ms,
        });
    }

    fn on_port_list_changed(&mut self) {
        self.port_notifications += 1;
    }

    fn on_patch_list_changed(&mut self) {
        self.patch_notifications += 1;
    }

    fn invalidate_clients(&mut self, clients: &[ClientId]) {
        self.invalidated.extend_from_slice(clients);
    }
}

/// A [`Pacer`] that records waits. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingPacer {
    waits: Arc<Mutex<Vec<u32>>>,
}

impl RecordingPacer {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every wait requested so far, zero waits included.
    pub fn waits(&self) -> Vec<u32> {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Pacer for RecordingPacer {
    fn wait(&mut self, ms: u32) {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ms);
    }
}
