//! Open streams and the clients attached to them.

use std::collections::BTreeMap;

use patchbay_core::{
    AudioAttributes, AudioConfig, ClientId, DeviceId, InputFlags, IoHandle, IoRole, OutputFlags,
    PatchHandle, ProfileId, SessionId, StrategyId, StreamId, Uid,
};

/// A client attached to a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientDescriptor {
    /// Client handle.
    pub id: ClientId,
    /// Stream the client plays or records through.
    pub stream: StreamId,
    /// Playback or capture.
    pub role: IoRole,
    /// Attributes the client was granted with.
    pub attributes: AudioAttributes,
    /// Audio session.
    pub session: SessionId,
    /// Owning uid.
    pub uid: Uid,
    /// Configuration the client asked for.
    pub config: AudioConfig,
    /// Strategy the attributes resolved to (playback only).
    pub strategy: StrategyId,
    /// Device pinned by the client, kept until cleared or detached.
    pub preferred_device: Option<DeviceId>,
    /// Whether the client is started.
    pub active: bool,
}

/// An open playback stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDescriptor {
    /// Pool handle.
    pub id: StreamId,
    /// Hardware handle.
    pub io: IoHandle,
    /// Profile the stream was opened from; `None` for duplicated streams.
    pub profile: Option<ProfileId>,
    /// Stream flags.
    pub flags: OutputFlags,
    /// Configuration the hardware settled on.
    pub config: AudioConfig,
    /// Devices the stream is routed to.
    pub devices: Vec<DeviceId>,
    /// Reported latency.
    pub latency_ms: u32,
    /// Recommended mute duration of the profile.
    pub recommended_mute_ms: Option<u32>,
    /// Patch routing the stream to its devices.
    pub patch: Option<PatchHandle>,
    /// Attached clients.
    pub clients: Vec<ClientId>,
    /// Number of grants sharing a direct stream.
    pub direct_open_count: u32,
    /// Session a direct stream was opened for.
    pub direct_session: Option<SessionId>,
    /// The two streams a duplicated stream mirrors.
    pub mirrors: Option<(StreamId, StreamId)>,
    /// Software-bridge patch this stream was opened to host.
    pub bridge: Option<PatchHandle>,
    active: BTreeMap<StrategyId, u32>,
}

impl OutputDescriptor {
    /// A descriptor for a stream the hardware just opened.
    pub fn new(id: StreamId, io: IoHandle, config: AudioConfig, flags: OutputFlags) -> Self {
        Self {
            id,
            io,
            profile: None,
            flags,
            config,
            devices: Vec::new(),
            latency_ms: 0,
            recommended_mute_ms: None,
            patch: None,
            clients: Vec::new(),
            direct_open_count: 0,
            direct_session: None,
            mirrors: None,
            bridge: None,
            active: BTreeMap::new(),
        }
    }

    /// Whether this stream mirrors two others.
    pub fn is_duplicated(&self) -> bool {
        self.mirrors.is_some()
    }

    /// Whether the stream was opened from a direct profile.
    pub fn is_direct(&self) -> bool {
        self.flags.contains(OutputFlags::DIRECT)
    }

    /// Whether any strategy is playing.
    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Whether `strategy` is playing.
    pub fn is_strategy_active(&self, strategy: StrategyId) -> bool {
        self.active.contains_key(&strategy)
    }

    /// Strategies currently playing, highest priority first.
    pub fn active_strategies(&self) -> Vec<StrategyId> {
        self.active.keys().copied().collect()
    }

    /// Haptic channels of the stream.
    pub fn haptic_channel_count(&self) -> u32 {
        self.config.channel_mask.haptic_channel_count()
    }

    /// Whether the stream mirrors `other`.
    pub fn mirrors_stream(&self, other: StreamId) -> bool {
        self.mirrors.is_some_and(|(a, b)| a == other || b == other)
    }

    /// Adjusts the active count of a strategy. Returns whether the stream's
    /// overall activity flipped.
    pub(crate) fn change_active(&mut self, strategy: StrategyId, started: bool) -> bool {
        let was_active = self.is_active();
        if started {
            *self.active.entry(strategy).or_insert(0) += 1;
        } else if let Some(count) = self.active.get_mut(&strategy) {
            *count -= 1;
            if *count == 0 {
                self.active.remove(&strategy);
            }
        }
        was_active != self.is_active()
    }
}

/// An open capture stream.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDescriptor {
    /// Pool handle.
    pub id: StreamId,
    /// Hardware handle.
    pub io: IoHandle,
    /// Profile the stream was opened from.
    pub profile: ProfileId,
    /// Stream flags.
    pub flags: InputFlags,
    /// Configuration the hardware settled on.
    pub config: AudioConfig,
    /// Capture device.
    pub device: DeviceId,
    /// Patch routing the device into the stream.
    pub patch: Option<PatchHandle>,
    /// Attached clients.
    pub clients: Vec<ClientId>,
    pub(crate) active_clients: u32,
}

impl InputDescriptor {
    /// Whether any client is recording.
    pub fn is_active(&self) -> bool {
        self.active_clients > 0
    }

    /// Number of recording clients.
    pub fn active_client_count(&self) -> u32 {
        self.active_clients
    }
}
