//! The stream pool: every open playback and capture stream and its clients.
//!
//! Streams and clients live in ordered maps keyed by handles that are never
//! reused. Relations between entities (a duplicated stream's twins, the
//! patch routing a stream, the stream a client belongs to) are handles, so a
//! lookup after removal yields `None` instead of a dangling reference.
//!
//! Teardown order is fixed: patches riding on a stream are released before
//! its hardware handle is closed, then its clients are detached and
//! invalidated.

mod descriptor;
mod input;
mod output;

use std::collections::BTreeMap;

use patchbay_core::{
    AudioConfig, AudioSource, ClientId, DeviceId, DeviceRegistry, InputFlags, IoRole, OutputFlags,
    PatchHandle, PolicyError, ProfileId, Result, SessionId, StreamId,
};

use crate::hal::{AudioHal, InputOpen, OutputOpen};
use crate::patch::PatchGraph;
use crate::platform::Platform;

pub use descriptor::{ClientDescriptor, InputDescriptor, OutputDescriptor};
pub use input::{InputRequest, input_profile};
pub use output::{DirectRequest, direct_profile};

/// Result of a find-or-open search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    /// The stream to attach to.
    pub stream: StreamId,
    /// Whether the stream was opened by this search.
    pub opened: bool,
}

/// Open streams and their clients.
#[derive(Debug, Clone, Default)]
pub struct StreamPool {
    outputs: BTreeMap<StreamId, OutputDescriptor>,
    inputs: BTreeMap<StreamId, InputDescriptor>,
    clients: BTreeMap<ClientId, ClientDescriptor>,
    next_stream: u32,
    next_client: u32,
}

impl StreamPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks a playback stream up.
    pub fn output(&self, id: StreamId) -> Option<&OutputDescriptor> {
        self.outputs.get(&id)
    }

    /// Mutable playback stream lookup.
    pub fn output_mut(&mut self, id: StreamId) -> Option<&mut OutputDescriptor> {
        self.outputs.get_mut(&id)
    }

    /// Every playback stream, oldest first.
    pub fn outputs(&self) -> impl Iterator<Item = &OutputDescriptor> {
        self.outputs.values()
    }

    /// Looks a capture stream up.
    pub fn input(&self, id: StreamId) -> Option<&InputDescriptor> {
        self.inputs.get(&id)
    }

    /// Mutable capture stream lookup.
    pub fn input_mut(&mut self, id: StreamId) -> Option<&mut InputDescriptor> {
        self.inputs.get_mut(&id)
    }

    /// Every capture stream, oldest first.
    pub fn inputs(&self) -> impl Iterator<Item = &InputDescriptor> {
        self.inputs.values()
    }

    /// Looks a client up.
    pub fn client(&self, id: ClientId) -> Option<&ClientDescriptor> {
        self.clients.get(&id)
    }

    /// Mutable client lookup.
    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut ClientDescriptor> {
        self.clients.get_mut(&id)
    }

    /// Every client.
    pub fn clients(&self) -> impl Iterator<Item = &ClientDescriptor> {
        self.clients.values()
    }

    /// Whether a stream (playback or capture) is open.
    pub fn contains_stream(&self, id: StreamId) -> bool {
        self.outputs.contains_key(&id) || self.inputs.contains_key(&id)
    }

    /// Playback streams opened from `profile`.
    pub fn outputs_on_profile(&self, profile: ProfileId) -> Vec<StreamId> {
        self.outputs
            .values()
            .filter(|o| o.profile == Some(profile))
            .map(|o| o.id)
            .collect()
    }

    /// Capture streams opened from `profile`.
    pub fn inputs_on_profile(&self, profile: ProfileId) -> Vec<StreamId> {
        self.inputs
            .values()
            .filter(|i| i.profile == profile)
            .map(|i| i.id)
            .collect()
    }

    /// Playback streams whose devices include `device`.
    pub fn outputs_routed_to(&self, device: DeviceId) -> Vec<StreamId> {
        self.outputs
            .values()
            .filter(|o| o.devices.contains(&device))
            .map(|o| o.id)
            .collect()
    }

    fn allocate_stream(&mut self) -> StreamId {
        self.next_stream += 1;
        StreamId::new(self.next_stream)
    }

    /// Opens a playback stream from `profile`, initially on `devices`.
    pub fn open_output<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        registry: &DeviceRegistry,
        profile_id: ProfileId,
        devices: &[DeviceId],
        config: AudioConfig,
    ) -> Result<StreamId> {
        let profile = platform
            .catalog
            .profile(profile_id)
            .ok_or_else(|| PolicyError::NotFound(format!("profile {profile_id}")))?;
        if !profile.can_open_new_io() {
            return Err(PolicyError::ResourceExhausted(format!(
                "profile '{}' has {} open streams",
                profile.name,
                profile.open_count()
            )));
        }
        let flags = profile.output_flags();
        let recommended_mute_ms = profile.recommended_mute_duration_ms;
        let keys = registry.keys_of(devices);
        let opened = platform.hal.open_output(&OutputOpen {
            module: profile_id.module,
            profile: &profile.name,
            devices: &keys,
            config,
            flags,
        })?;

        let id = self.allocate_stream();
        let mut desc = OutputDescriptor::new(id, opened.io, opened.config, flags);
        desc.profile = Some(profile_id);
        desc.devices = devices.to_vec();
        desc.latency_ms = opened.latency_ms;
        desc.recommended_mute_ms = recommended_mute_ms;
        self.outputs.insert(id, desc);
        if let Some(profile) = platform.catalog.profile_mut(profile_id) {
            profile.note_opened();
        }
        tracing::debug!(stream = %id, io = %opened.io, profile = %profile_id, config = %opened.config, "output_opened");
        platform.ports_changed();
        Ok(id)
    }

    /// Opens a stream mirroring `first` and `second`.
    pub fn open_duplicate_output<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        first: StreamId,
        second: StreamId,
    ) -> Result<StreamId> {
        let (a, b) = match (self.outputs.get(&first), self.outputs.get(&second)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(PolicyError::NotFound(format!(
                    "streams {first} and {second} to duplicate"
                )));
            }
        };
        let io = platform.hal.open_duplicate_output(a.io, b.io)?;
        let mut devices = a.devices.clone();
        devices.extend(b.devices.iter().filter(|d| !a.devices.contains(d)));
        let latency_ms = a.latency_ms.max(b.latency_ms);
        let config = a.config;

        let id = self.allocate_stream();
        let mut desc = OutputDescriptor::new(id, io, config, OutputFlags::empty());
        desc.devices = devices;
        desc.latency_ms = latency_ms;
        desc.mirrors = Some((first, second));
        self.outputs.insert(id, desc);
        tracing::debug!(stream = %id, %first, %second, "duplicate_output_opened");
        platform.ports_changed();
        Ok(id)
    }

    /// Closes a playback stream and every duplicated stream mirroring it.
    ///
    /// Patches riding on the closed streams are released first. The clients
    /// that lost their stream are invalidated and returned.
    pub fn close_output<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        patches: &mut PatchGraph,
        id: StreamId,
    ) -> Result<Vec<ClientId>> {
        if !self.outputs.contains_key(&id) {
            return Err(PolicyError::NotFound(format!("output {id}")));
        }
        let mirrors: Vec<StreamId> = self
            .outputs
            .values()
            .filter(|o| o.mirrors_stream(id))
            .map(|o| o.id)
            .collect();
        let mut invalidated = Vec::new();
        for dup in mirrors {
            invalidated.extend(self.close_one_output(platform, patches, dup));
        }
        invalidated.extend(self.close_one_output(platform, patches, id));
        Ok(invalidated)
    }

    fn close_one_output<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        patches: &mut PatchGraph,
        id: StreamId,
    ) -> Vec<ClientId> {
        patches.release_riding_on(platform, id);
        let Some(desc) = self.outputs.remove(&id) else {
            return Vec::new();
        };

        // Clients of a duplicated stream were counted on both twins.
        if let Some((first, second)) = desc.mirrors {
            for client in desc.clients.iter().filter_map(|c| self.clients.get(c)) {
                if !client.active {
                    continue;
                }
                for twin in [first, second] {
                    if let Some(twin_desc) = self.outputs.get_mut(&twin)
                        && twin_desc.change_active(client.strategy, false)
                        && let Some(profile) =
                            twin_desc.profile.and_then(|p| platform.catalog.profile_mut(p))
                    {
                        profile.note_stopped();
                    }
                }
            }
        }
        if let Some(profile) = desc.profile.and_then(|p| platform.catalog.profile_mut(p)) {
            if desc.is_active() {
                profile.note_stopped();
            }
            profile.note_closed();
        }
        platform.hal.close_output(desc.io);
        for client in &desc.clients {
            self.clients.remove(client);
        }
        if !desc.clients.is_empty() {
            platform.hal.invalidate_clients(&desc.clients);
        }
        tracing::debug!(stream = %id, io = %desc.io, clients = desc.clients.len(), "output_closed");
        platform.ports_changed();
        desc.clients
    }

    /// Opens a capture stream from `profile` on `device`.
    pub fn open_input<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        registry: &DeviceRegistry,
        profile_id: ProfileId,
        device: DeviceId,
        config: AudioConfig,
        source: AudioSource,
    ) -> Result<StreamId> {
        let profile = platform
            .catalog
            .profile(profile_id)
            .ok_or_else(|| PolicyError::NotFound(format!("profile {profile_id}")))?;
        if !profile.can_open_new_io() {
            return Err(PolicyError::ResourceExhausted(format!(
                "profile '{}' has {} open streams",
                profile.name,
                profile.open_count()
            )));
        }
        let key = registry
            .get(device)
            .map(|d| d.key.clone())
            .ok_or_else(|| PolicyError::NotFound(format!("device {device}")))?;
        let flags = profile.flags.input();
        let opened = platform.hal.open_input(&InputOpen {
            module: profile_id.module,
            profile: &profile.name,
            device: &key,
            config,
            flags,
            source,
        })?;

        let id = self.allocate_stream();
        self.inputs.insert(
            id,
            InputDescriptor {
                id,
                io: opened.io,
                profile: profile_id,
                flags,
                config: opened.config,
                device,
                patch: None,
                clients: Vec::new(),
                active_clients: 0,
            },
        );
        if let Some(profile) = platform.catalog.profile_mut(profile_id) {
            profile.note_opened();
        }
        tracing::debug!(stream = %id, io = %opened.io, profile = %profile_id, device = %key, "input_opened");
        platform.ports_changed();
        Ok(id)
    }

    /// Closes a capture stream after releasing its patch. The clients that
    /// lost their stream are invalidated and returned.
    pub fn close_input<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        patches: &mut PatchGraph,
        id: StreamId,
    ) -> Result<Vec<ClientId>> {
        if !self.inputs.contains_key(&id) {
            return Err(PolicyError::NotFound(format!("input {id}")));
        }
        patches.release_riding_on(platform, id);
        let Some(desc) = self.inputs.remove(&id) else {
            return Ok(Vec::new());
        };
        if let Some(profile) = platform.catalog.profile_mut(desc.profile) {
            if desc.is_active() {
                profile.note_stopped();
            }
            profile.note_closed();
        }
        platform.hal.close_input(desc.io);
        for client in &desc.clients {
            self.clients.remove(client);
        }
        if !desc.clients.is_empty() {
            platform.hal.invalidate_clients(&desc.clients);
        }
        tracing::debug!(stream = %id, io = %desc.io, "input_closed");
        platform.ports_changed();
        Ok(desc.clients)
    }

    /// Attaches a client to its stream.
    pub fn add_client(&mut self, mut client: ClientDescriptor) -> Result<ClientId> {
        self.next_client += 1;
        let id = ClientId::new(self.next_client);
        client.id = id;
        client.active = false;
        match client.role {
            IoRole::Output => self
                .outputs
                .get_mut(&client.stream)
                .map(|o| o.clients.push(id)),
            IoRole::Input => self
                .inputs
                .get_mut(&client.stream)
                .map(|i| i.clients.push(id)),
        }
        .ok_or_else(|| PolicyError::NotFound(format!("stream {}", client.stream)))?;
        tracing::debug!(client = %id, stream = %client.stream, session = %client.session, "client_attached");
        self.clients.insert(id, client);
        Ok(id)
    }

    /// Detaches an idle client.
    pub fn remove_client(&mut self, id: ClientId) -> Option<ClientDescriptor> {
        let client = self.clients.remove(&id)?;
        if let Some(out) = self.outputs.get_mut(&client.stream) {
            out.clients.retain(|c| *c != id);
        }
        if let Some(input) = self.inputs.get_mut(&client.stream) {
            input.clients.retain(|c| *c != id);
        }
        tracing::debug!(client = %id, stream = %client.stream, "client_detached");
        Some(client)
    }

    /// Starts or stops a playback client. Activity propagates from a
    /// duplicated stream to both twins, and profile active counts follow
    /// every stream whose activity flips.
    pub fn set_output_client_active<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        client: ClientId,
        active: bool,
    ) -> Result<()> {
        let desc = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| PolicyError::NotFound(format!("client {client}")))?;
        if desc.active == active {
            return Err(PolicyError::AlreadyInState(format!(
                "client {client} is already {}",
                if active { "started" } else { "stopped" }
            )));
        }
        desc.active = active;
        let strategy = desc.strategy;
        let stream = desc.stream;

        let mut touched = vec![stream];
        if let Some((first, second)) = self.outputs.get(&stream).and_then(|o| o.mirrors) {
            touched.extend([first, second]);
        }
        for id in touched {
            if let Some(out) = self.outputs.get_mut(&id)
                && out.change_active(strategy, active)
                && let Some(profile) = out.profile.and_then(|p| platform.catalog.profile_mut(p))
            {
                if active {
                    profile.note_started();
                } else {
                    profile.note_stopped();
                }
            }
        }
        Ok(())
    }

    /// Starts or stops a capture client.
    pub fn set_input_client_active<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        client: ClientId,
        active: bool,
    ) -> Result<()> {
        let desc = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| PolicyError::NotFound(format!("client {client}")))?;
        if desc.active == active {
            return Err(PolicyError::AlreadyInState(format!(
                "client {client} is already {}",
                if active { "started" } else { "stopped" }
            )));
        }
        desc.active = active;
        let Some(input) = self.inputs.get_mut(&desc.stream) else {
            return Err(PolicyError::NotFound(format!("input {}", desc.stream)));
        };
        let was_active = input.is_active();
        if active {
            input.active_clients += 1;
        } else {
            input.active_clients = input.active_clients.saturating_sub(1);
        }
        if was_active != input.is_active()
            && let Some(profile) = platform.catalog.profile_mut(input.profile)
        {
            if active {
                profile.note_started();
            } else {
                profile.note_stopped();
            }
        }
        Ok(())
    }

    /// Drops a detached device from every client's preference.
    pub fn forget_preferred_device(&mut self, device: DeviceId) -> Vec<ClientId> {
        let mut cleared = Vec::new();
        for client in self.clients.values_mut() {
            if client.preferred_device == Some(device) {
                client.preferred_device = None;
                cleared.push(client.id);
            }
        }
        cleared
    }

    /// Existing direct stream that can serve `session` with `config` as is.
    pub fn find_direct_reuse(
        &self,
        profile: ProfileId,
        config: &AudioConfig,
        session: SessionId,
    ) -> Option<StreamId> {
        self.outputs
            .values()
            .filter(|o| !o.is_duplicated() && o.profile == Some(profile))
            .find(|o| o.config == *config && o.direct_session == Some(session))
            .map(|o| o.id)
    }

    /// Capture stream on `profile` hosting a client of `session`.
    pub fn find_input_for_session(&self, profile: ProfileId, session: SessionId) -> Option<StreamId> {
        self.inputs
            .values()
            .filter(|i| i.profile == profile)
            .find(|i| {
                i.clients
                    .iter()
                    .filter_map(|c| self.clients.get(c))
                    .any(|c| c.session == session)
            })
            .map(|i| i.id)
    }

    /// Flags of a capture stream.
    pub fn input_flags(&self, id: StreamId) -> Option<InputFlags> {
        self.inputs.get(&id).map(|i| i.flags)
    }

    /// Patch routing a playback or capture stream.
    pub fn stream_patch(&self, id: StreamId) -> Option<PatchHandle> {
        self.outputs
            .get(&id)
            .and_then(|o| o.patch)
            .or_else(|| self.inputs.get(&id).and_then(|i| i.patch))
    }

    pub(crate) fn set_stream_patch(&mut self, id: StreamId, patch: Option<PatchHandle>) {
        if let Some(out) = self.outputs.get_mut(&id) {
            out.patch = patch;
        } else if let Some(input) = self.inputs.get_mut(&id) {
            input.patch = patch;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHal;
    use patchbay_core::{
        AudioAttributes, AudioProfile, AudioFormat, ChannelMask, DeviceKey, DeviceType, HalOp,
        HalVersion, HwModule, IoFlags, IoProfile, NewDevice, ProfileCatalog, StrategyId, Uid,
        DeclaredDevice, ModuleId,
    };

    fn speaker_catalog() -> ProfileCatalog {
        let speaker = DeviceKey::of_type(DeviceType::OutSpeaker);
        let mut module = HwModule::new("primary", HalVersion::new(3, 0));
        module.devices.push(DeclaredDevice::new(speaker.clone(), "Speaker"));
        module.outputs.push(
            IoProfile::new("primary output", IoFlags::Output(OutputFlags::PRIMARY))
                .with_device(speaker.clone())
                .with_audio_profile(AudioProfile::new(
                    AudioFormat::Pcm16Bit,
                    vec![48000],
                    vec![ChannelMask::OUT_STEREO],
                )),
        );
        module.outputs.push(
            IoProfile::new("deep buffer", IoFlags::Output(OutputFlags::DEEP_BUFFER))
                .with_device(speaker)
                .with_audio_profile(AudioProfile::new(
                    AudioFormat::Pcm16Bit,
                    vec![48000],
                    vec![ChannelMask::OUT_STEREO],
                )),
        );
        let mut catalog = ProfileCatalog::new();
        catalog.add_module(module);
        catalog
    }

    fn setup() -> (Platform<MockHal>, DeviceRegistry, DeviceId) {
        let mut registry = DeviceRegistry::new(8);
        let speaker = registry
            .attach(NewDevice {
                key: DeviceKey::of_type(DeviceType::OutSpeaker),
                name: "Speaker".to_string(),
                module: ModuleId::new(0),
                has_gain_control: false,
                encoded_formats: Vec::new(),
            })
            .unwrap();
        (Platform::new(MockHal::new(), speaker_catalog()), registry, speaker)
    }

    fn primary() -> ProfileId {
        ProfileId {
            module: ModuleId::new(0),
            role: IoRole::Output,
            index: 0,
        }
    }

    fn deep() -> ProfileId {
        ProfileId {
            index: 1,
            ..primary()
        }
    }

    fn client(stream: StreamId, strategy: StrategyId) -> ClientDescriptor {
        ClientDescriptor {
            id: ClientId::new(0),
            stream,
            role: IoRole::Output,
            attributes: AudioAttributes::default(),
            session: SessionId::new(1),
            uid: Uid::new(10_000),
            config: AudioConfig::default_output(),
            strategy,
            preferred_device: None,
            active: false,
        }
    }

    #[test]
    fn open_registers_stream_and_counts_profile() {
        let (mut platform, registry, speaker) = setup();
        let mut pool = StreamPool::new();
        let before = platform.generation();
        let id = pool
            .open_output(&mut platform, &registry, primary(), &[speaker], AudioConfig::default_output())
            .unwrap();
        let out = pool.output(id).unwrap();
        assert_eq!(out.devices, vec![speaker]);
        assert!(out.flags.contains(OutputFlags::PRIMARY));
        assert_eq!(platform.catalog().profile(primary()).unwrap().open_count(), 1);
        assert!(platform.generation() > before);
    }

    #[test]
    fn failed_open_leaves_pool_untouched() {
        let (mut platform, registry, speaker) = setup();
        platform.hal_mut().fail_next(HalOp::OpenOutput, -19);
        let mut pool = StreamPool::new();
        let err = pool
            .open_output(&mut platform, &registry, primary(), &[speaker], AudioConfig::default_output())
            .unwrap_err();
        assert!(matches!(err, PolicyError::Hal(_)));
        assert_eq!(pool.outputs().count(), 0);
        assert_eq!(platform.catalog().profile(primary()).unwrap().open_count(), 0);
    }

    #[test]
    fn duplicate_activity_reaches_both_twins_and_survivor_is_recomputed() {
        let (mut platform, registry, speaker) = setup();
        let mut pool = StreamPool::new();
        let mut patches = PatchGraph::new(8);
        let config = AudioConfig::default_output();
        let a = pool.open_output(&mut platform, &registry, primary(), &[speaker], config).unwrap();
        let b = pool.open_output(&mut platform, &registry, deep(), &[speaker], config).unwrap();
        let dup = pool.open_duplicate_output(&mut platform, a, b).unwrap();

        let media = StrategyId(5);
        let c = pool.add_client(client(dup, media)).unwrap();
        pool.set_output_client_active(&mut platform, c, true).unwrap();
        assert!(pool.output(a).unwrap().is_active());
        assert!(pool.output(b).unwrap().is_active());
        assert_eq!(platform.catalog().profile(deep()).unwrap().active_count(), 1);

        let invalidated = pool.close_output(&mut platform, &mut patches, a).unwrap();
        assert_eq!(invalidated, vec![c]);
        assert!(pool.output(dup).is_none());
        assert!(!pool.output(b).unwrap().is_active());
        assert_eq!(platform.catalog().profile(deep()).unwrap().active_count(), 0);
        assert!(pool.client(c).is_none());
    }

    #[test]
    fn starting_twice_is_rejected() {
        let (mut platform, registry, speaker) = setup();
        let mut pool = StreamPool::new();
        let id = pool
            .open_output(&mut platform, &registry, primary(), &[speaker], AudioConfig::default_output())
            .unwrap();
        let c = pool.add_client(client(id, StrategyId(5))).unwrap();
        pool.set_output_client_active(&mut platform, c, true).unwrap();
        assert!(matches!(
            pool.set_output_client_active(&mut platform, c, true),
            Err(PolicyError::AlreadyInState(_))
        ));
    }

    #[test]
    fn closing_unknown_stream_is_not_found() {
        let (mut platform, _, _) = setup();
        let mut pool = StreamPool::new();
        let mut patches = PatchGraph::new(8);
        assert!(matches!(
            pool.close_output(&mut platform, &mut patches, StreamId::new(42)),
            Err(PolicyError::NotFound(_))
        ));
    }
}
