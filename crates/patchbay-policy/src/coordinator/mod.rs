//! The routing coordinator: one owner for every piece of routing state.
//!
//! [`RoutingCoordinator`] holds the device registry, the stream pool, the
//! patch graph and the mute scheduler, and runs the top-level operations
//! against them: device hot-plug, stream requests, start/stop, patches and
//! audio sources. Every operation runs to completion on the calling thread;
//! the owning service serializes calls.
//!
//! Operations are split by concern:
//!
//! - `connection`: device connect/disconnect and their rollback
//! - `output`: playback requests, start/stop/release, haptic pins
//! - `input`: capture requests, start/stop/release
//! - `patch`: client patches and audio sources
//!
//! # Example
//!
//! ```rust
//! use patchbay_config::{PolicyConfig, reference_topology};
//! use patchbay_core::{AudioAttributes, AudioConfig, Usage};
//! use patchbay_policy::{MockHal, OutputRequest, PriorityEngine, RoutingCoordinator};
//!
//! let catalog = reference_topology().unwrap().into_catalog().unwrap();
//! let mut core = RoutingCoordinator::new(
//!     catalog,
//!     PriorityEngine::new(),
//!     MockHal::new(),
//!     PolicyConfig::default(),
//! )
//! .unwrap();
//!
//! let grant = core
//!     .get_output_for_attr(&OutputRequest::new(
//!         AudioAttributes::for_usage(Usage::Media),
//!         AudioConfig::default_output(),
//!     ))
//!     .unwrap();
//! core.start_output(grant.client).unwrap();
//! assert!(core.pool().output(grant.stream).unwrap().is_active());
//! ```

mod connection;
mod input;
mod output;
mod patch;

use std::collections::BTreeMap;

use patchbay_config::PolicyConfig;
use patchbay_core::{
    AudioAttributes, ClientId, DeviceDescriptor, DeviceId, DeviceRegistry, IoRole, NewDevice,
    OutputFlags, PolicyError, ProfileCatalog, ProfileId, Result, SessionId, SourceId, StrategyId,
    StreamId,
};

use crate::engine::{CacheMode, DeviceAvailability, PolicyEngine};
use crate::hal::{AudioHal, DeviceConnectedState};
use crate::mute::{DeviceSwitch, MutePlan, MuteScheduler, Pacer, StreamMuteView, ThreadPacer};
use crate::patch::{PatchGraph, PatchOrigin, PatchRecord, PatchRequest, PatchSpec};
use crate::platform::Platform;
use crate::selector::{OutputSelector, shared_candidates};
use crate::stream::{InputDescriptor, OutputDescriptor, StreamPool};

pub use input::{CaptureRequest, InputGrant};
pub use output::{OutputGrant, OutputRequest};
pub use patch::AudioSourceRecord;

/// Devices, streams and patches as of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSnapshot {
    /// Generation the snapshot was taken at.
    pub generation: u64,
    /// Available devices.
    pub devices: Vec<DeviceDescriptor>,
    /// Open playback streams.
    pub outputs: Vec<OutputDescriptor>,
    /// Open capture streams.
    pub inputs: Vec<InputDescriptor>,
}

/// Installed patches as of one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSnapshot {
    /// Generation the snapshot was taken at.
    pub generation: u64,
    /// Installed patches, oldest first.
    pub patches: Vec<PatchRecord>,
}

/// Owns the routing state and runs the routing operations.
pub struct RoutingCoordinator<H, E> {
    config: PolicyConfig,
    platform: Platform<H>,
    engine: E,
    registry: DeviceRegistry,
    pool: StreamPool,
    patches: PatchGraph,
    mute: MuteScheduler,
    selector: OutputSelector,
    sources: BTreeMap<SourceId, AudioSourceRecord>,
    next_source: u32,
    haptics: BTreeMap<SessionId, StreamId>,
    primary: Option<StreamId>,
    pacer: Box<dyn Pacer>,
}

fn same_devices(a: &[DeviceId], b: &[DeviceId]) -> bool {
    a.len() == b.len() && a.iter().all(|d| b.contains(d))
}

impl<H: AudioHal, E: PolicyEngine> RoutingCoordinator<H, E> {
    /// Brings the routing core up.
    ///
    /// Attaches the devices the catalog declares as present at boot, opens a
    /// mixer stream for every shared playback profile that reaches one of
    /// them and routes it. Fails with [`PolicyError::NotInitialized`] when
    /// no primary output could be opened.
    pub fn new(catalog: ProfileCatalog, engine: E, hal: H, config: PolicyConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| PolicyError::InvalidArgument(err.to_string()))?;
        let primary_profile = catalog.primary_output_profile().ok_or_else(|| {
            PolicyError::NotInitialized("no primary output profile declared".to_string())
        })?;
        let patches = PatchGraph::new(config.max_patch_sinks)
            .with_min_hw_bridge_version(config.hw_bridge_version())
            .with_system_uid(config.system_uid());
        let mut core = Self {
            registry: DeviceRegistry::new(config.registry_capacity),
            selector: OutputSelector::new(config.default_sample_rate),
            config,
            platform: Platform::new(hal, catalog),
            engine,
            pool: StreamPool::new(),
            patches,
            mute: MuteScheduler::new(),
            sources: BTreeMap::new(),
            next_source: 0,
            haptics: BTreeMap::new(),
            primary: None,
            pacer: Box::new(ThreadPacer),
        };
        core.attach_boot_devices()?;
        core.open_boot_outputs(primary_profile)?;
        tracing::info!(
            devices = core.registry.len(),
            outputs = core.pool.outputs().count(),
            "routing_core_initialized"
        );
        Ok(core)
    }

    /// Builder: how mute waits are honored (defaults to sleeping).
    #[must_use]
    pub fn with_pacer(mut self, pacer: impl Pacer + 'static) -> Self {
        self.pacer = Box::new(pacer);
        self
    }

    fn attach_boot_devices(&mut self) -> Result<()> {
        let declared: Vec<NewDevice> = self
            .platform
            .catalog
            .modules()
            .iter()
            .flat_map(|m| {
                m.devices
                    .iter()
                    .filter(|d| d.attached_at_boot)
                    .map(move |d| NewDevice {
                        key: d.key.clone(),
                        name: d.name.clone(),
                        module: m.id,
                        has_gain_control: d.has_gain_control,
                        encoded_formats: d.encoded_formats.clone(),
                    })
            })
            .collect();
        for device in declared {
            let key = device.key.clone();
            let id = self.registry.attach(device)?;
            self.platform
                .hal
                .set_device_connected_state(&key, DeviceConnectedState::Connected)?;
            if let Some(desc) = self.registry.get(id) {
                self.engine
                    .set_device_connection_state(desc, DeviceAvailability::Available);
            }
        }
        self.engine.invalidate_cache();
        Ok(())
    }

    fn open_boot_outputs(&mut self, primary_profile: ProfileId) -> Result<()> {
        let profiles: Vec<ProfileId> = self
            .platform
            .catalog
            .profiles(IoRole::Output)
            .filter(|(_, p)| !p.output_flags().intersects(OutputFlags::EXCLUDED_FROM_SHARING))
            .map(|(id, _)| id)
            .collect();
        let mut opened = Vec::new();
        for profile_id in profiles {
            let devices = self.default_devices_for_profile(profile_id);
            let Some(config) = self
                .platform
                .catalog
                .profile(profile_id)
                .and_then(|p| p.first_config())
            else {
                continue;
            };
            if devices.is_empty() {
                continue;
            }
            match self
                .pool
                .open_output(&mut self.platform, &self.registry, profile_id, &devices, config)
            {
                Ok(stream) => {
                    if profile_id == primary_profile {
                        self.primary = Some(stream);
                    }
                    opened.push((stream, devices));
                }
                Err(err) if profile_id != primary_profile => {
                    tracing::warn!(profile = %profile_id, %err, "boot_output_open_failed");
                }
                Err(err) => {
                    return Err(PolicyError::NotInitialized(format!(
                        "primary output could not be opened: {err}"
                    )));
                }
            }
        }
        if self.primary.is_none() {
            return Err(PolicyError::NotInitialized(
                "primary output reaches no attached device".to_string(),
            ));
        }
        for (stream, devices) in opened {
            self.route_output(stream, devices, true)?;
        }
        Ok(())
    }

    /// Available devices a freshly opened stream on `profile_id` starts on.
    fn default_devices_for_profile(&mut self, profile_id: ProfileId) -> Vec<DeviceId> {
        let Some(profile) = self.platform.catalog.profile(profile_id) else {
            return Vec::new();
        };
        let resolved: Vec<DeviceId> = self
            .engine
            .devices_for_attributes(&AudioAttributes::default(), None, CacheMode::Cached)
            .into_iter()
            .filter(|d| {
                self.registry
                    .get(*d)
                    .is_some_and(|desc| profile.supports_device(&desc.key))
            })
            .collect();
        if !resolved.is_empty() {
            return resolved;
        }
        self.registry
            .outputs()
            .find(|d| profile.supports_device(&d.key))
            .map(|d| vec![d.id])
            .unwrap_or_default()
    }

    /// Static catalog, hardware boundary and generation.
    pub fn platform(&self) -> &Platform<H> {
        &self.platform
    }

    /// The hardware boundary.
    pub fn hal(&self) -> &H {
        self.platform.hal()
    }

    /// Mutable hardware boundary, for failure injection in tests.
    pub fn hal_mut(&mut self) -> &mut H {
        self.platform.hal_mut()
    }

    /// The device-selection policy.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Limits the core runs with.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Available devices.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Open streams and their clients.
    pub fn pool(&self) -> &StreamPool {
        &self.pool
    }

    /// Installed patches.
    pub fn patches(&self) -> &PatchGraph {
        &self.patches
    }

    /// The primary playback stream.
    pub fn primary_output(&self) -> Option<StreamId> {
        self.primary
    }

    /// Structural change counter.
    pub fn generation(&self) -> u64 {
        self.platform.generation()
    }

    /// Devices and streams, tagged with the current generation.
    pub fn list_audio_ports(&self) -> PortSnapshot {
        PortSnapshot {
            generation: self.generation(),
            devices: self.registry.iter().cloned().collect(),
            outputs: self.pool.outputs().cloned().collect(),
            inputs: self.pool.inputs().cloned().collect(),
        }
    }

    /// Patches, tagged with the current generation.
    pub fn list_audio_patches(&self) -> PatchSnapshot {
        PatchSnapshot {
            generation: self.generation(),
            patches: self.patches.iter().cloned().collect(),
        }
    }

    /// Devices a playback stream should be on now.
    ///
    /// The highest-priority strategy playing on the stream decides, with an
    /// active client's preferred device taking precedence. An idle stream
    /// stays where it is while its devices remain available.
    fn output_target_devices(&mut self, stream: StreamId) -> Vec<DeviceId> {
        let Some(out) = self.pool.output(stream) else {
            return Vec::new();
        };
        let profile = out.profile.and_then(|p| self.platform.catalog.profile(p));
        let reachable = |registry: &DeviceRegistry, id: &DeviceId| {
            registry
                .get(*id)
                .is_some_and(|d| profile.is_some_and(|p| p.supports_device(&d.key)))
        };

        for strategy in self.engine.ordered_strategies() {
            if !out.is_strategy_active(strategy) {
                continue;
            }
            let active: Vec<_> = out
                .clients
                .iter()
                .filter_map(|c| self.pool.client(*c))
                .filter(|c| c.active && c.strategy == strategy)
                .collect();
            let client = active
                .iter()
                .find(|c| c.preferred_device.is_some())
                .or_else(|| active.first());
            let attributes = client.map_or_else(
                || self.engine.attributes_for_strategy(strategy),
                |c| c.attributes.clone(),
            );
            let preferred = client
                .and_then(|c| c.preferred_device)
                .filter(|d| self.registry.contains(*d));
            let devices: Vec<DeviceId> = self
                .engine
                .devices_for_attributes(&attributes, preferred, CacheMode::Cached)
                .into_iter()
                .filter(|d| reachable(&self.registry, d))
                .collect();
            if !devices.is_empty() {
                return devices;
            }
        }

        if !out.devices.is_empty() && out.devices.iter().all(|d| reachable(&self.registry, d)) {
            return out.devices.clone();
        }
        let profile_id = out.profile;
        match profile_id {
            Some(profile_id) => self.default_devices_for_profile(profile_id),
            None => Vec::new(),
        }
    }

    /// Moves a playback stream to `devices`: mutes around the switch, waits
    /// out the plan, then reinstalls the stream's patch in place.
    fn route_output(&mut self, stream: StreamId, devices: Vec<DeviceId>, force: bool) -> Result<()> {
        let out = self
            .pool
            .output(stream)
            .ok_or_else(|| PolicyError::NotFound(format!("output {stream}")))?;
        if out.is_duplicated() || devices.is_empty() {
            return Ok(());
        }
        if !force && out.patch.is_some() && same_devices(&out.devices, &devices) {
            return Ok(());
        }
        let previous = out.devices.clone();
        let handle = out.patch;
        let plan = if out.is_active() {
            self.plan_mute(stream, &previous, &devices)
        } else {
            MutePlan::default()
        };
        self.apply_mute_plan(&plan);

        let owner = self.patches.system_uid();
        self.patches.install(
            &mut self.platform,
            &self.registry,
            &mut self.pool,
            PatchRequest {
                spec: PatchSpec::stream_to_devices(stream, &devices),
                handle,
                owner,
                origin: PatchOrigin::Internal,
            },
        )?;
        tracing::debug!(%stream, ?previous, ?devices, wait_ms = plan.wait_ms, "output_routed");
        if let Some(out) = self.pool.output_mut(stream) {
            out.devices = devices;
        }
        Ok(())
    }

    fn plan_mute(&mut self, stream: StreamId, previous: &[DeviceId], new: &[DeviceId]) -> MutePlan {
        let strategy_devices: Vec<(StrategyId, Vec<DeviceId>)> = self
            .engine
            .ordered_strategies()
            .into_iter()
            .map(|s| {
                let attributes = self.engine.attributes_for_strategy(s);
                let devices = self
                    .engine
                    .devices_for_attributes(&attributes, None, CacheMode::Cached);
                (s, devices)
            })
            .collect();
        let states: Vec<(StreamId, u32, Option<u32>, Vec<StrategyId>, bool)> = self
            .pool
            .outputs()
            .filter(|o| {
                o.id == stream
                    || o.devices
                        .iter()
                        .any(|d| previous.contains(d) || new.contains(d))
            })
            .map(|o| {
                (
                    o.id,
                    o.latency_ms,
                    o.recommended_mute_ms,
                    o.active_strategies(),
                    o.is_duplicated(),
                )
            })
            .collect();
        let views: Vec<StreamMuteView<'_>> = states
            .iter()
            .map(|(id, latency_ms, recommended_mute_ms, strategies, duplicated)| StreamMuteView {
                id: *id,
                latency_ms: *latency_ms,
                recommended_mute_ms: *recommended_mute_ms,
                active_strategies: strategies,
                duplicated: *duplicated,
            })
            .collect();
        let Some(switched) = views.iter().find(|v| v.id == stream).copied() else {
            return MutePlan::default();
        };
        self.mute.plan_switch(&DeviceSwitch {
            stream: switched,
            previous_devices: previous,
            new_devices: new,
            strategy_devices: &strategy_devices,
            sharing: &views,
            delay_ms: 0,
        })
    }

    fn apply_mute_plan(&mut self, plan: &MutePlan) {
        for action in &plan.actions {
            if let Some(out) = self.pool.output(action.stream) {
                self.platform.hal.set_strategy_mute(
                    out.io,
                    action.strategy,
                    action.muted,
                    action.delay_ms,
                );
            }
        }
        if plan.wait_ms > 0 {
            tracing::debug!(wait_ms = plan.wait_ms, actions = plan.actions.len(), "mute_wait");
            self.pacer.wait(plan.wait_ms);
        }
    }

    /// Re-evaluates every routable playback stream after a device change.
    fn reroute_outputs(&mut self) {
        let streams: Vec<StreamId> = self
            .pool
            .outputs()
            .filter(|o| !o.is_duplicated() && o.bridge.is_none())
            .map(|o| o.id)
            .collect();
        for stream in streams {
            let devices = self.output_target_devices(stream);
            if let Err(err) = self.route_output(stream, devices, false) {
                tracing::warn!(%stream, %err, "output_reroute_failed");
            }
        }
        self.refresh_duplicates();
        self.evict_misrouted_clients();
    }

    /// Reroutes a stream whose activity changed; a duplicated stream is
    /// routed through its twins.
    fn reroute_output_for_activity(&mut self, stream: StreamId) -> Result<()> {
        let targets = match self.pool.output(stream).and_then(|o| o.mirrors) {
            Some((first, second)) => vec![first, second],
            None => vec![stream],
        };
        for target in targets {
            let devices = self.output_target_devices(target);
            self.route_output(target, devices, false)?;
        }
        self.refresh_duplicates();
        Ok(())
    }

    fn refresh_duplicates(&mut self) {
        let duplicates: Vec<(StreamId, StreamId, StreamId)> = self
            .pool
            .outputs()
            .filter_map(|o| o.mirrors.map(|(a, b)| (o.id, a, b)))
            .collect();
        for (id, first, second) in duplicates {
            let mut devices = Vec::new();
            for twin in [first, second].iter().filter_map(|t| self.pool.output(*t)) {
                for device in &twin.devices {
                    if !devices.contains(device) {
                        devices.push(*device);
                    }
                }
            }
            if let Some(out) = self.pool.output_mut(id) {
                out.devices = devices;
            }
        }
    }

    /// Playback clients whose stream can no longer reach the devices their
    /// attributes resolve to, while another shared stream can, are detached
    /// and invalidated so they reconnect.
    fn evict_misrouted_clients(&mut self) {
        let clients: Vec<(ClientId, StreamId, AudioAttributes, Option<DeviceId>, bool)> = self
            .pool
            .clients()
            .filter(|c| c.role == IoRole::Output)
            .map(|c| {
                (
                    c.id,
                    c.stream,
                    c.attributes.clone(),
                    c.preferred_device,
                    c.active,
                )
            })
            .collect();
        let mut evicted = Vec::new();
        let mut touched = Vec::new();
        for (client, stream, attributes, preferred, active) in clients {
            let Some(out) = self.pool.output(stream) else {
                continue;
            };
            if out.is_direct() || out.is_duplicated() {
                continue;
            }
            let devices = self
                .engine
                .devices_for_attributes(&attributes, preferred, CacheMode::Cached);
            let keys = self.registry.keys_of(&devices);
            if keys.is_empty() {
                continue;
            }
            let reaches = out
                .profile
                .and_then(|p| self.platform.catalog.profile(p))
                .is_some_and(|p| p.supports_all_devices(&keys));
            if reaches {
                continue;
            }
            let elsewhere = shared_candidates(&self.pool, &self.platform.catalog, &keys);
            if elsewhere.is_empty() || elsewhere.contains(&stream) {
                continue;
            }
            if active
                && let Err(err) = self
                    .pool
                    .set_output_client_active(&mut self.platform, client, false)
            {
                tracing::warn!(%client, %err, "evicted_client_stop_failed");
            }
            self.pool.remove_client(client);
            evicted.push(client);
            if active && !touched.contains(&stream) {
                touched.push(stream);
            }
        }
        if evicted.is_empty() {
            return;
        }
        tracing::debug!(clients = evicted.len(), "clients_moved_off_stream");
        self.platform.hal.invalidate_clients(&evicted);
        for stream in touched {
            if let Err(err) = self.reroute_output_for_activity(stream) {
                tracing::warn!(%stream, %err, "output_reroute_failed");
            }
        }
    }

    /// Closes a playback stream (and its duplicates) and forgets its mute
    /// state.
    fn close_output(&mut self, stream: StreamId) -> Result<Vec<ClientId>> {
        let mirrors: Vec<StreamId> = self
            .pool
            .outputs()
            .filter(|o| o.mirrors_stream(stream))
            .map(|o| o.id)
            .collect();
        let clients = self
            .pool
            .close_output(&mut self.platform, &mut self.patches, stream)?;
        self.mute.forget_stream(stream);
        for mirror in mirrors {
            self.mute.forget_stream(mirror);
        }
        Ok(clients)
    }
}
