//! The patch graph: installed source-to-sink connections.
//!
//! A patch joins one source port to one or more sink ports. Ports are either
//! devices or open streams. Device-to-device patches are realized in one of
//! two ways:
//!
//! - **Hardware bridge**: the module's routing fabric connects the devices
//!   directly. Needs both ends on one module, a recent enough driver, a
//!   declared route, and (for externally requested patches) a gain
//!   controller on the source.
//! - **Software bridge**: a mixer stream toward the sink is inserted between
//!   the two devices. The stream is opened for the patch when its profile has
//!   room, otherwise an existing mixer stream is borrowed.
//!
//! Records are keyed by [`PatchHandle`]s that are never reused. Installing
//! with a known handle updates the record in place and hands the previous
//! hardware handle back to the driver. A stream carries at most one patch:
//! a new patch on an already patched stream updates that stream's record.

use std::collections::BTreeMap;

use patchbay_core::{
    DeviceDescriptor, DeviceId, DeviceKey, DeviceRegistry, HalVersion, HwPatchHandle, IoRole,
    OutputFlags, PatchHandle, PolicyError, PortRole, ProfileId, Result, StreamId, Uid,
};

use crate::hal::{AudioHal, HwPatch, HwPort};
use crate::platform::Platform;
use crate::stream::StreamPool;

/// Who asked for a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchOrigin {
    /// The routing core itself (stream routing, audio sources it drives).
    Internal,
    /// A client of the routing core.
    External,
}

/// One end of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortSpec {
    /// An available device.
    Device(DeviceId),
    /// An open stream.
    Stream(StreamId),
}

/// What a patch connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    /// Source ports; exactly one is supported.
    pub sources: Vec<PortSpec>,
    /// Sink ports.
    pub sinks: Vec<PortSpec>,
}

impl PatchSpec {
    /// A patch from `source` to `sinks`.
    pub fn new(source: PortSpec, sinks: Vec<PortSpec>) -> Self {
        Self {
            sources: vec![source],
            sinks,
        }
    }

    /// A patch feeding a playback stream to devices.
    pub fn stream_to_devices(stream: StreamId, devices: &[DeviceId]) -> Self {
        Self::new(
            PortSpec::Stream(stream),
            devices.iter().copied().map(PortSpec::Device).collect(),
        )
    }

    /// Whether any port is the device `id`.
    pub fn names_device(&self, id: DeviceId) -> bool {
        self.sources
            .iter()
            .chain(&self.sinks)
            .any(|p| *p == PortSpec::Device(id))
    }
}

/// How an installed patch is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bridge {
    /// Device to device through the module's routing fabric.
    Hardware,
    /// Device to device through a mixer stream.
    Software {
        /// The mixer stream.
        stream: StreamId,
        /// The stream was opened for this patch and closes with it.
        opened_for_bridge: bool,
    },
    /// Through the named stream.
    Stream(StreamId),
}

impl Bridge {
    /// Stream the patch rides on, if any.
    pub fn stream(&self) -> Option<StreamId> {
        match *self {
            Self::Hardware => None,
            Self::Software { stream, .. } | Self::Stream(stream) => Some(stream),
        }
    }
}

/// An installed patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    /// Internal handle.
    pub handle: PatchHandle,
    /// What the patch connects.
    pub spec: PatchSpec,
    /// Uid that installed the patch.
    pub owner: Uid,
    /// Who asked for the patch.
    pub origin: PatchOrigin,
    /// How the patch is realized.
    pub bridge: Bridge,
    /// Handle the hardware returned.
    pub hw_handle: HwPatchHandle,
}

/// Parameters of [`PatchGraph::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    /// What to connect.
    pub spec: PatchSpec,
    /// Handle of the patch to update, `None` to install a new one.
    pub handle: Option<PatchHandle>,
    /// Calling uid.
    pub owner: Uid,
    /// Who asks.
    pub origin: PatchOrigin,
}

struct Plan {
    hw: HwPatch,
    bridge: Bridge,
}

/// Installed patches.
#[derive(Debug, Clone)]
pub struct PatchGraph {
    patches: BTreeMap<PatchHandle, PatchRecord>,
    next_handle: u32,
    max_sinks: usize,
    min_hw_bridge_version: HalVersion,
    system_uid: Uid,
}

impl PatchGraph {
    /// An empty graph accepting up to `max_sinks` sinks per patch.
    pub fn new(max_sinks: usize) -> Self {
        Self {
            patches: BTreeMap::new(),
            next_handle: 0,
            max_sinks,
            min_hw_bridge_version: HalVersion::new(3, 0),
            system_uid: Uid::new(1000),
        }
    }

    /// Builder: driver version from which device-to-device patches may use
    /// the hardware fabric.
    #[must_use]
    pub fn with_min_hw_bridge_version(mut self, version: HalVersion) -> Self {
        self.min_hw_bridge_version = version;
        self
    }

    /// Builder: uid allowed to change any patch.
    #[must_use]
    pub fn with_system_uid(mut self, uid: Uid) -> Self {
        self.system_uid = uid;
        self
    }

    /// Uid allowed to change any patch.
    pub fn system_uid(&self) -> Uid {
        self.system_uid
    }

    /// Looks a patch up.
    pub fn get(&self, handle: PatchHandle) -> Option<&PatchRecord> {
        self.patches.get(&handle)
    }

    /// Every installed patch, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PatchRecord> {
        self.patches.values()
    }

    /// Number of installed patches.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Whether no patch is installed.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Patches with the device `id` at either end.
    pub fn patches_naming_device(&self, id: DeviceId) -> Vec<PatchHandle> {
        self.patches
            .values()
            .filter(|r| r.spec.names_device(id))
            .map(|r| r.handle)
            .collect()
    }

    /// Installs a patch, or updates the patch named by `request.handle`.
    ///
    /// On failure no record is created or changed, and a stream opened to
    /// host a software bridge is closed again.
    pub fn install<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        registry: &DeviceRegistry,
        pool: &mut StreamPool,
        request: PatchRequest,
    ) -> Result<PatchHandle> {
        let PatchRequest {
            spec,
            handle,
            owner,
            origin,
        } = request;
        self.validate_shape(&spec)?;

        let previous = match handle {
            Some(h) => {
                let record = self
                    .patches
                    .get(&h)
                    .ok_or_else(|| PolicyError::NotFound(format!("patch {h}")))?;
                if record.owner != owner && owner != self.system_uid {
                    return Err(PolicyError::PermissionDenied {
                        uid: owner,
                        patch: h,
                    });
                }
                Some((record.hw_handle, record.bridge, record.owner))
            }
            None => None,
        };
        let previous_bridge = previous.map(|(_, bridge, _)| bridge);

        let plan = self.plan(platform, registry, pool, &spec, origin, previous_bridge)?;

        // The stream's own patch is the update target unless a handle was
        // given, in which case it goes once the new patch is up.
        let displaced = match plan.bridge {
            Bridge::Stream(stream) => pool
                .stream_patch(stream)
                .filter(|other| Some(*other) != handle)
                .and_then(|other| self.patches.get(&other).map(|r| (other, r.hw_handle, r.owner))),
            _ => None,
        };
        if let Some((other, _, other_owner)) = displaced
            && other_owner != owner
            && owner != self.system_uid
        {
            return Err(PolicyError::PermissionDenied {
                uid: owner,
                patch: other,
            });
        }
        let (target, evicted, handle) = match (previous, displaced) {
            (None, Some((other, hw, other_owner))) => {
                (Some((hw, plan.bridge, other_owner)), None, Some(other))
            }
            (previous, displaced) => (previous, displaced.map(|(other, _, _)| other), handle),
        };

        let hw_handle = match platform
            .hal
            .create_patch(&plan.hw, target.map(|(hw, _, _)| hw))
        {
            Ok(hw) => hw,
            Err(err) => {
                if let Bridge::Software {
                    stream,
                    opened_for_bridge: true,
                } = plan.bridge
                    && previous_bridge != Some(plan.bridge)
                {
                    tracing::warn!(%stream, %err, "bridge_stream_rolled_back");
                    if let Err(close_err) = pool.close_output(platform, self, stream) {
                        tracing::warn!(%stream, err = %close_err, "bridge_stream_close_failed");
                    }
                }
                return Err(err.into());
            }
        };

        let handle = handle.unwrap_or_else(|| self.allocate());
        let record = PatchRecord {
            handle,
            spec,
            owner: target.map_or(owner, |(_, _, o)| o),
            origin,
            bridge: plan.bridge,
            hw_handle,
        };
        tracing::debug!(patch = %handle, %hw_handle, bridge = ?record.bridge, updated = target.is_some(), "patch_installed");
        let replaced = self.patches.insert(handle, record);
        if let Some(old) = replaced
            && old.bridge != plan.bridge
        {
            self.retire_bridge(platform, pool, handle, old.bridge);
        }
        if let Some(other) = evicted {
            tracing::debug!(patch = %other, replaced_by = %handle, "stream_patch_replaced");
            self.remove_record(platform, pool, other);
        }
        match plan.bridge {
            Bridge::Stream(stream) => pool.set_stream_patch(stream, Some(handle)),
            Bridge::Software {
                stream,
                opened_for_bridge: true,
            } => {
                if let Some(out) = pool.output_mut(stream) {
                    out.bridge = Some(handle);
                }
            }
            _ => {}
        }
        platform.patches_changed();
        Ok(handle)
    }

    /// Releases a patch. Only its owner or the system uid may.
    ///
    /// An unknown handle is [`PolicyError::NotFound`] and changes nothing.
    pub fn release<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        pool: &mut StreamPool,
        handle: PatchHandle,
        uid: Uid,
    ) -> Result<()> {
        let record = self
            .patches
            .get(&handle)
            .ok_or_else(|| PolicyError::NotFound(format!("patch {handle}")))?;
        if record.owner != uid && uid != self.system_uid {
            return Err(PolicyError::PermissionDenied { uid, patch: handle });
        }
        self.remove_record(platform, pool, handle);
        Ok(())
    }

    /// Drops every patch riding on a stream that is being closed. The
    /// stream itself is left to the caller.
    pub(crate) fn release_riding_on<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        stream: StreamId,
    ) {
        let riding: Vec<PatchHandle> = self
            .patches
            .values()
            .filter(|r| r.bridge.stream() == Some(stream))
            .map(|r| r.handle)
            .collect();
        for handle in riding {
            if let Some(record) = self.patches.remove(&handle) {
                if let Err(err) = platform.hal.release_patch(record.hw_handle) {
                    tracing::warn!(patch = %handle, %err, "hw_patch_release_failed");
                }
                tracing::debug!(patch = %handle, %stream, "patch_released_with_stream");
                platform.patches_changed();
            }
        }
    }

    fn allocate(&mut self) -> PatchHandle {
        self.next_handle += 1;
        PatchHandle::new(self.next_handle)
    }

    fn validate_shape(&self, spec: &PatchSpec) -> Result<()> {
        if spec.sources.len() != 1 {
            return Err(PolicyError::InvalidArgument(format!(
                "a patch takes exactly one source, got {}",
                spec.sources.len()
            )));
        }
        if spec.sinks.is_empty() || spec.sinks.len() > self.max_sinks {
            return Err(PolicyError::InvalidArgument(format!(
                "a patch takes 1 to {} sinks, got {}",
                self.max_sinks,
                spec.sinks.len()
            )));
        }
        Ok(())
    }

    fn plan<H: AudioHal>(
        &self,
        platform: &mut Platform<H>,
        registry: &DeviceRegistry,
        pool: &mut StreamPool,
        spec: &PatchSpec,
        origin: PatchOrigin,
        previous: Option<Bridge>,
    ) -> Result<Plan> {
        let sink_devices: Option<Vec<DeviceId>> = spec
            .sinks
            .iter()
            .map(|p| match p {
                PortSpec::Device(id) => Some(*id),
                PortSpec::Stream(_) => None,
            })
            .collect();

        match (spec.sources[0], sink_devices, spec.sinks.as_slice()) {
            (PortSpec::Device(source), Some(sinks), _) => {
                let source = device(registry, source, PortRole::Source)?;
                let sinks = sinks
                    .iter()
                    .map(|id| device(registry, *id, PortRole::Sink))
                    .collect::<Result<Vec<_>>>()?;
                if self.hardware_bridgeable(platform, source, &sinks, origin) {
                    return Ok(Plan {
                        hw: HwPatch {
                            sources: vec![HwPort::Device(source.key.clone())],
                            sinks: sinks.iter().map(|d| HwPort::Device(d.key.clone())).collect(),
                        },
                        bridge: Bridge::Hardware,
                    });
                }
                let [sink] = sinks.as_slice() else {
                    return Err(PolicyError::InvalidArgument(format!(
                        "a software bridge from {} takes a single sink",
                        source.key
                    )));
                };
                let bridge = match previous {
                    Some(bridge @ Bridge::Software { stream, .. })
                        if pool.output(stream).is_some_and(|o| o.devices.contains(&sink.id)) =>
                    {
                        bridge
                    }
                    _ => {
                        let (stream, opened_for_bridge) =
                            Self::bridge_stream(platform, registry, pool, sink.id, &sink.key)?;
                        Bridge::Software {
                            stream,
                            opened_for_bridge,
                        }
                    }
                };
                let io = bridge
                    .stream()
                    .and_then(|s| pool.output(s))
                    .map(|o| o.io)
                    .ok_or_else(|| PolicyError::NotFound(format!("bridge stream for {}", sink.key)))?;
                tracing::debug!(source = %source.key, sink = %sink.key, ?bridge, "software_bridge_planned");
                Ok(Plan {
                    hw: HwPatch {
                        sources: vec![HwPort::Device(source.key.clone()), HwPort::Mix(io)],
                        sinks: vec![HwPort::Device(sink.key.clone())],
                    },
                    bridge,
                })
            }
            (PortSpec::Device(source), None, [PortSpec::Stream(stream)]) => {
                let source = device(registry, source, PortRole::Source)?;
                let input = pool.input(*stream).ok_or_else(|| {
                    if pool.output(*stream).is_some() {
                        PolicyError::InvalidArgument(format!("{stream} is not a capture stream"))
                    } else {
                        PolicyError::NotFound(format!("stream {stream}"))
                    }
                })?;
                Ok(Plan {
                    hw: HwPatch {
                        sources: vec![HwPort::Device(source.key.clone())],
                        sinks: vec![HwPort::Mix(input.io)],
                    },
                    bridge: Bridge::Stream(*stream),
                })
            }
            (PortSpec::Stream(stream), Some(sinks), _) => {
                let output = pool.output(stream).ok_or_else(|| {
                    if pool.input(stream).is_some() {
                        PolicyError::InvalidArgument(format!("{stream} is not a playback stream"))
                    } else {
                        PolicyError::NotFound(format!("stream {stream}"))
                    }
                })?;
                let sinks = sinks
                    .iter()
                    .map(|id| device(registry, *id, PortRole::Sink).map(|d| HwPort::Device(d.key.clone())))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Plan {
                    hw: HwPatch {
                        sources: vec![HwPort::Mix(output.io)],
                        sinks,
                    },
                    bridge: Bridge::Stream(stream),
                })
            }
            _ => Err(PolicyError::InvalidArgument(
                "unsupported patch shape: streams connect to devices only".to_string(),
            )),
        }
    }

    fn hardware_bridgeable<H: AudioHal>(
        &self,
        platform: &Platform<H>,
        source: &DeviceDescriptor,
        sinks: &[&DeviceDescriptor],
        origin: PatchOrigin,
    ) -> bool {
        let Some(module) = platform.catalog.module(source.module) else {
            return false;
        };
        sinks.iter().all(|s| s.module == source.module)
            && module.hal_version >= self.min_hw_bridge_version
            && sinks.iter().all(|s| module.has_direct_route(&source.key, &s.key))
            && (origin == PatchOrigin::Internal || source.has_gain_control)
    }

    /// A mixer stream toward `sink`: a new one from the best profile with
    /// room, non-primary profiles first, else one already open.
    fn bridge_stream<H: AudioHal>(
        platform: &mut Platform<H>,
        registry: &DeviceRegistry,
        pool: &mut StreamPool,
        sink: DeviceId,
        key: &DeviceKey,
    ) -> Result<(StreamId, bool)> {
        let mut candidates: Vec<(ProfileId, bool)> = platform
            .catalog
            .profiles_for_device(IoRole::Output, key)
            .filter(|(_, p)| (p.output_flags() & OutputFlags::EXCLUDED_FROM_SHARING).is_empty())
            .filter(|(_, p)| p.first_config().is_some())
            .map(|(id, p)| (id, p.output_flags().contains(OutputFlags::PRIMARY)))
            .collect();
        if candidates.is_empty() {
            return Err(PolicyError::NotFound(format!("mixer profile reaching {key}")));
        }
        candidates.sort_by_key(|(_, primary)| *primary);

        for (id, _) in &candidates {
            let Some(config) = platform
                .catalog
                .profile(*id)
                .filter(|p| p.can_open_new_io())
                .and_then(|p| p.first_config())
            else {
                continue;
            };
            let stream = pool.open_output(platform, registry, *id, &[sink], config)?;
            return Ok((stream, true));
        }
        candidates
            .iter()
            .find_map(|(id, _)| {
                pool.outputs()
                    .find(|o| o.profile == Some(*id) && !o.is_duplicated())
                    .map(|o| o.id)
            })
            .map(|stream| (stream, false))
            .ok_or_else(|| PolicyError::ResourceExhausted(format!("no mixer stream can bridge to {key}")))
    }

    /// Undoes the stream side of a bridge an update replaced.
    fn retire_bridge<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        pool: &mut StreamPool,
        handle: PatchHandle,
        old: Bridge,
    ) {
        match old {
            Bridge::Stream(stream) => {
                if pool.stream_patch(stream) == Some(handle) {
                    pool.set_stream_patch(stream, None);
                }
            }
            Bridge::Software {
                stream,
                opened_for_bridge: true,
            } => {
                if let Some(out) = pool.output_mut(stream) {
                    out.bridge = None;
                }
                if let Err(err) = pool.close_output(platform, self, stream) {
                    tracing::warn!(%stream, %err, "bridge_stream_close_failed");
                }
            }
            _ => {}
        }
    }

    fn remove_record<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        pool: &mut StreamPool,
        handle: PatchHandle,
    ) {
        let Some(record) = self.patches.remove(&handle) else {
            return;
        };
        if let Err(err) = platform.hal.release_patch(record.hw_handle) {
            tracing::warn!(patch = %handle, %err, "hw_patch_release_failed");
        }
        tracing::debug!(patch = %handle, hw_handle = %record.hw_handle, "patch_released");
        platform.patches_changed();
        self.retire_bridge(platform, pool, handle, record.bridge);
    }
}

fn device(registry: &DeviceRegistry, id: DeviceId, role: PortRole) -> Result<&DeviceDescriptor> {
    let desc = registry
        .get(id)
        .ok_or_else(|| PolicyError::NotFound(format!("device {id}")))?;
    if desc.role() != role {
        let wanted = match role {
            PortRole::Source => "source",
            PortRole::Sink => "sink",
        };
        return Err(PolicyError::InvalidArgument(format!(
            "{desc} cannot be a patch {wanted}"
        )));
    }
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HalCall, MockHal};
    use patchbay_core::{
        AudioConfig, AudioFormat, AudioProfile, ChannelMask, DeclaredDevice, DeviceType, HalOp,
        HwModule, IoFlags, IoProfile, ModuleId, NewDevice, ProfileCatalog, Route, RoutePort,
    };

    const USER: Uid = Uid::new(10_000);
    const OTHER: Uid = Uid::new(10_001);
    const SYSTEM: Uid = Uid::new(1000);

    struct Rig {
        platform: Platform<MockHal>,
        registry: DeviceRegistry,
        pool: StreamPool,
        graph: PatchGraph,
        speaker: DeviceId,
        earpiece: DeviceId,
        tuner: DeviceId,
        line: DeviceId,
    }

    fn stereo() -> AudioProfile {
        AudioProfile::new(AudioFormat::Pcm16Bit, vec![48000], vec![ChannelMask::OUT_STEREO])
    }

    fn rig() -> Rig {
        let speaker = DeviceKey::of_type(DeviceType::OutSpeaker);
        let earpiece = DeviceKey::of_type(DeviceType::OutEarpiece);
        let tuner = DeviceKey::of_type(DeviceType::InFmTuner);
        let line = DeviceKey::of_type(DeviceType::InLine);
        let mut module = HwModule::new("primary", HalVersion::new(3, 0));
        for (key, name) in [
            (&speaker, "Speaker"),
            (&earpiece, "Earpiece"),
            (&tuner, "FM Tuner"),
            (&line, "Line In"),
        ] {
            module.devices.push(DeclaredDevice::new(key.clone(), name));
        }
        module.outputs.push(
            IoProfile::new("primary output", IoFlags::Output(OutputFlags::PRIMARY))
                .with_device(speaker.clone())
                .with_device(earpiece.clone())
                .with_audio_profile(stereo()),
        );
        module.outputs.push(
            IoProfile::new("deep buffer", IoFlags::Output(OutputFlags::DEEP_BUFFER))
                .with_device(speaker.clone())
                .with_audio_profile(stereo()),
        );
        for sink in [&speaker, &earpiece] {
            module.routes.push(Route {
                sink: RoutePort::Device(sink.clone()),
                sources: vec![RoutePort::Device(tuner.clone()), RoutePort::Mix("primary output".into())],
            });
        }
        let mut catalog = ProfileCatalog::new();
        catalog.add_module(module);

        let mut registry = DeviceRegistry::new(8);
        let mut attach = |key: DeviceKey, gain: bool| {
            registry
                .attach(NewDevice {
                    name: key.to_string(),
                    key,
                    module: ModuleId::new(0),
                    has_gain_control: gain,
                    encoded_formats: Vec::new(),
                })
                .unwrap()
        };
        let speaker = attach(speaker, false);
        let earpiece = attach(earpiece, false);
        let tuner = attach(tuner, true);
        let line = attach(line, true);
        Rig {
            platform: Platform::new(MockHal::new(), catalog),
            registry,
            pool: StreamPool::new(),
            graph: PatchGraph::new(8),
            speaker,
            earpiece,
            tuner,
            line,
        }
    }

    impl Rig {
        fn install(
            &mut self,
            spec: PatchSpec,
            handle: Option<PatchHandle>,
            owner: Uid,
            origin: PatchOrigin,
        ) -> Result<PatchHandle> {
            self.graph.install(
                &mut self.platform,
                &self.registry,
                &mut self.pool,
                PatchRequest {
                    spec,
                    handle,
                    owner,
                    origin,
                },
            )
        }

        fn release(&mut self, handle: PatchHandle, uid: Uid) -> Result<()> {
            self.graph.release(&mut self.platform, &mut self.pool, handle, uid)
        }
    }

    fn deep_buffer() -> ProfileId {
        ProfileId {
            module: ModuleId::new(0),
            role: IoRole::Output,
            index: 1,
        }
    }

    #[test]
    fn routed_tuner_uses_hardware_bridge() {
        let mut rig = rig();
        let spec = PatchSpec::new(PortSpec::Device(rig.tuner), vec![PortSpec::Device(rig.speaker)]);
        let handle = rig.install(spec, None, USER, PatchOrigin::External).unwrap();
        let record = rig.graph.get(handle).unwrap();
        assert_eq!(record.bridge, Bridge::Hardware);
        assert_eq!(rig.pool.outputs().count(), 0);
    }

    #[test]
    fn unrouted_source_gets_a_software_bridge_that_closes_with_the_patch() {
        let mut rig = rig();
        let spec = PatchSpec::new(PortSpec::Device(rig.line), vec![PortSpec::Device(rig.speaker)]);
        let handle = rig.install(spec, None, USER, PatchOrigin::External).unwrap();
        let Bridge::Software {
            stream,
            opened_for_bridge,
        } = rig.graph.get(handle).unwrap().bridge
        else {
            panic!("expected a software bridge");
        };
        assert!(opened_for_bridge);
        let out = rig.pool.output(stream).unwrap();
        assert_eq!(out.profile, Some(deep_buffer()));
        assert_eq!(out.bridge, Some(handle));

        rig.release(handle, USER).unwrap();
        assert!(rig.graph.is_empty());
        assert!(rig.pool.output(stream).is_none());
        assert_eq!(rig.platform.catalog().profile(deep_buffer()).unwrap().open_count(), 0);
    }

    #[test]
    fn external_patch_without_gain_control_is_bridged_in_software() {
        let mut rig = rig();
        rig.registry.get_mut(rig.tuner).unwrap().has_gain_control = false;
        let spec = PatchSpec::new(PortSpec::Device(rig.tuner), vec![PortSpec::Device(rig.speaker)]);
        let external = rig.install(spec.clone(), None, USER, PatchOrigin::External).unwrap();
        assert!(matches!(rig.graph.get(external).unwrap().bridge, Bridge::Software { .. }));

        let internal = rig.install(spec, None, SYSTEM, PatchOrigin::Internal).unwrap();
        assert_eq!(rig.graph.get(internal).unwrap().bridge, Bridge::Hardware);
    }

    #[test]
    fn old_driver_forces_software_bridge() {
        let mut rig = rig();
        rig.graph = PatchGraph::new(8).with_min_hw_bridge_version(HalVersion::new(3, 1));
        let spec = PatchSpec::new(PortSpec::Device(rig.tuner), vec![PortSpec::Device(rig.speaker)]);
        let handle = rig.install(spec, None, SYSTEM, PatchOrigin::Internal).unwrap();
        assert!(matches!(rig.graph.get(handle).unwrap().bridge, Bridge::Software { .. }));
    }

    #[test]
    fn software_bridge_takes_a_single_sink() {
        let mut rig = rig();
        let spec = PatchSpec::new(
            PortSpec::Device(rig.line),
            vec![PortSpec::Device(rig.speaker), PortSpec::Device(rig.earpiece)],
        );
        assert!(matches!(
            rig.install(spec, None, USER, PatchOrigin::External),
            Err(PolicyError::InvalidArgument(_))
        ));
        assert!(rig.graph.is_empty());
        assert_eq!(rig.pool.outputs().count(), 0);
    }

    #[test]
    fn reinstall_with_same_handle_updates_in_place() {
        let mut rig = rig();
        let spec = PatchSpec::new(PortSpec::Device(rig.tuner), vec![PortSpec::Device(rig.speaker)]);
        let handle = rig.install(spec, None, USER, PatchOrigin::External).unwrap();
        let first_hw = rig.graph.get(handle).unwrap().hw_handle;

        let moved = PatchSpec::new(PortSpec::Device(rig.tuner), vec![PortSpec::Device(rig.earpiece)]);
        let again = rig.install(moved.clone(), Some(handle), USER, PatchOrigin::External).unwrap();
        assert_eq!(again, handle);
        assert_eq!(rig.graph.len(), 1);
        assert_eq!(rig.graph.get(handle).unwrap().spec, moved);
        assert!(rig.platform.hal().journal().iter().any(|call| matches!(
            call,
            HalCall::CreatePatch { previous: Some(prev), .. } if *prev == first_hw
        )));
    }

    #[test]
    fn only_owner_or_system_may_touch_a_patch() {
        let mut rig = rig();
        let spec = PatchSpec::new(PortSpec::Device(rig.tuner), vec![PortSpec::Device(rig.speaker)]);
        let handle = rig.install(spec.clone(), None, USER, PatchOrigin::External).unwrap();

        assert!(matches!(
            rig.install(spec, Some(handle), OTHER, PatchOrigin::External),
            Err(PolicyError::PermissionDenied { .. })
        ));
        assert!(matches!(
            rig.release(handle, OTHER),
            Err(PolicyError::PermissionDenied { uid, patch }) if uid == OTHER && patch == handle
        ));
        rig.release(handle, SYSTEM).unwrap();
        assert!(rig.graph.is_empty());
    }

    #[test]
    fn unknown_handle_is_not_found_and_changes_nothing() {
        let mut rig = rig();
        let before = rig.platform.generation();
        assert!(matches!(
            rig.release(PatchHandle::new(99), USER),
            Err(PolicyError::NotFound(_))
        ));
        let spec = PatchSpec::new(PortSpec::Device(rig.tuner), vec![PortSpec::Device(rig.speaker)]);
        assert!(matches!(
            rig.install(spec, Some(PatchHandle::new(99)), USER, PatchOrigin::External),
            Err(PolicyError::NotFound(_))
        ));
        assert_eq!(rig.platform.generation(), before);
        assert!(rig.graph.is_empty());
    }

    #[test]
    fn failed_hw_create_rolls_the_bridge_stream_back() {
        let mut rig = rig();
        rig.platform.hal_mut().fail_next(HalOp::CreatePatch, -22);
        let spec = PatchSpec::new(PortSpec::Device(rig.line), vec![PortSpec::Device(rig.speaker)]);
        assert!(matches!(
            rig.install(spec, None, USER, PatchOrigin::External),
            Err(PolicyError::Hal(_))
        ));
        assert!(rig.graph.is_empty());
        assert_eq!(rig.pool.outputs().count(), 0);
        assert_eq!(rig.platform.catalog().profile(deep_buffer()).unwrap().open_count(), 0);
    }

    fn primary_stream(rig: &mut Rig) -> StreamId {
        let primary = ProfileId {
            index: 0,
            ..deep_buffer()
        };
        rig.pool
            .open_output(&mut rig.platform, &rig.registry, primary, &[rig.speaker], AudioConfig::default_output())
            .unwrap()
    }

    #[test]
    fn a_stream_carries_at_most_one_patch() {
        let mut rig = rig();
        let out = primary_stream(&mut rig);
        let first = rig
            .install(PatchSpec::stream_to_devices(out, &[rig.speaker]), None, SYSTEM, PatchOrigin::Internal)
            .unwrap();
        assert_eq!(rig.pool.stream_patch(out), Some(first));
        let first_hw = rig.graph.get(first).unwrap().hw_handle;

        let second = rig
            .install(PatchSpec::stream_to_devices(out, &[rig.earpiece]), None, SYSTEM, PatchOrigin::Internal)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(rig.graph.len(), 1);
        assert_eq!(rig.pool.stream_patch(out), Some(first));
        assert!(rig.graph.get(first).unwrap().spec.names_device(rig.earpiece));
        assert!(rig.platform.hal().journal().iter().any(|c| matches!(
            c,
            HalCall::CreatePatch { previous: Some(prev), .. } if *prev == first_hw
        )));

        rig.pool.close_output(&mut rig.platform, &mut rig.graph, out).unwrap();
        assert!(rig.graph.is_empty());
    }

    #[test]
    fn failed_hw_create_keeps_the_stream_patch() {
        let mut rig = rig();
        let out = primary_stream(&mut rig);
        let routed = rig
            .install(PatchSpec::stream_to_devices(out, &[rig.speaker]), None, SYSTEM, PatchOrigin::Internal)
            .unwrap();
        let before = rig.graph.get(routed).unwrap().clone();

        rig.platform.hal_mut().fail_next(HalOp::CreatePatch, -22);
        assert!(matches!(
            rig.install(PatchSpec::stream_to_devices(out, &[rig.earpiece]), None, SYSTEM, PatchOrigin::External),
            Err(PolicyError::Hal(_))
        ));
        assert_eq!(rig.pool.stream_patch(out), Some(routed));
        assert_eq!(rig.graph.len(), 1);
        assert_eq!(rig.graph.get(routed), Some(&before));
        assert!(!rig.platform.hal().journal().iter().any(|c| matches!(c, HalCall::ReleasePatch(_))));
    }

    #[test]
    fn foreign_stream_patch_cannot_be_taken_over() {
        let mut rig = rig();
        let out = primary_stream(&mut rig);
        let routed = rig
            .install(PatchSpec::stream_to_devices(out, &[rig.speaker]), None, SYSTEM, PatchOrigin::Internal)
            .unwrap();
        let calls = rig.platform.hal().journal().len();

        assert!(matches!(
            rig.install(PatchSpec::stream_to_devices(out, &[rig.earpiece]), None, USER, PatchOrigin::External),
            Err(PolicyError::PermissionDenied { uid, patch }) if uid == USER && patch == routed
        ));
        assert_eq!(rig.pool.stream_patch(out), Some(routed));
        assert_eq!(rig.graph.get(routed).unwrap().owner, SYSTEM);
        assert!(rig.graph.get(routed).unwrap().spec.names_device(rig.speaker));
        assert_eq!(rig.platform.hal().journal().len(), calls);
    }

    #[test]
    fn handle_moved_onto_a_patched_stream_replaces_its_patch() {
        let mut rig = rig();
        let out = primary_stream(&mut rig);
        let routed = rig
            .install(PatchSpec::stream_to_devices(out, &[rig.speaker]), None, SYSTEM, PatchOrigin::Internal)
            .unwrap();
        let bridge = rig
            .install(
                PatchSpec::new(PortSpec::Device(rig.tuner), vec![PortSpec::Device(rig.earpiece)]),
                None,
                SYSTEM,
                PatchOrigin::Internal,
            )
            .unwrap();

        let moved = rig
            .install(PatchSpec::stream_to_devices(out, &[rig.earpiece]), Some(bridge), SYSTEM, PatchOrigin::Internal)
            .unwrap();
        assert_eq!(moved, bridge);
        assert!(rig.graph.get(routed).is_none());
        assert_eq!(rig.pool.stream_patch(out), Some(bridge));
        assert_eq!(rig.graph.len(), 1);
    }

    #[test]
    fn ports_must_play_their_role() {
        let mut rig = rig();
        let backwards = PatchSpec::new(PortSpec::Device(rig.speaker), vec![PortSpec::Device(rig.tuner)]);
        assert!(matches!(
            rig.install(backwards, None, USER, PatchOrigin::External),
            Err(PolicyError::InvalidArgument(_))
        ));

        let mut narrow = self::rig();
        narrow.graph = PatchGraph::new(1);
        let wide = PatchSpec::new(
            PortSpec::Device(narrow.tuner),
            vec![PortSpec::Device(narrow.speaker), PortSpec::Device(narrow.earpiece)],
        );
        assert!(matches!(
            narrow.install(wide, None, USER, PatchOrigin::External),
            Err(PolicyError::InvalidArgument(_))
        ));
    }
}
