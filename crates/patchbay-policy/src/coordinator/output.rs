//! Playback requests and the lifecycle of playback clients.

use patchbay_core::{
    AudioAttributes, AudioConfig, ClientId, DeviceId, IoHandle, IoRole, OutputFlags, PolicyError,
    PortRole, Result, SessionId, StrategyId, StreamId, Uid, closest_config,
};

use super::RoutingCoordinator;
use crate::engine::{CacheMode, PolicyEngine};
use crate::hal::AudioHal;
use crate::selector::{HapticAttachment, SelectionRequest, shared_candidates};
use crate::stream::{Acquired, ClientDescriptor, DirectRequest};

/// A client asking for a playback stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRequest {
    /// What is being played.
    pub attributes: AudioAttributes,
    /// Audio session of the client.
    pub session: SessionId,
    /// Uid of the client.
    pub uid: Uid,
    /// Requested configuration.
    pub config: AudioConfig,
    /// Requested flags.
    pub flags: OutputFlags,
    /// Device the client wants to play on, if any.
    pub preferred_device: Option<DeviceId>,
}

impl OutputRequest {
    /// A request with no flags, session 0 and uid 0.
    pub fn new(attributes: AudioAttributes, config: AudioConfig) -> Self {
        Self {
            attributes,
            session: SessionId::new(0),
            uid: Uid::new(0),
            config,
            flags: OutputFlags::empty(),
            preferred_device: None,
        }
    }

    /// Builder: audio session.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    /// Builder: client uid.
    #[must_use]
    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.uid = uid;
        self
    }

    /// Builder: requested flags.
    #[must_use]
    pub fn with_flags(mut self, flags: OutputFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builder: preferred device.
    #[must_use]
    pub fn with_preferred_device(mut self, device: DeviceId) -> Self {
        self.preferred_device = Some(device);
        self
    }
}

/// A granted playback request.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGrant {
    /// Stream the client plays through.
    pub stream: StreamId,
    /// Hardware handle of the stream.
    pub io: IoHandle,
    /// The new client.
    pub client: ClientId,
    /// Devices the stream is routed to.
    pub devices: Vec<DeviceId>,
    /// Configuration of the stream.
    pub config: AudioConfig,
    /// Strategy the attributes resolved to.
    pub strategy: StrategyId,
}

impl<H: AudioHal, E: PolicyEngine> RoutingCoordinator<H, E> {
    /// Finds a stream for a playback request and attaches a client to it.
    ///
    /// Direct streams are tried first for requests that cannot go through
    /// the mixer (DIRECT, compressed formats, rates or channel counts beyond
    /// the mixer). Requests needing hardware A/V sync or the no-IRQ path
    /// never fall back; the others fall back to the best shared stream
    /// reaching the resolved devices. When nothing fits the error carries a
    /// configuration to retry with.
    pub fn get_output_for_attr(&mut self, request: &OutputRequest) -> Result<OutputGrant> {
        let config = request.config;
        if !config.format.is_valid() || config.sample_rate == 0 || !config.channel_mask.is_valid_output() {
            return Err(PolicyError::InvalidArgument(format!(
                "invalid playback configuration {config}"
            )));
        }
        let preferred = request.preferred_device.filter(|d| {
            self.registry
                .get(*d)
                .is_some_and(|desc| desc.role() == PortRole::Sink)
        });
        let strategy = self.engine.strategy_for_attributes(&request.attributes);
        let devices: Vec<DeviceId> = self
            .engine
            .devices_for_attributes(&request.attributes, preferred, CacheMode::Cached)
            .into_iter()
            .filter(|d| self.registry.contains(*d))
            .collect();
        if devices.is_empty() {
            return Err(PolicyError::NotFound(format!(
                "no playback device for {}",
                request.attributes.usage
            )));
        }

        let acquired = self.stream_for_request(request, &devices)?;
        let client = self.pool.add_client(ClientDescriptor {
            id: ClientId::new(0),
            stream: acquired.stream,
            role: IoRole::Output,
            attributes: request.attributes.clone(),
            session: request.session,
            uid: request.uid,
            config,
            strategy,
            preferred_device: preferred,
            active: false,
        })?;
        if acquired.opened
            && let Err(err) = self.route_output(acquired.stream, devices, true)
        {
            tracing::warn!(stream = %acquired.stream, %err, "new_output_routing_failed");
            self.pool.remove_client(client);
            if let Err(close_err) = self.close_output(acquired.stream) {
                tracing::warn!(stream = %acquired.stream, err = %close_err, "output_close_failed");
            }
            return Err(err);
        }

        let out = self
            .pool
            .output(acquired.stream)
            .ok_or_else(|| PolicyError::NotFound(format!("output {}", acquired.stream)))?;
        tracing::debug!(%client, stream = %out.id, io = %out.io, %strategy, opened = acquired.opened, "output_granted");
        Ok(OutputGrant {
            stream: out.id,
            io: out.io,
            client,
            devices: out.devices.clone(),
            config: out.config,
            strategy,
        })
    }

    fn stream_for_request(&mut self, request: &OutputRequest, devices: &[DeviceId]) -> Result<Acquired> {
        let config = request.config;
        let flags = request.flags;
        let exclusive = flags.intersects(OutputFlags::HW_AV_SYNC | OutputFlags::MMAP_NOIRQ);
        let wants_direct = flags.contains(OutputFlags::DIRECT)
            || !config.format.is_linear_pcm()
            || config.sample_rate > self.config.max_mixer_sample_rate
            || config.channel_mask.channel_count() > self.config.max_mixer_channel_count;

        if wants_direct || exclusive {
            let direct = DirectRequest {
                devices,
                config,
                flags,
                session: request.session,
            };
            match self.pool.find_or_open_output(
                &mut self.platform,
                &self.registry,
                &mut self.patches,
                &direct,
                &self.config,
            ) {
                Ok(Some(acquired)) => return Ok(acquired),
                Ok(None) => tracing::debug!(%config, %flags, "no_direct_profile"),
                Err(err) if err.is_retryable() && !exclusive => {
                    tracing::debug!(%err, "direct_output_unavailable");
                }
                Err(err) => return Err(err),
            }
            if exclusive || !config.format.is_linear_pcm() {
                return Err(self.no_compatible_stream(config, devices));
            }
        }

        let keys = self.registry.keys_of(devices);
        let candidates = shared_candidates(&self.pool, &self.platform.catalog, &keys);
        let selection = SelectionRequest {
            flags,
            config,
            haptic: self.haptic_attachment(request.session),
        };
        self.selector
            .select(candidates.iter().filter_map(|id| self.pool.output(*id)), &selection)
            .map(|stream| Acquired {
                stream,
                opened: false,
            })
            .ok_or_else(|| self.no_compatible_stream(config, devices))
    }

    fn no_compatible_stream(&self, config: AudioConfig, devices: &[DeviceId]) -> PolicyError {
        let keys = self.registry.keys_of(devices);
        let hint = keys.first().and_then(|key| {
            self.platform
                .catalog
                .profiles_for_device(IoRole::Output, key)
                .find_map(|(_, p)| closest_config(p, &config))
        });
        tracing::debug!(%config, ?hint, "no_compatible_output");
        PolicyError::NoCompatibleStream {
            requested: config,
            hint,
        }
    }

    fn output_client(&self, client: ClientId) -> Result<&ClientDescriptor> {
        let desc = self
            .pool
            .client(client)
            .ok_or_else(|| PolicyError::NotFound(format!("client {client}")))?;
        if desc.role != IoRole::Output {
            return Err(PolicyError::InvalidArgument(format!(
                "{client} is a capture client"
            )));
        }
        Ok(desc)
    }

    /// Starts a playback client and moves its stream to the devices of the
    /// highest-priority strategy now playing on it.
    ///
    /// The mute plan of the switch is honored before returning.
    pub fn start_output(&mut self, client: ClientId) -> Result<()> {
        let stream = self.output_client(client)?.stream;
        let out = self
            .pool
            .output(stream)
            .ok_or_else(|| PolicyError::NotFound(format!("output {stream}")))?;
        if !out.is_active()
            && let Some(profile) = out.profile.and_then(|p| self.platform.catalog.profile(p))
            && !profile.can_start_new_io()
        {
            return Err(PolicyError::ResourceExhausted(format!(
                "profile '{}' has {} active streams",
                profile.name,
                profile.active_count()
            )));
        }
        self.pool
            .set_output_client_active(&mut self.platform, client, true)?;
        if let Err(err) = self.reroute_output_for_activity(stream) {
            tracing::warn!(%client, %stream, %err, "output_start_rolled_back");
            if let Err(stop_err) = self
                .pool
                .set_output_client_active(&mut self.platform, client, false)
            {
                tracing::warn!(%client, err = %stop_err, "output_stop_failed");
            }
            return Err(err);
        }
        tracing::debug!(%client, %stream, "output_started");
        Ok(())
    }

    /// Stops a playback client; its stream follows the strategies still
    /// playing.
    pub fn stop_output(&mut self, client: ClientId) -> Result<()> {
        let stream = self.output_client(client)?.stream;
        self.pool
            .set_output_client_active(&mut self.platform, client, false)?;
        self.reroute_output_for_activity(stream)?;
        tracing::debug!(%client, %stream, "output_stopped");
        Ok(())
    }

    /// Detaches a playback client, stopping it first. A direct stream is
    /// closed once its last grant is released.
    pub fn release_output(&mut self, client: ClientId) -> Result<()> {
        let desc = self.output_client(client)?;
        let stream = desc.stream;
        if desc.active
            && let Err(err) = self.stop_output(client)
        {
            tracing::warn!(%client, %err, "output_stop_on_release_failed");
        }
        self.pool.remove_client(client);

        let Some(out) = self.pool.output_mut(stream) else {
            return Ok(());
        };
        if out.is_direct() {
            out.direct_open_count = out.direct_open_count.saturating_sub(1);
            if out.direct_open_count == 0 {
                tracing::debug!(%stream, "direct_output_released");
                self.close_output(stream)?;
            }
        }
        Ok(())
    }

    /// Pins a client to a device until cleared with `None` or until the
    /// device detaches. An active client is rerouted at once.
    pub fn set_preferred_device(&mut self, client: ClientId, device: Option<DeviceId>) -> Result<()> {
        let desc = self
            .pool
            .client(client)
            .ok_or_else(|| PolicyError::NotFound(format!("client {client}")))?;
        let (role, stream, active) = (desc.role, desc.stream, desc.active);
        if let Some(id) = device {
            let wanted = match role {
                IoRole::Output => PortRole::Sink,
                IoRole::Input => PortRole::Source,
            };
            let target = self
                .registry
                .get(id)
                .ok_or_else(|| PolicyError::NotFound(format!("device {id}")))?;
            if target.role() != wanted {
                return Err(PolicyError::InvalidArgument(format!(
                    "{} cannot serve a {role} client",
                    target.key
                )));
            }
        }
        if let Some(desc) = self.pool.client_mut(client) {
            desc.preferred_device = device;
        }
        tracing::debug!(%client, ?device, "preferred_device_set");
        if !active {
            return Ok(());
        }
        match role {
            IoRole::Output => self.reroute_output_for_activity(stream),
            IoRole::Input => self.reroute_input(stream),
        }
    }

    /// Pins the haptic generator of `session` to `stream`: later playback
    /// requests of the session get that stream whenever it is a candidate.
    pub fn attach_haptic_generator(&mut self, session: SessionId, stream: StreamId) -> Result<()> {
        if self.pool.output(stream).is_none() {
            return Err(PolicyError::NotFound(format!("output {stream}")));
        }
        tracing::debug!(%session, %stream, "haptic_generator_attached");
        self.haptics.insert(session, stream);
        Ok(())
    }

    /// Drops the haptic generator of `session`.
    pub fn detach_haptic_generator(&mut self, session: SessionId) -> Result<()> {
        if self.haptics.remove(&session).is_none() {
            return Err(PolicyError::NotFound(format!("haptic generator of {session}")));
        }
        tracing::debug!(%session, "haptic_generator_detached");
        Ok(())
    }

    /// How haptic generators bear on a request from `session`.
    pub(crate) fn haptic_attachment(&self, session: SessionId) -> HapticAttachment {
        if let Some(stream) = self.haptics.get(&session)
            && self.pool.output(*stream).is_some()
        {
            return HapticAttachment::Pinned(*stream);
        }
        if self.haptics.values().any(|s| self.pool.output(*s).is_none()) {
            return HapticAttachment::Orphan;
        }
        HapticAttachment::None
    }
}
