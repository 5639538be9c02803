//! Capture requests and the lifecycle of capture clients.

use patchbay_core::{
    AudioAttributes, AudioConfig, ClientId, DeviceId, InputFlags, IoHandle, IoRole, PolicyError,
    PortRole, Result, SessionId, StreamId, Uid,
};

use super::RoutingCoordinator;
use crate::engine::PolicyEngine;
use crate::hal::AudioHal;
use crate::patch::{PatchOrigin, PatchRequest, PatchSpec, PortSpec};
use crate::stream::{ClientDescriptor, InputRequest};

/// A client asking for a capture stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    /// What is being recorded; the source decides the device.
    pub attributes: AudioAttributes,
    /// Audio session of the client.
    pub session: SessionId,
    /// Uid of the client.
    pub uid: Uid,
    /// Requested configuration.
    pub config: AudioConfig,
    /// Requested flags.
    pub flags: InputFlags,
    /// Device the client wants to record from, if any.
    pub preferred_device: Option<DeviceId>,
}

impl CaptureRequest {
    /// A request with no flags, session 0 and uid 0.
    pub fn new(attributes: AudioAttributes, config: AudioConfig) -> Self {
        Self {
            attributes,
            session: SessionId::new(0),
            uid: Uid::new(0),
            config,
            flags: InputFlags::empty(),
            preferred_device: None,
        }
    }

    /// Builder: audio session.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    /// Builder: requested flags.
    #[must_use]
    pub fn with_flags(mut self, flags: InputFlags) -> Self {
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

/// A granted capture request.
#[derive(Debug, Clone, PartialEq)]
pub struct InputGrant {
    /// Stream the client records from.
    pub stream: StreamId,
    /// Hardware handle of the stream.
    pub io: IoHandle,
    /// The new client.
    pub client: ClientId,
    /// Capture device.
    pub device: DeviceId,
    /// Configuration of the stream.
    pub config: AudioConfig,
}

impl<H: AudioHal, E: PolicyEngine> RoutingCoordinator<H, E> {
    /// Finds or opens a capture stream for a request and attaches a client.
    pub fn get_input_for_attr(&mut self, request: &CaptureRequest) -> Result<InputGrant> {
        let config = request.config;
        if !config.format.is_valid() || config.sample_rate == 0 || !config.channel_mask.is_valid_input() {
            return Err(PolicyError::InvalidArgument(format!(
                "invalid capture configuration {config}"
            )));
        }
        let preferred = request.preferred_device.filter(|d| {
            self.registry
                .get(*d)
                .is_some_and(|desc| desc.role() == PortRole::Source)
        });
        let device = preferred
            .or_else(|| self.engine.device_for_capture_attributes(&request.attributes))
            .filter(|d| self.registry.contains(*d))
            .ok_or_else(|| {
                PolicyError::NotFound(format!(
                    "no capture device for {}",
                    request.attributes.source
                ))
            })?;

        let acquired = self.pool.find_or_open_input(
            &mut self.platform,
            &self.registry,
            &mut self.patches,
            &InputRequest {
                device,
                config,
                flags: request.flags,
                session: request.session,
                source: request.attributes.source,
                exact_device_query: preferred.is_some(),
            },
        )?;
        let client = self.pool.add_client(ClientDescriptor {
            id: ClientId::new(0),
            stream: acquired.stream,
            role: IoRole::Input,
            attributes: request.attributes.clone(),
            session: request.session,
            uid: request.uid,
            config,
            strategy: self.engine.strategy_for_attributes(&request.attributes),
            preferred_device: preferred,
            active: false,
        })?;
        if acquired.opened
            && let Err(err) = self.route_input(acquired.stream, device)
        {
            tracing::warn!(stream = %acquired.stream, %err, "new_input_routing_failed");
            self.pool.remove_client(client);
            if let Err(close_err) =
                self.pool
                    .close_input(&mut self.platform, &mut self.patches, acquired.stream)
            {
                tracing::warn!(stream = %acquired.stream, err = %close_err, "input_close_failed");
            }
            return Err(err);
        }

        let input = self
            .pool
            .input(acquired.stream)
            .ok_or_else(|| PolicyError::NotFound(format!("input {}", acquired.stream)))?;
        tracing::debug!(%client, stream = %input.id, io = %input.io, device = %input.device, opened = acquired.opened, "input_granted");
        Ok(InputGrant {
            stream: input.id,
            io: input.io,
            client,
            device: input.device,
            config: input.config,
        })
    }

    fn input_client(&self, client: ClientId) -> Result<&ClientDescriptor> {
        let desc = self
            .pool
            .client(client)
            .ok_or_else(|| PolicyError::NotFound(format!("client {client}")))?;
        if desc.role != IoRole::Input {
            return Err(PolicyError::InvalidArgument(format!(
                "{client} is a playback client"
            )));
        }
        Ok(desc)
    }

    /// Starts a capture client. The input follows the device of its
    /// highest-priority recording client.
    pub fn start_input(&mut self, client: ClientId) -> Result<()> {
        let stream = self.input_client(client)?.stream;
        let input = self
            .pool
            .input(stream)
            .ok_or_else(|| PolicyError::NotFound(format!("input {stream}")))?;
        if !input.is_active()
            && let Some(profile) = self.platform.catalog.profile(input.profile)
            && !profile.can_start_new_io()
        {
            return Err(PolicyError::ResourceExhausted(format!(
                "profile '{}' has {} active streams",
                profile.name,
                profile.active_count()
            )));
        }
        self.pool
            .set_input_client_active(&mut self.platform, client, true)?;
        if let Err(err) = self.reroute_input(stream) {
            tracing::warn!(%client, %stream, %err, "input_start_rolled_back");
            if let Err(stop_err) = self
                .pool
                .set_input_client_active(&mut self.platform, client, false)
            {
                tracing::warn!(%client, err = %stop_err, "input_stop_failed");
            }
            return Err(err);
        }
        tracing::debug!(%client, %stream, "input_started");
        Ok(())
    }

    /// Stops a capture client.
    pub fn stop_input(&mut self, client: ClientId) -> Result<()> {
        let stream = self.input_client(client)?.stream;
        self.pool
            .set_input_client_active(&mut self.platform, client, false)?;
        self.reroute_input(stream)?;
        tracing::debug!(%client, %stream, "input_stopped");
        Ok(())
    }

    /// Detaches a capture client, stopping it first. The input is closed
    /// with its last client.
    pub fn release_input(&mut self, client: ClientId) -> Result<()> {
        let desc = self.input_client(client)?;
        let stream = desc.stream;
        if desc.active
            && let Err(err) = self.stop_input(client)
        {
            tracing::warn!(%client, %err, "input_stop_on_release_failed");
        }
        self.pool.remove_client(client);
        if self.pool.input(stream).is_some_and(|i| i.clients.is_empty()) {
            self.pool
                .close_input(&mut self.platform, &mut self.patches, stream)?;
        }
        Ok(())
    }

    /// Points the capture patch of `stream` at `device`, updating the patch
    /// in place when there is one.
    fn route_input(&mut self, stream: StreamId, device: DeviceId) -> Result<()> {
        let handle = self.pool.stream_patch(stream);
        let owner = self.patches.system_uid();
        self.patches.install(
            &mut self.platform,
            &self.registry,
            &mut self.pool,
            PatchRequest {
                spec: PatchSpec::new(PortSpec::Device(device), vec![PortSpec::Stream(stream)]),
                handle,
                owner,
                origin: PatchOrigin::Internal,
            },
        )?;
        if let Some(input) = self.pool.input_mut(stream) {
            input.device = device;
        }
        tracing::debug!(%stream, %device, "input_routed");
        Ok(())
    }

    /// Moves an input to the device its highest-priority active client
    /// wants, when the input's profile can record from it.
    pub(crate) fn reroute_input(&mut self, stream: StreamId) -> Result<()> {
        let input = self
            .pool
            .input(stream)
            .ok_or_else(|| PolicyError::NotFound(format!("input {stream}")))?;
        let mut top: Option<&ClientDescriptor> = None;
        for client in input.clients.iter().filter_map(|c| self.pool.client(*c)) {
            if client.active
                && top.is_none_or(|t| client.attributes.source.priority() > t.attributes.source.priority())
            {
                top = Some(client);
            }
        }
        let Some(top) = top else {
            return Ok(());
        };
        let wanted = top
            .preferred_device
            .filter(|d| self.registry.contains(*d))
            .or_else(|| self.engine.device_for_capture_attributes(&top.attributes));
        let Some(wanted) = wanted else {
            return Ok(());
        };
        if wanted == input.device && input.patch.is_some() {
            return Ok(());
        }
        let reachable = self.registry.get(wanted).is_some_and(|d| {
            self.platform
                .catalog
                .profile(input.profile)
                .is_some_and(|p| p.supports_device(&d.key))
        });
        if !reachable {
            tracing::debug!(%stream, device = %wanted, "input_profile_cannot_reach_device");
            return Ok(());
        }
        self.route_input(stream, wanted)
    }

    pub(super) fn reroute_inputs(&mut self) {
        let streams: Vec<StreamId> = self.pool.inputs().map(|i| i.id).collect();
        for stream in streams {
            if let Err(err) = self.reroute_input(stream) {
                tracing::warn!(%stream, %err, "input_reroute_failed");
            }
        }
    }
}
