//! Device hot-plug.
//!
//! A device is either unavailable or available; each transition is applied
//! completely or not at all. A failed connect undoes what it did (streams
//! opened for the device, imported capabilities, the registry entry and the
//! hardware's view of the connection) before returning the error.

use patchbay_core::{
    DeviceId, DeviceKey, DeviceType, IoRole, NewDevice, OutputFlags, PolicyError, PortRole,
    ProfileId, Result, StreamId,
};

use super::RoutingCoordinator;
use crate::engine::{DeviceAvailability, PolicyEngine};
use crate::hal::{AudioHal, DeviceConnectedState};

impl<H: AudioHal, E: PolicyEngine> RoutingCoordinator<H, E> {
    /// Connects or disconnects a device and reroutes what it affects.
    ///
    /// Returns the handle of the device that was attached or detached.
    /// Connecting an available device, or disconnecting an unavailable one,
    /// is [`PolicyError::AlreadyInState`].
    pub fn set_device_connection_state(
        &mut self,
        device_type: DeviceType,
        address: &str,
        name: &str,
        state: DeviceAvailability,
    ) -> Result<DeviceId> {
        let key = DeviceKey::new(device_type, address);
        match state {
            DeviceAvailability::Available => self.connect_device(key, name),
            DeviceAvailability::Unavailable => self.disconnect_device(&key),
        }
    }

    fn connect_device(&mut self, key: DeviceKey, name: &str) -> Result<DeviceId> {
        if self.registry.find(&key).is_some() {
            return Err(PolicyError::AlreadyInState(format!("{key} is already available")));
        }
        let device = {
            let (module, declared) = self
                .platform
                .catalog
                .find_declared_device(&key)
                .ok_or_else(|| PolicyError::InvalidArgument(format!("no module declares {key}")))?;
            NewDevice {
                key: key.clone(),
                name: if name.is_empty() {
                    declared.name.clone()
                } else {
                    name.to_string()
                },
                module,
                has_gain_control: declared.has_gain_control,
                encoded_formats: declared.encoded_formats.clone(),
            }
        };
        let id = self.registry.attach(device)?;

        if let Err(err) = self
            .platform
            .hal
            .set_device_connected_state(&key, DeviceConnectedState::Connected)
        {
            tracing::warn!(device = %key, %err, "device_connect_rejected");
            self.registry.detach(id);
            return Err(err.into());
        }

        let mut opened = Vec::new();
        let checked = match key.device_type.role() {
            PortRole::Sink => self.check_outputs_for_device(id, &key, &mut opened),
            PortRole::Source => self.check_inputs_for_device(&key),
        };
        if let Err(err) = checked {
            tracing::warn!(device = %key, %err, opened = opened.len(), "device_connect_rolled_back");
            self.rollback_connect(id, &key, opened);
            return Err(err);
        }

        if let Some(desc) = self.registry.get(id) {
            self.engine
                .set_device_connection_state(desc, DeviceAvailability::Available);
        }
        self.engine.invalidate_cache();
        self.reroute_outputs();
        self.reroute_inputs();
        self.platform.ports_changed();
        tracing::info!(device = %key, %id, "device_connected");
        Ok(id)
    }

    /// Makes sure some playback stream can reach the new device.
    ///
    /// Dynamic profiles declaring the device are filled from the hardware.
    /// Every shared profile reaching it without an open stream gets one, and
    /// a stream on a secondary module is also mirrored with the primary
    /// output. Streams opened here are pushed to `opened`.
    fn check_outputs_for_device(
        &mut self,
        id: DeviceId,
        key: &DeviceKey,
        opened: &mut Vec<StreamId>,
    ) -> Result<()> {
        let profiles: Vec<ProfileId> = self
            .platform
            .catalog
            .profiles_for_device(IoRole::Output, key)
            .map(|(profile_id, _)| profile_id)
            .collect();
        let primary_module = self.platform.catalog.primary_module();
        let mut reachable = self
            .pool
            .outputs()
            .any(|o| o.profile.is_some_and(|p| profiles.contains(&p)));

        for profile_id in profiles {
            self.import_dynamic_capabilities(profile_id, key)?;
            let Some(profile) = self.platform.catalog.profile(profile_id) else {
                continue;
            };
            let Some(config) = profile.first_config() else {
                tracing::debug!(profile = %profile.name, device = %key, "profile_has_no_usable_config");
                continue;
            };
            if profile
                .output_flags()
                .intersects(OutputFlags::EXCLUDED_FROM_SHARING)
            {
                reachable = true;
                continue;
            }
            if !self.pool.outputs_on_profile(profile_id).is_empty() || !profile.can_open_new_io() {
                continue;
            }
            let stream = self
                .pool
                .open_output(&mut self.platform, &self.registry, profile_id, &[id], config)?;
            opened.push(stream);
            reachable = true;
            if Some(profile_id.module) != primary_module
                && let Some(primary) = self.primary
            {
                let duplicate = self
                    .pool
                    .open_duplicate_output(&mut self.platform, primary, stream)?;
                opened.push(duplicate);
            }
        }

        if reachable {
            Ok(())
        } else {
            Err(PolicyError::NotFound(format!("no playback profile reaches {key}")))
        }
    }

    /// Makes sure some capture profile can record from the new device.
    fn check_inputs_for_device(&mut self, key: &DeviceKey) -> Result<()> {
        let profiles: Vec<ProfileId> = self
            .platform
            .catalog
            .profiles_for_device(IoRole::Input, key)
            .map(|(profile_id, _)| profile_id)
            .collect();
        let mut reachable = false;
        for profile_id in profiles {
            self.import_dynamic_capabilities(profile_id, key)?;
            reachable |= self
                .platform
                .catalog
                .profile(profile_id)
                .is_some_and(|p| p.first_config().is_some());
        }
        if reachable {
            Ok(())
        } else {
            Err(PolicyError::NotFound(format!("no capture profile reaches {key}")))
        }
    }

    fn import_dynamic_capabilities(&mut self, profile_id: ProfileId, key: &DeviceKey) -> Result<()> {
        let dynamic = self
            .platform
            .catalog
            .profile(profile_id)
            .is_some_and(|p| p.has_dynamic_audio_profiles());
        if !dynamic {
            return Ok(());
        }
        let reported = self
            .platform
            .hal
            .query_device_capabilities(profile_id.module, key)?;
        if let Some(profile) = self.platform.catalog.profile_mut(profile_id) {
            tracing::debug!(profile = %profile.name, device = %key, reported = reported.len(), "dynamic_capabilities_imported");
            profile.import_capabilities(reported);
        }
        Ok(())
    }

    /// Drops the capabilities `key` reported from its dynamic profiles.
    /// A profile still serving another available device keeps them.
    /// Call after `key` is detached.
    fn clear_dynamic_capabilities(&mut self, key: &DeviceKey) {
        let profiles: Vec<ProfileId> = [IoRole::Output, IoRole::Input]
            .into_iter()
            .flat_map(|role| {
                let available: Vec<&DeviceKey> = match role {
                    IoRole::Output => self.registry.outputs().map(|d| &d.key).collect(),
                    IoRole::Input => self.registry.inputs().map(|d| &d.key).collect(),
                };
                self.platform
                    .catalog
                    .profiles_for_device(role, key)
                    .filter(|(_, p)| p.has_dynamic_audio_profiles())
                    .filter(|(_, p)| !available.iter().any(|k| p.supports_device(k)))
                    .map(|(id, _)| id)
                    .collect::<Vec<_>>()
            })
            .collect();
        for profile_id in profiles {
            if let Some(profile) = self.platform.catalog.profile_mut(profile_id) {
                tracing::debug!(profile = %profile.name, device = %key, "dynamic_capabilities_cleared");
                profile.clear_dynamic();
            }
        }
    }

    fn rollback_connect(&mut self, id: DeviceId, key: &DeviceKey, opened: Vec<StreamId>) {
        for stream in opened.into_iter().rev() {
            if self.pool.output(stream).is_some()
                && let Err(err) = self.close_output(stream)
            {
                tracing::warn!(%stream, %err, "rollback_close_failed");
            }
        }
        self.registry.detach(id);
        self.clear_dynamic_capabilities(key);
        if let Err(err) = self
            .platform
            .hal
            .set_device_connected_state(key, DeviceConnectedState::Disconnected)
        {
            tracing::warn!(device = %key, %err, "rollback_disconnect_failed");
        }
    }

    fn disconnect_device(&mut self, key: &DeviceKey) -> Result<DeviceId> {
        let id = self
            .registry
            .find(key)
            .map(|d| d.id)
            .ok_or_else(|| PolicyError::AlreadyInState(format!("{key} is not available")))?;
        if let Err(err) = self
            .platform
            .hal
            .set_device_connected_state(key, DeviceConnectedState::PrepareToDisconnect)
        {
            tracing::warn!(device = %key, %err, "device_prepare_disconnect_failed");
        }
        let desc = self
            .registry
            .detach(id)
            .ok_or_else(|| PolicyError::NotFound(format!("device {id}")))?;

        match desc.role() {
            PortRole::Sink => self.close_outputs_losing(id),
            PortRole::Source => self.close_inputs_on(id),
        }
        self.clear_dynamic_capabilities(key);
        if let Err(err) = self
            .platform
            .hal
            .set_device_connected_state(key, DeviceConnectedState::Disconnected)
        {
            tracing::warn!(device = %key, %err, "device_disconnect_failed");
        }
        self.engine
            .set_device_connection_state(&desc, DeviceAvailability::Unavailable);
        self.engine.invalidate_cache();

        self.stop_sources_naming(id);
        let system = self.patches.system_uid();
        for handle in self.patches.patches_naming_device(id) {
            if let Err(err) = self
                .patches
                .release(&mut self.platform, &mut self.pool, handle, system)
            {
                tracing::warn!(patch = %handle, %err, "patch_release_on_detach_failed");
            }
        }
        let cleared = self.pool.forget_preferred_device(id);
        if !cleared.is_empty() {
            tracing::debug!(device = %key, clients = cleared.len(), "preferred_device_cleared");
        }

        self.reroute_outputs();
        self.reroute_inputs();
        self.platform.ports_changed();
        tracing::info!(device = %key, %id, "device_disconnected");
        Ok(id)
    }

    /// Closes playback streams that no available device can be reached
    /// from anymore, and duplicates mirroring the lost device. Survivors
    /// drop the device from their set.
    fn close_outputs_losing(&mut self, id: DeviceId) {
        let doomed: Vec<StreamId> = self
            .pool
            .outputs()
            .filter(|o| {
                if o.is_duplicated() {
                    return o.devices.contains(&id);
                }
                Some(o.id) != self.primary
                    && o.profile
                        .and_then(|p| self.platform.catalog.profile(p))
                        .is_some_and(|p| !self.registry.outputs().any(|d| p.supports_device(&d.key)))
            })
            .map(|o| o.id)
            .collect();
        for stream in doomed {
            if self.pool.output(stream).is_none() {
                continue;
            }
            match self.close_output(stream) {
                Ok(clients) => {
                    tracing::debug!(%stream, device = %id, clients = clients.len(), "output_closed_unreachable");
                }
                Err(err) => tracing::warn!(%stream, %err, "output_close_failed"),
            }
        }
        for stream in self.pool.outputs_routed_to(id) {
            if let Some(out) = self.pool.output_mut(stream) {
                out.devices.retain(|d| *d != id);
            }
        }
    }

    fn close_inputs_on(&mut self, id: DeviceId) {
        let doomed: Vec<StreamId> = self
            .pool
            .inputs()
            .filter(|i| i.device == id)
            .map(|i| i.id)
            .collect();
        for stream in doomed {
            if let Err(err) = self
                .pool
                .close_input(&mut self.platform, &mut self.patches, stream)
            {
                tracing::warn!(%stream, %err, "input_close_failed");
            }
        }
    }
}
