//! Client patches and audio sources.
//!
//! An audio source plays a capture device (a tuner, a line-in) to the
//! devices the engine picks for its attributes, through a device-to-device
//! patch the routing core installs on the client's behalf.

use patchbay_core::{
    AudioAttributes, DeviceId, PatchHandle, PolicyError, PortRole, Result, SourceId, Uid,
};

use super::RoutingCoordinator;
use crate::engine::{CacheMode, PolicyEngine};
use crate::hal::AudioHal;
use crate::patch::{PatchOrigin, PatchRequest, PatchSpec, PortSpec};

/// A running audio source.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSourceRecord {
    /// Source handle.
    pub id: SourceId,
    /// Capture device being played.
    pub device: DeviceId,
    /// Devices it plays to.
    pub sinks: Vec<DeviceId>,
    /// Attributes the sinks were resolved for.
    pub attributes: AudioAttributes,
    /// Uid that started it.
    pub uid: Uid,
    /// Patch carrying it.
    pub patch: PatchHandle,
}

impl<H: AudioHal, E: PolicyEngine> RoutingCoordinator<H, E> {
    /// Installs a client patch, or updates the patch `handle` names.
    pub fn create_audio_patch(
        &mut self,
        spec: PatchSpec,
        handle: Option<PatchHandle>,
        uid: Uid,
    ) -> Result<PatchHandle> {
        self.patches.install(
            &mut self.platform,
            &self.registry,
            &mut self.pool,
            PatchRequest {
                spec,
                handle,
                owner: uid,
                origin: PatchOrigin::External,
            },
        )
    }

    /// Releases a patch owned by `uid` (any patch for the system uid).
    pub fn release_audio_patch(&mut self, handle: PatchHandle, uid: Uid) -> Result<()> {
        self.patches
            .release(&mut self.platform, &mut self.pool, handle, uid)?;
        self.sources.retain(|_, s| s.patch != handle);
        Ok(())
    }

    /// Plays the capture device `device` to wherever `attributes` route.
    ///
    /// When the sinks cannot all be bridged at once the source is narrowed
    /// to the first one.
    pub fn start_audio_source(
        &mut self,
        device: DeviceId,
        attributes: &AudioAttributes,
        uid: Uid,
    ) -> Result<SourceId> {
        let source = self
            .registry
            .get(device)
            .ok_or_else(|| PolicyError::NotFound(format!("device {device}")))?;
        if source.role() != PortRole::Source {
            return Err(PolicyError::InvalidArgument(format!(
                "{} is not a capture device",
                source.key
            )));
        }
        let sinks: Vec<DeviceId> = self
            .engine
            .devices_for_attributes(attributes, None, CacheMode::Cached)
            .into_iter()
            .filter(|d| self.registry.contains(*d))
            .collect();
        if sinks.is_empty() {
            return Err(PolicyError::NotFound(format!(
                "no playback device for {}",
                attributes.usage
            )));
        }

        let (patch, sinks) = match self.install_source_patch(device, &sinks, uid) {
            Ok(patch) => (patch, sinks),
            Err(PolicyError::InvalidArgument(reason)) if sinks.len() > 1 => {
                tracing::debug!(%device, %reason, "audio_source_narrowed_to_first_sink");
                let first = sinks[..1].to_vec();
                (self.install_source_patch(device, &first, uid)?, first)
            }
            Err(err) => return Err(err),
        };

        self.next_source += 1;
        let id = SourceId::new(self.next_source);
        tracing::debug!(source = %id, %device, ?sinks, %patch, "audio_source_started");
        self.sources.insert(
            id,
            AudioSourceRecord {
                id,
                device,
                sinks,
                attributes: attributes.clone(),
                uid,
                patch,
            },
        );
        Ok(id)
    }

    fn install_source_patch(&mut self, device: DeviceId, sinks: &[DeviceId], uid: Uid) -> Result<PatchHandle> {
        let spec = PatchSpec::new(
            PortSpec::Device(device),
            sinks.iter().map(|d| PortSpec::Device(*d)).collect(),
        );
        self.patches.install(
            &mut self.platform,
            &self.registry,
            &mut self.pool,
            PatchRequest {
                spec,
                handle: None,
                owner: uid,
                origin: PatchOrigin::External,
            },
        )
    }

    /// Stops an audio source and releases its patch.
    pub fn stop_audio_source(&mut self, source: SourceId) -> Result<()> {
        let record = self
            .sources
            .remove(&source)
            .ok_or_else(|| PolicyError::NotFound(format!("audio source {source}")))?;
        let system = self.patches.system_uid();
        match self
            .patches
            .release(&mut self.platform, &mut self.pool, record.patch, system)
        {
            Ok(()) | Err(PolicyError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        tracing::debug!(%source, device = %record.device, "audio_source_stopped");
        Ok(())
    }

    /// Running audio sources.
    pub fn audio_sources(&self) -> impl Iterator<Item = &AudioSourceRecord> {
        self.sources.values()
    }

    /// Stops every audio source with `device` at either end.
    pub(super) fn stop_sources_naming(&mut self, device: DeviceId) {
        let doomed: Vec<SourceId> = self
            .sources
            .values()
            .filter(|s| s.device == device || s.sinks.contains(&device))
            .map(|s| s.id)
            .collect();
        for source in doomed {
            if let Err(err) = self.stop_audio_source(source) {
                tracing::warn!(%source, %err, "audio_source_stop_failed");
            }
        }
    }
}
