//! Direct playback streams: profile choice, reuse, eviction and fallback.

use patchbay_config::PolicyConfig;
use patchbay_core::{
    AudioConfig, DeviceId, DeviceRegistry, IoFlags, IoRole, OutputFlags, PolicyError,
    ProfileCatalog, ProfileId, Result, ScoreOutcome, ScoreRequest, SessionId, score,
};

use super::{Acquired, StreamPool};
use crate::hal::AudioHal;
use crate::patch::PatchGraph;
use crate::platform::Platform;

/// A request for a direct playback stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectRequest<'a> {
    /// Devices the stream must reach.
    pub devices: &'a [DeviceId],
    /// Requested configuration.
    pub config: AudioConfig,
    /// Requested flags.
    pub flags: OutputFlags,
    /// Requesting session.
    pub session: SessionId,
}

/// Preference among equally scored direct profiles: a profile whose flags
/// are exactly the request's, then an offload profile, then anything.
fn direct_tier(profile_flags: OutputFlags, requested: OutputFlags) -> u8 {
    if profile_flags == requested && requested != OutputFlags::DIRECT {
        2
    } else if profile_flags.contains(OutputFlags::COMPRESS_OFFLOAD) {
        1
    } else {
        0
    }
}

/// Best direct profile for `devices`, `config` and `flags`.
///
/// Only the direct-relevant request flags take part, plus DIRECT. Profiles
/// that reach no available device, or whose encoded-format devices cannot
/// carry the format, are skipped. Ties go to the first profile declared.
pub fn direct_profile(
    catalog: &ProfileCatalog,
    registry: &DeviceRegistry,
    devices: &[DeviceId],
    config: &AudioConfig,
    flags: OutputFlags,
) -> Option<(ProfileId, ScoreOutcome)> {
    let relevant = (flags & OutputFlags::DIRECT_RELEVANT) | OutputFlags::DIRECT;
    let keys = registry.keys_of(devices);
    let request = ScoreRequest {
        devices: &keys,
        config: *config,
        flags: IoFlags::Output(relevant),
        exact_device_query: false,
    };
    let carries_format = devices
        .iter()
        .filter_map(|d| registry.get(*d))
        .all(|d| !d.device_type().has_encoding_capability() || d.supports_format(config.format));
    if !carries_format {
        return None;
    }

    let mut best: Option<(ProfileId, ScoreOutcome, u8)> = None;
    for (id, profile) in catalog.profiles(IoRole::Output) {
        if !profile.output_flags().contains(OutputFlags::DIRECT) {
            continue;
        }
        if !registry.outputs().any(|d| profile.supports_device(&d.key)) {
            continue;
        }
        let outcome = score(profile, &request);
        if !outcome.score.is_match() {
            continue;
        }
        let tier = direct_tier(profile.output_flags(), relevant);
        tracing::trace!(profile = %profile.name, score = %outcome.score, tier, "direct_candidate");
        if best
            .as_ref()
            .is_none_or(|(_, b, t)| (outcome.score, tier) > (b.score, *t))
        {
            best = Some((id, outcome, tier));
        }
    }
    best.map(|(id, outcome, _)| (id, outcome))
}

impl StreamPool {
    /// Finds or opens a direct playback stream.
    ///
    /// Returns `Ok(None)` when no direct profile fits, so the caller can try
    /// the mixer. A hardware open failure for linear PCM at or below
    /// [`PolicyConfig::max_mixer_sample_rate`] is reported as
    /// [`PolicyError::Unavailable`], the signal to fall back to a shared stream.
    pub fn find_or_open_output<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        registry: &DeviceRegistry,
        patches: &mut PatchGraph,
        request: &DirectRequest<'_>,
        policy: &PolicyConfig,
    ) -> Result<Option<Acquired>> {
        let Some((profile_id, outcome)) = direct_profile(
            &platform.catalog,
            registry,
            request.devices,
            &request.config,
            request.flags,
        ) else {
            return Ok(None);
        };
        let config = outcome.effective_config(request.config);

        if let Some(stream) = self.find_direct_reuse(profile_id, &config, request.session)
            && let Some(out) = self.output_mut(stream)
        {
            out.direct_open_count += 1;
            tracing::debug!(%stream, count = out.direct_open_count, "direct_output_reused");
            return Ok(Some(Acquired {
                stream,
                opened: false,
            }));
        }

        self.make_room_for_output(platform, patches, profile_id)?;

        match self.open_output(platform, registry, profile_id, request.devices, config) {
            Ok(stream) => {
                if let Some(out) = self.output_mut(stream) {
                    out.direct_open_count = 1;
                    out.direct_session = Some(request.session);
                }
                Ok(Some(Acquired {
                    stream,
                    opened: true,
                }))
            }
            Err(PolicyError::Hal(err))
                if config.format.is_linear_pcm()
                    && config.sample_rate <= policy.max_mixer_sample_rate =>
            {
                tracing::warn!(%err, %config, "direct_open_failed_falling_back");
                Err(PolicyError::Unavailable(format!(
                    "direct stream for {config} could not be opened"
                )))
            }
            Err(err) => Err(err),
        }
    }

    /// Closes streams on `profile_id` until one more may be opened.
    /// No-IRQ profiles never give up their streams.
    fn make_room_for_output<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        patches: &mut PatchGraph,
        profile_id: ProfileId,
    ) -> Result<()> {
        let can_open = |platform: &Platform<H>| {
            platform
                .catalog
                .profile(profile_id)
                .is_some_and(|p| p.can_open_new_io())
        };
        if can_open(platform) {
            return Ok(());
        }
        let mmap = platform
            .catalog
            .profile(profile_id)
            .is_some_and(|p| p.output_flags().contains(OutputFlags::MMAP_NOIRQ));
        if !mmap {
            for stream in self.outputs_on_profile(profile_id) {
                tracing::debug!(%stream, profile = %profile_id, "evicting_output");
                self.close_output(platform, patches, stream)?;
                if can_open(platform) {
                    return Ok(());
                }
            }
        }
        Err(PolicyError::ResourceExhausted(format!(
            "profile {profile_id} is at its open limit"
        )))
    }
}
