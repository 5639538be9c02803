//! Capture streams: profile search with flag relaxation, sharing at capacity.

use patchbay_core::{
    AudioConfig, AudioSource, DeviceId, DeviceRegistry, InputFlags, IoFlags, IoRole, PolicyError,
    ProfileCatalog, ProfileId, Result, ScoreOutcome, ScoreRequest, SessionId, closest_config,
    score,
};

use super::{Acquired, StreamPool};
use crate::hal::AudioHal;
use crate::patch::PatchGraph;
use crate::platform::Platform;

/// A request for a capture stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputRequest {
    /// Capture device.
    pub device: DeviceId,
    /// Requested configuration.
    pub config: AudioConfig,
    /// Requested flags.
    pub flags: InputFlags,
    /// Requesting session.
    pub session: SessionId,
    /// Capture source.
    pub source: AudioSource,
    /// The device was named by the client rather than chosen by the engine.
    pub exact_device_query: bool,
}

/// Flags dropped when no capture profile matches the request as is.
const RELAXABLE: InputFlags = InputFlags::FAST.union(InputFlags::RAW);

fn best_input_profile(
    catalog: &ProfileCatalog,
    registry: &DeviceRegistry,
    request: &InputRequest,
    flags: InputFlags,
) -> Option<(ProfileId, ScoreOutcome)> {
    let keys = registry.keys_of(&[request.device]);
    let scored = ScoreRequest {
        devices: &keys,
        config: request.config,
        flags: IoFlags::Input(flags),
        exact_device_query: request.exact_device_query,
    };
    let mut best: Option<(ProfileId, ScoreOutcome)> = None;
    for (id, profile) in catalog.profiles(IoRole::Input) {
        let outcome = score(profile, &scored);
        if outcome.score.is_match() && best.is_none_or(|(_, b)| outcome.score > b.score) {
            best = Some((id, outcome));
        }
    }
    best
}

/// Best capture profile for a request, retried once without FAST and RAW.
pub fn input_profile(
    catalog: &ProfileCatalog,
    registry: &DeviceRegistry,
    request: &InputRequest,
) -> Option<(ProfileId, ScoreOutcome)> {
    best_input_profile(catalog, registry, request, request.flags).or_else(|| {
        let relaxed = request.flags - RELAXABLE;
        if relaxed == request.flags {
            return None;
        }
        tracing::debug!(flags = %request.flags, %relaxed, "input_flags_relaxed");
        best_input_profile(catalog, registry, request, relaxed)
    })
}

impl StreamPool {
    /// Finds or opens a capture stream.
    ///
    /// A stream already hosting the same session on the chosen profile is
    /// shared. At the profile's open limit an active stream on it is shared;
    /// otherwise idle streams on it are closed to make room.
    pub fn find_or_open_input<H: AudioHal>(
        &mut self,
        platform: &mut Platform<H>,
        registry: &DeviceRegistry,
        patches: &mut PatchGraph,
        request: &InputRequest,
    ) -> Result<Acquired> {
        let key = registry
            .get(request.device)
            .map(|d| d.key.clone())
            .ok_or_else(|| PolicyError::NotFound(format!("device {}", request.device)))?;
        let Some((profile_id, outcome)) = input_profile(&platform.catalog, registry, request)
        else {
            let hint = platform
                .catalog
                .profiles_for_device(IoRole::Input, &key)
                .find_map(|(_, p)| closest_config(p, &request.config));
            return Err(PolicyError::NoCompatibleStream {
                requested: request.config,
                hint,
            });
        };
        let config = outcome.effective_config(request.config);
        tracing::debug!(profile = %profile_id, score = %outcome.score, %config, "input_profile_chosen");

        if let Some(stream) = self.find_input_for_session(profile_id, request.session) {
            return Ok(Acquired {
                stream,
                opened: false,
            });
        }

        let at_limit = |platform: &Platform<H>| {
            platform
                .catalog
                .profile(profile_id)
                .is_some_and(|p| !p.can_open_new_io())
        };
        if at_limit(platform) {
            let on_profile = self.inputs_on_profile(profile_id);
            if let Some(stream) = on_profile
                .iter()
                .copied()
                .find(|id| self.input(*id).is_some_and(|i| i.is_active()))
            {
                tracing::debug!(%stream, "input_shared_at_limit");
                return Ok(Acquired {
                    stream,
                    opened: false,
                });
            }
            for stream in on_profile {
                self.close_input(platform, patches, stream)?;
                if !at_limit(platform) {
                    break;
                }
            }
            if at_limit(platform) {
                return Err(PolicyError::ResourceExhausted(format!(
                    "profile {profile_id} is at its open limit"
                )));
            }
        }

        let stream = self.open_input(
            platform,
            registry,
            profile_id,
            request.device,
            config,
            request.source,
        )?;
        Ok(Acquired {
            stream,
            opened: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHal;
    use patchbay_core::{
        AudioAttributes, AudioFormat, AudioProfile, ChannelMask, ClientId, DeclaredDevice,
        DeviceKey, DeviceType, HalVersion, HwModule, IoProfile, ModuleId, NewDevice, StrategyId,
        Uid,
    };

    use crate::stream::ClientDescriptor;

    fn catalog() -> ProfileCatalog {
        let mic = DeviceKey::of_type(DeviceType::InBuiltinMic);
        let mut module = HwModule::new("primary", HalVersion::new(3, 0));
        module.devices.push(DeclaredDevice::new(mic.clone(), "Mic"));
        module.inputs.push(
            IoProfile::new("primary input", IoFlags::Input(InputFlags::empty()))
                .with_device(mic.clone())
                .with_audio_profile(AudioProfile::new(
                    AudioFormat::Pcm16Bit,
                    vec![16000, 48000],
                    vec![ChannelMask::IN_MONO, ChannelMask::IN_STEREO],
                )),
        );
        let mut catalog = ProfileCatalog::new();
        catalog.add_module(module);
        catalog
    }

    fn setup() -> (Platform<MockHal>, DeviceRegistry, DeviceId) {
        let mut registry = DeviceRegistry::new(8);
        let mic = registry
            .attach(NewDevice {
                key: DeviceKey::of_type(DeviceType::InBuiltinMic),
                name: "Mic".to_string(),
                module: ModuleId::new(0),
                has_gain_control: true,
                encoded_formats: Vec::new(),
            })
            .unwrap();
        (Platform::new(MockHal::new(), catalog()), registry, mic)
    }

    fn request(mic: DeviceId, session: u32) -> InputRequest {
        InputRequest {
            device: mic,
            config: AudioConfig::new(48000, AudioFormat::Pcm16Bit, ChannelMask::IN_MONO),
            flags: InputFlags::empty(),
            session: SessionId::new(session),
            source: AudioSource::Mic,
            exact_device_query: false,
        }
    }

    fn attach(pool: &mut StreamPool, stream: patchbay_core::StreamId, session: u32) -> ClientId {
        pool.add_client(ClientDescriptor {
            id: ClientId::new(0),
            stream,
            role: IoRole::Input,
            attributes: AudioAttributes::for_source(AudioSource::Mic),
            session: SessionId::new(session),
            uid: Uid::new(10_000),
            config: AudioConfig::default_input(),
            strategy: StrategyId(0),
            preferred_device: None,
            active: false,
        })
        .unwrap()
    }

    #[test]
    fn fast_only_difference_still_matches_but_hotword_does_not() {
        let (platform, registry, mic) = setup();
        let mut req = request(mic, 1);
        req.flags = InputFlags::FAST;
        let (profile, outcome) = input_profile(platform.catalog(), &registry, &req).unwrap();
        assert_eq!(platform.catalog().profile(profile).unwrap().name, "primary input");
        assert!(outcome.score.is_match());

        req.flags = InputFlags::FAST | InputFlags::HW_HOTWORD;
        assert!(input_profile(platform.catalog(), &registry, &req).is_none());
    }

    #[test]
    fn active_input_is_shared_at_limit() {
        let (mut platform, registry, mic) = setup();
        let mut pool = StreamPool::new();
        let mut patches = PatchGraph::new(8);
        let first = pool
            .find_or_open_input(&mut platform, &registry, &mut patches, &request(mic, 1))
            .unwrap();
        assert!(first.opened);
        let client = attach(&mut pool, first.stream, 1);
        pool.set_input_client_active(&mut platform, client, true).unwrap();

        let second = pool
            .find_or_open_input(&mut platform, &registry, &mut patches, &request(mic, 2))
            .unwrap();
        assert_eq!(second.stream, first.stream);
        assert!(!second.opened);
    }

    #[test]
    fn idle_input_is_closed_at_limit() {
        let (mut platform, registry, mic) = setup();
        let mut pool = StreamPool::new();
        let mut patches = PatchGraph::new(8);
        let first = pool
            .find_or_open_input(&mut platform, &registry, &mut patches, &request(mic, 1))
            .unwrap();
        let idle = attach(&mut pool, first.stream, 1);

        let second = pool
            .find_or_open_input(&mut platform, &registry, &mut patches, &request(mic, 2))
            .unwrap();
        assert!(second.opened);
        assert_ne!(second.stream, first.stream);
        assert!(pool.client(idle).is_none());
        assert_eq!(platform.hal().invalidated(), &[idle]);
    }

    #[test]
    fn unsupported_config_reports_a_hint() {
        let (mut platform, registry, mic) = setup();
        let mut pool = StreamPool::new();
        let mut patches = PatchGraph::new(8);
        let mut req = request(mic, 1);
        req.config = AudioConfig::new(44100, AudioFormat::Mp3, ChannelMask::IN_MONO);
        match pool.find_or_open_input(&mut platform, &registry, &mut patches, &req) {
            Err(PolicyError::NoCompatibleStream { hint, .. }) => {
                assert!(hint.is_some_and(|h| h.format == AudioFormat::Pcm16Bit));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
