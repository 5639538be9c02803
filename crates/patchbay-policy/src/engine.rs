//! The device-selection policy the routing core consults.
//!
//! [`PolicyEngine`] answers "which devices should these attributes play on"
//! and "which device should this source capture from". The core tells it
//! about availability changes and invalidates its cache after every
//! routing-relevant mutation; the engine never reads core state directly.
//!
//! [`PriorityEngine`] is the default implementation: a fixed set of legacy
//! strategies, each with a device-type priority list.

use std::collections::BTreeMap;

use patchbay_core::{
    AudioAttributes, AudioSource, DeviceDescriptor, DeviceId, DeviceKey, DeviceType, StrategyId,
    Usage,
};

/// Whether a resolution may come from the engine's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Reuse the memoized resolution if there is one.
    Cached,
    /// Recompute and refresh the cache.
    Fresh,
}

/// Availability of a device, as seen by clients and the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAvailability {
    /// The device can be routed to.
    Available,
    /// The device is gone.
    Unavailable,
}

/// Device-selection policy.
pub trait PolicyEngine {
    /// Strategy the attributes belong to.
    fn strategy_for_attributes(&self, attributes: &AudioAttributes) -> StrategyId;

    /// Representative attributes of a strategy.
    fn attributes_for_strategy(&self, strategy: StrategyId) -> AudioAttributes;

    /// Every strategy, highest priority first.
    fn ordered_strategies(&self) -> Vec<StrategyId>;

    /// Playback devices for `attributes`. An available `preferred` device wins.
    fn devices_for_attributes(
        &mut self,
        attributes: &AudioAttributes,
        preferred: Option<DeviceId>,
        mode: CacheMode,
    ) -> Vec<DeviceId>;

    /// Capture device for `attributes`.
    fn device_for_capture_attributes(&self, attributes: &AudioAttributes) -> Option<DeviceId>;

    /// Records a device becoming available or unavailable.
    fn set_device_connection_state(&mut self, device: &DeviceDescriptor, state: DeviceAvailability);

    /// Drops every memoized resolution.
    fn invalidate_cache(&mut self);
}

/// Strategies of [`PriorityEngine`], in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LegacyStrategy {
    /// Calls.
    Phone,
    /// Ringtones and alarms.
    Sonification,
    /// Sounds that must be heard regardless of settings.
    EnforcedAudible,
    /// Accessibility prompts.
    Accessibility,
    /// Notifications.
    SonificationRespectful,
    /// Everything else.
    Media,
    /// Dial tones.
    Dtmf,
    /// Call assistant uplink.
    CallAssistant,
    /// Sounds forced to the loudspeaker.
    TransmittedThroughSpeaker,
    /// Capture-back through the remote submix.
    Rerouting,
    /// Audio played by patches.
    Patch,
}

impl LegacyStrategy {
    /// Every strategy, highest priority first.
    pub const ALL: [LegacyStrategy; 11] = [
        Self::Phone,
        Self::Sonification,
        Self::EnforcedAudible,
        Self::Accessibility,
        Self::SonificationRespectful,
        Self::Media,
        Self::Dtmf,
        Self::CallAssistant,
        Self::TransmittedThroughSpeaker,
        Self::Rerouting,
        Self::Patch,
    ];

    /// Strategy id, equal to the priority rank.
    pub fn id(self) -> StrategyId {
        StrategyId(self as u32)
    }

    /// Strategy for an id produced by [`Self::id`].
    pub fn from_id(id: StrategyId) -> Option<Self> {
        Self::ALL.get(id.0 as usize).copied()
    }

    /// Strategy a usage is routed with.
    pub fn for_usage(usage: Usage) -> Self {
        match usage {
            Usage::VoiceCommunication => Self::Phone,
            Usage::VoiceCommunicationSignalling => Self::Dtmf,
            Usage::Alarm | Usage::NotificationTelephonyRingtone => Self::Sonification,
            Usage::Notification => Self::SonificationRespectful,
            Usage::AssistanceAccessibility => Self::Accessibility,
            Usage::CallAssistant => Self::CallAssistant,
            Usage::Emergency => Self::EnforcedAudible,
            Usage::Unknown
            | Usage::Media
            | Usage::AssistanceNavigationGuidance
            | Usage::AssistanceSonification
            | Usage::Game
            | Usage::Assistant => Self::Media,
        }
    }

    /// A usage routed with this strategy.
    pub fn representative_usage(self) -> Usage {
        match self {
            Self::Phone => Usage::VoiceCommunication,
            Self::Sonification => Usage::Alarm,
            Self::EnforcedAudible => Usage::Emergency,
            Self::Accessibility => Usage::AssistanceAccessibility,
            Self::SonificationRespectful => Usage::Notification,
            Self::Dtmf => Usage::VoiceCommunicationSignalling,
            Self::CallAssistant => Usage::CallAssistant,
            Self::Media | Self::TransmittedThroughSpeaker | Self::Rerouting | Self::Patch => {
                Usage::Media
            }
        }
    }

    fn device_priority(self) -> &'static [DeviceType] {
        use DeviceType::*;
        const MEDIA: &[DeviceType] = &[
            OutBluetoothA2dp,
            OutBleHeadset,
            OutWiredHeadphone,
            OutWiredHeadset,
            OutUsbHeadset,
            OutUsbDevice,
            OutDgtlDockHeadset,
            OutHdmi,
            OutLineDigital,
            OutSpeaker,
        ];
        match self {
            Self::Phone => &[
                OutBluetoothSco,
                OutBleHeadset,
                OutWiredHeadset,
                OutWiredHeadphone,
                OutUsbHeadset,
                OutUsbDevice,
                OutEarpiece,
                OutSpeaker,
            ],
            Self::Sonification | Self::EnforcedAudible | Self::TransmittedThroughSpeaker => {
                &[OutSpeaker, OutSpeakerSafe]
            }
            Self::CallAssistant => &[OutTelephonyTx],
            Self::Rerouting => &[OutRemoteSubmix],
            Self::Patch => &[],
            Self::Accessibility | Self::SonificationRespectful | Self::Media | Self::Dtmf => MEDIA,
        }
    }

    /// Ringtones also play on a connected headset.
    fn also_plays_on_headset(self) -> bool {
        matches!(self, Self::Sonification | Self::EnforcedAudible)
    }
}

fn capture_priority(source: AudioSource) -> &'static [DeviceType] {
    use DeviceType::*;
    match source {
        AudioSource::VoiceCommunication => &[
            InBluetoothScoHeadset,
            InBleHeadset,
            InWiredHeadset,
            InUsbHeadset,
            InUsbDevice,
            InBuiltinMic,
            InBackMic,
        ],
        AudioSource::Camcorder => &[InBackMic, InBuiltinMic],
        AudioSource::VoiceCall => &[InTelephonyRx],
        AudioSource::RemoteSubmix => &[InRemoteSubmix],
        AudioSource::FmTuner => &[InFmTuner],
        AudioSource::EchoReference => &[InEchoReference],
        AudioSource::Default
        | AudioSource::Mic
        | AudioSource::VoiceRecognition
        | AudioSource::Unprocessed
        | AudioSource::VoicePerformance
        | AudioSource::Hotword
        | AudioSource::Ultrasound => &[
            InWiredHeadset,
            InUsbHeadset,
            InUsbDevice,
            InBluetoothScoHeadset,
            InBuiltinMic,
            InBackMic,
        ],
    }
}

/// Memoized strategy resolutions, tagged with the version they were
/// computed at. Invalidation bumps the version and empties the map.
#[derive(Debug, Clone, Default)]
struct DeviceCache {
    version: u64,
    entries: BTreeMap<StrategyId, Vec<DeviceId>>,
}

/// The default engine.
#[derive(Debug, Clone, Default)]
pub struct PriorityEngine {
    available: BTreeMap<DeviceId, DeviceKey>,
    preferred: BTreeMap<StrategyId, Vec<DeviceKey>>,
    cache: DeviceCache,
}

impl PriorityEngine {
    /// An engine that knows no devices yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins a strategy to the first available device of `devices`.
    /// An empty list removes the pin.
    pub fn set_preferred_devices_for_strategy(&mut self, strategy: StrategyId, devices: Vec<DeviceKey>) {
        if devices.is_empty() {
            self.preferred.remove(&strategy);
        } else {
            self.preferred.insert(strategy, devices);
        }
        self.invalidate_cache();
    }

    /// Version of the cache; bumped by every invalidation.
    pub fn cache_version(&self) -> u64 {
        self.cache.version
    }

    /// Number of memoized strategy resolutions.
    pub fn cached_strategies(&self) -> usize {
        self.cache.entries.len()
    }

    fn first_of_type(&self, device_type: DeviceType) -> Option<DeviceId> {
        self.available
            .iter()
            .find(|(_, key)| key.device_type == device_type)
            .map(|(id, _)| *id)
    }

    fn find_key(&self, wanted: &DeviceKey) -> Option<DeviceId> {
        self.available
            .iter()
            .find(|(_, key)| wanted.covers(key))
            .map(|(id, _)| *id)
    }

    fn is_available_output(&self, id: DeviceId) -> bool {
        self.available.get(&id).is_some_and(|k| k.device_type.is_output())
    }

    fn resolve_strategy(&self, strategy: StrategyId) -> Vec<DeviceId> {
        if let Some(pinned) = self.preferred.get(&strategy)
            && let Some(id) = pinned.iter().find_map(|key| self.find_key(key))
        {
            return vec![id];
        }
        let Some(legacy) = LegacyStrategy::from_id(strategy) else {
            return Vec::new();
        };
        let Some(first) = legacy
            .device_priority()
            .iter()
            .find_map(|t| self.first_of_type(*t))
        else {
            if legacy == LegacyStrategy::Patch {
                return Vec::new();
            }
            return self.default_output().into_iter().collect();
        };
        let mut devices = vec![first];
        if legacy.also_plays_on_headset()
            && let Some(headset) = LegacyStrategy::Media
                .device_priority()
                .iter()
                .filter(|t| !matches!(t, DeviceType::OutSpeaker | DeviceType::OutHdmi))
                .find_map(|t| self.first_of_type(*t))
        {
            devices.push(headset);
        }
        devices
    }

    fn default_output(&self) -> Option<DeviceId> {
        self.first_of_type(DeviceType::OutSpeaker).or_else(|| {
            self.available
                .iter()
                .find(|(_, key)| key.device_type.is_output())
                .map(|(id, _)| *id)
        })
    }

    fn devices_for_strategy(&mut self, strategy: StrategyId, mode: CacheMode) -> Vec<DeviceId> {
        if mode == CacheMode::Cached
            && let Some(devices) = self.cache.entries.get(&strategy)
        {
            return devices.clone();
        }
        let devices = self.resolve_strategy(strategy);
        self.cache.entries.insert(strategy, devices.clone());
        devices
    }
}

impl PolicyEngine for PriorityEngine {
    fn strategy_for_attributes(&self, attributes: &AudioAttributes) -> StrategyId {
        if attributes.tag("addr").is_some() {
            return LegacyStrategy::Rerouting.id();
        }
        LegacyStrategy::for_usage(attributes.usage).id()
    }

    fn attributes_for_strategy(&self, strategy: StrategyId) -> AudioAttributes {
        let usage = LegacyStrategy::from_id(strategy)
            .map_or(Usage::Media, LegacyStrategy::representative_usage);
        AudioAttributes::for_usage(usage)
    }

    fn ordered_strategies(&self) -> Vec<StrategyId> {
        LegacyStrategy::ALL.iter().map(|s| s.id()).collect()
    }

    fn devices_for_attributes(
        &mut self,
        attributes: &AudioAttributes,
        preferred: Option<DeviceId>,
        mode: CacheMode,
    ) -> Vec<DeviceId> {
        if let Some(id) = preferred
            && self.is_available_output(id)
        {
            return vec![id];
        }
        if let Some(address) = attributes.tag("addr") {
            let key = DeviceKey::new(DeviceType::OutRemoteSubmix, address);
            return self.find_key(&key).into_iter().collect();
        }
        let strategy = self.strategy_for_attributes(attributes);
        self.devices_for_strategy(strategy, mode)
    }

    fn device_for_capture_attributes(&self, attributes: &AudioAttributes) -> Option<DeviceId> {
        if attributes.source == AudioSource::RemoteSubmix
            && let Some(address) = attributes.tag("addr")
        {
            return self.find_key(&DeviceKey::new(DeviceType::InRemoteSubmix, address));
        }
        capture_priority(attributes.source)
            .iter()
            .find_map(|t| self.first_of_type(*t))
    }

    fn set_device_connection_state(&mut self, device: &DeviceDescriptor, state: DeviceAvailability) {
        match state {
            DeviceAvailability::Available => {
                self.available.insert(device.id, device.key.clone());
            }
            DeviceAvailability::Unavailable => {
                self.available.remove(&device.id);
            }
        }
    }

    fn invalidate_cache(&mut self) {
        self.cache.version += 1;
        self.cache.entries.clear();
        tracing::trace!(version = self.cache.version, "engine_cache_invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_core::ModuleId;

    fn descriptor(id: u32, device_type: DeviceType, address: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId::new(id),
            key: DeviceKey::new(device_type, address),
            name: device_type.name().to_string(),
            module: ModuleId::new(0),
            has_gain_control: false,
            encoded_formats: Vec::new(),
            current_encoded_format: None,
        }
    }

    fn engine_with(devices: &[DeviceDescriptor]) -> PriorityEngine {
        let mut engine = PriorityEngine::new();
        for d in devices {
            engine.set_device_connection_state(d, DeviceAvailability::Available);
        }
        engine
    }

    #[test]
    fn media_prefers_headset_over_speaker() {
        let speaker = descriptor(1, DeviceType::OutSpeaker, "");
        let headset = descriptor(2, DeviceType::OutWiredHeadset, "");
        let mut engine = engine_with(&[speaker.clone()]);
        let media = AudioAttributes::for_usage(Usage::Media);
        assert_eq!(
            engine.devices_for_attributes(&media, None, CacheMode::Fresh),
            vec![speaker.id]
        );

        engine.set_device_connection_state(&headset, DeviceAvailability::Available);
        engine.invalidate_cache();
        assert_eq!(
            engine.devices_for_attributes(&media, None, CacheMode::Cached),
            vec![headset.id]
        );
    }

    #[test]
    fn cached_resolution_survives_until_invalidated() {
        let speaker = descriptor(1, DeviceType::OutSpeaker, "");
        let headset = descriptor(2, DeviceType::OutWiredHeadset, "");
        let mut engine = engine_with(&[speaker.clone()]);
        let media = AudioAttributes::for_usage(Usage::Media);
        engine.devices_for_attributes(&media, None, CacheMode::Cached);
        assert_eq!(engine.cached_strategies(), 1);

        engine.set_device_connection_state(&headset, DeviceAvailability::Available);
        assert_eq!(
            engine.devices_for_attributes(&media, None, CacheMode::Cached),
            vec![speaker.id]
        );
        assert_eq!(
            engine.devices_for_attributes(&media, None, CacheMode::Fresh),
            vec![headset.id]
        );

        let version = engine.cache_version();
        engine.invalidate_cache();
        assert_eq!(engine.cache_version(), version + 1);
        assert_eq!(engine.cached_strategies(), 0);
    }

    #[test]
    fn ringtone_plays_on_speaker_and_headset() {
        let speaker = descriptor(1, DeviceType::OutSpeaker, "");
        let headset = descriptor(2, DeviceType::OutWiredHeadset, "");
        let mut engine = engine_with(&[speaker.clone(), headset.clone()]);
        let alarm = AudioAttributes::for_usage(Usage::Alarm);
        assert_eq!(
            engine.devices_for_attributes(&alarm, None, CacheMode::Fresh),
            vec![speaker.id, headset.id]
        );
    }

    #[test]
    fn available_preferred_device_wins() {
        let speaker = descriptor(1, DeviceType::OutSpeaker, "");
        let earpiece = descriptor(2, DeviceType::OutEarpiece, "");
        let mut engine = engine_with(&[speaker, earpiece.clone()]);
        let media = AudioAttributes::for_usage(Usage::Media);
        assert_eq!(
            engine.devices_for_attributes(&media, Some(earpiece.id), CacheMode::Cached),
            vec![earpiece.id]
        );
        assert_eq!(
            engine.devices_for_attributes(&media, Some(DeviceId::new(99)), CacheMode::Cached),
            vec![DeviceId::new(1)]
        );
    }

    #[test]
    fn strategy_pin_overrides_priority_list() {
        let speaker = descriptor(1, DeviceType::OutSpeaker, "");
        let headset = descriptor(2, DeviceType::OutWiredHeadset, "");
        let mut engine = engine_with(&[speaker.clone(), headset]);
        engine.set_preferred_devices_for_strategy(
            LegacyStrategy::Media.id(),
            vec![DeviceKey::of_type(DeviceType::OutSpeaker)],
        );
        let media = AudioAttributes::for_usage(Usage::Media);
        assert_eq!(
            engine.devices_for_attributes(&media, None, CacheMode::Cached),
            vec![speaker.id]
        );
    }

    #[test]
    fn remote_submix_address_tag_routes_to_matching_device() {
        let speaker = descriptor(1, DeviceType::OutSpeaker, "");
        let submix = descriptor(2, DeviceType::OutRemoteSubmix, "cast");
        let capture = descriptor(3, DeviceType::InRemoteSubmix, "cast");
        let mut engine = engine_with(&[speaker, submix.clone(), capture.clone()]);
        let attrs = AudioAttributes {
            tags: "addr=cast".to_string(),
            ..AudioAttributes::for_usage(Usage::Media)
        };
        assert_eq!(
            engine.devices_for_attributes(&attrs, None, CacheMode::Fresh),
            vec![submix.id]
        );
        assert_eq!(engine.strategy_for_attributes(&attrs), LegacyStrategy::Rerouting.id());

        let capture_attrs = AudioAttributes {
            tags: "addr=cast".to_string(),
            ..AudioAttributes::for_source(AudioSource::RemoteSubmix)
        };
        assert_eq!(engine.device_for_capture_attributes(&capture_attrs), Some(capture.id));
    }

    #[test]
    fn capture_follows_source_priority() {
        let mic = descriptor(1, DeviceType::InBuiltinMic, "");
        let back = descriptor(2, DeviceType::InBackMic, "");
        let headset = descriptor(3, DeviceType::InWiredHeadset, "");
        let mut engine = engine_with(&[mic.clone(), back.clone()]);
        assert_eq!(
            engine.device_for_capture_attributes(&AudioAttributes::for_source(AudioSource::Mic)),
            Some(mic.id)
        );
        assert_eq!(
            engine.device_for_capture_attributes(&AudioAttributes::for_source(AudioSource::Camcorder)),
            Some(back.id)
        );
        engine.set_device_connection_state(&headset, DeviceAvailability::Available);
        assert_eq!(
            engine.device_for_capture_attributes(&AudioAttributes::for_source(AudioSource::Mic)),
            Some(headset.id)
        );
        assert_eq!(
            engine.device_for_capture_attributes(&AudioAttributes::for_source(AudioSource::FmTuner)),
            None
        );
    }

    #[test]
    fn strategies_are_ordered_by_priority() {
        let engine = PriorityEngine::new();
        let ordered = engine.ordered_strategies();
        assert_eq!(ordered.first(), Some(&LegacyStrategy::Phone.id()));
        assert!(ordered.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            engine.attributes_for_strategy(LegacyStrategy::Sonification.id()).usage,
            Usage::Alarm
        );
    }
}
