//! Best shared playback stream for a request.
//!
//! Each candidate is rated with a [`MatchCriteria`] tuple whose derived
//! ordering is lexicographic in field order; the greatest tuple wins and the
//! first candidate seen wins ties.

use patchbay_core::{
    AudioConfig, DeviceKey, FORMAT_DISTANCE_MAX, OutputFlags, ProfileCatalog, StreamId,
    format_distance,
};

use crate::stream::{OutputDescriptor, StreamPool};

/// A haptic generator effect relevant to the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HapticAttachment {
    /// No haptic generator in play.
    #[default]
    None,
    /// The requesting session's generator runs on this stream.
    Pinned(StreamId),
    /// A generator exists whose session has no stream yet.
    Orphan,
}

/// What the selector is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    /// Requested flags.
    pub flags: OutputFlags,
    /// Requested configuration.
    pub config: AudioConfig,
    /// Haptic generator attachment of the requesting session.
    pub haptic: HapticAttachment,
}

/// Rating of one candidate, highest priority first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatchCriteria {
    /// Haptic channel compatibility.
    pub haptic: i64,
    /// Requested functional flags present, fewer extras preferred.
    pub functional: i64,
    /// Multichannel mask containment.
    pub channel_mask: i64,
    /// Multichannel channel count.
    pub channel_count: i64,
    /// Closeness of the sample rate for high-rate requests.
    pub sample_rate: i64,
    /// Requested performance flags present.
    pub performance: i64,
    /// Closeness of the format.
    pub format: i64,
    /// The primary stream.
    pub primary: i64,
}

/// Picks among open mixer streams.
#[derive(Debug, Clone, Copy)]
pub struct OutputSelector {
    default_sample_rate: u32,
}

fn popcount(flags: OutputFlags) -> i64 {
    i64::from(flags.bits().count_ones())
}

impl OutputSelector {
    /// A selector treating rates above `default_sample_rate` as high-rate requests.
    pub fn new(default_sample_rate: u32) -> Self {
        Self { default_sample_rate }
    }

    /// Rates one candidate.
    pub fn criteria(&self, output: &OutputDescriptor, request: &SelectionRequest) -> MatchCriteria {
        let mut criteria = MatchCriteria::default();
        let requested = request.config;
        let offered = output.config;

        let wanted_haptics = requested.channel_mask.haptic_channel_count();
        let offered_haptics = offered.channel_mask.haptic_channel_count();
        let haptics_fit = if wanted_haptics == 0 && offered_haptics == 0 {
            true
        } else if wanted_haptics == offered_haptics {
            requested.format == offered.format && requested.sample_rate == offered.sample_rate
        } else {
            wanted_haptics == 0 && offered_haptics > 0 && request.haptic == HapticAttachment::Orphan
        };
        if haptics_fit {
            criteria.haptic = i64::from(offered_haptics) + 1;
        }

        let matching = popcount(output.flags & OutputFlags::FUNCTIONAL & request.flags);
        let total = popcount(output.flags & OutputFlags::FUNCTIONAL);
        criteria.functional = 100 * (matching + 1) - total;

        let wanted_channels = requested.channel_mask.channel_count();
        let offered_channels = offered.channel_mask.channel_count();
        if wanted_channels > 2 && wanted_channels <= offered_channels {
            if offered
                .channel_mask
                .without_haptics()
                .contains(requested.channel_mask.without_haptics())
            {
                criteria.channel_mask = i64::from(offered_channels);
            }
            criteria.channel_count = i64::from(offered_channels);
        }

        if requested.sample_rate > self.default_sample_rate {
            let diff = i64::from(offered.sample_rate) - i64::from(requested.sample_rate);
            criteria.sample_rate = if diff >= 0 {
                200_000_000 - diff
            } else {
                100_000_000 + diff
            };
        }

        criteria.performance = popcount(output.flags & OutputFlags::PERFORMANCE & request.flags);
        criteria.format =
            i64::from(FORMAT_DISTANCE_MAX) - i64::from(format_distance(requested.format, offered.format));
        criteria.primary = i64::from(output.flags.contains(OutputFlags::PRIMARY));
        criteria
    }

    /// The best candidate, or `None` when every candidate is excluded from
    /// sharing. A stream hosting the session's haptic generator wins outright.
    pub fn select<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a OutputDescriptor>,
        request: &SelectionRequest,
    ) -> Option<StreamId> {
        let mut best: Option<(StreamId, MatchCriteria)> = None;
        for output in candidates {
            if let HapticAttachment::Pinned(stream) = request.haptic
                && stream == output.id
            {
                tracing::trace!(%stream, "output_pinned_by_haptic_generator");
                return Some(stream);
            }
            if output.flags.intersects(OutputFlags::EXCLUDED_FROM_SHARING) {
                continue;
            }
            let criteria = self.criteria(output, request);
            if best.is_none_or(|(_, b)| criteria > b) {
                best = Some((output.id, criteria));
            }
        }
        if let Some((stream, criteria)) = &best {
            tracing::trace!(%stream, ?criteria, "output_selected");
        }
        best.map(|(stream, _)| stream)
    }
}

/// Open mixer streams able to reach every device of `keys`.
///
/// A duplicated stream qualifies through its twins, and only when no single
/// stream can reach all the devices. Streams hosting a software bridge are
/// never shared.
pub fn shared_candidates(pool: &StreamPool, catalog: &ProfileCatalog, keys: &[DeviceKey]) -> Vec<StreamId> {
    let reaches_all = |o: &OutputDescriptor| {
        o.profile
            .and_then(|p| catalog.profile(p))
            .is_some_and(|p| p.supports_all_devices(keys))
    };
    let singles: Vec<StreamId> = pool
        .outputs()
        .filter(|o| !o.is_duplicated() && o.bridge.is_none() && reaches_all(o))
        .map(|o| o.id)
        .collect();
    if !singles.is_empty() {
        return singles;
    }
    pool.outputs()
        .filter_map(|o| o.mirrors.map(|(a, b)| (o.id, a, b)))
        .filter(|(_, a, b)| {
            let twins: Vec<_> = [a, b]
                .iter()
                .filter_map(|t| pool.output(**t))
                .filter_map(|t| t.profile.and_then(|p| catalog.profile(p)))
                .collect();
            keys.iter().all(|k| twins.iter().any(|p| p.supports_device(k)))
        })
        .map(|(id, _, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_core::{AudioFormat, ChannelMask, IoHandle, SAMPLE_RATE_HZ_DEFAULT};

    fn output(id: u32, flags: OutputFlags, config: AudioConfig) -> OutputDescriptor {
        OutputDescriptor::new(StreamId::new(id), IoHandle::new(id), config, flags)
    }

    fn request(flags: OutputFlags, config: AudioConfig) -> SelectionRequest {
        SelectionRequest {
            flags,
            config,
            haptic: HapticAttachment::None,
        }
    }

    fn selector() -> OutputSelector {
        OutputSelector::new(SAMPLE_RATE_HZ_DEFAULT)
    }

    #[test]
    fn primary_breaks_the_final_tie() {
        let config = AudioConfig::default_output();
        let deep = output(1, OutputFlags::DEEP_BUFFER, config);
        let primary = output(2, OutputFlags::PRIMARY, config);
        let picked = selector().select([&deep, &primary], &request(OutputFlags::empty(), config));
        assert_eq!(picked, Some(StreamId::new(2)));
    }

    #[test]
    fn requested_performance_flag_beats_primary() {
        let config = AudioConfig::default_output();
        let primary = output(1, OutputFlags::PRIMARY, config);
        let deep = output(2, OutputFlags::DEEP_BUFFER, config);
        let picked = selector().select([&primary, &deep], &request(OutputFlags::DEEP_BUFFER, config));
        assert_eq!(picked, Some(StreamId::new(2)));
    }

    #[test]
    fn functional_flags_prefer_minimal_superset() {
        let config = AudioConfig::default_output();
        let voip_tts = output(1, OutputFlags::VOIP_RX | OutputFlags::TTS, config);
        let voip = output(2, OutputFlags::VOIP_RX, config);
        let plain = output(3, OutputFlags::PRIMARY, config);
        let picked = selector().select([&voip_tts, &voip, &plain], &request(OutputFlags::VOIP_RX, config));
        assert_eq!(picked, Some(StreamId::new(2)));

        let picked = selector().select([&voip, &plain], &request(OutputFlags::empty(), config));
        assert_eq!(picked, Some(StreamId::new(3)));
    }

    #[test]
    fn multichannel_request_prefers_containing_mask() {
        let stereo = output(1, OutputFlags::PRIMARY, AudioConfig::default_output());
        let surround = output(
            2,
            OutputFlags::empty(),
            AudioConfig::new(48000, AudioFormat::Pcm16Bit, ChannelMask::OUT_7POINT1),
        );
        let wanted = AudioConfig::new(48000, AudioFormat::Pcm16Bit, ChannelMask::OUT_5POINT1);
        let picked = selector().select([&stereo, &surround], &request(OutputFlags::empty(), wanted));
        assert_eq!(picked, Some(StreamId::new(2)));
    }

    #[test]
    fn high_rate_prefers_closest_rate_at_or_above() {
        let at = |id, rate| {
            output(id, OutputFlags::empty(), AudioConfig::new(rate, AudioFormat::Pcm16Bit, ChannelMask::OUT_STEREO))
        };
        let low = at(1, 88200);
        let high = at(2, 192_000);
        let close = at(3, 96000);
        let wanted = AudioConfig::new(96000, AudioFormat::Pcm16Bit, ChannelMask::OUT_STEREO);
        let s = selector();
        assert_eq!(s.select([&low, &high, &close], &request(OutputFlags::empty(), wanted)), Some(StreamId::new(3)));
        assert_eq!(s.select([&low, &high], &request(OutputFlags::empty(), wanted)), Some(StreamId::new(2)));
        assert!(s.criteria(&high, &request(OutputFlags::empty(), wanted)) > s.criteria(&low, &request(OutputFlags::empty(), wanted)));
    }

    #[test]
    fn excluded_streams_are_skipped_and_pinned_stream_wins() {
        let config = AudioConfig::default_output();
        let direct = output(1, OutputFlags::DIRECT, config);
        let primary = output(2, OutputFlags::PRIMARY, config);
        let haptic = output(
            3,
            OutputFlags::empty(),
            AudioConfig::new(48000, AudioFormat::Pcm16Bit, ChannelMask::OUT_STEREO_HAPTIC_A),
        );
        assert_eq!(
            selector().select([&direct], &request(OutputFlags::empty(), config)),
            None
        );
        let pinned = SelectionRequest {
            haptic: HapticAttachment::Pinned(StreamId::new(3)),
            ..request(OutputFlags::empty(), config)
        };
        assert_eq!(selector().select([&direct, &primary, &haptic], &pinned), Some(StreamId::new(3)));
    }

    #[test]
    fn orphan_haptic_generator_adopts_haptic_stream() {
        let config = AudioConfig::default_output();
        let primary = output(1, OutputFlags::PRIMARY, config);
        let haptic = output(
            2,
            OutputFlags::empty(),
            AudioConfig::new(48000, AudioFormat::Pcm16Bit, ChannelMask::OUT_STEREO_HAPTIC_A),
        );
        let plain = request(OutputFlags::empty(), config);
        assert_eq!(selector().select([&primary, &haptic], &plain), Some(StreamId::new(1)));
        let orphan = SelectionRequest {
            haptic: HapticAttachment::Orphan,
            ..plain
        };
        assert_eq!(selector().select([&primary, &haptic], &orphan), Some(StreamId::new(2)));
    }

    #[test]
    fn first_seen_wins_exact_ties() {
        let config = AudioConfig::default_output();
        let a = output(7, OutputFlags::empty(), config);
        let b = output(4, OutputFlags::empty(), config);
        assert_eq!(
            selector().select([&a, &b], &request(OutputFlags::empty(), config)),
            Some(StreamId::new(7))
        );
    }
}
