//! Compatibility of a request with an I/O profile.
//!
//! [`score`] is a pure function of a profile and a request. Playback profiles
//! are exact-or-nothing; capture profiles degrade through partial tiers and
//! may propose a corrected configuration the capture converter can bridge.

use core::fmt;

use crate::audio::{AudioConfig, ChannelMask, ChannelRepr, formats_match};
use crate::device::DeviceKey;
use crate::flags::{InputFlags, IoFlags, OutputFlags};
use crate::profile::{AudioProfile, IoProfile};

/// How well a profile serves a request. Ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompatibilityScore {
    /// Hard rejection.
    NoMatch,
    /// Configuration needs conversion and flags differ in FAST only.
    PartialMatch,
    /// Configuration needs conversion, flags are identical.
    PartialMatchWithFlag,
    /// Configuration is declared, flags differ in FAST only.
    PartialMatchWithConfig,
    /// Configuration is declared and flags agree.
    ExactMatch,
}

impl CompatibilityScore {
    /// Whether the profile is a viable candidate at all.
    pub fn is_match(self) -> bool {
        self != Self::NoMatch
    }
}

impl fmt::Display for CompatibilityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoMatch => "no_match",
            Self::PartialMatch => "partial_match",
            Self::PartialMatchWithFlag => "partial_match_with_flag",
            Self::PartialMatchWithConfig => "partial_match_with_config",
            Self::ExactMatch => "exact_match",
        };
        f.write_str(name)
    }
}

/// What is asked of a profile.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    /// Devices the stream must reach. Empty means "any".
    pub devices: &'a [DeviceKey],
    /// Requested configuration.
    pub config: AudioConfig,
    /// Requested flags; their direction must be the profile's.
    pub flags: IoFlags,
    /// The caller targets a specific device id and will not accept a
    /// corrected configuration.
    pub exact_device_query: bool,
}

/// Result of [`score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOutcome {
    /// Match quality.
    pub score: CompatibilityScore,
    /// Configuration the profile would run instead of the requested one.
    /// Only capture profiles ever propose one.
    pub corrected: Option<AudioConfig>,
}

impl ScoreOutcome {
    const NO_MATCH: Self = Self {
        score: CompatibilityScore::NoMatch,
        corrected: None,
    };

    fn of(score: CompatibilityScore) -> Self {
        Self {
            score,
            corrected: None,
        }
    }

    /// The configuration a stream opened from the profile would run with.
    pub fn effective_config(&self, requested: AudioConfig) -> AudioConfig {
        self.corrected.unwrap_or(requested)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagMatch {
    Exact,
    Partial,
}

fn match_flags(profile: IoFlags, requested: IoFlags) -> Option<FlagMatch> {
    match (profile, requested) {
        (IoFlags::Output(p), IoFlags::Output(r)) => p
            .is_subset_compatible(r, OutputFlags::MUST_MATCH)
            .then_some(FlagMatch::Exact),
        (IoFlags::Input(p), IoFlags::Input(r)) => {
            let diff = p ^ r;
            if diff.is_empty() {
                Some(FlagMatch::Exact)
            } else if diff == InputFlags::FAST {
                Some(FlagMatch::Partial)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn is_valid_request(request: &ScoreRequest<'_>) -> bool {
    let config = &request.config;
    if !config.format.is_valid() {
        return false;
    }
    match request.flags {
        IoFlags::Output(_) => config.sample_rate != 0 && config.channel_mask.is_valid_output(),
        IoFlags::Input(_) => config.channel_mask.is_valid_input(),
    }
}

/// Scores `profile` against `request`.
pub fn score(profile: &IoProfile, request: &ScoreRequest<'_>) -> ScoreOutcome {
    if !request.devices.is_empty() && !profile.supports_all_devices(request.devices) {
        return ScoreOutcome::NO_MATCH;
    }
    let Some(flag_match) = match_flags(profile.flags, request.flags) else {
        return ScoreOutcome::NO_MATCH;
    };
    if !is_valid_request(request) {
        return ScoreOutcome::NO_MATCH;
    }

    let config = request.config;
    if profile.flags.requires_identical_config() {
        return if profile.declares(&config) {
            ScoreOutcome::of(CompatibilityScore::ExactMatch)
        } else {
            ScoreOutcome::NO_MATCH
        };
    }

    match request.flags {
        IoFlags::Output(_) => {
            if declares_equivalent(profile, &config) {
                ScoreOutcome::of(CompatibilityScore::ExactMatch)
            } else {
                ScoreOutcome::NO_MATCH
            }
        }
        IoFlags::Input(_) => {
            if profile.declares(&config) {
                return ScoreOutcome::of(match flag_match {
                    FlagMatch::Exact => CompatibilityScore::ExactMatch,
                    FlagMatch::Partial => CompatibilityScore::PartialMatchWithConfig,
                });
            }
            if request.exact_device_query {
                return ScoreOutcome::NO_MATCH;
            }
            match compatible_capture_config(profile, &config) {
                Some(corrected) => ScoreOutcome {
                    score: match flag_match {
                        FlagMatch::Exact => CompatibilityScore::PartialMatchWithFlag,
                        FlagMatch::Partial => CompatibilityScore::PartialMatch,
                    },
                    corrected: Some(corrected),
                },
                None => ScoreOutcome::NO_MATCH,
            }
        }
    }
}

/// Declared rate and mask, format identical or interchangeable.
fn declares_equivalent(profile: &IoProfile, config: &AudioConfig) -> bool {
    profile.audio_profiles.iter().any(|p| {
        formats_match(p.format, config.format)
            && p.sample_rates.contains(&config.sample_rate)
            && p.channel_masks.contains(&config.channel_mask)
    })
}

fn usable(profiles: &[AudioProfile]) -> impl Iterator<Item = &AudioProfile> {
    profiles.iter().filter(|p| !p.is_empty())
}

fn compatible_capture_config(profile: &IoProfile, requested: &AudioConfig) -> Option<AudioConfig> {
    let same_format = usable(&profile.audio_profiles).filter(|p| p.format == requested.format);
    let convertible = usable(&profile.audio_profiles).filter(|p| {
        p.format != requested.format && p.format.is_linear_pcm() && requested.format.is_linear_pcm()
    });
    same_format.chain(convertible).find_map(|p| {
        let rate = nearest_rate(&p.sample_rates, requested.sample_rate)?;
        let mask = convertible_capture_mask(&p.channel_masks, requested.channel_mask)?;
        Some(AudioConfig::new(rate, p.format, mask))
    })
}

/// Lowest declared rate at or above `requested`, else the highest one below.
fn nearest_rate(rates: &[u32], requested: u32) -> Option<u32> {
    rates
        .iter()
        .copied()
        .find(|r| *r >= requested)
        .or_else(|| rates.iter().copied().max())
}

fn convertible_capture_mask(masks: &[ChannelMask], requested: ChannelMask) -> Option<ChannelMask> {
    if masks.contains(&requested) {
        return Some(requested);
    }
    let wanted = requested.channel_count();
    masks.iter().copied().find(|m| match (requested.repr(), m.repr()) {
        (ChannelRepr::Input, ChannelRepr::Input) => {
            matches!((wanted, m.channel_count()), (1, 2) | (2, 1))
        }
        (_, ChannelRepr::Index) => m.channel_count() >= wanted,
        (ChannelRepr::Index, ChannelRepr::Input) => m.channel_count() == wanted,
        _ => false,
    })
}

/// A declared configuration close to `requested`, offered as a retry hint
/// when nothing matched.
pub fn closest_config(profile: &IoProfile, requested: &AudioConfig) -> Option<AudioConfig> {
    let audio_profile = usable(&profile.audio_profiles)
        .find(|p| p.format == requested.format)
        .or_else(|| usable(&profile.audio_profiles).find(|p| formats_match(p.format, requested.format)))
        .or_else(|| usable(&profile.audio_profiles).next())?;
    let rate = nearest_rate(&audio_profile.sample_rates, requested.sample_rate)?;
    let wanted = requested.channel_mask.channel_count();
    let mask = if audio_profile.channel_masks.contains(&requested.channel_mask) {
        requested.channel_mask
    } else {
        audio_profile
            .channel_masks
            .iter()
            .copied()
            .min_by_key(|m| m.channel_count().abs_diff(wanted))?
    };
    Some(AudioConfig::new(rate, audio_profile.format, mask))
}
