//! Sample formats, channel masks and stream configurations.
//!
//! These are the three axes a request is matched on: sample rate, format and
//! channel mask. Profiles declare sets of them; streams run with exactly one
//! [`AudioConfig`].

use core::fmt;
use core::str::FromStr;

/// Sample rate used when a client does not ask for a specific one.
pub const SAMPLE_RATE_HZ_DEFAULT: u32 = 48000;

/// Highest sample rate a shared mixer stream can run at.
pub const SAMPLE_RATE_HZ_MAX: u32 = 192_000;

/// Upper bound of [`format_distance`].
pub const FORMAT_DISTANCE_MAX: u32 = 4;

/// Encoding of the samples carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AudioFormat {
    /// Placeholder for "not specified" or "queried at runtime". Never valid in a request.
    Default,
    /// Unsigned 8-bit linear PCM.
    Pcm8Bit,
    /// Signed 16-bit linear PCM.
    Pcm16Bit,
    /// Signed 24-bit linear PCM packed in 3 bytes.
    Pcm24BitPacked,
    /// Signed 24-bit linear PCM in a 32-bit container.
    Pcm8In24Bit,
    /// Signed 32-bit linear PCM.
    Pcm32Bit,
    /// 32-bit float linear PCM.
    PcmFloat,
    /// MPEG-1 layer III.
    Mp3,
    /// Advanced Audio Coding.
    Aac,
    /// Dolby Digital.
    Ac3,
    /// Dolby Digital Plus.
    Eac3,
    /// DTS coherent acoustics.
    Dts,
    /// Opus.
    Opus,
    /// IEC 61937 compressed passthrough.
    Iec61937,
}

impl AudioFormat {
    /// All formats, in declaration order.
    pub const ALL: [AudioFormat; 14] = [
        Self::Default,
        Self::Pcm8Bit,
        Self::Pcm16Bit,
        Self::Pcm24BitPacked,
        Self::Pcm8In24Bit,
        Self::Pcm32Bit,
        Self::PcmFloat,
        Self::Mp3,
        Self::Aac,
        Self::Ac3,
        Self::Eac3,
        Self::Dts,
        Self::Opus,
        Self::Iec61937,
    ];

    /// Returns `true` for every concrete format.
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Default)
    }

    /// Returns `true` for uncompressed PCM encodings.
    pub const fn is_linear_pcm(self) -> bool {
        matches!(
            self,
            Self::Pcm8Bit
                | Self::Pcm16Bit
                | Self::Pcm24BitPacked
                | Self::Pcm8In24Bit
                | Self::Pcm32Bit
                | Self::PcmFloat
        )
    }

    /// Bytes per sample for PCM formats, 0 for compressed ones.
    pub const fn bytes_per_sample(self) -> u32 {
        match self {
            Self::Pcm8Bit => 1,
            Self::Pcm16Bit => 2,
            Self::Pcm24BitPacked => 3,
            Self::Pcm8In24Bit | Self::Pcm32Bit | Self::PcmFloat => 4,
            _ => 0,
        }
    }

    /// Canonical lowercase name, as used in topology files.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Pcm8Bit => "pcm_8_bit",
            Self::Pcm16Bit => "pcm_16_bit",
            Self::Pcm24BitPacked => "pcm_24_bit_packed",
            Self::Pcm8In24Bit => "pcm_8_24_bit",
            Self::Pcm32Bit => "pcm_32_bit",
            Self::PcmFloat => "pcm_float",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Ac3 => "ac3",
            Self::Eac3 => "e_ac3",
            Self::Dts => "dts",
            Self::Opus => "opus",
            Self::Iec61937 => "iec61937",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown audio format '{s}'"))
    }
}

/// Whether a declared format can serve a requested one.
///
/// PCM encodings wider than 16 bits are interchangeable (the mixer converts
/// between them losslessly enough); everything else must be identical.
pub fn formats_match(a: AudioFormat, b: AudioFormat) -> bool {
    if a.is_linear_pcm() && a.bytes_per_sample() > 2 && b.is_linear_pcm() && b.bytes_per_sample() > 2
    {
        return true;
    }
    a == b
}

/// Closeness of two formats: 0 when identical, [`FORMAT_DISTANCE_MAX`] when
/// either is invalid, otherwise the difference in PCM sample width.
pub fn format_distance(a: AudioFormat, b: AudioFormat) -> u32 {
    if a == b {
        return 0;
    }
    if !a.is_valid() || !b.is_valid() {
        return FORMAT_DISTANCE_MAX;
    }
    a.bytes_per_sample().abs_diff(b.bytes_per_sample())
}

/// How the bits of a [`ChannelMask`] are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelRepr {
    /// Positional playback channels (front left, front right, ...), plus haptic channels.
    Output,
    /// Positional capture channels.
    Input,
    /// Unnamed channels identified only by index.
    Index,
}

/// A set of audio channels in one of three representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelMask {
    repr: ChannelRepr,
    bits: u32,
}

impl ChannelMask {
    /// Front left playback channel.
    pub const OUT_FRONT_LEFT: u32 = 0x1;
    /// Front right playback channel.
    pub const OUT_FRONT_RIGHT: u32 = 0x2;
    /// Front center playback channel.
    pub const OUT_FRONT_CENTER: u32 = 0x4;
    /// Low-frequency effects channel.
    pub const OUT_LOW_FREQUENCY: u32 = 0x8;
    /// Back left playback channel.
    pub const OUT_BACK_LEFT: u32 = 0x10;
    /// Back right playback channel.
    pub const OUT_BACK_RIGHT: u32 = 0x20;
    /// Side left playback channel.
    pub const OUT_SIDE_LEFT: u32 = 0x200;
    /// Side right playback channel.
    pub const OUT_SIDE_RIGHT: u32 = 0x400;
    /// Every positional playback bit.
    pub const OUT_ALL_POSITIONAL: u32 = 0x03FF_FFFF;
    /// First haptic channel.
    pub const HAPTIC_A: u32 = 0x2000_0000;
    /// Second haptic channel.
    pub const HAPTIC_B: u32 = 0x1000_0000;
    /// Every haptic bit.
    pub const HAPTIC_ALL: u32 = Self::HAPTIC_A | Self::HAPTIC_B;

    /// Left capture channel.
    pub const IN_LEFT: u32 = 0x4;
    /// Right capture channel.
    pub const IN_RIGHT: u32 = 0x8;
    /// Front capture channel.
    pub const IN_FRONT: u32 = 0x10;
    /// Back capture channel.
    pub const IN_BACK: u32 = 0x20;
    /// Every positional capture bit.
    pub const IN_ALL: u32 = 0x00FF_FFFC;

    /// Single playback channel.
    pub const OUT_MONO: ChannelMask = ChannelMask::output(Self::OUT_FRONT_LEFT);
    /// Two playback channels.
    pub const OUT_STEREO: ChannelMask =
        ChannelMask::output(Self::OUT_FRONT_LEFT | Self::OUT_FRONT_RIGHT);
    /// Four playback channels.
    pub const OUT_QUAD: ChannelMask = ChannelMask::output(
        Self::OUT_FRONT_LEFT | Self::OUT_FRONT_RIGHT | Self::OUT_BACK_LEFT | Self::OUT_BACK_RIGHT,
    );
    /// 5.1 surround.
    pub const OUT_5POINT1: ChannelMask = ChannelMask::output(
        Self::OUT_FRONT_LEFT
            | Self::OUT_FRONT_RIGHT
            | Self::OUT_FRONT_CENTER
            | Self::OUT_LOW_FREQUENCY
            | Self::OUT_BACK_LEFT
            | Self::OUT_BACK_RIGHT,
    );
    /// 7.1 surround.
    pub const OUT_7POINT1: ChannelMask = ChannelMask::output(
        Self::OUT_5POINT1.bits | Self::OUT_SIDE_LEFT | Self::OUT_SIDE_RIGHT,
    );
    /// Stereo plus one haptic channel.
    pub const OUT_STEREO_HAPTIC_A: ChannelMask =
        ChannelMask::output(Self::OUT_STEREO.bits | Self::HAPTIC_A);
    /// Stereo plus two haptic channels.
    pub const OUT_STEREO_HAPTIC_AB: ChannelMask =
        ChannelMask::output(Self::OUT_STEREO.bits | Self::HAPTIC_ALL);

    /// Single capture channel.
    pub const IN_MONO: ChannelMask = ChannelMask::input(Self::IN_FRONT);
    /// Two capture channels.
    pub const IN_STEREO: ChannelMask = ChannelMask::input(Self::IN_LEFT | Self::IN_RIGHT);
    /// Front and back microphones.
    pub const IN_FRONT_BACK: ChannelMask = ChannelMask::input(Self::IN_FRONT | Self::IN_BACK);

    /// Builds a positional playback mask.
    pub const fn output(bits: u32) -> Self {
        Self {
            repr: ChannelRepr::Output,
            bits,
        }
    }

    /// Builds a positional capture mask.
    pub const fn input(bits: u32) -> Self {
        Self {
            repr: ChannelRepr::Input,
            bits,
        }
    }

    /// Builds an index mask with `count` channels.
    pub const fn index(count: u32) -> Self {
        let bits = if count >= 32 {
            u32::MAX
        } else {
            (1u32 << count) - 1
        };
        Self {
            repr: ChannelRepr::Index,
            bits,
        }
    }

    /// The representation.
    pub const fn repr(self) -> ChannelRepr {
        self.repr
    }

    /// The raw bits.
    pub const fn bits(self) -> u32 {
        self.bits
    }

    /// Usable as the mask of a playback stream.
    pub const fn is_valid_output(self) -> bool {
        match self.repr {
            ChannelRepr::Output => {
                let audio = self.bits & !Self::HAPTIC_ALL;
                audio != 0 && audio & !Self::OUT_ALL_POSITIONAL == 0
            }
            ChannelRepr::Index => self.bits != 0,
            ChannelRepr::Input => false,
        }
    }

    /// Usable as the mask of a capture stream.
    pub const fn is_valid_input(self) -> bool {
        match self.repr {
            ChannelRepr::Input => self.bits != 0 && self.bits & !Self::IN_ALL == 0,
            ChannelRepr::Index => self.bits != 0,
            ChannelRepr::Output => false,
        }
    }

    /// Number of audio channels, haptic channels excluded.
    pub const fn channel_count(self) -> u32 {
        match self.repr {
            ChannelRepr::Output => (self.bits & !Self::HAPTIC_ALL).count_ones(),
            _ => self.bits.count_ones(),
        }
    }

    /// Number of haptic channels (playback masks only).
    pub const fn haptic_channel_count(self) -> u32 {
        match self.repr {
            ChannelRepr::Output => (self.bits & Self::HAPTIC_ALL).count_ones(),
            _ => 0,
        }
    }

    /// The same mask with haptic channels stripped.
    pub const fn without_haptics(self) -> Self {
        match self.repr {
            ChannelRepr::Output => Self::output(self.bits & !Self::HAPTIC_ALL),
            _ => self,
        }
    }

    /// Same representation and every channel of `other` is present in `self`.
    pub const fn contains(self, other: ChannelMask) -> bool {
        self.repr as u8 == other.repr as u8 && self.bits & other.bits == other.bits
    }

    const NAMED: [(&'static str, ChannelMask); 10] = [
        ("out_mono", Self::OUT_MONO),
        ("out_stereo", Self::OUT_STEREO),
        ("out_quad", Self::OUT_QUAD),
        ("out_5point1", Self::OUT_5POINT1),
        ("out_7point1", Self::OUT_7POINT1),
        ("out_stereo_haptic_a", Self::OUT_STEREO_HAPTIC_A),
        ("out_stereo_haptic_ab", Self::OUT_STEREO_HAPTIC_AB),
        ("in_mono", Self::IN_MONO),
        ("in_stereo", Self::IN_STEREO),
        ("in_front_back", Self::IN_FRONT_BACK),
    ];
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((name, _)) = Self::NAMED.iter().find(|(_, m)| m == self) {
            return f.write_str(name);
        }
        match self.repr {
            ChannelRepr::Index => write!(f, "index_{}", self.bits.count_ones()),
            ChannelRepr::Output => write!(f, "out_0x{:x}", self.bits),
            ChannelRepr::Input => write!(f, "in_0x{:x}", self.bits),
        }
    }
}

impl FromStr for ChannelMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if let Some((_, mask)) = Self::NAMED.iter().find(|(name, _)| *name == lower) {
            return Ok(*mask);
        }
        if let Some(count) = lower.strip_prefix("index_") {
            return match count.parse::<u32>() {
                Ok(n) if (1..=24).contains(&n) => Ok(Self::index(n)),
                _ => Err(format!("invalid index channel mask '{s}'")),
            };
        }
        let parse_hex = |digits: &str| u32::from_str_radix(digits, 16).ok();
        if let Some(bits) = lower.strip_prefix("out_0x").and_then(parse_hex) {
            return Ok(Self::output(bits));
        }
        if let Some(bits) = lower.strip_prefix("in_0x").and_then(parse_hex) {
            return Ok(Self::input(bits));
        }
        Err(format!("unknown channel mask '{s}'"))
    }
}

/// The (rate, format, mask) triple a stream runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioConfig {
    /// Frames per second.
    pub sample_rate: u32,
    /// Sample encoding.
    pub format: AudioFormat,
    /// Channel layout.
    pub channel_mask: ChannelMask,
}

impl AudioConfig {
    /// Creates a configuration.
    pub const fn new(sample_rate: u32, format: AudioFormat, channel_mask: ChannelMask) -> Self {
        Self {
            sample_rate,
            format,
            channel_mask,
        }
    }

    /// 48 kHz, 16-bit, stereo playback.
    pub const fn default_output() -> Self {
        Self::new(
            SAMPLE_RATE_HZ_DEFAULT,
            AudioFormat::Pcm16Bit,
            ChannelMask::OUT_STEREO,
        )
    }

    /// 48 kHz, 16-bit, mono capture.
    pub const fn default_input() -> Self {
        Self::new(
            SAMPLE_RATE_HZ_DEFAULT,
            AudioFormat::Pcm16Bit,
            ChannelMask::IN_MONO,
        )
    }
}

impl fmt::Display for AudioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz/{}/{}",
            self.sample_rate, self.format, self.channel_mask
        )
    }
}
