//! Behavior flags of playback and capture streams.
//!
//! A profile declares the flags its streams run with; a request carries the
//! flags the client asked for. [`IoFlags`] ties a flag set to its direction so
//! a playback request can never be scored against a capture profile.

use core::fmt;
use core::str::FromStr;

use bitflags::bitflags;

bitflags! {
    /// Flags of a playback stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct OutputFlags: u32 {
        /// Bypasses the software mixer.
        const DIRECT = 0x1;
        /// The main output of the platform.
        const PRIMARY = 0x2;
        /// Low-latency fast-mixer path.
        const FAST = 0x4;
        /// Large buffers for power-efficient playback.
        const DEEP_BUFFER = 0x8;
        /// Compressed data decoded by the hardware.
        const COMPRESS_OFFLOAD = 0x10;
        /// Non-blocking writes.
        const NON_BLOCKING = 0x20;
        /// Hardware A/V synchronization.
        const HW_AV_SYNC = 0x40;
        /// Text-to-speech stream.
        const TTS = 0x80;
        /// Unprocessed, minimal-latency path.
        const RAW = 0x100;
        /// Synchronous writes.
        const SYNC = 0x200;
        /// Compressed passthrough over S/PDIF or HDMI.
        const IEC958_NONAUDIO = 0x400;
        /// Direct PCM with software post-processing.
        const DIRECT_PCM = 0x2000;
        /// Memory-mapped, no-interrupt low-latency path.
        const MMAP_NOIRQ = 0x4000;
        /// Voice-over-IP downlink.
        const VOIP_RX = 0x8000;
        /// Music injected into a call.
        const INCALL_MUSIC = 0x10000;
        /// Gapless compressed offload.
        const GAPLESS_OFFLOAD = 0x20000;
        /// Spatializer output.
        const SPATIALIZER = 0x40000;
        /// Ultrasound playback.
        const ULTRASOUND = 0x80000;
        /// Bit-perfect playback.
        const BIT_PERFECT = 0x100000;
    }
}

bitflags! {
    /// Flags of a capture stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct InputFlags: u32 {
        /// Low-latency fast-capture path.
        const FAST = 0x1;
        /// Hardware hotword source.
        const HW_HOTWORD = 0x2;
        /// Unprocessed capture.
        const RAW = 0x4;
        /// Synchronous reads.
        const SYNC = 0x8;
        /// Memory-mapped, no-interrupt low-latency path.
        const MMAP_NOIRQ = 0x10;
        /// Voice-over-IP uplink.
        const VOIP_TX = 0x20;
        /// Hardware A/V synchronization.
        const HW_AV_SYNC = 0x40;
        /// Direct capture of compressed data.
        const DIRECT = 0x80;
        /// Ultrasound capture.
        const ULTRASOUND = 0x100;
        /// Tap of the hotword stream.
        const HOTWORD_TAP = 0x200;
        /// Hardware lookback.
        const HW_LOOKBACK = 0x400;
    }
}

impl OutputFlags {
    /// Flags that must agree between a profile and a request for them to be compatible.
    pub const MUST_MATCH: OutputFlags = OutputFlags::DIRECT
        .union(OutputFlags::HW_AV_SYNC)
        .union(OutputFlags::MMAP_NOIRQ);

    /// Request flags that drive the choice of a direct profile.
    pub const DIRECT_RELEVANT: OutputFlags = OutputFlags::HW_AV_SYNC
        .union(OutputFlags::COMPRESS_OFFLOAD)
        .union(OutputFlags::VOIP_RX)
        .union(OutputFlags::MMAP_NOIRQ);

    /// Flags describing what a stream is for rather than how fast it is.
    pub const FUNCTIONAL: OutputFlags = OutputFlags::VOIP_RX
        .union(OutputFlags::INCALL_MUSIC)
        .union(OutputFlags::TTS)
        .union(OutputFlags::DIRECT_PCM)
        .union(OutputFlags::ULTRASOUND)
        .union(OutputFlags::SPATIALIZER);

    /// Flags describing latency and buffering behavior.
    pub const PERFORMANCE: OutputFlags = OutputFlags::FAST
        .union(OutputFlags::DEEP_BUFFER)
        .union(OutputFlags::RAW)
        .union(OutputFlags::SYNC);

    /// Streams carrying any of these are never chosen among shared candidates.
    pub const EXCLUDED_FROM_SHARING: OutputFlags = OutputFlags::HW_AV_SYNC
        .union(OutputFlags::MMAP_NOIRQ)
        .union(OutputFlags::DIRECT);

    /// Profile flags ⊇ request flags and both agree on every `must_match` bit.
    pub fn is_subset_compatible(self, requested: OutputFlags, must_match: OutputFlags) -> bool {
        ((self ^ requested) & must_match).is_empty() && self.contains(requested)
    }
}

/// Direction of an I/O profile or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IoRole {
    /// Playback: the stream feeds sink devices.
    Output,
    /// Capture: the stream is fed by a source device.
    Input,
}

impl fmt::Display for IoRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output => f.write_str("output"),
            Self::Input => f.write_str("input"),
        }
    }
}

/// A flag set tagged with its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoFlags {
    /// Playback flags.
    Output(OutputFlags),
    /// Capture flags.
    Input(InputFlags),
}

impl IoFlags {
    /// The direction these flags belong to.
    pub const fn role(self) -> IoRole {
        match self {
            Self::Output(_) => IoRole::Output,
            Self::Input(_) => IoRole::Input,
        }
    }

    /// Playback flags, or empty for capture.
    pub fn output(self) -> OutputFlags {
        match self {
            Self::Output(flags) => flags,
            Self::Input(_) => OutputFlags::empty(),
        }
    }

    /// Capture flags, or empty for playback.
    pub fn input(self) -> InputFlags {
        match self {
            Self::Input(flags) => flags,
            Self::Output(_) => InputFlags::empty(),
        }
    }

    /// Whether the profile must match declared tuples exactly.
    ///
    /// No-IRQ memory-mapped streams and bit-perfect playback cannot convert
    /// anything, so near misses are rejected.
    pub fn requires_identical_config(self) -> bool {
        match self {
            Self::Output(flags) => {
                flags.intersects(OutputFlags::MMAP_NOIRQ | OutputFlags::BIT_PERFECT)
            }
            Self::Input(flags) => flags.contains(InputFlags::MMAP_NOIRQ),
        }
    }
}

fn parse_named<F: bitflags::Flags>(s: &str, what: &str) -> Result<F, String> {
    let mut flags = F::empty();
    for name in s.split('|').map(str::trim).filter(|n| !n.is_empty()) {
        let upper = name.to_ascii_uppercase();
        let flag = F::from_name(&upper).ok_or_else(|| format!("unknown {what} flag '{name}'"))?;
        flags.insert(flag);
    }
    Ok(flags)
}

fn write_named<F: bitflags::Flags>(flags: &F, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    for (name, _) in flags.iter_names() {
        if !first {
            f.write_str("|")?;
        }
        f.write_str(&name.to_ascii_lowercase())?;
        first = false;
    }
    if first {
        f.write_str("none")?;
    }
    Ok(())
}

impl FromStr for OutputFlags {
    type Err = String;

    /// Parses `"direct|compress_offload"`; an empty string is no flags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Self::empty());
        }
        parse_named(s, "output")
    }
}

impl FromStr for InputFlags {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Self::empty());
        }
        parse_named(s, "input")
    }
}

impl fmt::Display for OutputFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_named(self, f)
    }
}

impl fmt::Display for InputFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_named(self, f)
    }
}

impl fmt::Display for IoFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output(flags) => write!(f, "output({flags})"),
            Self::Input(flags) => write!(f, "input({flags})"),
        }
    }
}
