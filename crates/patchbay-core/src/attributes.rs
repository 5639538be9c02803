//! Client intent: what a stream is used for.

use core::fmt;
use core::str::FromStr;

/// What a playback stream is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Usage {
    /// Unspecified.
    #[default]
    Unknown,
    /// Music, movies, games.
    Media,
    /// Voice call downlink.
    VoiceCommunication,
    /// In-call signalling tones.
    VoiceCommunicationSignalling,
    /// Alarms.
    Alarm,
    /// Notifications.
    Notification,
    /// Ringtones.
    NotificationTelephonyRingtone,
    /// Accessibility prompts.
    AssistanceAccessibility,
    /// Navigation guidance.
    AssistanceNavigationGuidance,
    /// UI sounds.
    AssistanceSonification,
    /// Game audio.
    Game,
    /// Voice assistant replies.
    Assistant,
    /// Call assistant (screening) audio.
    CallAssistant,
    /// Emergency broadcasts.
    Emergency,
}

impl Usage {
    /// Canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Media => "media",
            Self::VoiceCommunication => "voice_communication",
            Self::VoiceCommunicationSignalling => "voice_communication_signalling",
            Self::Alarm => "alarm",
            Self::Notification => "notification",
            Self::NotificationTelephonyRingtone => "notification_telephony_ringtone",
            Self::AssistanceAccessibility => "assistance_accessibility",
            Self::AssistanceNavigationGuidance => "assistance_navigation_guidance",
            Self::AssistanceSonification => "assistance_sonification",
            Self::Game => "game",
            Self::Assistant => "assistant",
            Self::CallAssistant => "call_assistant",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Nature of the content of a playback stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentType {
    /// Unspecified.
    #[default]
    Unknown,
    /// Speech.
    Speech,
    /// Music.
    Music,
    /// Movie soundtrack.
    Movie,
    /// Short UI sound.
    Sonification,
    /// Ultrasound.
    Ultrasound,
}

/// What a capture stream records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum AudioSource {
    /// Platform default microphone.
    #[default]
    Default,
    /// Microphone.
    Mic,
    /// Voice call uplink and downlink.
    VoiceCall,
    /// Camcorder microphone.
    Camcorder,
    /// Speech recognition.
    VoiceRecognition,
    /// Voice-over-IP.
    VoiceCommunication,
    /// Remote submix capture.
    RemoteSubmix,
    /// Unprocessed microphone.
    Unprocessed,
    /// Live performance capture.
    VoicePerformance,
    /// Echo reference of a playback path.
    EchoReference,
    /// FM tuner.
    FmTuner,
    /// Hotword detection.
    Hotword,
    /// Ultrasound capture.
    Ultrasound,
}

impl AudioSource {
    /// Canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Mic => "mic",
            Self::VoiceCall => "voice_call",
            Self::Camcorder => "camcorder",
            Self::VoiceRecognition => "voice_recognition",
            Self::VoiceCommunication => "voice_communication",
            Self::RemoteSubmix => "remote_submix",
            Self::Unprocessed => "unprocessed",
            Self::VoicePerformance => "voice_performance",
            Self::EchoReference => "echo_reference",
            Self::FmTuner => "fm_tuner",
            Self::Hotword => "hotword",
            Self::Ultrasound => "ultrasound",
        }
    }

    /// Priority of this source when several clients share an input.
    ///
    /// The highest-priority active client decides the input's device. Sources
    /// that cannot share an input have priority 0.
    pub const fn priority(self) -> u32 {
        match self {
            Self::VoiceCommunication => 10,
            Self::Camcorder => 9,
            Self::VoicePerformance => 8,
            Self::Unprocessed => 7,
            Self::Mic => 6,
            Self::EchoReference => 5,
            Self::FmTuner => 4,
            Self::VoiceRecognition => 3,
            Self::Hotword => 2,
            Self::Ultrasound => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [AudioSource; 13] = [
            AudioSource::Default,
            AudioSource::Mic,
            AudioSource::VoiceCall,
            AudioSource::Camcorder,
            AudioSource::VoiceRecognition,
            AudioSource::VoiceCommunication,
            AudioSource::RemoteSubmix,
            AudioSource::Unprocessed,
            AudioSource::VoicePerformance,
            AudioSource::EchoReference,
            AudioSource::FmTuner,
            AudioSource::Hotword,
            AudioSource::Ultrasound,
        ];
        ALL.into_iter()
            .find(|src| src.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown audio source '{s}'"))
    }
}

/// The attributes a client opens a stream with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AudioAttributes {
    /// Playback usage.
    pub usage: Usage,
    /// Playback content type.
    pub content_type: ContentType,
    /// Capture source.
    pub source: AudioSource,
    /// Free-form `key=value;` tags (e.g. `addr=` for remote submix).
    pub tags: String,
}

impl AudioAttributes {
    /// Playback attributes for `usage`.
    pub fn for_usage(usage: Usage) -> Self {
        Self {
            usage,
            ..Self::default()
        }
    }

    /// Capture attributes for `source`.
    pub fn for_source(source: AudioSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    /// Value of a `key=value` tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| k.trim() == key)
            .map(|(_, v)| v.trim())
    }
}

/// A routing strategy: a group of usages that are routed together.
///
/// Strategies are defined by the engine; the routing core treats them as
/// opaque and only relies on their ordering (lower value = higher priority).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyId(pub u32);

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strategy#{}", self.0)
    }
}
