//! Device types and descriptors.

use core::fmt;
use core::str::FromStr;

use crate::audio::AudioFormat;
use crate::handle::{DeviceId, ModuleId};

/// Whether a port produces or consumes audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortRole {
    /// Produces audio: capture devices, playback streams.
    Source,
    /// Consumes audio: playback devices, capture streams.
    Sink,
}

macro_rules! device_types {
    ($( $variant:ident => $name:literal, $role:ident, $doc:literal; )*) => {
        /// Kind of physical (or virtual) endpoint.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum DeviceType {
            $(
                #[doc = $doc]
                $variant,
            )*
        }

        impl DeviceType {
            /// Every device type, playback types first.
            pub const ALL: &'static [DeviceType] = &[$(DeviceType::$variant,)*];

            /// Canonical lowercase name.
            pub const fn name(self) -> &'static str {
                match self {
                    $(DeviceType::$variant => $name,)*
                }
            }

            /// Whether this device consumes (playback) or produces (capture) audio.
            pub const fn role(self) -> PortRole {
                match self {
                    $(DeviceType::$variant => PortRole::$role,)*
                }
            }
        }
    };
}

device_types! {
    OutEarpiece => "out_earpiece", Sink, "Handset earpiece.";
    OutSpeaker => "out_speaker", Sink, "Built-in loudspeaker.";
    OutSpeakerSafe => "out_speaker_safe", Sink, "Loudspeaker path that ignores call state.";
    OutWiredHeadset => "out_wired_headset", Sink, "Wired headset with microphone.";
    OutWiredHeadphone => "out_wired_headphone", Sink, "Wired headphones.";
    OutBluetoothSco => "out_bluetooth_sco", Sink, "Bluetooth SCO (voice) link.";
    OutBluetoothA2dp => "out_bluetooth_a2dp", Sink, "Bluetooth A2DP (media) link.";
    OutBleHeadset => "out_ble_headset", Sink, "Bluetooth LE audio headset.";
    OutHdmi => "out_hdmi", Sink, "HDMI output.";
    OutHdmiArc => "out_hdmi_arc", Sink, "HDMI audio return channel.";
    OutUsbDevice => "out_usb_device", Sink, "USB audio device.";
    OutUsbHeadset => "out_usb_headset", Sink, "USB headset.";
    OutLineDigital => "out_line_digital", Sink, "S/PDIF or other digital line out.";
    OutDgtlDockHeadset => "out_dgtl_dock_headset", Sink, "Digital dock.";
    OutTelephonyTx => "out_telephony_tx", Sink, "Telephony uplink.";
    OutRemoteSubmix => "out_remote_submix", Sink, "Virtual capture-back sink.";
    OutBus => "out_bus", Sink, "Automotive bus, distinguished by address.";
    OutFm => "out_fm", Sink, "FM transmitter.";
    InBuiltinMic => "in_builtin_mic", Source, "Built-in microphone.";
    InBackMic => "in_back_mic", Source, "Rear microphone.";
    InWiredHeadset => "in_wired_headset", Source, "Wired headset microphone.";
    InBluetoothScoHeadset => "in_bluetooth_sco_headset", Source, "Bluetooth SCO microphone.";
    InBleHeadset => "in_ble_headset", Source, "Bluetooth LE audio microphone.";
    InUsbDevice => "in_usb_device", Source, "USB audio capture device.";
    InUsbHeadset => "in_usb_headset", Source, "USB headset microphone.";
    InHdmi => "in_hdmi", Source, "HDMI input.";
    InLine => "in_line", Source, "Analog line input.";
    InFmTuner => "in_fm_tuner", Source, "FM tuner.";
    InTvTuner => "in_tv_tuner", Source, "TV tuner.";
    InTelephonyRx => "in_telephony_rx", Source, "Telephony downlink.";
    InRemoteSubmix => "in_remote_submix", Source, "Virtual capture of a remote submix sink.";
    InBus => "in_bus", Source, "Automotive bus, distinguished by address.";
    InEchoReference => "in_echo_reference", Source, "Echo reference of a playback path.";
}

impl DeviceType {
    /// Devices of this type are told apart by address; others match any address.
    pub const fn distinguishes_on_address(self) -> bool {
        matches!(
            self,
            Self::OutRemoteSubmix | Self::OutBus | Self::InRemoteSubmix | Self::InBus | Self::InEchoReference
        )
    }

    /// Devices that can carry encoded streams negotiated at connection time.
    pub const fn has_encoding_capability(self) -> bool {
        matches!(self, Self::OutBluetoothA2dp | Self::OutBleHeadset)
    }

    /// Playback device.
    pub const fn is_output(self) -> bool {
        matches!(self.role(), PortRole::Sink)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown device type '{s}'"))
    }
}

/// The identity of a device: its type and address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    /// Device type.
    pub device_type: DeviceType,
    /// Address; empty when the type has a single instance.
    pub address: String,
}

impl DeviceKey {
    /// Creates a key.
    pub fn new(device_type: DeviceType, address: impl Into<String>) -> Self {
        Self {
            device_type,
            address: address.into(),
        }
    }

    /// Key with an empty address.
    pub fn of_type(device_type: DeviceType) -> Self {
        Self::new(device_type, "")
    }

    /// Whether a declaration (`self`) covers a concrete device key.
    ///
    /// Address-distinguished types need an exact address; an empty declared
    /// address covers any address of other types.
    pub fn covers(&self, other: &DeviceKey) -> bool {
        if self.device_type != other.device_type {
            return false;
        }
        if self.device_type.distinguishes_on_address() || !self.address.is_empty() {
            return self.address == other.address;
        }
        true
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.is_empty() {
            write!(f, "{}", self.device_type)
        } else {
            write!(f, "{}@{}", self.device_type, self.address)
        }
    }
}

/// An available device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Registry handle, assigned on attach.
    pub id: DeviceId,
    /// Type and address.
    pub key: DeviceKey,
    /// Human readable name reported by the connecting client.
    pub name: String,
    /// Module that owns the device.
    pub module: ModuleId,
    /// Whether the device exposes a gain controller.
    pub has_gain_control: bool,
    /// Encoded formats the device can carry.
    pub encoded_formats: Vec<AudioFormat>,
    /// Encoded format negotiated for the current connection, if any.
    pub current_encoded_format: Option<AudioFormat>,
}

impl DeviceDescriptor {
    /// The device type.
    pub fn device_type(&self) -> DeviceType {
        self.key.device_type
    }

    /// The device address.
    pub fn address(&self) -> &str {
        &self.key.address
    }

    /// Source for capture devices, sink for playback devices.
    pub fn role(&self) -> PortRole {
        self.key.device_type.role()
    }

    /// Whether the device can carry `format` (PCM always, encoded formats when declared).
    pub fn supports_format(&self, format: AudioFormat) -> bool {
        format.is_linear_pcm() || self.encoded_formats.contains(&format)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.id)
    }
}
