//! A built-in handset topology.
//!
//! Used by tests, benches and as a starting point for platform files. It
//! declares a primary module (speaker, earpiece, wired and Bluetooth
//! headsets, HDMI, FM tuner), a USB module with dynamic capabilities and a
//! remote submix module.

use crate::error::ConfigError;
use crate::topology::TopologyConfig;

/// TOML source of the reference topology.
pub const REFERENCE_TOPOLOGY: &str = r#"
[[modules]]
name = "primary"
version = "3.0"

[[modules.devices]]
name = "Earpiece"
type = "out_earpiece"
attached = true

[[modules.devices]]
name = "Speaker"
type = "out_speaker"
attached = true

[[modules.devices]]
name = "Telephony Tx"
type = "out_telephony_tx"
attached = true

[[modules.devices]]
name = "Wired Headset"
type = "out_wired_headset"

[[modules.devices]]
name = "Wired Headphones"
type = "out_wired_headphone"

[[modules.devices]]
name = "BT A2DP Out"
type = "out_bluetooth_a2dp"
encoded_formats = ["aac"]

[[modules.devices]]
name = "HDMI Out"
type = "out_hdmi"

[[modules.devices]]
name = "Built-In Mic"
type = "in_builtin_mic"
attached = true
gain_control = true

[[modules.devices]]
name = "Built-In Back Mic"
type = "in_back_mic"
attached = true

[[modules.devices]]
name = "Telephony Rx"
type = "in_telephony_rx"
attached = true

[[modules.devices]]
name = "Wired Headset Mic"
type = "in_wired_headset"

[[modules.devices]]
name = "FM Tuner"
type = "in_fm_tuner"
gain_control = true

[[modules.outputs]]
name = "primary output"
flags = "primary|fast"

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo"]

[[modules.outputs]]
name = "deep buffer"
flags = "deep_buffer"

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo"]

[[modules.outputs]]
name = "haptic"
flags = "fast"
devices = ["Speaker"]

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo_haptic_a"]

[[modules.outputs]]
name = "compressed offload"
flags = "direct|compress_offload|non_blocking|gapless_offload"
max_open_count = 1
max_active_count = 1

[[modules.outputs.profiles]]
format = "mp3"
rates = [44100, 48000]
masks = ["out_stereo", "out_mono"]

[[modules.outputs.profiles]]
format = "aac"
rates = [44100, 48000]
masks = ["out_stereo", "out_mono"]

[[modules.outputs]]
name = "mmap no irq out"
flags = "direct|mmap_noirq"
devices = ["Speaker", "Wired Headset", "Wired Headphones"]

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo"]

[[modules.outputs]]
name = "hdmi output"
flags = "direct"
devices = ["HDMI Out"]
profiles = [{ dynamic = true }]

[[modules.inputs]]
name = "primary input"

[[modules.inputs.profiles]]
format = "pcm_16_bit"
rates = [8000, 16000, 48000]
masks = ["in_mono", "in_stereo", "in_front_back"]

[[modules.inputs]]
name = "fast input"
flags = "fast"
devices = ["Built-In Mic", "Built-In Back Mic"]

[[modules.inputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["in_mono", "in_stereo"]

[[modules.routes]]
sink = "Earpiece"
sources = ["primary output"]

[[modules.routes]]
sink = "Speaker"
sources = ["primary output", "deep buffer", "compressed offload", "haptic", "mmap no irq out", "FM Tuner"]

[[modules.routes]]
sink = "Wired Headset"
sources = ["primary output", "deep buffer", "compressed offload", "mmap no irq out", "FM Tuner"]

[[modules.routes]]
sink = "Wired Headphones"
sources = ["primary output", "deep buffer", "compressed offload", "mmap no irq out", "FM Tuner"]

[[modules.routes]]
sink = "BT A2DP Out"
sources = ["primary output", "deep buffer"]

[[modules.routes]]
sink = "Telephony Tx"
sources = ["primary output", "Built-In Mic"]

[[modules.routes]]
sink = "HDMI Out"
sources = ["hdmi output"]

[[modules.routes]]
sink = "primary input"
sources = ["Built-In Mic", "Built-In Back Mic", "Wired Headset Mic", "Telephony Rx", "FM Tuner"]

[[modules.routes]]
sink = "fast input"
sources = ["Built-In Mic", "Built-In Back Mic"]

[[modules]]
name = "usb"
version = "2.0"

[[modules.devices]]
name = "USB Headset Out"
type = "out_usb_headset"

[[modules.devices]]
name = "USB Device Out"
type = "out_usb_device"

[[modules.devices]]
name = "USB Headset In"
type = "in_usb_headset"

[[modules.outputs]]
name = "usb output"
profiles = [{ dynamic = true }]

[[modules.inputs]]
name = "usb input"
profiles = [{ dynamic = true }]

[[modules.routes]]
sink = "USB Headset Out"
sources = ["usb output"]

[[modules.routes]]
sink = "USB Device Out"
sources = ["usb output"]

[[modules.routes]]
sink = "usb input"
sources = ["USB Headset In"]

[[modules]]
name = "r_submix"
version = "3.0"

[[modules.devices]]
name = "Remote Submix Out"
type = "out_remote_submix"
address = "0"

[[modules.devices]]
name = "Remote Submix In"
type = "in_remote_submix"
address = "0"

[[modules.outputs]]
name = "r_submix output"

[[modules.outputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["out_stereo"]

[[modules.inputs]]
name = "r_submix input"

[[modules.inputs.profiles]]
format = "pcm_16_bit"
rates = [48000]
masks = ["in_stereo"]

[[modules.routes]]
sink = "Remote Submix Out"
sources = ["r_submix output"]

[[modules.routes]]
sink = "r_submix input"
sources = ["Remote Submix In"]
"#;

/// Parses [`REFERENCE_TOPOLOGY`].
pub fn reference_topology() -> Result<TopologyConfig, ConfigError> {
    TopologyConfig::from_toml(REFERENCE_TOPOLOGY)
}
