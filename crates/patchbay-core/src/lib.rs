//! Routing vocabulary and static data for the patchbay audio policy core.
//!
//! This crate holds everything the routing decisions are made *about*:
//!
//! - **Vocabulary**: [`AudioFormat`], [`ChannelMask`], [`AudioConfig`],
//!   [`OutputFlags`]/[`InputFlags`], [`DeviceType`], [`AudioAttributes`]
//! - **Handles**: integer newtypes ([`DeviceId`], [`StreamId`],
//!   [`PatchHandle`], ...) that resolve to `None` once their entity is gone
//! - **[`DeviceRegistry`]**: the devices currently available
//! - **[`ProfileCatalog`]**: hardware modules and their I/O profiles
//! - **[`score`]**: how well a profile serves a request
//! - **[`PolicyError`]**: the error taxonomy shared by every routing operation
//!
//! The stateful machinery (stream pool, patch graph, mute scheduling and the
//! coordinator) lives in `patchbay-policy`.
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::{
//!     AudioConfig, AudioFormat, AudioProfile, ChannelMask, CompatibilityScore, DeviceKey,
//!     DeviceType, IoFlags, IoProfile, OutputFlags, ScoreRequest, score,
//! };
//!
//! let speaker = DeviceKey::of_type(DeviceType::OutSpeaker);
//! let profile = IoProfile::new("primary", IoFlags::Output(OutputFlags::PRIMARY))
//!     .with_device(speaker.clone())
//!     .with_audio_profile(AudioProfile::new(
//!         AudioFormat::Pcm16Bit,
//!         vec![48000],
//!         vec![ChannelMask::OUT_STEREO],
//!     ));
//!
//! let devices = [speaker];
//! let outcome = score(
//!     &profile,
//!     &ScoreRequest {
//!         devices: &devices,
//!         config: AudioConfig::default_output(),
//!         flags: IoFlags::Output(OutputFlags::empty()),
//!         exact_device_query: false,
//!     },
//! );
//! assert_eq!(outcome.score, CompatibilityScore::ExactMatch);
//! ```

pub mod attributes;
pub mod audio;
pub mod device;
pub mod error;
pub mod flags;
pub mod handle;
pub mod profile;
pub mod registry;
pub mod score;

pub use attributes::{AudioAttributes, AudioSource, ContentType, StrategyId, Usage};
pub use audio::{
    AudioConfig, AudioFormat, ChannelMask, ChannelRepr, FORMAT_DISTANCE_MAX, SAMPLE_RATE_HZ_DEFAULT,
    SAMPLE_RATE_HZ_MAX, format_distance, formats_match,
};
pub use device::{DeviceDescriptor, DeviceKey, DeviceType, PortRole};
pub use error::{HalError, HalOp, PolicyError, Result};
pub use flags::{InputFlags, IoFlags, IoRole, OutputFlags};
pub use handle::{
    ClientId, DeviceId, HwPatchHandle, IoHandle, ModuleId, PatchHandle, ProfileId, SessionId,
    SourceId, StreamId, Uid,
};
pub use profile::{
    AudioProfile, DeclaredDevice, HalVersion, HwModule, IoProfile, ProfileCatalog, Route, RoutePort,
};
pub use registry::{DeviceRegistry, NewDevice};
pub use score::{CompatibilityScore, ScoreOutcome, ScoreRequest, closest_config, score};
