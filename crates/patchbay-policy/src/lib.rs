//! Routing machinery of the patchbay audio policy core.
//!
//! This crate provides:
//!
//! - **[`RoutingCoordinator`]**: device hot-plug, stream requests, start/stop,
//!   patches and audio sources, over the components below
//! - **[`StreamPool`]**: open playback and capture streams and their clients
//! - **[`OutputSelector`]**: the best shared stream for a request
//! - **[`PatchGraph`]**: installed source-to-sink patches and their bridges
//! - **[`MuteScheduler`]**: mute commands and waits around device switches
//! - **[`AudioHal`]** and **[`PolicyEngine`]**: the hardware and
//!   device-selection collaborators, with [`PriorityEngine`] as the default
//!   engine and [`MockHal`] for tests
//!
//! The vocabulary (formats, devices, profiles, handles, errors) comes from
//! `patchbay-core`; settings and topologies from `patchbay-config`.
//!
//! ## Quick Start
//!
//! ```rust
//! use patchbay_config::{PolicyConfig, reference_topology};
//! use patchbay_core::DeviceType;
//! use patchbay_policy::{DeviceAvailability, MockHal, PriorityEngine, RoutingCoordinator};
//!
//! let catalog = reference_topology().unwrap().into_catalog().unwrap();
//! let mut core = RoutingCoordinator::new(
//!     catalog,
//!     PriorityEngine::new(),
//!     MockHal::new(),
//!     PolicyConfig::default(),
//! )
//! .unwrap();
//!
//! let before = core.generation();
//! core.set_device_connection_state(
//!     DeviceType::OutWiredHeadset,
//!     "",
//!     "Wired Headset",
//!     DeviceAvailability::Available,
//! )
//! .unwrap();
//! assert!(core.generation() > before);
//! ```

pub mod coordinator;
pub mod engine;
pub mod hal;
pub mod mock;
pub mod mute;
pub mod patch;
pub mod platform;
pub mod selector;
pub mod stream;

pub use coordinator::{
    AudioSourceRecord, CaptureRequest, InputGrant, OutputGrant, OutputRequest, PatchSnapshot,
    PortSnapshot, RoutingCoordinator,
};
pub use engine::{CacheMode, DeviceAvailability, LegacyStrategy, PolicyEngine, PriorityEngine};
pub use hal::{AudioHal, DeviceConnectedState, HwPatch, HwPort, InputOpen, OpenedStream, OutputOpen};
pub use mock::{HalCall, MockHal, RecordingPacer};
pub use mute::{MuteAction, MutePlan, MuteScheduler, Pacer, ThreadPacer};
pub use patch::{Bridge, PatchGraph, PatchOrigin, PatchRecord, PatchRequest, PatchSpec, PortSpec};
pub use platform::Platform;
pub use selector::{HapticAttachment, MatchCriteria, OutputSelector, SelectionRequest};
pub use stream::{ClientDescriptor, InputDescriptor, OutputDescriptor, StreamPool};
