//! Error types for routing operations.

use core::fmt;

use thiserror::Error;

use crate::audio::AudioConfig;
use crate::handle::{PatchHandle, Uid};

/// A call across the hardware boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalOp {
    /// Opening a playback stream.
    OpenOutput,
    /// Opening a mirrored playback stream.
    OpenDuplicateOutput,
    /// Opening a capture stream.
    OpenInput,
    /// Installing a patch.
    CreatePatch,
    /// Removing a patch.
    ReleasePatch,
    /// Announcing a device connection.
    DeviceConnect,
    /// Announcing that a device is about to go away.
    DevicePrepareDisconnect,
    /// Announcing a device disconnection.
    DeviceDisconnect,
    /// Querying a device's capabilities.
    QueryCapabilities,
}

impl fmt::Display for HalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenOutput => "open_output",
            Self::OpenDuplicateOutput => "open_duplicate_output",
            Self::OpenInput => "open_input",
            Self::CreatePatch => "create_patch",
            Self::ReleasePatch => "release_patch",
            Self::DeviceConnect => "device_connect",
            Self::DevicePrepareDisconnect => "device_prepare_disconnect",
            Self::DeviceDisconnect => "device_disconnect",
            Self::QueryCapabilities => "query_capabilities",
        };
        f.write_str(name)
    }
}

/// A failed hardware boundary call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} failed with status {status}")]
pub struct HalError {
    /// The operation that failed.
    pub op: HalOp,
    /// Driver status code.
    pub status: i32,
}

impl HalError {
    /// Creates a HAL error.
    pub fn new(op: HalOp, status: i32) -> Self {
        Self { op, status }
    }
}

/// Errors surfaced by the routing core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// Malformed request, unsupported device type or role mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The entity is already in the requested state.
    #[error("already in requested state: {0}")]
    AlreadyInState(String),

    /// No device, profile, stream, client or patch for the given handle.
    #[error("not found: {0}")]
    NotFound(String),

    /// No stream can carry the request; `hint` is the closest configuration that could.
    #[error("no compatible stream for {requested}")]
    NoCompatibleStream {
        /// What the client asked for.
        requested: AudioConfig,
        /// A configuration the client may retry with.
        hint: Option<AudioConfig>,
    },

    /// A capacity limit was reached and nothing could be reclaimed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Temporarily unreachable; the caller may fall back to a shared stream.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The core cannot operate (e.g. no primary output was declared).
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Caller does not own the patch it tries to change.
    #[error("{uid} does not own {patch}")]
    PermissionDenied {
        /// The caller.
        uid: Uid,
        /// The patch.
        patch: PatchHandle,
    },

    /// A hardware boundary call failed.
    #[error("hardware call failed: {0}")]
    Hal(#[from] HalError),
}

impl PolicyError {
    /// Whether the caller may retry on a shared (non-direct) stream.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Convenience result type for routing operations.
pub type Result<T> = core::result::Result<T, PolicyError>;
