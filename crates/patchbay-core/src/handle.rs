//! Opaque handles.
//!
//! Every entity of the routing graph is referred to by one of these integer
//! handles. A handle that outlives its entity simply resolves to `None` on
//! lookup; nothing holds a pointer into another entity.

use core::fmt;

use crate::flags::IoRole;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw value.
            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// An attached device in the registry. Never reused.
    DeviceId,
    "device"
);
handle!(
    /// A hardware module of the catalog.
    ModuleId,
    "module"
);
handle!(
    /// A stream descriptor in the pool. Never reused.
    StreamId,
    "stream"
);
handle!(
    /// The hardware's handle for an open stream.
    IoHandle,
    "io"
);
handle!(
    /// A patch record. Never reused.
    PatchHandle,
    "patch"
);
handle!(
    /// The hardware's handle for an installed patch.
    HwPatchHandle,
    "hw-patch"
);
handle!(
    /// A client attached to a stream.
    ClientId,
    "client"
);
handle!(
    /// An audio session shared by the tracks and effects of one client.
    SessionId,
    "session"
);
handle!(
    /// A caller identity.
    Uid,
    "uid"
);
handle!(
    /// A running audio source.
    SourceId,
    "source"
);

/// Position of a profile in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId {
    /// Owning module.
    pub module: ModuleId,
    /// Output or input profile list.
    pub role: IoRole,
    /// Index in that list.
    pub index: usize,
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.module, self.role, self.index)
    }
}
