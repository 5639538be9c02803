//! Hardware boundary, static catalog and generation counter, bundled.
//!
//! Every structural change (device attach/detach, stream open/close, patch
//! install/release) goes through [`Platform::ports_changed`] or
//! [`Platform::patches_changed`], which bump the generation and notify
//! listeners in one step.

use patchbay_core::ProfileCatalog;

use crate::hal::AudioHal;

/// The hardware side of the routing core.
#[derive(Debug)]
pub struct Platform<H> {
    pub(crate) hal: H,
    pub(crate) catalog: ProfileCatalog,
    generation: u64,
}

impl<H: AudioHal> Platform<H> {
    /// Wraps a hardware boundary and the catalog it was declared with.
    pub fn new(hal: H, catalog: ProfileCatalog) -> Self {
        Self {
            hal,
            catalog,
            generation: 0,
        }
    }

    /// The hardware boundary.
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Mutable hardware boundary, for tests that inject failures.
    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    /// Hardware modules and their profiles.
    pub fn catalog(&self) -> &ProfileCatalog {
        &self.catalog
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A device or stream appeared or went away.
    pub(crate) fn ports_changed(&mut self) {
        self.generation += 1;
        tracing::trace!(generation = self.generation, "ports_changed");
        self.hal.on_port_list_changed();
    }

    /// A patch was installed, updated or released.
    pub(crate) fn patches_changed(&mut self) {
        self.generation += 1;
        tracing::trace!(generation = self.generation, "patches_changed");
        self.hal.on_patch_list_changed();
    }
}
