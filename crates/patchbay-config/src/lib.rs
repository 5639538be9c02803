//! Configuration for the patchbay routing core.
//!
//! Two documents configure a platform, both TOML:
//!
//! - **[`PolicyConfig`]**: limits and thresholds of the routing core
//!   (registry size, hardware bridge driver version, mixer ceilings)
//! - **[`TopologyConfig`]**: the hardware modules, their devices, mix ports
//!   and routes, turned into a [`ProfileCatalog`](patchbay_core::ProfileCatalog)
//!   by [`TopologyConfig::into_catalog`]
//!
//! # Example
//!
//! ```rust,no_run
//! use patchbay_config::{PolicyConfig, TopologyConfig};
//!
//! let policy = PolicyConfig::load("/etc/patchbay/policy.toml").unwrap();
//! let catalog = TopologyConfig::load("/etc/patchbay/topology.toml")
//!     .unwrap()
//!     .into_catalog()
//!     .unwrap();
//! assert!(catalog.primary_output_profile().is_some());
//! # let _ = policy;
//! ```

mod error;
mod policy;
mod topology;

/// Settings and topology validation.
pub mod validation;

/// Built-in reference topology.
pub mod reference;

pub use error::ConfigError;
pub use policy::PolicyConfig;
pub use reference::{REFERENCE_TOPOLOGY, reference_topology};
pub use topology::{
    AudioProfileConfig, DeviceConfig, MixPortConfig, ModuleConfig, RouteConfig, TopologyConfig,
};
pub use validation::{ValidationError, ValidationResult};
