//! The set of currently available devices.

use std::collections::BTreeMap;

use crate::audio::AudioFormat;
use crate::device::{DeviceDescriptor, DeviceKey, DeviceType, PortRole};
use crate::error::{PolicyError, Result};
use crate::handle::{DeviceId, ModuleId};

/// What is known about a device before it is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDevice {
    /// Type and address.
    pub key: DeviceKey,
    /// Human readable name.
    pub name: String,
    /// Owning module.
    pub module: ModuleId,
    /// Whether the device exposes a gain controller.
    pub has_gain_control: bool,
    /// Encoded formats the device can carry.
    pub encoded_formats: Vec<AudioFormat>,
}

/// Available input and output devices, unique per (type, address).
///
/// Device IDs are assigned sequentially and never reused, so a stale
/// [`DeviceId`] held elsewhere resolves to `None` once its device detaches.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, DeviceDescriptor>,
    capacity: usize,
    next_id: u32,
}

impl DeviceRegistry {
    /// Creates an empty registry holding at most `capacity` devices.
    pub fn new(capacity: usize) -> Self {
        Self {
            devices: BTreeMap::new(),
            capacity,
            next_id: 1,
        }
    }

    /// Registers a device.
    ///
    /// Fails with [`PolicyError::AlreadyInState`] if a device with the same key
    /// is already available and [`PolicyError::ResourceExhausted`] if the
    /// registry is full.
    pub fn attach(&mut self, device: NewDevice) -> Result<DeviceId> {
        if self.find(&device.key).is_some() {
            return Err(PolicyError::AlreadyInState(format!(
                "device {} is already available",
                device.key
            )));
        }
        if self.devices.len() >= self.capacity {
            return Err(PolicyError::ResourceExhausted(format!(
                "device registry full ({} devices)",
                self.capacity
            )));
        }
        let id = DeviceId::new(self.next_id);
        self.next_id += 1;
        tracing::debug!(device = %device.key, %id, "registry_attach");
        self.devices.insert(
            id,
            DeviceDescriptor {
                id,
                key: device.key,
                name: device.name,
                module: device.module,
                has_gain_control: device.has_gain_control,
                encoded_formats: device.encoded_formats,
                current_encoded_format: None,
            },
        );
        Ok(id)
    }

    /// Removes a device and returns its descriptor.
    pub fn detach(&mut self, id: DeviceId) -> Option<DeviceDescriptor> {
        let removed = self.devices.remove(&id);
        if let Some(device) = &removed {
            tracing::debug!(device = %device.key, %id, "registry_detach");
        }
        removed
    }

    /// Looks a device up by handle.
    pub fn get(&self, id: DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.get(&id)
    }

    /// Mutable lookup, used to record the negotiated encoded format.
    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceDescriptor> {
        self.devices.get_mut(&id)
    }

    /// Looks a device up by exact type and address.
    pub fn find(&self, key: &DeviceKey) -> Option<&DeviceDescriptor> {
        self.devices.values().find(|d| &d.key == key)
    }

    /// Handle of the device with exactly this type and address.
    pub fn find_id(&self, device_type: DeviceType, address: &str) -> Option<DeviceId> {
        self.devices
            .values()
            .find(|d| d.key.device_type == device_type && d.key.address == address)
            .map(|d| d.id)
    }

    /// All available devices of a type, in attach order.
    pub fn of_type(&self, device_type: DeviceType) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices
            .values()
            .filter(move |d| d.key.device_type == device_type)
    }

    /// Whether the device is available.
    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    /// Whether every device of `ids` is available.
    pub fn contains_all(&self, ids: &[DeviceId]) -> bool {
        ids.iter().all(|id| self.contains(*id))
    }

    /// Available playback devices.
    pub fn outputs(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.with_role(PortRole::Sink)
    }

    /// Available capture devices.
    pub fn inputs(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.with_role(PortRole::Source)
    }

    fn with_role(&self, role: PortRole) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.values().filter(move |d| d.role() == role)
    }

    /// Every available device in attach order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.values()
    }

    /// Keys of the given devices, skipping handles that no longer resolve.
    pub fn keys_of(&self, ids: &[DeviceId]) -> Vec<DeviceKey> {
        ids.iter()
            .filter_map(|id| self.get(*id))
            .map(|d| d.key.clone())
            .collect()
    }

    /// Number of available devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device is available.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Maximum number of devices.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
