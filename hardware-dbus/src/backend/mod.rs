//! Per-subsystem backends
//!
//! Each backend talks to exactly one external subsystem, owns a UDI
//! namespace, and answers capability and property queries for the devices in
//! it. Backends are handed their bus connection at construction; nothing in
//! this crate holds a process-wide default connection.

pub mod disks;
pub mod power;
pub mod sysfs;

mod variant;

use async_trait::async_trait;
use hardware_types::{Capability, PropertyMap, Udi};

use crate::device::Device;
use crate::error::HardwareError;
use crate::iface::DeviceInterface;
use crate::notify::Notifier;

pub(crate) use variant::{decode_byte_string, from_variant};

/// Identity strings derived from raw backend properties, with per-backend
/// fallback heuristics applied in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    pub parent_udi: Option<Udi>,
    pub vendor: String,
    pub product: String,
    pub description: String,
    pub icon: String,
    pub emblems: Vec<String>,
}

/// One subsystem's device source.
///
/// `supports` is a pure predicate over raw backend properties; `instantiate`
/// is the matching factory. The facade always asks before instantiating, so
/// factories never see unsupported capability requests.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Namespace test: does this UDI belong to this backend?
    fn owns(&self, udi: &Udi) -> bool;

    /// Eagerly enumerate every device UDI the backend currently exposes.
    async fn all_devices(&self) -> Result<Vec<Udi>, HardwareError>;

    async fn exists(&self, udi: &Udi) -> Result<bool, HardwareError>;

    /// Bulk-fetch all properties of one device in a single round-trip.
    async fn properties(&self, udi: &Udi) -> Result<PropertyMap, HardwareError>;

    fn describe(&self, udi: &Udi, props: &PropertyMap) -> DeviceDescription;

    fn supports(&self, props: &PropertyMap, capability: Capability) -> bool;

    fn instantiate<'a>(
        &self,
        device: &'a Device,
        capability: Capability,
    ) -> Option<DeviceInterface<'a>>;

    /// The change-subscription registry this backend feeds.
    fn notifier(&self) -> &Notifier;

    async fn setup(&self, udi: &Udi) -> Result<(), HardwareError> {
        Err(HardwareError::UnsupportedCapability {
            udi: udi.clone(),
            capability: Capability::StorageAccess,
        })
    }

    async fn teardown(&self, udi: &Udi) -> Result<(), HardwareError> {
        Err(HardwareError::UnsupportedCapability {
            udi: udi.clone(),
            capability: Capability::StorageAccess,
        })
    }

    async fn eject(&self, udi: &Udi) -> Result<(), HardwareError> {
        Err(HardwareError::UnsupportedCapability {
            udi: udi.clone(),
            capability: Capability::OpticalDrive,
        })
    }
}
