//! Shared test doubles.
//!
//! [`FakeBackend`] serves properties from an in-memory map, records every
//! backend call and reuses the real capability dispatch tables, so tests
//! exercise the production predicate/factory pairs without a bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hardware_types::{Capability, PropertyMap, PropertyValue, Udi};

use crate::backend::{DeviceBackend, DeviceDescription, disks, power, sysfs};
use crate::device::Device;
use crate::error::HardwareError;
use crate::iface::DeviceInterface;
use crate::notify::Notifier;
use crate::ops::OperationKind;

const FAKE_PREFIX: &str = "/org/example";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Properties(Udi),
    Operation(OperationKind, Udi),
}

impl Call {
    pub fn is_properties(call: &Call) -> bool {
        matches!(call, Call::Properties(_))
    }

    pub fn is_operation(call: &Call) -> bool {
        matches!(call, Call::Operation(..))
    }
}

pub struct FakeBackend {
    devices: Mutex<HashMap<Udi, PropertyMap>>,
    calls: Mutex<Vec<Call>>,
    notifier: Notifier,
}

impl FakeBackend {
    pub fn new() -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            devices: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            notifier: Notifier::new(),
        })
    }

    pub fn with_device(udi: &str, props: PropertyMap) -> Arc<FakeBackend> {
        let backend = FakeBackend::new();
        backend.set_properties(&Udi::new(udi), props);
        backend
    }

    pub fn device(self: Arc<Self>, udi: &str) -> Device {
        Device::bind(Udi::new(udi), self)
    }

    pub fn set_properties(&self, udi: &Udi, props: PropertyMap) {
        self.devices
            .lock()
            .expect("device map poisoned")
            .insert(udi.clone(), props);
    }

    pub fn remove_device(&self, udi: &Udi) {
        self.devices
            .lock()
            .expect("device map poisoned")
            .remove(udi);
    }

    pub fn notifier_ref(&self) -> &Notifier {
        &self.notifier
    }

    pub fn count(&self, pred: fn(&Call) -> bool) -> usize {
        self.calls
            .lock()
            .expect("call log poisoned")
            .iter()
            .filter(|call| pred(call))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("call log poisoned").push(call);
    }

    fn props_of(&self, udi: &Udi) -> Option<PropertyMap> {
        self.devices
            .lock()
            .expect("device map poisoned")
            .get(udi)
            .cloned()
    }
}

#[async_trait]
impl DeviceBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn owns(&self, udi: &Udi) -> bool {
        udi.starts_with(FAKE_PREFIX) || self.props_of(udi).is_some()
    }

    async fn all_devices(&self) -> Result<Vec<Udi>, HardwareError> {
        let mut udis: Vec<_> = self
            .devices
            .lock()
            .expect("device map poisoned")
            .keys()
            .cloned()
            .collect();
        udis.sort();
        Ok(udis)
    }

    async fn exists(&self, udi: &Udi) -> Result<bool, HardwareError> {
        Ok(self.props_of(udi).is_some())
    }

    async fn properties(&self, udi: &Udi) -> Result<PropertyMap, HardwareError> {
        self.record(Call::Properties(udi.clone()));
        self.props_of(udi)
            .ok_or_else(|| HardwareError::UnknownDevice(udi.clone()))
    }

    fn describe(&self, udi: &Udi, props: &PropertyMap) -> DeviceDescription {
        let text = |key: &str| {
            props
                .get(key)
                .and_then(PropertyValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        DeviceDescription {
            parent_udi: Some(Udi::new(FAKE_PREFIX)),
            vendor: text("Vendor"),
            product: text("Model"),
            description: udi.as_str().to_string(),
            icon: String::new(),
            emblems: Vec::new(),
        }
    }

    // Chain the real dispatch tables so ask/instantiate behaves exactly as
    // in production.
    fn supports(&self, props: &PropertyMap, capability: Capability) -> bool {
        power::supports(props, capability)
            || disks::supports(props, capability)
            || sysfs::supports(props, capability)
    }

    fn instantiate<'a>(
        &self,
        device: &'a Device,
        capability: Capability,
    ) -> Option<DeviceInterface<'a>> {
        let props = self.props_of(device.udi()).unwrap_or_default();
        if power::supports(&props, capability) {
            power::instantiate(device, capability)
        } else if disks::supports(&props, capability) {
            disks::instantiate(device, capability)
        } else if sysfs::supports(&props, capability) {
            sysfs::instantiate(device, capability)
        } else {
            None
        }
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    async fn setup(&self, udi: &Udi) -> Result<(), HardwareError> {
        self.record(Call::Operation(OperationKind::Setup, udi.clone()));
        Ok(())
    }

    async fn teardown(&self, udi: &Udi) -> Result<(), HardwareError> {
        self.record(Call::Operation(OperationKind::Teardown, udi.clone()));
        Ok(())
    }

    async fn eject(&self, udi: &Udi) -> Result<(), HardwareError> {
        self.record(Call::Operation(OperationKind::Eject, udi.clone()));
        Ok(())
    }
}
