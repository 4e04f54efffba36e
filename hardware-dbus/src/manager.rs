//! Device discovery facade
//!
//! The manager fans enumeration, resolution and change events out over the
//! registered backends. It holds no device state itself; every handle it
//! returns owns an independent property cache.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use hardware_types::{Capability, Udi};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::DeviceBackend;
use crate::backend::disks::DisksBackend;
use crate::backend::power::PowerBackend;
use crate::backend::sysfs::SysfsBackend;
use crate::device::Device;
use crate::error::HardwareError;
use crate::notify::ChangeEvent;
use crate::query::{Query, QueryContext};

/// Enumeration constraints; an empty filter matches every device.
#[derive(Debug, Default, Clone)]
pub struct Filter {
    pub parent: Option<Udi>,
    pub query: Option<Query>,
}

impl Filter {
    pub fn all() -> Filter {
        Filter::default()
    }

    pub fn with_parent(mut self, parent: Udi) -> Filter {
        self.parent = Some(parent);
        self
    }

    pub fn with_query(mut self, query: Query) -> Filter {
        self.query = Some(query);
        self
    }
}

pub struct HardwareManager {
    backends: Vec<Arc<dyn DeviceBackend>>,
}

impl HardwareManager {
    pub fn new(backends: Vec<Arc<dyn DeviceBackend>>) -> HardwareManager {
        HardwareManager { backends }
    }

    /// The standard three-backend setup: kernel device tree, power daemon
    /// and disk daemon, all sharing one injected bus connection. Signal
    /// pumps are started here; a daemon that is not on the bus only costs
    /// its devices, not the whole facade.
    pub async fn with_system_defaults(
        connection: zbus::Connection,
    ) -> Result<HardwareManager, HardwareError> {
        let sysfs = Arc::new(SysfsBackend::new());
        if let Err(err) = sysfs.spawn_uevent_pump() {
            warn!(%err, "kernel uevent socket unavailable, running without change events");
        }

        let power = Arc::new(PowerBackend::new(connection.clone()));
        if let Err(err) = power.spawn_signal_pump().await {
            warn!(%err, "power daemon unreachable, running without power change events");
        }

        let disks = Arc::new(DisksBackend::new(connection));
        if let Err(err) = disks.spawn_signal_pump().await {
            warn!(%err, "disk daemon unreachable, running without storage change events");
        }

        Ok(HardwareManager::new(vec![sysfs, power, disks]))
    }

    fn backend_for(&self, udi: &Udi) -> Option<&Arc<dyn DeviceBackend>> {
        self.backends.iter().find(|b| b.owns(udi))
    }

    /// Resolve a UDI into a device handle. Fails with `UnknownDevice` when
    /// no backend owns the namespace or the device is gone.
    pub async fn device(&self, udi: &Udi) -> Result<Device, HardwareError> {
        let backend = self
            .backend_for(udi)
            .ok_or_else(|| HardwareError::UnknownDevice(udi.clone()))?;
        if !backend.exists(udi).await? {
            return Err(HardwareError::UnknownDevice(udi.clone()));
        }
        Ok(Device::bind(udi.clone(), backend.clone()))
    }

    pub async fn all_devices(&self) -> Result<Vec<Device>, HardwareError> {
        self.find_devices(&Filter::all()).await
    }

    /// Enumerate devices matching a filter. Parent and query constraints
    /// are evaluated against a fresh property snapshot per device; a device
    /// that vanishes mid-enumeration is skipped rather than failing the
    /// whole listing.
    pub async fn find_devices(&self, filter: &Filter) -> Result<Vec<Device>, HardwareError> {
        let mut out = Vec::new();
        for backend in &self.backends {
            for udi in backend.all_devices().await? {
                let device = Device::bind(udi, backend.clone());
                match self.matches(&device, filter).await {
                    Ok(true) => out.push(device),
                    Ok(false) => {}
                    Err(HardwareError::UnknownDevice(udi)) => {
                        debug!(%udi, "device vanished during enumeration");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(out)
    }

    async fn matches(&self, device: &Device, filter: &Filter) -> Result<bool, HardwareError> {
        if let Some(parent) = &filter.parent {
            if device.parent_udi().await?.as_ref() != Some(parent) {
                return Ok(false);
            }
        }
        if let Some(query) = &filter.query {
            let properties = device.all_properties().await?;
            let capabilities: HashSet<Capability> =
                device.capabilities().await?.into_iter().collect();
            let ctx = QueryContext {
                capabilities: &capabilities,
                properties: &properties,
            };
            if !query.matches(&ctx) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fan-in of every backend's change feed.
    pub fn events(&self) -> DeviceEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        for backend in &self.backends {
            let mut feed = backend.notifier().subscribe_all();
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = feed.recv().await {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
        }
        DeviceEventStream { rx }
    }
}

/// Merged add/remove/change events across all backends.
pub struct DeviceEventStream {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Stream for DeviceEventStream {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChangeKind;
    use crate::testkit::FakeBackend;
    use futures::StreamExt;
    use hardware_types::{ErrorType, PropertyMap, PropertyValue};

    fn battery(percent: f64) -> PropertyMap {
        PropertyMap::from([
            ("Type".to_string(), PropertyValue::UInt(2)),
            ("Percentage".to_string(), PropertyValue::Double(percent)),
            ("State".to_string(), PropertyValue::UInt(2)),
        ])
    }

    fn adapter(online: bool) -> PropertyMap {
        PropertyMap::from([
            ("Type".to_string(), PropertyValue::UInt(1)),
            ("Online".to_string(), PropertyValue::Bool(online)),
        ])
    }

    fn manager_with(backend: Arc<FakeBackend>) -> HardwareManager {
        HardwareManager::new(vec![backend as Arc<dyn DeviceBackend>])
    }

    #[tokio::test]
    async fn resolve_round_trips_through_enumeration() {
        let backend = FakeBackend::new();
        backend.set_properties(&Udi::new("/org/example/devices/battery0"), battery(50.0));
        backend.set_properties(&Udi::new("/org/example/devices/ac0"), adapter(true));
        let manager = manager_with(backend);

        let devices = manager.all_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        for device in devices {
            let resolved = manager.device(device.udi()).await.unwrap();
            assert_eq!(resolved.udi(), device.udi());
        }
    }

    #[tokio::test]
    async fn unknown_udi_resolves_to_an_error() {
        let manager = manager_with(FakeBackend::new());

        let err = manager
            .device(&Udi::new("/org/example/devices/nope"))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::UnknownDevice);

        let err = manager
            .device(&Udi::new("/somewhere/else/entirely"))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::UnknownDevice);
    }

    #[tokio::test]
    async fn capability_query_narrows_enumeration() {
        let backend = FakeBackend::new();
        backend.set_properties(&Udi::new("/org/example/devices/battery0"), battery(50.0));
        backend.set_properties(&Udi::new("/org/example/devices/ac0"), adapter(true));
        let manager = manager_with(backend);

        let query = Query::parse("capability.battery == true").unwrap();
        let devices = manager
            .find_devices(&Filter::all().with_query(query))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(
            devices[0].udi(),
            &Udi::new("/org/example/devices/battery0")
        );
    }

    #[tokio::test]
    async fn compound_query_combines_capability_and_property() {
        let backend = FakeBackend::new();
        backend.set_properties(&Udi::new("/org/example/devices/battery0"), battery(50.0));
        backend.set_properties(&Udi::new("/org/example/devices/battery1"), battery(80.0));
        let manager = manager_with(backend);

        let query =
            Query::parse("capability.battery == true and Percentage == 80.0").unwrap();
        let devices = manager
            .find_devices(&Filter::all().with_query(query))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(
            devices[0].udi(),
            &Udi::new("/org/example/devices/battery1")
        );
    }

    #[tokio::test]
    async fn parent_filter_follows_the_description() {
        let backend = FakeBackend::new();
        backend.set_properties(&Udi::new("/org/example/devices/battery0"), battery(50.0));
        let manager = manager_with(backend);

        // The fake parents everything under its namespace root.
        let devices = manager
            .find_devices(&Filter::all().with_parent(Udi::new("/org/example")))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);

        let devices = manager
            .find_devices(&Filter::all().with_parent(Udi::new("/org/elsewhere")))
            .await
            .unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn events_stream_carries_backend_notifications() {
        let backend = FakeBackend::new();
        backend.set_properties(&Udi::new("/org/example/devices/battery0"), battery(50.0));
        let manager = manager_with(backend.clone());

        let mut events = manager.events();
        let udi = Udi::new("/org/example/devices/battery0");
        backend.notifier_ref().notify(ChangeEvent {
            kind: ChangeKind::Changed,
            udi: udi.clone(),
        });

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Changed);
        assert_eq!(event.udi, udi);
    }
}
