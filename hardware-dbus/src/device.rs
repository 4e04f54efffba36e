//! The public device handle

use std::sync::Arc;

use hardware_types::{Capability, PropertyMap, PropertyValue, Udi};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::backend::{DeviceBackend, DeviceDescription};
use crate::error::HardwareError;
use crate::iface::DeviceInterface;
use crate::notify::{ChangeEvent, ChangeKind};

struct CacheState {
    props: Option<PropertyMap>,
    changes: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// A handle to one physical or logical device.
///
/// Devices are value-like: multiple handles may reference the same UDI, each
/// with an independent property cache and no shared identity. The cache is
/// populated by a single bulk fetch on first access and invalidated wholesale
/// whenever the backend signals a change for this UDI; pending change events
/// are drained at the top of every property access.
pub struct Device {
    udi: Udi,
    backend: Arc<dyn DeviceBackend>,
    cache: Mutex<CacheState>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("udi", &self.udi).finish()
    }
}

impl Device {
    pub(crate) fn bind(udi: Udi, backend: Arc<dyn DeviceBackend>) -> Device {
        let changes = backend.notifier().subscribe(&udi);
        Device {
            udi,
            backend,
            cache: Mutex::new(CacheState {
                props: None,
                changes,
            }),
        }
    }

    pub fn udi(&self) -> &Udi {
        &self.udi
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Current property snapshot, fetching from the backend only when the
    /// cache is empty or a change notification arrived since the last read.
    async fn snapshot(&self) -> Result<PropertyMap, HardwareError> {
        let mut cache = self.cache.lock().await;

        while let Ok(event) = cache.changes.try_recv() {
            if event.kind == ChangeKind::Changed && cache.props.is_some() {
                debug!(udi = %self.udi, "dropping property cache after change notification");
            }
            cache.props = None;
        }

        if let Some(props) = &cache.props {
            return Ok(props.clone());
        }

        let props = self.backend.properties(&self.udi).await?;
        cache.props = Some(props.clone());
        Ok(props)
    }

    async fn describe(&self) -> Result<DeviceDescription, HardwareError> {
        let props = self.snapshot().await?;
        Ok(self.backend.describe(&self.udi, &props))
    }

    pub async fn parent_udi(&self) -> Result<Option<Udi>, HardwareError> {
        Ok(self.describe().await?.parent_udi)
    }

    pub async fn vendor(&self) -> Result<String, HardwareError> {
        Ok(self.describe().await?.vendor)
    }

    pub async fn product(&self) -> Result<String, HardwareError> {
        Ok(self.describe().await?.product)
    }

    pub async fn description(&self) -> Result<String, HardwareError> {
        Ok(self.describe().await?.description)
    }

    pub async fn icon(&self) -> Result<String, HardwareError> {
        Ok(self.describe().await?.icon)
    }

    pub async fn emblems(&self) -> Result<Vec<String>, HardwareError> {
        Ok(self.describe().await?.emblems)
    }

    pub async fn property(&self, key: &str) -> Result<Option<PropertyValue>, HardwareError> {
        Ok(self.snapshot().await?.remove(key))
    }

    pub async fn property_exists(&self, key: &str) -> Result<bool, HardwareError> {
        Ok(self.snapshot().await?.contains_key(key))
    }

    pub async fn all_properties(&self) -> Result<PropertyMap, HardwareError> {
        self.snapshot().await
    }

    /// Cheap capability predicate; never constructs an interface.
    pub async fn query_capability(&self, capability: Capability) -> Result<bool, HardwareError> {
        let props = self.snapshot().await?;
        Ok(self.backend.supports(&props, capability))
    }

    /// Every capability this device currently satisfies.
    pub async fn capabilities(&self) -> Result<Vec<Capability>, HardwareError> {
        let props = self.snapshot().await?;
        Ok(Capability::ALL
            .into_iter()
            .filter(|c| self.backend.supports(&props, *c))
            .collect())
    }

    /// Ask-then-instantiate: the factory runs only when the predicate holds,
    /// so interface construction cost is never paid for unsupported
    /// capabilities. The returned interface borrows this handle.
    pub async fn interface(
        &self,
        capability: Capability,
    ) -> Result<Option<DeviceInterface<'_>>, HardwareError> {
        if !self.query_capability(capability).await? {
            return Ok(None);
        }
        Ok(self.backend.instantiate(self, capability))
    }

    /// Make the device's contents available (mount). Requires
    /// `StorageAccess`; checked before any backend traffic.
    pub async fn setup(&self) -> Result<(), HardwareError> {
        self.require(Capability::StorageAccess).await?;
        self.backend.setup(&self.udi).await
    }

    /// Release the device's contents (unmount). Requires `StorageAccess`.
    pub async fn teardown(&self) -> Result<(), HardwareError> {
        self.require(Capability::StorageAccess).await?;
        self.backend.teardown(&self.udi).await
    }

    /// Eject the medium. Requires `OpticalDrive`.
    pub async fn eject(&self) -> Result<(), HardwareError> {
        self.require(Capability::OpticalDrive).await?;
        self.backend.eject(&self.udi).await
    }

    async fn require(&self, capability: Capability) -> Result<(), HardwareError> {
        if self.query_capability(capability).await? {
            Ok(())
        } else {
            Err(HardwareError::UnsupportedCapability {
                udi: self.udi.clone(),
                capability,
            })
        }
    }
}
