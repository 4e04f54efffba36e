//! Disk daemon backend (block devices, drives, volumes, optical media)
//!
//! Talks to UDisks2 over the system bus. A drive and the medium inserted in
//! it are distinct devices; the medium's UDI carries the externally-visible
//! `:media` suffix, while internally the relation is kept structurally via
//! the `MediaOf` property on the medium's map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use hardware_types::{
    Capability, DiscContent, DriveType, ErrorType, OpticalMedia, PropertyMap, PropertyValue, Udi,
};
use tracing::{error, info, warn};
use udisks2::{block::BlockProxy, drive::DriveProxy, filesystem::FilesystemProxy};
use zbus::names::InterfaceName;
use zbus::zvariant::OwnedObjectPath;
use zbus::{Connection, MatchRule, MessageStream};
use zbus_macros::proxy;

use super::{DeviceBackend, DeviceDescription, from_variant};
use crate::device::Device;
use crate::error::HardwareError;
use crate::iface::{
    Block, DeviceInterface, GenericInterface, OpticalDisc, OpticalDrive, StorageAccess,
    StorageDrive, StorageVolume,
};
use crate::notify::{ChangeEvent, ChangeKind, Notifier};
use crate::ops::{Completion, CompletionHub, OpSettings, OperationKind};

const SERVICE: &str = "org.freedesktop.UDisks2";
const UDI_PREFIX: &str = "/org/freedesktop/UDisks2";
const DRIVE_PREFIX: &str = "/org/freedesktop/UDisks2/drives/";

const BLOCK_IFACE: &str = "org.freedesktop.UDisks2.Block";
const DRIVE_IFACE: &str = "org.freedesktop.UDisks2.Drive";
const FILESYSTEM_IFACE: &str = "org.freedesktop.UDisks2.Filesystem";
const PARTITION_IFACE: &str = "org.freedesktop.UDisks2.Partition";

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2/Manager",
    interface = "org.freedesktop.UDisks2.Manager"
)]
pub trait UDisks2Manager {
    fn get_block_devices(
        &self,
        options: HashMap<String, zbus::zvariant::Value<'_>>,
    ) -> zbus::Result<Vec<OwnedObjectPath>>;
}

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2",
    interface = "org.freedesktop.DBus.ObjectManager"
)]
pub trait UDisks2ObjectManager {
    #[zbus(signal)]
    fn interfaces_added(
        &self,
        object_path: OwnedObjectPath,
        interfaces_and_properties: HashMap<String, HashMap<String, zbus::zvariant::OwnedValue>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn interfaces_removed(
        &self,
        object_path: OwnedObjectPath,
        interfaces: Vec<String>,
    ) -> zbus::Result<()>;
}

/// Forward one daemon signal into the notifier. Signals for a drive also
/// reach the medium device derived from it; the daemon only ever emits on
/// the drive object, but handles bound to the medium UDI subscribe under
/// the suffixed name and would otherwise keep a stale cache.
fn notify_object(notifier: &Notifier, kind: ChangeKind, path: String) {
    let udi = Udi::new(path);
    if udi.starts_with(DRIVE_PREFIX) {
        notifier.notify(ChangeEvent {
            kind,
            udi: Udi::media_of(&udi),
        });
    }
    notifier.notify(ChangeEvent { kind, udi });
}

/// Map a bus-level failure to the closed wire code set, keeping the
/// daemon's message for display.
fn completion_for_bus_error(err: &zbus::Error) -> Completion {
    match err {
        zbus::Error::MethodError(name, message, _info) => {
            let code = match name.as_str() {
                "org.freedesktop.UDisks2.Error.DeviceBusy" => "Busy",
                "org.freedesktop.UDisks2.Error.Failed"
                | "org.freedesktop.UDisks2.Error.NotMounted"
                | "org.freedesktop.UDisks2.Error.AlreadyMounted" => "Failed",
                "org.freedesktop.UDisks2.Error.Cancelled" => "Canceled",
                "org.freedesktop.UDisks2.Error.OptionNotPermitted"
                | "org.freedesktop.UDisks2.Error.MountOptionNotPermitted" => "InvalidOption",
                "org.freedesktop.UDisks2.Error.NotSupported" => "MissingDriver",
                _ => "Unauthorized",
            };
            Completion::failure(
                code,
                message.clone().unwrap_or_else(|| name.to_string()),
            )
        }
        other => Completion::failure("Failed", other.to_string()),
    }
}

/// Unwrap the bus-level error carried by a udisks2 proxy failure.
fn bus_error(err: udisks2::Error) -> zbus::Error {
    match err {
        udisks2::Error::Zbus(e) => e,
        other => zbus::Error::Failure(other.to_string()),
    }
}

/// The object an operation is issued against: mount/unmount go to the block
/// device, eject goes to the drive (resolving a medium UDI to its drive).
fn operation_target(kind: OperationKind, udi: &Udi) -> Udi {
    match kind {
        OperationKind::Setup | OperationKind::Teardown => udi.clone(),
        OperationKind::Eject => udi.media_parent().unwrap_or_else(|| udi.clone()),
    }
}

/// Low-level operation issuer, mockable for tests.
pub(crate) trait StorageOps: Send + Sync {
    /// Issue the backend request; the completion arrives through the hub.
    fn request(&self, kind: OperationKind, udi: Udi) -> BoxFuture<'_, Result<(), HardwareError>>;
}

pub(crate) struct RealStorageOps {
    connection: Connection,
    hub: Arc<CompletionHub>,
}

impl RealStorageOps {
    async fn perform(
        connection: &Connection,
        kind: OperationKind,
        target: &Udi,
    ) -> Result<(), zbus::Error> {
        match kind {
            OperationKind::Setup => {
                let proxy = FilesystemProxy::builder(connection)
                    .path(target.as_str())?
                    .build()
                    .await?;
                proxy.mount(HashMap::new()).await.map_err(bus_error)?;
            }
            OperationKind::Teardown => {
                let proxy = FilesystemProxy::builder(connection)
                    .path(target.as_str())?
                    .build()
                    .await?;
                proxy.unmount(HashMap::new()).await.map_err(bus_error)?;
            }
            OperationKind::Eject => {
                let proxy = DriveProxy::builder(connection)
                    .path(target.as_str())?
                    .build()
                    .await?;
                proxy.eject(HashMap::new()).await.map_err(bus_error)?;
            }
        }
        Ok(())
    }
}

impl StorageOps for RealStorageOps {
    fn request(&self, kind: OperationKind, udi: Udi) -> BoxFuture<'_, Result<(), HardwareError>> {
        Box::pin(async move {
            let connection = self.connection.clone();
            let hub = self.hub.clone();
            tokio::spawn(async move {
                let target = operation_target(kind, &udi);
                let completion = match Self::perform(&connection, kind, &target).await {
                    Ok(()) => Completion::success(),
                    Err(e) => {
                        error!(udi = %udi, operation = %kind, "bus call failed: {e}");
                        completion_for_bus_error(&e)
                    }
                };
                if !hub.complete(&udi, completion) {
                    warn!(udi = %udi, operation = %kind, "completion arrived with no waiter");
                }
            });
            Ok(())
        })
    }
}

/// Issue one operation and block on its completion:
/// `Idle -> Requested -> Completed`, with the subscriber registered before
/// the request goes out.
pub(crate) async fn run_operation(
    hub: &CompletionHub,
    ops: &dyn StorageOps,
    settings: &OpSettings,
    kind: OperationKind,
    udi: &Udi,
) -> Result<(), HardwareError> {
    let pending = hub.begin(udi, kind);
    ops.request(kind, udi.clone()).await?;
    pending.wait(settings).await
}

pub struct DisksBackend {
    connection: Connection,
    notifier: Arc<Notifier>,
    hub: Arc<CompletionHub>,
    ops: Arc<dyn StorageOps>,
    settings: OpSettings,
}

impl DisksBackend {
    pub fn new(connection: Connection) -> Self {
        Self::with_settings(connection, OpSettings::default())
    }

    pub fn with_settings(connection: Connection, settings: OpSettings) -> Self {
        let hub = Arc::new(CompletionHub::new());
        let ops = Arc::new(RealStorageOps {
            connection: connection.clone(),
            hub: hub.clone(),
        });
        DisksBackend {
            connection,
            notifier: Arc::new(Notifier::new()),
            hub,
            ops,
            settings,
        }
    }

    /// Subscribe to daemon signals and forward them into the notifier.
    pub async fn spawn_signal_pump(&self) -> Result<(), HardwareError> {
        let object_manager = UDisks2ObjectManagerProxy::new(&self.connection).await?;
        let mut added = object_manager.receive_interfaces_added().await?;
        let mut removed = object_manager.receive_interfaces_removed().await?;

        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(SERVICE)?
            .interface("org.freedesktop.DBus.Properties")?
            .member("PropertiesChanged")?
            .build();
        let mut changed = MessageStream::for_match_rule(rule, &self.connection, None).await?;

        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_added = added.next() => {
                        let Some(signal) = maybe_added else { break };
                        match signal.args() {
                            Ok(args) => notify_object(
                                &notifier,
                                ChangeKind::Added,
                                args.object_path.to_string(),
                            ),
                            Err(e) => warn!("failed to parse InterfacesAdded args: {e}"),
                        }
                    }
                    maybe_removed = removed.next() => {
                        let Some(signal) = maybe_removed else { break };
                        match signal.args() {
                            Ok(args) => notify_object(
                                &notifier,
                                ChangeKind::Removed,
                                args.object_path.to_string(),
                            ),
                            Err(e) => warn!("failed to parse InterfacesRemoved args: {e}"),
                        }
                    }
                    maybe_changed = changed.next() => {
                        let Some(Ok(msg)) = maybe_changed else { break };
                        if let Some(path) = msg.header().path() {
                            notify_object(
                                &notifier,
                                ChangeKind::Changed,
                                path.to_string(),
                            );
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn get_all(&self, path: &str, iface: &str) -> Result<PropertyMap, zbus::Error> {
        let proxy = zbus::fdo::PropertiesProxy::builder(&self.connection)
            .destination(SERVICE)?
            .path(path)?
            .build()
            .await?;
        let iface = InterfaceName::try_from(iface).map_err(zbus::Error::from)?;
        let raw = proxy.get_all(iface).await.map_err(zbus::Error::from)?;

        let mut props = PropertyMap::new();
        for (key, value) in &raw {
            if let Some(converted) = from_variant(value) {
                props.insert(key.to_string(), converted);
            }
        }
        Ok(props)
    }

    fn is_missing_interface(err: &zbus::Error) -> bool {
        match err {
            zbus::Error::MethodError(name, _msg, _info) => matches!(
                name.as_str(),
                "org.freedesktop.DBus.Error.UnknownInterface"
                    | "org.freedesktop.DBus.Error.InvalidArgs"
            ),
            _ => false,
        }
    }

    fn is_unknown_object(err: &zbus::Error) -> bool {
        match err {
            zbus::Error::MethodError(name, _msg, _info) => matches!(
                name.as_str(),
                "org.freedesktop.DBus.Error.UnknownObject"
                    | "org.freedesktop.DBus.Error.ServiceUnknown"
            ),
            _ => false,
        }
    }

    async fn drive_properties(&self, drive_path: &str) -> Result<PropertyMap, zbus::Error> {
        let mut props = self.get_all(drive_path, DRIVE_IFACE).await?;
        props
            .entry("ConnectionBus".to_string())
            .or_insert_with(|| PropertyValue::from(""));
        Ok(props)
    }

    async fn block_properties(&self, block_path: &str) -> Result<PropertyMap, zbus::Error> {
        let mut props = self.get_all(block_path, BLOCK_IFACE).await?;

        if let Some(device_number) = props.get("DeviceNumber").and_then(PropertyValue::as_u64) {
            let major = (device_number >> 8) & 0xfff;
            let minor = (device_number & 0xff) | ((device_number >> 12) & !0xffu64);
            props.insert("DeviceMajor".to_string(), PropertyValue::Int(major as i64));
            props.insert("DeviceMinor".to_string(), PropertyValue::Int(minor as i64));
        }

        for iface in [PARTITION_IFACE, FILESYSTEM_IFACE] {
            match self.get_all(block_path, iface).await {
                Ok(extra) => props.extend(extra),
                Err(e) if Self::is_missing_interface(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(props)
    }

    async fn media_properties(&self, drive: &Udi) -> Result<PropertyMap, zbus::Error> {
        let mut props = self.drive_properties(drive.as_str()).await?;
        props.insert(
            "MediaOf".to_string(),
            PropertyValue::from(drive.as_str()),
        );
        Ok(props)
    }
}

#[async_trait]
impl DeviceBackend for DisksBackend {
    fn name(&self) -> &'static str {
        "disks"
    }

    fn owns(&self, udi: &Udi) -> bool {
        udi.starts_with(UDI_PREFIX)
    }

    async fn all_devices(&self) -> Result<Vec<Udi>, HardwareError> {
        let manager = UDisks2ManagerProxy::new(&self.connection).await?;
        let block_paths = manager.get_block_devices(HashMap::new()).await?;

        let mut udis = Vec::new();
        let mut drive_paths: HashSet<String> = HashSet::new();

        for path in &block_paths {
            udis.push(Udi::new(path.to_string()));

            let block = match BlockProxy::builder(&self.connection)
                .path(path)?
                .build()
                .await
            {
                Ok(b) => b,
                Err(e) => {
                    info!("could not build block proxy for {path}: {e}");
                    continue;
                }
            };
            if let Ok(drive_path) = block.drive().await {
                let drive_path = drive_path.to_string();
                if drive_path != "/" {
                    drive_paths.insert(drive_path);
                }
            }
        }

        for drive_path in drive_paths {
            let drive_udi = Udi::new(drive_path.clone());
            let built = match DriveProxy::builder(&self.connection).path(drive_path.as_str()) {
                Ok(builder) => builder.build().await,
                Err(e) => Err(e),
            };
            match built {
                Ok(drive) => {
                    // The inserted medium is its own device, one level below
                    // the drive.
                    if drive.optical().await.unwrap_or(false)
                        && drive.media_available().await.unwrap_or(false)
                    {
                        udis.push(Udi::media_of(&drive_udi));
                    }
                }
                // A drive that vanished mid-enumeration only costs its
                // medium entry.
                Err(e) => info!("could not build drive proxy for {drive_path}: {e}"),
            }
            udis.push(drive_udi);
        }

        Ok(udis)
    }

    async fn exists(&self, udi: &Udi) -> Result<bool, HardwareError> {
        match self.properties(udi).await {
            Ok(_) => Ok(true),
            Err(HardwareError::Bus(e)) if Self::is_unknown_object(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn properties(&self, udi: &Udi) -> Result<PropertyMap, HardwareError> {
        if let Some(drive) = udi.media_parent() {
            return Ok(self.media_properties(&drive).await?);
        }
        if udi.as_str().starts_with(DRIVE_PREFIX) {
            return Ok(self.drive_properties(udi.as_str()).await?);
        }
        Ok(self.block_properties(udi.as_str()).await?)
    }

    fn describe(&self, udi: &Udi, props: &PropertyMap) -> DeviceDescription {
        describe(udi, props)
    }

    fn supports(&self, props: &PropertyMap, capability: Capability) -> bool {
        supports(props, capability)
    }

    fn instantiate<'a>(
        &self,
        device: &'a Device,
        capability: Capability,
    ) -> Option<DeviceInterface<'a>> {
        instantiate(device, capability)
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    async fn setup(&self, udi: &Udi) -> Result<(), HardwareError> {
        run_operation(
            &self.hub,
            self.ops.as_ref(),
            &self.settings,
            OperationKind::Setup,
            udi,
        )
        .await
    }

    async fn teardown(&self, udi: &Udi) -> Result<(), HardwareError> {
        run_operation(
            &self.hub,
            self.ops.as_ref(),
            &self.settings,
            OperationKind::Teardown,
            udi,
        )
        .await
    }

    async fn eject(&self, udi: &Udi) -> Result<(), HardwareError> {
        run_operation(
            &self.hub,
            self.ops.as_ref(),
            &self.settings,
            OperationKind::Eject,
            udi,
        )
        .await
    }
}

fn text_prop(props: &PropertyMap, key: &str) -> String {
    props
        .get(key)
        .and_then(PropertyValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_prop(props: &PropertyMap, key: &str) -> bool {
    props
        .get(key)
        .and_then(PropertyValue::as_bool)
        .unwrap_or(false)
}

fn is_medium(props: &PropertyMap) -> bool {
    props.contains_key("MediaOf")
}

pub(crate) fn describe(udi: &Udi, props: &PropertyMap) -> DeviceDescription {
    if is_medium(props) {
        let parent = props
            .get("MediaOf")
            .and_then(PropertyValue::as_str)
            .map(Udi::new);
        return DeviceDescription {
            parent_udi: parent,
            vendor: text_prop(props, "Vendor"),
            product: text_prop(props, "Media"),
            description: "Optical Disc".to_string(),
            icon: "media-optical".to_string(),
            emblems: Vec::new(),
        };
    }

    if udi.as_str().starts_with(DRIVE_PREFIX) {
        let vendor = text_prop(props, "Vendor");
        let product = text_prop(props, "Model");
        let description = format!("{vendor} {product}").trim().to_string();
        let icon = if bool_prop(props, "Optical") {
            "drive-optical"
        } else if bool_prop(props, "Removable") {
            "drive-removable-media"
        } else {
            "drive-harddisk"
        };
        return DeviceDescription {
            parent_udi: None,
            vendor,
            product,
            description,
            icon: icon.to_string(),
            emblems: Vec::new(),
        };
    }

    // Block device: identity comes from filesystem metadata with the device
    // node as fallback.
    let device_node = text_prop(props, "Device");
    let label = text_prop(props, "IdLabel");
    let product = if label.is_empty() {
        device_node.clone()
    } else {
        label
    };
    let parent = props
        .get("Drive")
        .and_then(PropertyValue::as_str)
        .filter(|p| *p != "/")
        .map(Udi::new);

    let mut emblems = Vec::new();
    if props
        .get("MountPoints")
        .and_then(PropertyValue::as_str_list)
        .is_some_and(|l| !l.is_empty())
    {
        emblems.push("mounted".to_string());
    }

    DeviceDescription {
        parent_udi: parent,
        vendor: String::new(),
        product: product.clone(),
        description: product,
        icon: "drive-harddisk".to_string(),
        emblems,
    }
}

/// The disk daemon's capability predicate table.
pub(crate) fn supports(props: &PropertyMap, capability: Capability) -> bool {
    match capability {
        Capability::Generic => true,
        // A block device exposes a device-number pair.
        Capability::Block => props.contains_key("DeviceMajor"),
        Capability::StorageVolume => {
            props.contains_key("DeviceMajor")
                && props
                    .get("IdUsage")
                    .and_then(PropertyValue::as_str)
                    .is_some_and(|s| !s.is_empty())
        }
        Capability::StorageAccess => {
            props.get("IdUsage").and_then(PropertyValue::as_str) == Some("filesystem")
        }
        Capability::StorageDrive => !is_medium(props) && props.contains_key("Ejectable"),
        Capability::OpticalDrive => !is_medium(props) && bool_prop(props, "Optical"),
        Capability::OpticalDisc => is_medium(props) && bool_prop(props, "MediaAvailable"),
        _ => false,
    }
}

/// The disk daemon's interface factory table.
pub(crate) fn instantiate<'a>(
    device: &'a Device,
    capability: Capability,
) -> Option<DeviceInterface<'a>> {
    match capability {
        Capability::Generic => Some(DeviceInterface::Generic(GenericInterface::new(device))),
        Capability::Block => Some(DeviceInterface::Block(Box::new(UDisksBlock { device }))),
        Capability::StorageAccess => Some(DeviceInterface::StorageAccess(Box::new(
            UDisksStorageAccess { device },
        ))),
        Capability::StorageDrive => Some(DeviceInterface::StorageDrive(Box::new(
            UDisksStorageDrive { device },
        ))),
        Capability::OpticalDrive => Some(DeviceInterface::OpticalDrive(Box::new(
            UDisksOpticalDrive { device },
        ))),
        Capability::StorageVolume => Some(DeviceInterface::StorageVolume(Box::new(
            UDisksStorageVolume { device },
        ))),
        Capability::OpticalDisc => Some(DeviceInterface::OpticalDisc(Box::new(UDisksOpticalDisc {
            device,
        }))),
        _ => None,
    }
}

struct UDisksBlock<'a> {
    device: &'a Device,
}

#[async_trait]
impl Block for UDisksBlock<'_> {
    async fn major(&self) -> Result<i64, HardwareError> {
        Ok(self
            .device
            .property("DeviceMajor")
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(-1))
    }

    async fn minor(&self) -> Result<i64, HardwareError> {
        Ok(self
            .device
            .property("DeviceMinor")
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(-1))
    }

    async fn device(&self) -> Result<String, HardwareError> {
        Ok(self
            .device
            .property("Device")
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }
}

struct UDisksStorageAccess<'a> {
    device: &'a Device,
}

#[async_trait]
impl StorageAccess for UDisksStorageAccess<'_> {
    async fn is_accessible(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("MountPoints")
            .and_then(PropertyValue::as_str_list)
            .is_some_and(|l| !l.is_empty()))
    }

    async fn file_path(&self) -> Result<Option<String>, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("MountPoints")
            .and_then(PropertyValue::as_str_list)
            .and_then(|l| l.first().cloned()))
    }

    async fn setup(&self) -> Result<(), HardwareError> {
        self.device.setup().await
    }

    async fn teardown(&self) -> Result<(), HardwareError> {
        self.device.teardown().await
    }
}

struct UDisksStorageDrive<'a> {
    device: &'a Device,
}

#[async_trait]
impl StorageDrive for UDisksStorageDrive<'_> {
    async fn drive_type(&self) -> Result<DriveType, HardwareError> {
        let props = self.device.all_properties().await?;
        if bool_prop(&props, "Optical") {
            return Ok(DriveType::CdromDrive);
        }
        let compat = props
            .get("MediaCompatibility")
            .and_then(PropertyValue::as_str_list)
            .unwrap_or(&[]);
        if compat.iter().any(|m| m.contains("floppy")) {
            return Ok(DriveType::Floppy);
        }
        if compat.iter().any(|m| m.starts_with("flash_cf")) {
            return Ok(DriveType::CompactFlash);
        }
        if compat.iter().any(|m| m.starts_with("flash_ms")) {
            return Ok(DriveType::MemoryStick);
        }
        if compat.iter().any(|m| m.starts_with("flash_sm")) {
            return Ok(DriveType::SmartMedia);
        }
        if compat.iter().any(|m| m.starts_with("flash_sd") || m.starts_with("flash_mmc")) {
            return Ok(DriveType::SdMmc);
        }
        Ok(DriveType::HardDisk)
    }

    async fn is_removable(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(bool_prop(&props, "Removable") || bool_prop(&props, "MediaRemovable"))
    }

    async fn is_hotpluggable(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(matches!(
            props.get("ConnectionBus").and_then(PropertyValue::as_str),
            Some("usb") | Some("ieee1394")
        ))
    }

    async fn size(&self) -> Result<u64, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("Size")
            .and_then(PropertyValue::as_u64)
            .unwrap_or(0))
    }
}

struct UDisksOpticalDrive<'a> {
    device: &'a Device,
}

fn optical_media_from_compat(token: &str) -> Option<OpticalMedia> {
    match token {
        "optical_cd_r" => Some(OpticalMedia::Cdr),
        "optical_cd_rw" => Some(OpticalMedia::Cdrw),
        "optical_dvd" => Some(OpticalMedia::Dvd),
        "optical_dvd_r" => Some(OpticalMedia::Dvdr),
        "optical_dvd_rw" => Some(OpticalMedia::Dvdrw),
        "optical_dvd_ram" => Some(OpticalMedia::DvdRam),
        "optical_dvd_plus_r" => Some(OpticalMedia::DvdPlusR),
        "optical_dvd_plus_rw" => Some(OpticalMedia::DvdPlusRw),
        "optical_dvd_plus_r_dl" | "optical_dvd_plus_rw_dl" => Some(OpticalMedia::DvdPlusDl),
        "optical_bd" => Some(OpticalMedia::Bd),
        "optical_bd_r" => Some(OpticalMedia::Bdr),
        "optical_bd_re" => Some(OpticalMedia::Bdre),
        "optical_hddvd" => Some(OpticalMedia::HdDvd),
        "optical_hddvd_r" => Some(OpticalMedia::HdDvdr),
        "optical_hddvd_rw" => Some(OpticalMedia::HdDvdrw),
        _ => None,
    }
}

#[async_trait]
impl OpticalDrive for UDisksOpticalDrive<'_> {
    async fn supported_media(&self) -> Result<Vec<OpticalMedia>, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("MediaCompatibility")
            .and_then(PropertyValue::as_str_list)
            .unwrap_or(&[])
            .iter()
            .filter_map(|t| optical_media_from_compat(t))
            .collect())
    }

    async fn read_speed(&self) -> Result<u64, HardwareError> {
        Ok(self
            .device
            .property("OpticalReadSpeed")
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    async fn write_speed(&self) -> Result<u64, HardwareError> {
        Ok(self
            .device
            .property("OpticalWriteSpeed")
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }

    async fn eject(&self) -> Result<(), HardwareError> {
        self.device.eject().await
    }
}

struct UDisksStorageVolume<'a> {
    device: &'a Device,
}

#[async_trait]
impl StorageVolume for UDisksStorageVolume<'_> {
    async fn fs_type(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(text_prop(&props, "IdType"))
    }

    async fn label(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(text_prop(&props, "IdLabel"))
    }

    async fn uuid(&self) -> Result<String, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(text_prop(&props, "IdUUID"))
    }

    async fn size(&self) -> Result<u64, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("Size")
            .and_then(PropertyValue::as_u64)
            .unwrap_or(0))
    }

    async fn is_ignored(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        let usage = text_prop(&props, "IdUsage");
        Ok(usage != "filesystem" || bool_prop(&props, "HintIgnore"))
    }
}

struct UDisksOpticalDisc<'a> {
    device: &'a Device,
}

#[async_trait]
impl OpticalDisc for UDisksOpticalDisc<'_> {
    async fn content(&self) -> Result<Vec<DiscContent>, HardwareError> {
        let props = self.device.all_properties().await?;
        let audio_tracks = props
            .get("OpticalNumAudioTracks")
            .and_then(PropertyValue::as_u64)
            .unwrap_or(0);
        let data_tracks = props
            .get("OpticalNumDataTracks")
            .and_then(PropertyValue::as_u64)
            .unwrap_or(0);

        let mut content = Vec::new();
        if audio_tracks > 0 {
            content.push(DiscContent::Audio);
        }
        if data_tracks > 0 {
            content.push(DiscContent::Data);
        }
        if content.is_empty() {
            content.push(DiscContent::NoContent);
        }
        Ok(content)
    }

    async fn is_blank(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(bool_prop(&props, "OpticalBlank"))
    }

    async fn is_rewritable(&self) -> Result<bool, HardwareError> {
        let props = self.device.all_properties().await?;
        let media = text_prop(&props, "Media");
        Ok(media.ends_with("_rw") || media.ends_with("_re") || media.ends_with("_ram"))
    }

    async fn capacity(&self) -> Result<u64, HardwareError> {
        let props = self.device.all_properties().await?;
        Ok(props
            .get("Size")
            .and_then(PropertyValue::as_u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn drive_props(optical: bool) -> PropertyMap {
        PropertyMap::from([
            ("Vendor".to_string(), PropertyValue::from("ACME")),
            ("Model".to_string(), PropertyValue::from("Disk 3000")),
            ("Ejectable".to_string(), PropertyValue::Bool(optical)),
            ("Removable".to_string(), PropertyValue::Bool(optical)),
            ("Optical".to_string(), PropertyValue::Bool(optical)),
            ("MediaAvailable".to_string(), PropertyValue::Bool(optical)),
        ])
    }

    fn volume_props() -> PropertyMap {
        PropertyMap::from([
            ("DeviceMajor".to_string(), PropertyValue::Int(8)),
            ("DeviceMinor".to_string(), PropertyValue::Int(1)),
            ("Device".to_string(), PropertyValue::from("/dev/sda1")),
            ("IdUsage".to_string(), PropertyValue::from("filesystem")),
            ("IdType".to_string(), PropertyValue::from("ext4")),
            (
                "MountPoints".to_string(),
                PropertyValue::TextList(vec!["/mnt/data".to_string()]),
            ),
        ])
    }

    #[test]
    fn predicate_table_distinguishes_drive_volume_and_medium() {
        let drive = drive_props(true);
        assert!(supports(&drive, Capability::StorageDrive));
        assert!(supports(&drive, Capability::OpticalDrive));
        assert!(!supports(&drive, Capability::OpticalDisc));
        assert!(!supports(&drive, Capability::Block));

        let mut medium = drive_props(true);
        medium.insert(
            "MediaOf".to_string(),
            PropertyValue::from("/org/freedesktop/UDisks2/drives/sr0"),
        );
        assert!(supports(&medium, Capability::OpticalDisc));
        assert!(!supports(&medium, Capability::StorageDrive));
        assert!(!supports(&medium, Capability::OpticalDrive));

        let volume = volume_props();
        assert!(supports(&volume, Capability::Block));
        assert!(supports(&volume, Capability::StorageVolume));
        assert!(supports(&volume, Capability::StorageAccess));
        assert!(!supports(&volume, Capability::StorageDrive));
    }

    #[test]
    fn medium_description_points_back_at_its_drive() {
        let drive_udi = Udi::new("/org/freedesktop/UDisks2/drives/sr0");
        let mut medium = drive_props(true);
        medium.insert(
            "MediaOf".to_string(),
            PropertyValue::from(drive_udi.as_str()),
        );

        let desc = describe(&Udi::media_of(&drive_udi), &medium);
        assert_eq!(desc.parent_udi, Some(drive_udi));
        assert_eq!(desc.icon, "media-optical");
    }

    #[test]
    fn drive_signals_fan_out_to_the_medium_udi() {
        let notifier = Notifier::new();
        let drive = Udi::new("/org/freedesktop/UDisks2/drives/sr0");
        let mut medium_rx = notifier.subscribe(&Udi::media_of(&drive));
        let mut drive_rx = notifier.subscribe(&drive);

        notify_object(&notifier, ChangeKind::Changed, drive.as_str().to_string());

        assert_eq!(drive_rx.try_recv().unwrap().udi, drive);
        let event = medium_rx.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Changed);
        assert_eq!(event.udi, Udi::media_of(&drive));

        // Non-drive objects do not grow a phantom medium.
        notify_object(
            &notifier,
            ChangeKind::Changed,
            "/org/freedesktop/UDisks2/block_devices/sda1".to_string(),
        );
        assert!(medium_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn medium_handle_cache_clears_on_drive_change() {
        let drive = Udi::new("/org/freedesktop/UDisks2/drives/sr0");
        let medium = Udi::media_of(&drive);
        let mut props = drive_props(true);
        props.insert(
            "MediaOf".to_string(),
            PropertyValue::from(drive.as_str()),
        );
        let backend = crate::testkit::FakeBackend::with_device(medium.as_str(), props.clone());
        let device = backend.clone().device(medium.as_str());

        assert!(
            device
                .property("MediaAvailable")
                .await
                .unwrap()
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        );

        // Disc removed; the daemon signals on the drive object only.
        props.insert("MediaAvailable".to_string(), PropertyValue::Bool(false));
        backend.set_properties(&medium, props);
        notify_object(
            backend.notifier_ref(),
            ChangeKind::Changed,
            drive.as_str().to_string(),
        );

        assert_eq!(
            device.property("MediaAvailable").await.unwrap(),
            Some(PropertyValue::Bool(false))
        );
    }

    #[test]
    fn eject_on_a_medium_targets_the_drive_object() {
        let drive = Udi::new("/org/freedesktop/UDisks2/drives/sr0");
        let medium = Udi::media_of(&drive);
        assert_eq!(operation_target(OperationKind::Eject, &medium), drive);

        let block = Udi::new("/org/freedesktop/UDisks2/block_devices/sda1");
        assert_eq!(operation_target(OperationKind::Setup, &block), block);
    }

    #[test]
    fn daemon_error_names_map_to_wire_codes() {
        let err = zbus::Error::MethodError(
            "org.freedesktop.UDisks2.Error.DeviceBusy".try_into().unwrap(),
            Some("target is busy".to_string()),
            zbus::message::Message::method_call("/", "Ping")
                .unwrap()
                .build(&())
                .unwrap(),
        );
        let completion = completion_for_bus_error(&err);
        assert_eq!(completion.code.as_deref(), Some("Busy"));
        assert_eq!(completion.message, "target is busy");

        let err = zbus::Error::MethodError(
            "org.freedesktop.PolicyKit1.Error.NotAuthorized".try_into().unwrap(),
            None,
            zbus::message::Message::method_call("/", "Ping")
                .unwrap()
                .build(&())
                .unwrap(),
        );
        assert_eq!(
            completion_for_bus_error(&err).code.as_deref(),
            Some("Unauthorized")
        );
    }

    #[test]
    fn media_compatibility_tokens_map_to_media_kinds() {
        assert_eq!(
            optical_media_from_compat("optical_dvd_plus_r"),
            Some(OpticalMedia::DvdPlusR)
        );
        assert_eq!(optical_media_from_compat("flash_sd"), None);
    }

    struct FakeOps {
        hub: Arc<CompletionHub>,
        completion: Completion,
        requests: Mutex<Vec<(OperationKind, Udi)>>,
    }

    impl StorageOps for FakeOps {
        fn request(
            &self,
            kind: OperationKind,
            udi: Udi,
        ) -> BoxFuture<'_, Result<(), HardwareError>> {
            self.requests.lock().unwrap().push((kind, udi.clone()));
            let completion = self.completion.clone();
            self.hub.complete(&udi, completion);
            Box::pin(async { Ok(()) })
        }
    }

    fn settings() -> OpSettings {
        OpSettings {
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn successful_eject_runs_to_completion() {
        let hub = Arc::new(CompletionHub::new());
        let ops = FakeOps {
            hub: hub.clone(),
            completion: Completion::success(),
            requests: Mutex::new(Vec::new()),
        };
        let udi = Udi::new("/org/freedesktop/UDisks2/drives/sr0");

        run_operation(&hub, &ops, &settings(), OperationKind::Eject, &udi)
            .await
            .unwrap();

        assert_eq!(
            *ops.requests.lock().unwrap(),
            vec![(OperationKind::Eject, udi)]
        );
    }

    #[tokio::test]
    async fn busy_eject_resolves_to_device_busy_with_message() {
        let hub = Arc::new(CompletionHub::new());
        let ops = FakeOps {
            hub: hub.clone(),
            completion: Completion::failure("Busy", "drive in use"),
            requests: Mutex::new(Vec::new()),
        };
        let udi = Udi::new("/org/freedesktop/UDisks2/drives/sr0");

        let err = run_operation(&hub, &ops, &settings(), OperationKind::Eject, &udi)
            .await
            .unwrap_err();

        match err {
            HardwareError::Operation { kind, message } => {
                assert_eq!(kind, ErrorType::DeviceBusy);
                assert_eq!(message, "drive in use");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
