//! Capability interface contracts
//!
//! One read-mostly trait per capability, implemented per backend, plus the
//! closed [`DeviceInterface`] dispatch enum. Interfaces are only ever obtained
//! through [`Device::interface`](crate::device::Device::interface) and borrow
//! the device that created them; all their reads go through that device's
//! property cache.

use async_trait::async_trait;
use hardware_types::{
    AudioDriver, AudioInterfaceType, BatteryType, Capability, ChargeState, DiscContent, DriveType,
    NetworkProtocol, OpticalMedia, PropertyMap, PropertyValue, SoundcardType,
};

use crate::device::Device;
use crate::error::HardwareError;

/// Typed change events derived by diffing cached battery values against a
/// fresh read. Emitted only when the typed value actually differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatteryEvent {
    ChargePercentChanged(i64),
    ChargeStateChanged(ChargeState),
    PlugStateChanged(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcAdapterEvent {
    PlugStateChanged(bool),
}

#[async_trait]
pub trait Battery: Send + Sync {
    async fn is_plugged(&self) -> Result<bool, HardwareError>;
    async fn battery_type(&self) -> Result<BatteryType, HardwareError>;
    /// Charge level clamped to `[0, 100]`.
    async fn charge_percent(&self) -> Result<i64, HardwareError>;
    async fn is_rechargeable(&self) -> Result<bool, HardwareError>;
    async fn charge_state(&self) -> Result<ChargeState, HardwareError>;
    /// Drain pending change notifications and report typed differences since
    /// the previous observation. The first call establishes the baseline and
    /// reports nothing.
    async fn poll_events(&self) -> Result<Vec<BatteryEvent>, HardwareError>;
}

#[async_trait]
pub trait AcAdapter: Send + Sync {
    async fn is_plugged(&self) -> Result<bool, HardwareError>;
    async fn poll_events(&self) -> Result<Vec<AcAdapterEvent>, HardwareError>;
}

#[async_trait]
pub trait AudioInterface: Send + Sync {
    async fn driver(&self) -> Result<AudioDriver, HardwareError>;
    /// Driver-specific handle (e.g. an ALSA card identifier); opaque to
    /// callers.
    async fn driver_handle(&self) -> Result<String, HardwareError>;
    async fn name(&self) -> Result<String, HardwareError>;
    async fn device_type(&self) -> Result<AudioInterfaceType, HardwareError>;
    async fn soundcard_type(&self) -> Result<SoundcardType, HardwareError>;
}

#[async_trait]
pub trait StorageAccess: Send + Sync {
    async fn is_accessible(&self) -> Result<bool, HardwareError>;
    async fn file_path(&self) -> Result<Option<String>, HardwareError>;
    /// Mount; blocks the caller until the backend reports completion.
    async fn setup(&self) -> Result<(), HardwareError>;
    /// Unmount; blocks the caller until the backend reports completion.
    async fn teardown(&self) -> Result<(), HardwareError>;
}

#[async_trait]
pub trait StorageDrive: Send + Sync {
    async fn drive_type(&self) -> Result<DriveType, HardwareError>;
    async fn is_removable(&self) -> Result<bool, HardwareError>;
    async fn is_hotpluggable(&self) -> Result<bool, HardwareError>;
    async fn size(&self) -> Result<u64, HardwareError>;
}

#[async_trait]
pub trait OpticalDrive: Send + Sync {
    async fn supported_media(&self) -> Result<Vec<OpticalMedia>, HardwareError>;
    async fn read_speed(&self) -> Result<u64, HardwareError>;
    async fn write_speed(&self) -> Result<u64, HardwareError>;
    /// Eject the medium; blocks the caller until the backend reports
    /// completion.
    async fn eject(&self) -> Result<(), HardwareError>;
}

#[async_trait]
pub trait StorageVolume: Send + Sync {
    async fn fs_type(&self) -> Result<String, HardwareError>;
    async fn label(&self) -> Result<String, HardwareError>;
    async fn uuid(&self) -> Result<String, HardwareError>;
    async fn size(&self) -> Result<u64, HardwareError>;
    /// Volumes the desktop should not surface (swap, boot partitions).
    async fn is_ignored(&self) -> Result<bool, HardwareError>;
}

#[async_trait]
pub trait OpticalDisc: Send + Sync {
    async fn content(&self) -> Result<Vec<DiscContent>, HardwareError>;
    async fn is_blank(&self) -> Result<bool, HardwareError>;
    async fn is_rewritable(&self) -> Result<bool, HardwareError>;
    async fn capacity(&self) -> Result<u64, HardwareError>;
}

#[async_trait]
pub trait Block: Send + Sync {
    async fn major(&self) -> Result<i64, HardwareError>;
    async fn minor(&self) -> Result<i64, HardwareError>;
    /// Device node path, e.g. `/dev/sda1`.
    async fn device(&self) -> Result<String, HardwareError>;
}

#[async_trait]
pub trait NetworkInterface: Send + Sync {
    async fn iface_name(&self) -> Result<String, HardwareError>;
    async fn hw_address(&self) -> Result<String, HardwareError>;
    async fn iface_index(&self) -> Result<i64, HardwareError>;
    async fn is_wireless(&self) -> Result<bool, HardwareError>;
}

#[async_trait]
pub trait SerialInterface: Send + Sync {
    async fn driver_handle(&self) -> Result<String, HardwareError>;
    async fn serial_type(&self) -> Result<String, HardwareError>;
    async fn port(&self) -> Result<i64, HardwareError>;
}

#[async_trait]
pub trait DvbInterface: Send + Sync {
    async fn device(&self) -> Result<String, HardwareError>;
    async fn device_adapter(&self) -> Result<i64, HardwareError>;
    async fn device_index(&self) -> Result<i64, HardwareError>;
}

#[async_trait]
pub trait Camera: Send + Sync {
    async fn supported_protocols(&self) -> Result<Vec<NetworkProtocol>, HardwareError>;
    async fn supported_drivers(&self) -> Result<Vec<String>, HardwareError>;
}

#[async_trait]
pub trait PortableMediaPlayer: Send + Sync {
    async fn supported_protocols(&self) -> Result<Vec<NetworkProtocol>, HardwareError>;
    async fn supported_drivers(&self) -> Result<Vec<String>, HardwareError>;
}

#[async_trait]
pub trait Processor: Send + Sync {
    async fn number(&self) -> Result<i64, HardwareError>;
    async fn max_speed(&self) -> Result<i64, HardwareError>;
    async fn can_change_frequency(&self) -> Result<bool, HardwareError>;
}

#[async_trait]
pub trait Button: Send + Sync {
    async fn button_type(&self) -> Result<String, HardwareError>;
    async fn has_state(&self) -> Result<bool, HardwareError>;
    async fn state_value(&self) -> Result<bool, HardwareError>;
}

#[async_trait]
pub trait Video: Send + Sync {
    async fn supported_protocols(&self) -> Result<Vec<String>, HardwareError>;
    async fn supported_drivers(&self) -> Result<Vec<String>, HardwareError>;
    async fn driver_handle(&self) -> Result<String, HardwareError>;
}

#[async_trait]
pub trait InternetGateway: Send + Sync {
    async fn is_enabled(&self) -> Result<bool, HardwareError>;
}

#[async_trait]
pub trait SmartCardReader: Send + Sync {
    async fn reader_type(&self) -> Result<String, HardwareError>;
}

#[async_trait]
pub trait NetworkShare: Send + Sync {
    async fn share_type(&self) -> Result<String, HardwareError>;
    async fn url(&self) -> Result<String, HardwareError>;
}

/// The untyped escape hatch: raw property access for devices (or properties)
/// no typed capability covers.
pub struct GenericInterface<'a> {
    device: &'a Device,
}

impl<'a> GenericInterface<'a> {
    pub(crate) fn new(device: &'a Device) -> Self {
        GenericInterface { device }
    }

    pub async fn property(&self, key: &str) -> Result<Option<PropertyValue>, HardwareError> {
        self.device.property(key).await
    }

    pub async fn all_properties(&self) -> Result<PropertyMap, HardwareError> {
        self.device.all_properties().await
    }

    pub async fn property_exists(&self, key: &str) -> Result<bool, HardwareError> {
        self.device.property_exists(key).await
    }
}

/// A typed view over one device, valid as long as the device handle that
/// created it.
pub enum DeviceInterface<'a> {
    Generic(GenericInterface<'a>),
    Processor(Box<dyn Processor + 'a>),
    Block(Box<dyn Block + 'a>),
    StorageAccess(Box<dyn StorageAccess + 'a>),
    StorageDrive(Box<dyn StorageDrive + 'a>),
    OpticalDrive(Box<dyn OpticalDrive + 'a>),
    StorageVolume(Box<dyn StorageVolume + 'a>),
    OpticalDisc(Box<dyn OpticalDisc + 'a>),
    Camera(Box<dyn Camera + 'a>),
    PortableMediaPlayer(Box<dyn PortableMediaPlayer + 'a>),
    NetworkInterface(Box<dyn NetworkInterface + 'a>),
    AcAdapter(Box<dyn AcAdapter + 'a>),
    Battery(Box<dyn Battery + 'a>),
    Button(Box<dyn Button + 'a>),
    AudioInterface(Box<dyn AudioInterface + 'a>),
    DvbInterface(Box<dyn DvbInterface + 'a>),
    Video(Box<dyn Video + 'a>),
    SerialInterface(Box<dyn SerialInterface + 'a>),
    InternetGateway(Box<dyn InternetGateway + 'a>),
    SmartCardReader(Box<dyn SmartCardReader + 'a>),
    NetworkShare(Box<dyn NetworkShare + 'a>),
}

impl<'a> DeviceInterface<'a> {
    pub fn capability(&self) -> Capability {
        match self {
            DeviceInterface::Generic(_) => Capability::Generic,
            DeviceInterface::Processor(_) => Capability::Processor,
            DeviceInterface::Block(_) => Capability::Block,
            DeviceInterface::StorageAccess(_) => Capability::StorageAccess,
            DeviceInterface::StorageDrive(_) => Capability::StorageDrive,
            DeviceInterface::OpticalDrive(_) => Capability::OpticalDrive,
            DeviceInterface::StorageVolume(_) => Capability::StorageVolume,
            DeviceInterface::OpticalDisc(_) => Capability::OpticalDisc,
            DeviceInterface::Camera(_) => Capability::Camera,
            DeviceInterface::PortableMediaPlayer(_) => Capability::PortableMediaPlayer,
            DeviceInterface::NetworkInterface(_) => Capability::NetworkInterface,
            DeviceInterface::AcAdapter(_) => Capability::AcAdapter,
            DeviceInterface::Battery(_) => Capability::Battery,
            DeviceInterface::Button(_) => Capability::Button,
            DeviceInterface::AudioInterface(_) => Capability::AudioInterface,
            DeviceInterface::DvbInterface(_) => Capability::DvbInterface,
            DeviceInterface::Video(_) => Capability::Video,
            DeviceInterface::SerialInterface(_) => Capability::SerialInterface,
            DeviceInterface::InternetGateway(_) => Capability::InternetGateway,
            DeviceInterface::SmartCardReader(_) => Capability::SmartCardReader,
            DeviceInterface::NetworkShare(_) => Capability::NetworkShare,
        }
    }

    pub fn as_generic(&self) -> Option<&GenericInterface<'a>> {
        match self {
            DeviceInterface::Generic(iface) => Some(iface),
            _ => None,
        }
    }

    pub fn as_battery(&self) -> Option<&(dyn Battery + 'a)> {
        match self {
            DeviceInterface::Battery(iface) => Some(iface.as_ref()),
            _ => None,
        }
    }

    pub fn as_ac_adapter(&self) -> Option<&(dyn AcAdapter + 'a)> {
        match self {
            DeviceInterface::AcAdapter(iface) => Some(iface.as_ref()),
            _ => None,
        }
    }

    pub fn as_storage_access(&self) -> Option<&(dyn StorageAccess + 'a)> {
        match self {
            DeviceInterface::StorageAccess(iface) => Some(iface.as_ref()),
            _ => None,
        }
    }

    pub fn as_storage_drive(&self) -> Option<&(dyn StorageDrive + 'a)> {
        match self {
            DeviceInterface::StorageDrive(iface) => Some(iface.as_ref()),
            _ => None,
        }
    }

    pub fn as_optical_drive(&self) -> Option<&(dyn OpticalDrive + 'a)> {
        match self {
            DeviceInterface::OpticalDrive(iface) => Some(iface.as_ref()),
            _ => None,
        }
    }

    pub fn as_storage_volume(&self) -> Option<&(dyn StorageVolume + 'a)> {
        match self {
            DeviceInterface::StorageVolume(iface) => Some(iface.as_ref()),
            _ => None,
        }
    }

    pub fn as_optical_disc(&self) -> Option<&(dyn OpticalDisc + 'a)> {
        match self {
            DeviceInterface::OpticalDisc(iface) => Some(iface.as_ref()),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&(dyn Block + 'a)> {
        match self {
            DeviceInterface::Block(iface) => Some(iface.as_ref()),
            _ => None,
        }
    }
}
