//! The closed set of capabilities a device may expose

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A backend-independent behavior a device may or may not support.
///
/// Every value maps, per backend, to zero or one concrete interface
/// implementation; the set is closed so dispatch tables can be checked
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Generic,
    Processor,
    Block,
    StorageAccess,
    StorageDrive,
    OpticalDrive,
    StorageVolume,
    OpticalDisc,
    Camera,
    PortableMediaPlayer,
    NetworkInterface,
    AcAdapter,
    Battery,
    Button,
    AudioInterface,
    DvbInterface,
    Video,
    SerialInterface,
    InternetGateway,
    SmartCardReader,
    NetworkShare,
}

impl Capability {
    /// Every capability, in declaration order. Used for enumeration in the
    /// CLI and for exhaustive per-device capability listings.
    pub const ALL: [Capability; 21] = [
        Capability::Generic,
        Capability::Processor,
        Capability::Block,
        Capability::StorageAccess,
        Capability::StorageDrive,
        Capability::OpticalDrive,
        Capability::StorageVolume,
        Capability::OpticalDisc,
        Capability::Camera,
        Capability::PortableMediaPlayer,
        Capability::NetworkInterface,
        Capability::AcAdapter,
        Capability::Battery,
        Capability::Button,
        Capability::AudioInterface,
        Capability::DvbInterface,
        Capability::Video,
        Capability::SerialInterface,
        Capability::InternetGateway,
        Capability::SmartCardReader,
        Capability::NetworkShare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Generic => "generic",
            Capability::Processor => "processor",
            Capability::Block => "block",
            Capability::StorageAccess => "storage_access",
            Capability::StorageDrive => "storage_drive",
            Capability::OpticalDrive => "optical_drive",
            Capability::StorageVolume => "storage_volume",
            Capability::OpticalDisc => "optical_disc",
            Capability::Camera => "camera",
            Capability::PortableMediaPlayer => "portable_media_player",
            Capability::NetworkInterface => "network_interface",
            Capability::AcAdapter => "ac_adapter",
            Capability::Battery => "battery",
            Capability::Button => "button",
            Capability::AudioInterface => "audio_interface",
            Capability::DvbInterface => "dvb_interface",
            Capability::Video => "video",
            Capability::SerialInterface => "serial_interface",
            Capability::InternetGateway => "internet_gateway",
            Capability::SmartCardReader => "smart_card_reader",
            Capability::NetworkShare => "network_share",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

/// Returned when parsing a capability name nobody declares.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_capability_name() {
        for cap in Capability::ALL {
            let parsed: Capability = cap.as_str().parse().unwrap();
            assert_eq!(parsed, cap);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("flux_capacitor".parse::<Capability>().is_err());
    }
}
