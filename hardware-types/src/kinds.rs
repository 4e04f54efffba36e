//! Typed sub-enums used by the capability interface contracts

use serde::{Deserialize, Serialize};

/// What a battery powers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryType {
    Primary,
    Ups,
    Monitor,
    Mouse,
    Keyboard,
    Pda,
    Phone,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeState {
    NoCharge,
    Charging,
    Discharging,
}

/// Bus a storage drive hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveType {
    HardDisk,
    CdromDrive,
    Floppy,
    Tape,
    CompactFlash,
    MemoryStick,
    SmartMedia,
    SdMmc,
}

/// Media a drive can accept or a disc can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpticalMedia {
    Cdr,
    Cdrw,
    Dvd,
    Dvdr,
    Dvdrw,
    DvdRam,
    DvdPlusR,
    DvdPlusRw,
    DvdPlusDl,
    Bd,
    Bdr,
    Bdre,
    HdDvd,
    HdDvdr,
    HdDvdrw,
}

/// What an optical disc currently carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscContent {
    NoContent,
    Audio,
    Data,
    VideoCd,
    SuperVideoCd,
    VideoDvd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioDriver {
    Alsa,
    OpenSoundSystem,
    UnknownAudioDriver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioInterfaceType {
    AudioControl,
    AudioInput,
    AudioOutput,
    UnknownAudioInterfaceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoundcardType {
    InternalSoundcard,
    UsbSoundcard,
    FirewireSoundcard,
    Headset,
    Modem,
}

/// Protocols a camera or media player speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkProtocol {
    Ptp,
    Mtp,
    MassStorage,
    Proprietary,
}
