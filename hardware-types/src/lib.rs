// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain vocabulary for the hardware facade
//!
//! This crate defines the types shared between the core library and its
//! consumers:
//!
//! - **hardware-dbus**: returns these types from its public API
//! - **hardware-cli**: parses and prints them on the command line
//!
//! It deliberately carries no bus dependency; conversion from D-Bus variant
//! values lives in `hardware-dbus`.

pub mod capability;
pub mod error;
pub mod kinds;
pub mod property;
pub mod udi;

pub use capability::Capability;
pub use error::ErrorType;
pub use kinds::{
    AudioDriver, AudioInterfaceType, BatteryType, ChargeState, DiscContent, DriveType,
    NetworkProtocol, OpticalMedia, SoundcardType,
};
pub use property::{PropertyMap, PropertyValue};
pub use udi::Udi;
