// SPDX-License-Identifier: GPL-3.0-only

//! Hardware facade over the kernel device tree, the power daemon and the
//! disk daemon.
//!
//! Applications resolve or enumerate [`Device`] handles through a
//! [`HardwareManager`], then query and instantiate capability interfaces
//! without knowing which subsystem backs the device. Property reads are
//! cached per device and invalidated wholesale on backend change
//! notifications; mount/unmount/eject run asynchronously against the disk
//! daemon with a bounded completion wait.

pub mod backend;
pub mod device;
pub mod error;
pub mod iface;
pub mod manager;
pub mod notify;
pub mod ops;
pub mod query;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export the shared vocabulary crate.
pub use hardware_types;
pub use hardware_types::{Capability, ErrorType, PropertyMap, PropertyValue, Udi};

pub use backend::{DeviceBackend, DeviceDescription};
pub use device::Device;
pub use error::HardwareError;
pub use iface::DeviceInterface;
pub use manager::{DeviceEventStream, Filter, HardwareManager};
pub use notify::{ChangeEvent, ChangeKind, Notifier};
pub use ops::{Completion, CompletionHub, OpSettings, OperationKind, OperationState};
pub use query::Query;
