//! Universal device identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix the disk daemon appends to a drive UDI to name the medium currently
/// inserted in it. Kept for external compatibility; code should go through
/// [`Udi::media_of`] and [`Udi::media_parent`] instead of matching on it.
const MEDIA_SUFFIX: &str = ":media";

/// An opaque identifier naming a device within the combined backend namespace.
///
/// UDIs are stable for the lifetime of the device and unique across all
/// backends in use. They may encode a path-like hierarchy (a volume's UDI
/// derived from its drive's), but nothing outside the owning backend should
/// parse them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Udi(String);

impl Udi {
    pub fn new(s: impl Into<String>) -> Self {
        Udi(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The UDI of the medium inserted in the given drive.
    pub fn media_of(drive: &Udi) -> Udi {
        Udi(format!("{}{MEDIA_SUFFIX}", drive.0))
    }

    /// Whether this UDI names a medium rather than the drive holding it.
    pub fn is_media(&self) -> bool {
        self.0.ends_with(MEDIA_SUFFIX)
    }

    /// The drive UDI a medium UDI was derived from, if any.
    pub fn media_parent(&self) -> Option<Udi> {
        self.0
            .strip_suffix(MEDIA_SUFFIX)
            .map(|s| Udi(s.to_string()))
    }

    /// Prefix test used by backends to claim their UDI namespace.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Udi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Udi {
    fn from(s: &str) -> Self {
        Udi(s.to_string())
    }
}

impl From<String> for Udi {
    fn from(s: String) -> Self {
        Udi(s)
    }
}

impl AsRef<str> for Udi {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_udi_round_trips_to_its_drive() {
        let drive = Udi::new("/org/freedesktop/UDisks2/drives/sr0");
        let media = Udi::media_of(&drive);
        assert!(media.is_media());
        assert!(!drive.is_media());
        assert_eq!(media.media_parent(), Some(drive));
    }

    #[test]
    fn plain_udi_has_no_media_parent() {
        assert_eq!(Udi::new("/org/example/devices/eth0").media_parent(), None);
    }
}
