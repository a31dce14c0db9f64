use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod traits;
pub use traits::BlockStore;

/// Logical sector size used throughout the mapping layer. Table extents are
/// expressed in units of this size; the data plane carves byte ranges.
pub const SECTOR_SIZE: u64 = 512;

/// Convert a sector count to bytes.
pub fn sectors_to_bytes(sectors: u64) -> u64 {
    sectors * SECTOR_SIZE
}

/// True when `bytes` falls on a sector boundary.
pub fn sector_aligned(bytes: u64) -> bool {
    bytes % SECTOR_SIZE == 0
}

/// Selector used when resolving a mapped device on the control plane.
///
/// The tooling sends some subset of name, uuid and unit number with each
/// command; lookup tries them in that order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<u32>,
}

impl DeviceSelector {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_minor(minor: u32) -> Self {
        Self {
            minor: Some(minor),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.uuid.is_none() && self.minor.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_helpers() {
        assert_eq!(sectors_to_bytes(8), 4096);
        assert!(sector_aligned(0));
        assert!(sector_aligned(1024));
        assert!(!sector_aligned(100));
    }

    #[test]
    fn selector_construction() {
        let sel = DeviceSelector::by_name("vol0");
        assert_eq!(sel.name.as_deref(), Some("vol0"));
        assert!(!sel.is_empty());
        assert!(DeviceSelector::default().is_empty());
    }
}
