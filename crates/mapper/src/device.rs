//! Mapped devices and the global device list.
//!
//! A device is the virtual block device's identity plus its table pair.
//! Control-plane commands resolve devices by name, uuid or unit number, in
//! that order; the data plane only ever sees an `Arc<MappedDevice>` handed
//! out by this registry.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use common::DeviceSelector;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MapError, Result};
use crate::table::{TableHead, TableSlot};

/// Longest accepted device name.
pub const NAME_LEN: usize = 128;

/// Aggregate data-plane statistics for one device.
#[derive(Default)]
pub struct IoStats {
    reads: AtomicU64,
    writes: AtomicU64,
    flushes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

/// Point-in-time copy of [`IoStats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IoStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub flushes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl IoStats {
    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// One virtual block device.
pub struct MappedDevice {
    name: RwLock<String>,
    uuid: Uuid,
    minor: u32,
    /// Declared capacity in sectors; `None` means the promoted table
    /// defines the device's extent.
    capacity: Option<u64>,
    suspended: AtomicBool,
    open_count: AtomicU32,
    tables: TableHead,
    stats: IoStats,
}

impl MappedDevice {
    fn new(name: String, uuid: Uuid, minor: u32, capacity: Option<u64>) -> Self {
        Self {
            name: RwLock::new(name),
            uuid,
            minor,
            capacity,
            suspended: AtomicBool::new(false),
            open_count: AtomicU32::new(0),
            tables: TableHead::new(),
            stats: IoStats::default(),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().expect("device name lock poisoned").clone()
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    pub fn tables(&self) -> &TableHead {
        &self.tables
    }

    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    /// Size in sectors as published to consumers: the active table's
    /// extent.
    pub fn size_sectors(&self) -> u64 {
        self.tables.size_sectors(TableSlot::Active)
    }

    pub fn open(&self) {
        self.open_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn close(&self) -> Result<()> {
        let mut current = self.open_count.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return Err(MapError::InvalidArgument(
                    "device is not open".to_string(),
                ));
            }
            match self.open_count.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_count.load(Ordering::SeqCst) > 0
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Quiesce the device: new I/O fails busy until resume.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Promote the staged table and lift suspension.
    pub fn resume(&self) -> Result<()> {
        self.tables.promote(self.capacity)?;
        self.suspended.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_name(&self, name: String) {
        *self.name.write().expect("device name lock poisoned") = name;
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MapError::InvalidArgument(
            "device name cannot be empty".to_string(),
        ));
    }
    if name.len() > NAME_LEN {
        return Err(MapError::InvalidArgument(format!(
            "device name longer than {} bytes",
            NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(MapError::InvalidArgument(
            "device name must be alphanumeric with '-', '_' or '.'".to_string(),
        ));
    }
    Ok(())
}

/// Global list of mapped devices.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<Arc<MappedDevice>>>,
    next_minor: AtomicU32,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device. The uuid is generated when the caller does not
    /// supply one; `capacity` caps future table promotions.
    pub fn create(
        &self,
        name: &str,
        uuid: Option<Uuid>,
        capacity: Option<u64>,
    ) -> Result<Arc<MappedDevice>> {
        validate_name(name)?;
        let uuid = uuid.unwrap_or_else(Uuid::new_v4);

        let mut devices = self.devices.write().expect("device list lock poisoned");
        if devices
            .iter()
            .any(|d| d.name() == name || d.uuid() == uuid)
        {
            return Err(MapError::Busy(format!("device already exists: {}", name)));
        }

        let minor = self.next_minor.fetch_add(1, Ordering::SeqCst);
        let device = Arc::new(MappedDevice::new(name.to_string(), uuid, minor, capacity));
        devices.push(Arc::clone(&device));
        info!(device = name, minor, "created mapped device");
        Ok(device)
    }

    /// Resolve a selector by name, then uuid, then minor.
    pub fn lookup(&self, selector: &DeviceSelector) -> Result<Arc<MappedDevice>> {
        let devices = self.devices.read().expect("device list lock poisoned");
        let found = if let Some(name) = &selector.name {
            devices.iter().find(|d| &d.name() == name)
        } else if let Some(uuid) = &selector.uuid {
            devices.iter().find(|d| &d.uuid() == uuid)
        } else if let Some(minor) = selector.minor {
            devices.iter().find(|d| d.minor() == minor)
        } else {
            None
        };
        found
            .cloned()
            .ok_or_else(|| MapError::NotFound("no such device".to_string()))
    }

    /// Remove one device. Open devices refuse removal.
    pub fn remove(&self, selector: &DeviceSelector) -> Result<()> {
        let device = self.lookup(selector)?;
        if device.is_open() {
            return Err(MapError::Busy(format!(
                "device {} is open",
                device.name()
            )));
        }

        let mut devices = self.devices.write().expect("device list lock poisoned");
        devices.retain(|d| d.minor() != device.minor());
        drop(devices);

        // tear the tables down now; in-flight holders finish on their own
        device.tables().clear();
        info!(device = device.name(), "removed mapped device");
        Ok(())
    }

    /// Gently remove every device that is not open. Returns how many were
    /// removed.
    pub fn remove_all(&self) -> usize {
        let mut devices = self.devices.write().expect("device list lock poisoned");
        let before = devices.len();
        let removed: Vec<Arc<MappedDevice>> = devices
            .iter()
            .filter(|d| !d.is_open())
            .cloned()
            .collect();
        devices.retain(|d| d.is_open());
        let count = before - devices.len();
        drop(devices);

        for device in removed {
            device.tables().clear();
        }
        debug!(count, "removed all unopened devices");
        count
    }

    /// Rename a device, keeping uuid and minor stable.
    pub fn rename(&self, selector: &DeviceSelector, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        let device = self.lookup(selector)?;

        let devices = self.devices.read().expect("device list lock poisoned");
        if devices
            .iter()
            .any(|d| d.minor() != device.minor() && d.name() == new_name)
        {
            return Err(MapError::Busy(format!(
                "device already exists: {}",
                new_name
            )));
        }
        drop(devices);

        device.set_name(new_name.to_string());
        Ok(())
    }

    /// All devices, in creation order.
    pub fn list(&self) -> Vec<Arc<MappedDevice>> {
        self.devices
            .read()
            .expect("device list lock poisoned")
            .clone()
    }
}
