//! Table generations and the active/inactive swap.
//!
//! A device carries at most two generations: the ACTIVE one services I/O,
//! the INACTIVE one is where `reload` stages the next mapping. Promotion
//! is a pointer swap under the device's configuration lock; the displaced
//! generation lives on until the last in-flight reference drops, at which
//! point its entries' destroy hooks run. Readers take a counted reference
//! and never hold the configuration lock across I/O, so reconfiguration
//! never stalls the data path and in-flight requests never see a table
//! change under them.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use common::{sectors_to_bytes, SECTOR_SIZE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MapError, Result};
use crate::target::{Target, TargetRegistry};

/// Which of a device's two table slots to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSlot {
    Active,
    Inactive,
}

/// One extent: a contiguous sector range handled by one target instance.
pub struct TableEntry {
    /// First sector of the extent within the virtual device.
    pub start: u64,
    /// Length in sectors.
    pub length: u64,
    pub target: Box<dyn Target>,
}

impl TableEntry {
    pub fn start_byte(&self) -> u64 {
        sectors_to_bytes(self.start)
    }

    pub fn end_byte(&self) -> u64 {
        sectors_to_bytes(self.start + self.length)
    }
}

/// Extent description as it arrives from the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtentSpec {
    /// First sector.
    pub start: u64,
    /// Length in sectors.
    pub length: u64,
    /// Target type name, resolved against the target registry.
    pub target: String,
    /// Target-specific parameter string, whitespace separated.
    #[serde(default)]
    pub params: String,
}

/// One complete, versioned mapping table.
pub struct TableGeneration {
    entries: Vec<TableEntry>,
}

impl TableGeneration {
    /// Build a generation from constructed entries.
    ///
    /// Entries are ordered by start sector; zero-length or overlapping
    /// extents reject the whole table.
    pub fn new(mut entries: Vec<TableEntry>) -> Result<Self> {
        entries.sort_by_key(|e| e.start);
        for pair in entries.windows(2) {
            if pair[0].start + pair[0].length > pair[1].start {
                return Err(MapError::InvalidArgument(format!(
                    "overlapping extents at sector {}",
                    pair[1].start
                )));
            }
        }
        if let Some(empty) = entries.iter().find(|e| e.length == 0) {
            return Err(MapError::InvalidArgument(format!(
                "zero-length extent at sector {}",
                empty.start
            )));
        }
        Ok(Self { entries })
    }

    /// Construct entries from control-plane extent specs.
    ///
    /// Unknown target names and target constructor failures abort the
    /// build; nothing of a failed table survives.
    pub fn from_specs(registry: &TargetRegistry, specs: &[ExtentSpec]) -> Result<Self> {
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let target_type = registry.lookup(&spec.target)?;
            let args: Vec<&str> = spec.params.split_whitespace().collect();
            let target = target_type.construct(&args)?;
            entries.push(TableEntry {
                start: spec.start,
                length: spec.length,
                target,
            });
        }
        Self::new(entries)
    }

    /// Entries in ascending start order.
    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Total size in sectors: the end of the last extent.
    pub fn size_sectors(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.start + e.length)
            .max()
            .unwrap_or(0)
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_sectors() * SECTOR_SIZE
    }
}

impl Drop for TableGeneration {
    fn drop(&mut self) {
        for entry in &mut self.entries {
            entry.target.destroy();
        }
    }
}

/// Counted reference to a generation.
///
/// Cloning is the refcount increment; drop is the release. A displaced
/// generation is destroyed when the last of these goes away.
#[derive(Clone)]
pub struct TableRef {
    generation: Arc<TableGeneration>,
}

impl Deref for TableRef {
    type Target = TableGeneration;

    fn deref(&self) -> &TableGeneration {
        &self.generation
    }
}

#[derive(Default)]
struct SlotState {
    active: Option<Arc<TableGeneration>>,
    inactive: Option<Arc<TableGeneration>>,
}

/// A device's pair of table slots plus the configuration lock over them.
#[derive(Default)]
pub struct TableHead {
    slots: Mutex<SlotState>,
}

impl TableHead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counted reference to the requested slot, if populated. Never
    /// blocks on in-flight I/O; the lock only covers the pointer read.
    pub fn get(&self, slot: TableSlot) -> Option<TableRef> {
        let slots = self.slots.lock().expect("table lock poisoned");
        let generation = match slot {
            TableSlot::Active => slots.active.as_ref(),
            TableSlot::Inactive => slots.inactive.as_ref(),
        }?;
        Some(TableRef {
            generation: Arc::clone(generation),
        })
    }

    /// The active generation, or the no-mapping error every caller of the
    /// data path reports upward.
    pub fn get_active(&self) -> Result<TableRef> {
        self.get(TableSlot::Active)
            .ok_or_else(|| MapError::NotFound("device has no mapping".to_string()))
    }

    /// Stage a generation into the inactive slot, replacing any previous
    /// staged table.
    pub fn load(&self, generation: TableGeneration) {
        let mut slots = self.slots.lock().expect("table lock poisoned");
        if slots.inactive.is_some() {
            debug!("replacing previously staged table");
        }
        slots.inactive = Some(Arc::new(generation));
    }

    /// Swap the staged generation into the active slot.
    ///
    /// The displaced generation is only dropped here if no I/O holds it;
    /// otherwise the last in-flight reference tears it down. With nothing
    /// staged this is a no-op, so a bare resume only clears suspension.
    pub fn promote(&self, capacity: Option<u64>) -> Result<()> {
        let mut slots = self.slots.lock().expect("table lock poisoned");
        let Some(incoming) = slots.inactive.take() else {
            return Ok(());
        };
        if let Some(capacity) = capacity {
            if incoming.size_sectors() > capacity {
                // put the staged table back; promotion must not eat it
                let size = incoming.size_sectors();
                slots.inactive = Some(incoming);
                return Err(MapError::InvalidArgument(format!(
                    "table of {} sectors exceeds device capacity of {} sectors",
                    size, capacity
                )));
            }
        }
        slots.active = Some(incoming);
        Ok(())
    }

    /// Drop the staged generation, if any.
    pub fn clear_inactive(&self) {
        let mut slots = self.slots.lock().expect("table lock poisoned");
        slots.inactive = None;
    }

    /// Drop both generations; used on device removal.
    pub fn clear(&self) {
        let mut slots = self.slots.lock().expect("table lock poisoned");
        slots.active = None;
        slots.inactive = None;
    }

    pub fn target_count(&self, slot: TableSlot) -> usize {
        self.get(slot).map(|t| t.entries().len()).unwrap_or(0)
    }

    pub fn size_sectors(&self, slot: TableSlot) -> u64 {
        self.get(slot).map(|t| t.size_sectors()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::target::testutil::SinkTarget;

    fn entry(start: u64, length: u64) -> (TableEntry, std::sync::Arc<std::sync::atomic::AtomicBool>)
    {
        let (target, _, destroyed) = SinkTarget::new(0);
        (
            TableEntry {
                start,
                length,
                target: Box::new(target),
            },
            destroyed,
        )
    }

    #[test]
    fn entries_sorted_and_validated() {
        let (a, _) = entry(100, 100);
        let (b, _) = entry(0, 100);
        let generation = TableGeneration::new(vec![a, b]).unwrap();
        assert_eq!(generation.entries()[0].start, 0);
        assert_eq!(generation.entries()[1].start, 100);
        assert_eq!(generation.size_sectors(), 200);
    }

    #[test]
    fn overlap_rejected() {
        let (a, _) = entry(0, 150);
        let (b, _) = entry(100, 100);
        assert!(matches!(
            TableGeneration::new(vec![a, b]),
            Err(MapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_length_extent_rejected() {
        let (a, _) = entry(0, 0);
        assert!(TableGeneration::new(vec![a]).is_err());
    }

    #[test]
    fn promote_swaps_and_replaces() {
        let head = TableHead::new();
        assert!(head.get_active().is_err());

        let (a, _) = entry(0, 100);
        head.load(TableGeneration::new(vec![a]).unwrap());
        assert!(head.get_active().is_err(), "staged table must not serve I/O");
        assert_eq!(head.target_count(TableSlot::Inactive), 1);

        head.promote(None).unwrap();
        assert!(head.get_active().is_ok());
        assert_eq!(head.target_count(TableSlot::Inactive), 0);
    }

    #[test]
    fn promote_rejects_oversized_table() {
        let head = TableHead::new();
        let (a, _) = entry(0, 2048);
        head.load(TableGeneration::new(vec![a]).unwrap());
        assert!(head.promote(Some(1024)).is_err());
        // the staged table survives a failed promotion
        assert_eq!(head.target_count(TableSlot::Inactive), 1);
    }

    #[test]
    fn displaced_generation_survives_until_last_reference() {
        let head = TableHead::new();
        let (a, destroyed_old) = entry(0, 100);
        head.load(TableGeneration::new(vec![a]).unwrap());
        head.promote(None).unwrap();

        // simulated in-flight I/O keeps a reference to the old table
        let in_flight = head.get_active().unwrap();

        let (b, _) = entry(0, 100);
        head.load(TableGeneration::new(vec![b]).unwrap());
        head.promote(None).unwrap();

        assert!(
            !destroyed_old.load(Ordering::SeqCst),
            "old generation must outlive in-flight references"
        );
        drop(in_flight);
        assert!(
            destroyed_old.load(Ordering::SeqCst),
            "destroy hooks run when the last reference drops"
        );
    }

    #[test]
    fn clear_inactive_destroys_staged_table() {
        let head = TableHead::new();
        let (a, destroyed) = entry(0, 100);
        head.load(TableGeneration::new(vec![a]).unwrap());
        head.clear_inactive();
        assert!(destroyed.load(Ordering::SeqCst));
    }
}
