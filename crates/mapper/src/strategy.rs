//! The I/O splitter: one incoming transfer becomes zero or more
//! sub-requests against the active table's extents.
//!
//! Entries are scanned in ascending start order, so sub-request submission
//! order is deterministic. Coverage is strict: bytes that match no extent
//! fail the request with the issued byte count, while sub-requests that
//! did go out are left to complete. The splitter's own table reference is
//! released as soon as submission finishes; every sub-request carries its
//! own counted reference, which is what keeps a displaced generation alive
//! under in-flight I/O.

use std::sync::Mutex;

use common::sector_aligned;
use tracing::{debug, instrument};

use crate::device::MappedDevice;
use crate::error::MapError;
use crate::table::TableRef;

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioOp {
    Read,
    Write,
    Flush,
}

/// One data-plane transfer request against a mapped device.
pub struct Bio {
    /// Byte offset into the virtual device.
    pub offset: u64,
    pub op: BioOp,
    /// Write payload or read destination; its length is the request
    /// length. Empty for flush.
    pub data: Vec<u8>,
}

impl Bio {
    pub fn read(offset: u64, len: usize) -> Self {
        Self {
            offset,
            op: BioOp::Read,
            data: vec![0u8; len],
        }
    }

    pub fn write(offset: u64, data: Vec<u8>) -> Self {
        Self {
            offset,
            op: BioOp::Write,
            data,
        }
    }

    pub fn flush() -> Self {
        Self {
            offset: 0,
            op: BioOp::Flush,
            data: Vec::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Completion record delivered to the sink.
pub struct BioDone {
    pub bio: Bio,
    /// Bytes *not* transferred. Zero on full success.
    pub resid: u64,
    pub error: Option<MapError>,
}

impl BioDone {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Where a finished request goes. Completion may arrive on the submitting
/// thread or, for asynchronous targets, on whatever context finishes last.
pub trait IoSink: Send + Sync {
    fn done(&self, done: BioDone);
}

/// Sub-request handed to one target, in target-local byte coordinates.
pub struct SubIo<'a> {
    pub op: BioOp,
    /// Byte offset relative to the extent's own origin.
    pub offset: u64,
    pub data: &'a mut [u8],
    /// The generation this sub-request was carved from. Targets that
    /// queue work keep a clone so the table outlives them.
    pub generation: TableRef,
}

/// Split `bio` across the device's active table and deliver the outcome
/// to `sink`.
#[instrument(skip_all, fields(device = %dev.name(), op = ?bio.op, offset = bio.offset, len = bio.len()))]
pub fn strategy(dev: &MappedDevice, mut bio: Bio, sink: &dyn IoSink) {
    if dev.suspended() {
        let resid = bio.len();
        sink.done(BioDone {
            bio,
            resid,
            error: Some(MapError::Busy("device is suspended".to_string())),
        });
        return;
    }

    let generation = match dev.tables().get_active() {
        Ok(generation) => generation,
        Err(err) => {
            // no mapping: the entire range is uncovered
            let resid = bio.len();
            sink.done(BioDone {
                bio,
                resid,
                error: Some(err),
            });
            return;
        }
    };

    if bio.op == BioOp::Flush {
        // flushes are not range-matched; every extent sees one
        let mut error = None;
        for entry in generation.entries() {
            let mut empty: [u8; 0] = [];
            let mut sub = SubIo {
                op: BioOp::Flush,
                offset: 0,
                data: &mut empty,
                generation: generation.clone(),
            };
            if let Err(err) = entry.target.strategy(&mut sub) {
                error = error.or(Some(err));
            }
        }
        dev.stats().record_flush();
        sink.done(BioDone {
            bio,
            resid: 0,
            error,
        });
        return;
    }

    let len = bio.len();
    if len == 0 || !sector_aligned(bio.offset) || !sector_aligned(len) {
        sink.done(BioDone {
            bio,
            resid: len,
            error: Some(MapError::InvalidArgument(
                "transfer must cover at least one whole sector".to_string(),
            )),
        });
        return;
    }

    let req_start = bio.offset;
    let req_end = req_start + len;
    let mut issued: u64 = 0;
    let mut error: Option<MapError> = None;

    for entry in generation.entries() {
        let table_start = entry.start_byte();
        let table_end = entry.end_byte();

        let begin = table_start.max(req_start);
        let end = table_end.min(req_end);
        if begin >= end {
            continue;
        }

        let slice = &mut bio.data[(begin - req_start) as usize..(end - req_start) as usize];
        let mut sub = SubIo {
            op: bio.op,
            offset: begin - table_start,
            data: slice,
            generation: generation.clone(),
        };
        match entry.target.strategy(&mut sub) {
            Ok(()) => issued += end - begin,
            Err(err) => {
                debug!(target = entry.target.type_name(), %err, "sub-request failed");
                error = error.or(Some(err));
            }
        }
    }

    if error.is_none() && issued < len {
        // dead space inside the mapped device is a configuration error,
        // not a silent gap
        error = Some(MapError::IoPartial { issued });
    }

    match bio.op {
        BioOp::Read => dev.stats().record_read(issued),
        BioOp::Write => dev.stats().record_write(issued),
        BioOp::Flush => {}
    }

    sink.done(BioDone {
        bio,
        resid: len - issued,
        error,
    });
    // our reference drops here; sub-requests carried their own
}

/// Sink that parks the completion for same-thread callers.
#[derive(Default)]
pub struct SyncSink {
    slot: Mutex<Option<BioDone>>,
}

impl SyncSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Option<BioDone> {
        self.slot.lock().expect("sync sink lock poisoned").take()
    }
}

impl IoSink for SyncSink {
    fn done(&self, done: BioDone) {
        *self.slot.lock().expect("sync sink lock poisoned") = Some(done);
    }
}

/// Submit and wait for synchronous targets; the common path for tools and
/// tests.
pub fn submit(dev: &MappedDevice, bio: Bio) -> BioDone {
    let sink = SyncSink::new();
    strategy(dev, bio, &sink);
    sink.take().expect("strategy always completes synchronously here")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use common::SECTOR_SIZE;

    use super::*;
    use crate::device::DeviceRegistry;
    use crate::table::{TableEntry, TableGeneration};
    use crate::target::testutil::SinkTarget;
    use crate::target::Target;

    /// Target that records the local offsets and lengths it was handed.
    struct RecordingTarget {
        log: Arc<Mutex<Vec<(u64, usize)>>>,
    }

    impl Target for RecordingTarget {
        fn type_name(&self) -> &'static str {
            "recording"
        }

        fn strategy(&self, io: &mut SubIo<'_>) -> crate::error::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push((io.offset, io.data.len()));
            Ok(())
        }

        fn table_params(&self) -> String {
            String::new()
        }

        fn destroy(&mut self) {}
    }

    fn device_with_two_extents() -> (
        Arc<crate::device::MappedDevice>,
        Arc<Mutex<Vec<(u64, usize)>>>,
        Arc<Mutex<Vec<(u64, usize)>>>,
    ) {
        let registry = DeviceRegistry::new();
        let dev = registry.create("split0", None, None).unwrap();

        let log_a = Arc::new(Mutex::new(Vec::new()));
        let log_b = Arc::new(Mutex::new(Vec::new()));
        // [0, 100) sectors -> A, [100, 200) sectors -> B
        let generation = TableGeneration::new(vec![
            TableEntry {
                start: 0,
                length: 100,
                target: Box::new(RecordingTarget {
                    log: Arc::clone(&log_a),
                }),
            },
            TableEntry {
                start: 100,
                length: 100,
                target: Box::new(RecordingTarget {
                    log: Arc::clone(&log_b),
                }),
            },
        ])
        .unwrap();
        dev.tables().load(generation);
        dev.resume().unwrap();
        (dev, log_a, log_b)
    }

    #[test]
    fn request_spanning_two_extents_is_carved_exactly() {
        let (dev, log_a, log_b) = device_with_two_extents();

        // sectors 50..150: half in A, half in B
        let done = submit(&dev, Bio::read(50 * SECTOR_SIZE, (100 * SECTOR_SIZE) as usize));
        assert!(done.is_ok(), "{:?}", done.error);
        assert_eq!(done.resid, 0);

        assert_eq!(
            log_a.lock().unwrap().as_slice(),
            &[(50 * SECTOR_SIZE, (50 * SECTOR_SIZE) as usize)]
        );
        assert_eq!(
            log_b.lock().unwrap().as_slice(),
            &[(0, (50 * SECTOR_SIZE) as usize)]
        );
    }

    #[test]
    fn fully_covered_request_partitions_without_gaps() {
        let (dev, log_a, log_b) = device_with_two_extents();
        let done = submit(&dev, Bio::write(0, vec![1u8; (200 * SECTOR_SIZE) as usize]));
        assert!(done.is_ok());

        let a: usize = log_a.lock().unwrap().iter().map(|(_, l)| l).sum();
        let b: usize = log_b.lock().unwrap().iter().map(|(_, l)| l).sum();
        assert_eq!(a + b, (200 * SECTOR_SIZE) as usize);
    }

    #[test]
    fn gap_reports_partial_with_issued_count() {
        let registry = DeviceRegistry::new();
        let dev = registry.create("gappy", None, None).unwrap();
        // sparse table: [0, 10) and [20, 30)
        let (t1, issued_1, _) = SinkTarget::new(0);
        let (t2, _, _) = SinkTarget::new(0);
        let generation = TableGeneration::new(vec![
            TableEntry {
                start: 0,
                length: 10,
                target: Box::new(t1),
            },
            TableEntry {
                start: 20,
                length: 10,
                target: Box::new(t2),
            },
        ])
        .unwrap();
        dev.tables().load(generation);
        dev.resume().unwrap();

        // sectors 0..30 -> 10 sectors fall into the hole
        let done = submit(&dev, Bio::read(0, (30 * SECTOR_SIZE) as usize));
        match done.error {
            Some(MapError::IoPartial { issued }) => {
                assert_eq!(issued, 20 * SECTOR_SIZE);
            }
            other => panic!("expected IoPartial, got {:?}", other),
        }
        assert_eq!(done.resid, 10 * SECTOR_SIZE);
        // the covered prefix was still submitted
        assert_eq!(issued_1.load(Ordering::SeqCst), 10 * SECTOR_SIZE);
    }

    #[test]
    fn no_table_fails_whole_request() {
        let registry = DeviceRegistry::new();
        let dev = registry.create("empty", None, None).unwrap();
        let done = submit(&dev, Bio::read(0, 4096));
        assert!(matches!(done.error, Some(MapError::NotFound(_))));
        assert_eq!(done.resid, 4096);
    }

    #[test]
    fn suspended_device_rejects_io() {
        let (dev, _, _) = device_with_two_extents();
        dev.suspend();
        let done = submit(&dev, Bio::read(0, 4096));
        assert!(matches!(done.error, Some(MapError::Busy(_))));
        dev.resume().unwrap();
        let done = submit(&dev, Bio::read(0, 4096));
        assert!(done.is_ok());
    }

    #[test]
    fn flush_reaches_every_extent_unconditionally() {
        let registry = DeviceRegistry::new();
        let dev = registry.create("flushy", None, None).unwrap();
        let (t1, _, _) = SinkTarget::new(0);
        let flushes_1 = Arc::clone(&t1.flushes);
        let (t2, _, _) = SinkTarget::new(0);
        let flushes_2 = Arc::clone(&t2.flushes);
        let generation = TableGeneration::new(vec![
            TableEntry {
                start: 0,
                length: 10,
                target: Box::new(t1),
            },
            TableEntry {
                start: 1000,
                length: 10,
                target: Box::new(t2),
            },
        ])
        .unwrap();
        dev.tables().load(generation);
        dev.resume().unwrap();

        let done = submit(&dev, Bio::flush());
        assert!(done.is_ok());
        assert_eq!(flushes_1.load(Ordering::SeqCst), 1);
        assert_eq!(flushes_2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unaligned_requests_rejected() {
        let (dev, log_a, _) = device_with_two_extents();
        let done = submit(&dev, Bio::read(100, 512));
        assert!(matches!(done.error, Some(MapError::InvalidArgument(_))));
        let done = submit(&dev, Bio::write(0, vec![0u8; 100]));
        assert!(matches!(done.error, Some(MapError::InvalidArgument(_))));
        assert!(log_a.lock().unwrap().is_empty(), "no sub-request may go out");
    }

    #[test]
    fn stats_accumulate_issued_bytes() {
        let (dev, _, _) = device_with_two_extents();
        submit(&dev, Bio::read(0, 4096));
        submit(&dev, Bio::write(0, vec![0u8; 8192]));
        submit(&dev, Bio::flush());
        let stats = dev.stats().snapshot();
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.bytes_read, 4096);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.bytes_written, 8192);
        assert_eq!(stats.flushes, 1);
    }

    proptest::proptest! {
        /// For fully covered tables, issued sub-requests partition the
        /// request range exactly.
        #[test]
        fn coverage_partition_property(
            start_sector in 0u64..200,
            len_sectors in 1u64..200,
        ) {
            let (dev, log_a, log_b) = device_with_two_extents();
            let start_sector = start_sector.min(200 - len_sectors.min(200));
            let len_sectors = len_sectors.min(200 - start_sector);
            let done = submit(
                &dev,
                Bio::read(start_sector * SECTOR_SIZE, (len_sectors * SECTOR_SIZE) as usize),
            );
            proptest::prop_assert!(done.is_ok());

            let mut ranges: Vec<(u64, u64)> = Vec::new();
            for (off, len) in log_a.lock().unwrap().iter() {
                ranges.push((*off, *off + *len as u64));
            }
            for (off, len) in log_b.lock().unwrap().iter() {
                // B's local offsets shift by its start
                ranges.push((100 * SECTOR_SIZE + *off, 100 * SECTOR_SIZE + *off + *len as u64));
            }
            ranges.sort();
            let total: u64 = ranges.iter().map(|(b, e)| e - b).sum();
            proptest::prop_assert_eq!(total, len_sectors * SECTOR_SIZE);
            // no overlaps, no gaps
            for pair in ranges.windows(2) {
                proptest::prop_assert_eq!(pair[0].1, pair[1].0);
            }
            proptest::prop_assert_eq!(ranges.first().map(|r| r.0), Some(start_sector * SECTOR_SIZE));
        }
    }
}
