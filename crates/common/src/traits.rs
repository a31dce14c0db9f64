use anyhow::Result;

/// Raw block transfer seam between the mapping layer and whatever actually
/// holds the bytes.
///
/// A target receives sub-requests in its own coordinate space and forwards
/// them to one of these. Implementations must be safe for concurrent use
/// from multiple requests; offsets and lengths arrive pre-validated by the
/// splitter but a store is still expected to range-check against its own
/// capacity.
pub trait BlockStore: Send + Sync {
    /// Capacity in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `data` starting at `offset`.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Persist any buffered writes.
    fn flush(&self) -> Result<()>;
}
