//! The boundary between the PQI queue engine and its host collaborators.
//!
//! The PCI enumeration/BAR-mapping shim and the DMA allocator are out of
//! scope for this crate; they are supplied by whatever embeds this crate
//! through the traits below.

use crate::error::PqiResult;
use alloc::boxed::Box;

/// Access to the device's memory-mapped register file.
///
/// Implementations must issue genuinely volatile, non-coalesced loads and
/// stores; reordering or merging adjacent accesses would violate the
/// ordering this crate relies on between index publication and the fence
/// that follows it.
pub trait PqiDeviceIo: Send + Sync {
    fn read_u8_at(&self, off: usize) -> PqiResult<u8>;
    fn write_u8_at(&self, off: usize, data: u8) -> PqiResult<()>;
    fn read_u32_at(&self, off: usize) -> PqiResult<u32>;
    fn write_u32_at(&self, off: usize, data: u32) -> PqiResult<()>;
    fn read_u64_at(&self, off: usize) -> PqiResult<u64>;
    fn write_u64_at(&self, off: usize, data: u64) -> PqiResult<()>;
}

/// One DMA-coherent region: a ring's element array, its trailing index
/// word, or the per-queue-pair SG overflow area.
///
/// `bus_addr` is the address the device should be told about (written into
/// a control IU or an index-address register); `as_bytes`/`as_bytes_mut`
/// give the host a view of the same memory for building IUs and reading
/// responses.
pub trait DmaRegion: Send + Sync {
    fn bus_addr(&self) -> u64;
    fn as_bytes(&self) -> &[u8];
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// Allocates the DMA-coherent memory the queue engine needs.
///
/// `len` is a byte count, not a page count: PQI ring and SGL-overflow
/// regions are not page-sized (admin queues in particular are tiny), so the
/// collaborator is responsible for whatever granularity its allocator
/// requires.
pub trait Hal: Send + Sync {
    fn dma_alloc(&self, len: usize) -> PqiResult<Box<dyn DmaRegion>>;

    /// Blocks the calling context for approximately `us` microseconds.
    /// Needed only by the admin polling loops (typically 100-150 µs between
    /// reads); the main submission/completion paths never call it.
    fn delay_us(&self, us: u32);

    /// Elapsed milliseconds since some fixed but unspecified epoch, used to
    /// bound admin/reset polling loops.
    fn uptime_ms(&self) -> u64;
}
