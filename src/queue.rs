//! A single directional PQI ring.
//!
//! A PQI ring is runtime-sized, element width varies per queue, and the two
//! indices live in two different places — the index the host advances is always mirrored to
//! an MMIO offset, the index the device advances is read back through
//! whichever location the device was told to use (a register for admin, a
//! host-memory word for operational queues). [`DeviceIndexSource`] hides that
//! difference behind one read call.

use crate::error::{PqiError, PqiResult};
use crate::hal::{DmaRegion, PqiDeviceIo};
use crate::iu::IU_TYPE_NULL;
use crate::registers::PqiRegisters;
use alloc::boxed::Box;

/// Direction of a [`DeviceQueue`] (glossary: IQ/OQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host → device.
    ToDevice,
    /// Device → host.
    FromDevice,
}

/// `queue_id = 2*pair_index + (1 if inbound else 0)` (glossary).
pub fn queue_id(pair_index: u16, direction: Direction) -> u16 {
    2 * pair_index
        + match direction {
            Direction::ToDevice => 1,
            Direction::FromDevice => 0,
        }
}

/// Where the index the *device* advances can be read from.
pub enum DeviceIndexSource {
    /// A live MMIO register at this byte offset from the register base.
    Mmio(usize),
    /// A host-memory word the device was told (at queue-creation time) to
    /// write its index into.
    HostMemory(Box<dyn DmaRegion>),
}

impl DeviceIndexSource {
    fn read_raw(&self, io: &dyn PqiDeviceIo) -> PqiResult<u32> {
        match self {
            DeviceIndexSource::Mmio(offset) => io.read_u32_at(*offset),
            DeviceIndexSource::HostMemory(region) => {
                let bytes = region.as_bytes();
                Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        }
    }
}

/// One unidirectional ring of `n` fixed-size elements in DMA-coherent memory.
pub struct DeviceQueue {
    queue_id: u16,
    direction: Direction,
    elements: Box<dyn DmaRegion>,
    element_len: u16,
    n: u16,
    /// Index we advance ("unposted_index"); mirrored to MMIO on publish.
    own_index: u32,
    own_index_mmio_offset: usize,
    device_index: DeviceIndexSource,
}

impl DeviceQueue {
    pub fn new(
        queue_id: u16,
        direction: Direction,
        elements: Box<dyn DmaRegion>,
        element_len: u16,
        n: u16,
        own_index_mmio_offset: usize,
        device_index: DeviceIndexSource,
    ) -> Self {
        debug_assert!(element_len >= 16 && element_len % 16 == 0);
        Self {
            queue_id,
            direction,
            elements,
            element_len,
            n,
            own_index: 0,
            own_index_mmio_offset,
            device_index,
        }
    }

    pub fn queue_id(&self) -> u16 {
        self.queue_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn element_len(&self) -> u16 {
        self.element_len
    }

    pub fn element_count(&self) -> u16 {
        self.n
    }

    /// Current "unposted" shadow index; exposed for tests and stats, not
    /// meant to be consulted by submission/completion logic directly.
    pub fn unposted_index(&self) -> u32 {
        self.own_index
    }

    fn element_range(&self, index: u16) -> core::ops::Range<usize> {
        let start = index as usize * self.element_len as usize;
        start..start + self.element_len as usize
    }

    fn element(&self, index: u16) -> &[u8] {
        &self.elements.as_bytes()[self.element_range(index)]
    }

    fn element_mut(&mut self, index: u16) -> &mut [u8] {
        let range = self.element_range(index);
        &mut self.elements.as_bytes_mut()[range]
    }

    /// Free slots ahead of `own_index`, one element always reserved so full
    /// never reads the same as empty.
    ///
    /// On a dead link (sentinel value plus an invalid signature) this
    /// reports the ring as having maximal free space rather than erroring,
    /// so `is_full` treats it as "not full" during teardown.
    fn free_slots(&self, io: &dyn PqiDeviceIo, registers: &PqiRegisters) -> PqiResult<u16> {
        let raw = self.device_index.read_raw(io)?;
        if raw == crate::registers::LINK_DEAD_U32 && !registers.signature_valid(io)? {
            return Ok(self.n - 1);
        }
        let device_index = (raw % self.n as u32) as u16;
        let occupied =
            (self.own_index as i32 - device_index as i32).rem_euclid(self.n as i32) as u16;
        Ok(self.n - occupied - 1)
    }

    pub fn is_full(
        &self,
        io: &dyn PqiDeviceIo,
        registers: &PqiRegisters,
        want: u16,
    ) -> PqiResult<bool> {
        Ok(self.free_slots(io, registers)? < want)
    }

    /// Reserves `n` contiguous elements at `own_index`, wrap-padding with
    /// null IUs first if the tail would otherwise overrun the ring.
    /// Returns the starting index; advances `own_index`.
    pub fn alloc_elements(
        &mut self,
        io: &dyn PqiDeviceIo,
        registers: &PqiRegisters,
        n: u16,
    ) -> PqiResult<u16> {
        let start = self.own_index as u16;
        if start + n > self.n {
            let pad = self.n - start;
            if self.is_full(io, registers, n + pad)? {
                return Err(PqiError::QueueFull);
            }
            for i in start..self.n {
                self.element_mut(i)[0] = IU_TYPE_NULL;
            }
            self.own_index = 0;
        } else if self.is_full(io, registers, n)? {
            return Err(PqiError::QueueFull);
        }
        let reserved_at = self.own_index as u16;
        self.own_index = (self.own_index + n as u32) % self.n as u32;
        Ok(reserved_at)
    }

    pub fn element_bytes_mut(&mut self, index: u16) -> &mut [u8] {
        self.element_mut(index)
    }

    pub fn element_bytes(&self, index: u16) -> &[u8] {
        self.element(index)
    }

    /// Overwrites the element at `index` with a null IU, used after a
    /// failed SG mapping once the slot is already reserved.
    pub fn cancel_element(&mut self, index: u16) {
        self.element_mut(index)[0] = IU_TYPE_NULL;
    }

    /// Mirrors `own_index` to the device's MMIO doorbell. Caller must have
    /// completed all element body writes first; ordered by a release
    /// barrier.
    pub fn publish(&self, io: &dyn PqiDeviceIo) -> PqiResult<()> {
        core::sync::atomic::fence(core::sync::atomic::Ordering::Release);
        io.write_u32_at(self.own_index_mmio_offset, self.own_index)
    }

    /// Consumer side: copies one element out if the device has produced one,
    /// advancing `own_index`. Returns `Ok(false)` if empty.
    pub fn dequeue(
        &mut self,
        io: &dyn PqiDeviceIo,
        registers: &PqiRegisters,
        into: &mut [u8],
    ) -> PqiResult<bool> {
        let raw = self.device_index.read_raw(io)?;
        let raw = registers.safe_read_u32(io, raw)?;
        let device_index = (raw % self.n as u32) as u16;
        if device_index == self.own_index as u16 {
            return Ok(false);
        }
        core::sync::atomic::fence(core::sync::atomic::Ordering::Acquire);
        let len = self.element_len as usize;
        into[..len].copy_from_slice(self.element(self.own_index as u16));
        self.own_index = (self.own_index + 1) % self.n as u32;
        Ok(true)
    }

    /// Tells the device how far the host has consumed. Called only after
    /// the host has fully processed the accumulated response.
    pub fn notify_consumed(&self, io: &dyn PqiDeviceIo) -> PqiResult<()> {
        io.write_u32_at(self.own_index_mmio_offset, self.own_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::vec;
    use std::vec::Vec;

    struct VecDma(Vec<u8>);
    impl DmaRegion for VecDma {
        fn bus_addr(&self) -> u64 {
            0
        }
        fn as_bytes(&self) -> &[u8] {
            &self.0
        }
        fn as_bytes_mut(&mut self) -> &mut [u8] {
            &mut self.0
        }
    }

    struct FakeIo {
        regs: std::sync::Mutex<std::collections::BTreeMap<usize, u32>>,
    }
    impl FakeIo {
        fn new() -> Self {
            Self {
                regs: std::sync::Mutex::new(std::collections::BTreeMap::new()),
            }
        }
    }
    impl PqiDeviceIo for FakeIo {
        fn read_u8_at(&self, _off: usize) -> PqiResult<u8> {
            Ok(0)
        }
        fn write_u8_at(&self, _off: usize, _data: u8) -> PqiResult<()> {
            Ok(())
        }
        fn read_u32_at(&self, off: usize) -> PqiResult<u32> {
            Ok(*self.regs.lock().unwrap().get(&off).unwrap_or(&0))
        }
        fn write_u32_at(&self, off: usize, data: u32) -> PqiResult<()> {
            self.regs.lock().unwrap().insert(off, data);
            Ok(())
        }
        fn read_u64_at(&self, _off: usize) -> PqiResult<u64> {
            Ok(crate::registers::SIGNATURE)
        }
        fn write_u64_at(&self, _off: usize, _data: u64) -> PqiResult<()> {
            Ok(())
        }
    }

    fn make_queue(n: u16, element_len: u16) -> (DeviceQueue, PqiRegisters, FakeIo) {
        let io = FakeIo::new();
        let elements: Box<dyn DmaRegion> =
            Box::new(VecDma(vec![0u8; n as usize * element_len as usize]));
        let device_idx: Box<dyn DmaRegion> = Box::new(VecDma(vec![0u8; 8]));
        let queue = DeviceQueue::new(
            2,
            Direction::ToDevice,
            elements,
            element_len,
            n,
            0x1000,
            DeviceIndexSource::HostMemory(device_idx),
        );
        (queue, PqiRegisters::default(), io)
    }

    #[test]
    fn sequential_single_element_allocs_reach_capacity_without_padding() {
        let (mut q, regs, io) = make_queue(8, 16);
        for _ in 0..6 {
            q.alloc_elements(&io, &regs, 1).unwrap();
        }
        assert_eq!(q.unposted_index(), 6);
        let idx = q.alloc_elements(&io, &regs, 1).unwrap();
        assert_eq!(idx, 6);
        // One element is always reserved so full never reads the same as
        // empty; the ring is now at capacity and rejects one more.
        let err = q.alloc_elements(&io, &regs, 1).unwrap_err();
        assert_eq!(err, PqiError::QueueFull);
    }

    #[test]
    fn reserving_multiple_elements_pads_the_tail_and_wraps_to_zero() {
        let io = FakeIo::new();
        let n = 8u16;
        let element_len = 16u16;
        let device_index_offset = 0x1010;
        let elements: Box<dyn DmaRegion> =
            Box::new(VecDma(vec![0u8; n as usize * element_len as usize]));
        let mut q = DeviceQueue::new(
            2,
            Direction::ToDevice,
            elements,
            element_len,
            n,
            0x1000,
            DeviceIndexSource::Mmio(device_index_offset),
        );
        let regs = PqiRegisters::default();
        for _ in 0..6 {
            q.alloc_elements(&io, &regs, 1).unwrap();
        }
        assert_eq!(q.unposted_index(), 6);
        // The device has consumed everything posted so far, so the ring is
        // fully free again even though `own_index` sits at 6.
        io.write_u32_at(device_index_offset, 6).unwrap();

        // Reserving 3 elements from index 6 would run past the end of an
        // 8-element ring (6 + 3 > 8), so the tail gets padded with null IUs
        // and the reservation wraps to start at 0.
        let idx = q.alloc_elements(&io, &regs, 3).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(q.unposted_index(), 3);
        assert_eq!(q.element_bytes(6)[0], IU_TYPE_NULL);
        assert_eq!(q.element_bytes(7)[0], IU_TYPE_NULL);
    }

    #[test]
    fn full_ring_rejects_fourth_submit() {
        let (mut q, regs, io) = make_queue(4, 16);
        for _ in 0..3 {
            q.alloc_elements(&io, &regs, 1).unwrap();
        }
        let err = q.alloc_elements(&io, &regs, 1).unwrap_err();
        assert_eq!(err, PqiError::QueueFull);
    }

    #[test]
    fn dequeue_reports_empty_when_indices_match() {
        let (mut q, regs, io) = make_queue(4, 16);
        let mut buf = [0u8; 16];
        assert!(!q.dequeue(&io, &regs, &mut buf).unwrap());
    }
}
