//! Bundles one inbound/outbound ring pair, its request pool, and its SG
//! overflow area.

use crate::hal::DmaRegion;
use crate::iu::SGL_DESCRIPTOR_LEN;
use crate::queue::DeviceQueue;
use crate::request::RequestSlotPool;
use alloc::boxed::Box;
use spin::Mutex;

/// Inbound ring, request pool and SG overflow area share one spinlock:
/// all three are only ever touched while building and publishing a
/// submission.
pub struct LockedHalf {
    pub inbound: DeviceQueue,
    pub pool: RequestSlotPool,
    sg_overflow: Box<dyn DmaRegion>,
    max_sgls: usize,
}

impl LockedHalf {
    /// Byte offset, within the overflow region, of `request_id`'s private
    /// slab: `sg_overflow_area + request_id * MAX_SGLS * sizeof(descriptor)`.
    pub fn sg_overflow_slot_offset(&self, request_id: u16) -> usize {
        request_id as usize * self.max_sgls * SGL_DESCRIPTOR_LEN
    }

    pub fn sg_overflow_bytes_mut(&mut self, request_id: u16, len: usize) -> &mut [u8] {
        let offset = self.sg_overflow_slot_offset(request_id);
        &mut self.sg_overflow.as_bytes_mut()[offset..offset + len]
    }

    pub fn sg_overflow_bus_addr(&self) -> u64 {
        self.sg_overflow.bus_addr()
    }

    pub fn max_sgls(&self) -> usize {
        self.max_sgls
    }
}

/// One queue pair: pair 0 is admin, 1..K are I/O.
///
/// The outbound ring is logically touched only by its bound interrupt
/// vector and never contended; it is still wrapped in a spinlock here
/// because this crate forbids unsafe code, and an uncontended spinlock
/// costs nothing a true single-owner access wouldn't also cost in practice.
pub struct QueuePair {
    pair_index: u16,
    locked: Mutex<LockedHalf>,
    outbound: Mutex<DeviceQueue>,
    interrupt_vector: Option<u16>,
    cpu_affinity: Option<u32>,
}

impl QueuePair {
    pub fn new(
        pair_index: u16,
        inbound: DeviceQueue,
        outbound: DeviceQueue,
        pool: RequestSlotPool,
        sg_overflow: Box<dyn DmaRegion>,
        max_sgls: usize,
        interrupt_vector: Option<u16>,
        cpu_affinity: Option<u32>,
    ) -> Self {
        Self {
            pair_index,
            locked: Mutex::new(LockedHalf {
                inbound,
                pool,
                sg_overflow,
                max_sgls,
            }),
            outbound: Mutex::new(outbound),
            interrupt_vector,
            cpu_affinity,
        }
    }

    pub fn pair_index(&self) -> u16 {
        self.pair_index
    }

    pub fn is_admin(&self) -> bool {
        self.pair_index == 0
    }

    pub fn lock_inbound(&self) -> spin::MutexGuard<'_, LockedHalf> {
        self.locked.lock()
    }

    pub fn lock_outbound(&self) -> spin::MutexGuard<'_, DeviceQueue> {
        self.outbound.lock()
    }

    pub fn interrupt_vector(&self) -> Option<u16> {
        self.interrupt_vector
    }

    pub fn cpu_affinity(&self) -> Option<u32> {
        self.cpu_affinity
    }
}
