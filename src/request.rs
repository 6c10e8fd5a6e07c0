//! Per-queue-pair request-slot pool.
//!
//! The synchronous admin/TMF waiter spins on an `AtomicBool`, the same
//! busy-wait idiom block drivers use to wait on request completion, since a
//! `no_std` driver core has no OS condvar to block on.

use crate::error::PqiError;
use crate::iu::MAX_RESPONSE_IU_LEN;
use crate::upper::UpperCommand;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

/// Per-request completion signal for the synchronous admin/TMF path.
#[derive(Default)]
pub struct Waiter {
    done: AtomicBool,
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Called from the completion path once the response has been fully
    /// accumulated.
    pub fn signal(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Busy-waits for `signal()`. The main I/O path never calls this —
    /// submission and completion there are non-blocking.
    pub fn wait(&self) {
        while !self.done.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }

    pub fn reset(&self) {
        self.done.store(false, Ordering::Release);
    }
}

/// One outstanding command's bookkeeping.
pub struct Request {
    pub request_id: u16,
    pub response: Vec<u8>,
    pub response_accumulated: usize,
    pub waiter: Option<Arc<Waiter>>,
    pub upper_command: Option<Box<dyn UpperCommand>>,
    pub xfer_size: u32,
}

impl Request {
    fn new(request_id: u16) -> Self {
        Self {
            request_id,
            response: vec![0u8; MAX_RESPONSE_IU_LEN],
            response_accumulated: 0,
            waiter: None,
            upper_command: None,
            xfer_size: 0,
        }
    }

    /// Clears per-use state before a fresh submission reuses this slot;
    /// response bytes are overwritten on each reuse.
    pub fn reset_for_reuse(&mut self) {
        self.response_accumulated = 0;
        self.waiter = None;
        self.upper_command = None;
        self.xfer_size = 0;
    }
}

/// Bitmap allocator handing out small integer request ids 0..qdepth-1.
pub struct RequestSlotPool {
    slots: Vec<Request>,
    bitmap: Vec<u64>,
}

impl RequestSlotPool {
    pub fn new(qdepth: u16) -> Self {
        let slots = (0..qdepth).map(Request::new).collect();
        let words = (qdepth as usize).div_ceil(64);
        Self {
            slots,
            bitmap: vec![0u64; words],
        }
    }

    pub fn qdepth(&self) -> u16 {
        self.slots.len() as u16
    }

    fn is_set(&self, id: u16) -> bool {
        let (word, bit) = (id as usize / 64, id as usize % 64);
        self.bitmap[word] & (1 << bit) != 0
    }

    fn set(&mut self, id: u16) {
        let (word, bit) = (id as usize / 64, id as usize % 64);
        self.bitmap[word] |= 1 << bit;
    }

    fn clear(&mut self, id: u16) {
        let (word, bit) = (id as usize / 64, id as usize % 64);
        self.bitmap[word] &= !(1 << bit);
    }

    /// Finds the first zero bit and sets it. `Busy` if the pool is
    /// exhausted.
    pub fn alloc(&mut self) -> Result<u16, PqiError> {
        for id in 0..self.slots.len() as u16 {
            if !self.is_set(id) {
                self.set(id);
                self.slots[id as usize].reset_for_reuse();
                return Ok(id);
            }
        }
        Err(PqiError::Busy)
    }

    /// Clears the bit. Precondition: no further device response may
    /// reference `id`.
    pub fn free(&mut self, id: u16) {
        self.clear(id);
    }

    pub fn is_allocated(&self, id: u16) -> bool {
        self.is_set(id)
    }

    pub fn get(&self, id: u16) -> &Request {
        &self.slots[id as usize]
    }

    pub fn get_mut(&mut self, id: u16) -> &mut Request {
        &mut self.slots[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_first_fit_and_bitmap_tracks_it() {
        let mut pool = RequestSlotPool::new(4);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert!(pool.is_allocated(a));
        pool.free(a);
        assert!(!pool.is_allocated(a));
        let c = pool.alloc().unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn exhausted_pool_reports_busy() {
        let mut pool = RequestSlotPool::new(2);
        pool.alloc().unwrap();
        pool.alloc().unwrap();
        assert_eq!(pool.alloc().unwrap_err(), PqiError::Busy);
    }

    #[test]
    fn waiter_signals_before_wait_returns() {
        let w = Waiter::new();
        w.signal();
        w.wait();
    }
}
