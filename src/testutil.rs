//! In-memory mocks of [`crate::hal::PqiDeviceIo`]/[`crate::hal::Hal`]/
//! [`crate::hal::DmaRegion`] used to drive integration-style tests across
//! module boundaries (queue pair, admin, submit, complete) without real
//! MMIO or DMA.

#![cfg(test)]

extern crate std;

use crate::error::PqiResult;
use crate::hal::{DmaRegion, Hal, PqiDeviceIo};
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub struct VecDma(pub Vec<u8>);

impl VecDma {
    pub fn new(len: usize) -> Box<dyn DmaRegion> {
        Box::new(Self(vec![0u8; len]))
    }
}

impl DmaRegion for VecDma {
    fn bus_addr(&self) -> u64 {
        self.0.as_ptr() as u64
    }
    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Register file backed by a `BTreeMap`, plus a fixed signature so
/// `PqiRegisters::signature_valid` succeeds by default.
pub struct FakeIo {
    u8_regs: Mutex<BTreeMap<usize, u8>>,
    u32_regs: Mutex<BTreeMap<usize, u32>>,
    u64_regs: Mutex<BTreeMap<usize, u64>>,
}

impl FakeIo {
    pub fn new() -> Self {
        let mut u64_regs = BTreeMap::new();
        u64_regs.insert(0x00, crate::registers::SIGNATURE);
        Self {
            u8_regs: Mutex::new(BTreeMap::new()),
            u32_regs: Mutex::new(BTreeMap::new()),
            u64_regs: Mutex::new(u64_regs),
        }
    }
}

impl PqiDeviceIo for FakeIo {
    fn read_u8_at(&self, off: usize) -> PqiResult<u8> {
        Ok(*self.u8_regs.lock().unwrap().get(&off).unwrap_or(&0))
    }
    fn write_u8_at(&self, off: usize, data: u8) -> PqiResult<()> {
        self.u8_regs.lock().unwrap().insert(off, data);
        Ok(())
    }
    fn read_u32_at(&self, off: usize) -> PqiResult<u32> {
        Ok(*self.u32_regs.lock().unwrap().get(&off).unwrap_or(&0))
    }
    fn write_u32_at(&self, off: usize, data: u32) -> PqiResult<()> {
        self.u32_regs.lock().unwrap().insert(off, data);
        Ok(())
    }
    fn read_u64_at(&self, off: usize) -> PqiResult<u64> {
        Ok(*self.u64_regs.lock().unwrap().get(&off).unwrap_or(&0))
    }
    fn write_u64_at(&self, off: usize, data: u64) -> PqiResult<()> {
        self.u64_regs.lock().unwrap().insert(off, data);
        Ok(())
    }
}

pub struct FakeHal;

impl Hal for FakeHal {
    fn dma_alloc(&self, len: usize) -> PqiResult<Box<dyn DmaRegion>> {
        Ok(VecDma::new(len))
    }
    fn delay_us(&self, _us: u32) {}
    fn uptime_ms(&self) -> u64 {
        0
    }
}
