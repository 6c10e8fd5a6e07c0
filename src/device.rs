//! Top-level lifecycle: probe, operational-queue bring-up, per-CPU dispatch,
//! and teardown.

use crate::admin;
use crate::capability::{Capability, CapabilityCell};
use crate::config::PqiConfig;
use crate::error::PqiResult;
use crate::hal::{Hal, PqiDeviceIo};
use crate::iu::SGL_DESCRIPTOR_LEN;
use crate::queue::{queue_id, DeviceIndexSource, DeviceQueue, Direction};
use crate::queuepair::QueuePair;
use crate::registers::PqiRegisters;
use crate::request::RequestSlotPool;
use crate::upper::UpperCommand;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use log::{info, warn};
use spin::Mutex;

/// An atomic outstanding-command counter plus a narrow lock held only
/// while comparing against the high-watermark.
#[derive(Default)]
pub struct DeviceStats {
    pub(crate) curr_outstanding: AtomicU32,
    pub(crate) max_outstanding: Mutex<u32>,
}

impl DeviceStats {
    pub fn curr_outstanding(&self) -> u32 {
        self.curr_outstanding.load(Ordering::Acquire)
    }

    pub fn max_outstanding(&self) -> u32 {
        *self.max_outstanding.lock()
    }
}

/// Process-wide handle to one controller.
pub struct Device {
    io: Box<dyn PqiDeviceIo>,
    hal: Box<dyn Hal>,
    registers: PqiRegisters,
    config: PqiConfig,
    capability: CapabilityCell,
    /// Entry 0 is admin; entries 1..K are I/O, indexed by `pair_index - 1`.
    pairs: Vec<QueuePair>,
    stats: DeviceStats,
}

impl Device {
    /// Brings the device from reset to `ReadyForIO` and creates
    /// `io_pair_count` I/O queue pairs. Tears queues down and returns the
    /// error on any failure along the way.
    pub fn probe(
        io: Box<dyn PqiDeviceIo>,
        hal: Box<dyn Hal>,
        config: PqiConfig,
        io_pair_count: u16,
    ) -> PqiResult<Self> {
        info!("probing PQI device, requesting {io_pair_count} I/O queue pairs");
        let registers = PqiRegisters::default();
        if let Err(err) = admin::reset(io.as_ref(), &registers, hal.as_ref(), &config) {
            warn!("reset failed before any queue was mapped: {err}");
            return Err(err);
        }

        let admin_pair = bring_up_admin_pair(io.as_ref(), &registers, hal.as_ref(), &config)?;

        let mut device = Self {
            io,
            hal,
            registers,
            config,
            capability: CapabilityCell::new(),
            pairs: alloc::vec![admin_pair],
            stats: DeviceStats::default(),
        };

        let capability =
            admin::report_capability(&device.pairs[0], device.io.as_ref(), &device.registers, device.hal.as_ref())?;
        device.capability.set(Capability::from(&capability));

        for pair_index in 1..=io_pair_count {
            match device.create_io_pair(pair_index) {
                Ok(pair) => device.pairs.push(pair),
                Err(err) => {
                    warn!("failed to create I/O queue pair {pair_index}: {err}, tearing down");
                    device.teardown();
                    return Err(err);
                }
            }
        }

        info!("device ready for I/O with {io_pair_count} queue pairs");
        Ok(device)
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub fn capability(&self) -> Option<&Capability> {
        self.capability.get()
    }

    fn create_io_pair(&self, pair_index: u16) -> PqiResult<QueuePair> {
        let qdepth = self.config.admin_queue_elements;
        let element_len = 64u16;
        let max_sgls = self.config.max_sgls;

        let (inbound, inbound_index_offset) = self.create_one_queue(
            pair_index,
            Direction::ToDevice,
            qdepth,
            element_len,
            None,
        )?;
        let (outbound, _) = self.create_one_queue(
            pair_index,
            Direction::FromDevice,
            qdepth,
            element_len,
            Some(0),
        )?;
        let _ = inbound_index_offset;

        let sg_overflow = self
            .hal
            .dma_alloc(qdepth as usize * max_sgls * SGL_DESCRIPTOR_LEN)?;
        let pool = RequestSlotPool::new(qdepth);

        Ok(QueuePair::new(
            pair_index,
            inbound,
            outbound,
            pool,
            sg_overflow,
            max_sgls,
            Some(pair_index),
            Some(pair_index as u32 - 1),
        ))
    }

    fn create_one_queue(
        &self,
        pair_index: u16,
        direction: Direction,
        qdepth: u16,
        element_len: u16,
        msix_vector: Option<u16>,
    ) -> PqiResult<(DeviceQueue, usize)> {
        let elements = self.hal.dma_alloc(qdepth as usize * element_len as usize)?;
        let device_index_region = self.hal.dma_alloc(8)?;
        let id = queue_id(pair_index, direction);
        let to_device = direction == Direction::ToDevice;

        let own_index_offset = admin::create_operational_queue(
            &self.pairs[0],
            self.io.as_ref(),
            &self.registers,
            to_device,
            id,
            elements.bus_addr(),
            device_index_region.bus_addr(),
            qdepth,
            element_len,
            msix_vector.unwrap_or(0),
        )?;

        let queue = DeviceQueue::new(
            id,
            direction,
            elements,
            element_len,
            qdepth,
            own_index_offset,
            DeviceIndexSource::HostMemory(device_index_region),
        );
        Ok((queue, own_index_offset))
    }

    /// Maps the calling CPU to its queue pair and submits `cmd` there.
    pub fn submit(&self, cpu: u32, cmd: Box<dyn UpperCommand>) {
        let io_pair_count = self.pairs.len() as u16 - 1;
        if io_pair_count == 0 {
            cmd.on_retry();
            return;
        }
        let pair_index = crate::submit::cpu_to_pair_index(cpu, io_pair_count);
        let pair = &self.pairs[pair_index as usize];
        crate::submit::submit(pair, self.io.as_ref(), &self.registers, &self.stats, cmd);
    }

    /// Services the outbound queue bound to `pair_index`. Called from the
    /// collaborator's interrupt vector.
    pub fn handle_interrupt(&self, pair_index: u16) -> PqiResult<u32> {
        let pair = &self.pairs[pair_index as usize];
        crate::complete::drain(pair, self.io.as_ref(), &self.registers, &self.stats)
    }

    /// Sends an abort-task TMF on the I/O pair `pair_index` is bound to.
    pub fn abort_task(&self, pair_index: u16, request_id_to_manage: u16) -> PqiResult<()> {
        let pair = &self.pairs[pair_index as usize];
        crate::taskmgmt::abort_task(pair, self.io.as_ref(), &self.registers, request_id_to_manage)
    }

    /// Sends a LUN-reset TMF on the I/O pair `pair_index` is bound to.
    pub fn lun_reset(&self, pair_index: u16, lun: u64) -> PqiResult<()> {
        let pair = &self.pairs[pair_index as usize];
        crate::taskmgmt::lun_reset(pair, self.io.as_ref(), &self.registers, lun)
    }

    /// Reverse-order teardown: I/O queues before admin, best-effort past
    /// the first failure.
    pub fn teardown(&mut self) {
        info!("tearing down device, {} queue pairs mapped", self.pairs.len());
        while self.pairs.len() > 1 {
            let pair = self.pairs.pop().unwrap();
            let _ = admin::delete_operational_queue(
                &pair,
                self.io.as_ref(),
                &self.registers,
                true,
                queue_id(pair.pair_index(), Direction::ToDevice),
            );
            let _ = admin::delete_operational_queue(
                &pair,
                self.io.as_ref(),
                &self.registers,
                false,
                queue_id(pair.pair_index(), Direction::FromDevice),
            );
        }
        let _ = admin::delete_admin_queues(self.io.as_ref(), &self.registers, self.hal.as_ref(), &self.config);
    }
}

fn bring_up_admin_pair(
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    hal: &dyn Hal,
    config: &PqiConfig,
) -> PqiResult<QueuePair> {
    let nelements = config.admin_queue_elements;
    let element_len = 64u16;

    let iq_elements = hal.dma_alloc(nelements as usize * element_len as usize)?;
    let oq_elements = hal.dma_alloc(nelements as usize * element_len as usize)?;
    let iq_ci_region = hal.dma_alloc(8)?;
    let oq_pi_region = hal.dma_alloc(8)?;

    let (iq_pi_offset, oq_ci_offset) = admin::create_admin_queues(
        io,
        registers,
        hal,
        config,
        iq_elements.bus_addr(),
        oq_elements.bus_addr(),
        iq_ci_region.bus_addr(),
        oq_pi_region.bus_addr(),
        nelements,
        0,
    )?;

    let inbound = DeviceQueue::new(
        queue_id(0, Direction::ToDevice),
        Direction::ToDevice,
        iq_elements,
        element_len,
        nelements,
        iq_pi_offset,
        DeviceIndexSource::HostMemory(iq_ci_region),
    );
    let outbound = DeviceQueue::new(
        queue_id(0, Direction::FromDevice),
        Direction::FromDevice,
        oq_elements,
        element_len,
        nelements,
        oq_ci_offset,
        DeviceIndexSource::HostMemory(oq_pi_region),
    );

    let sg_overflow = hal.dma_alloc(nelements as usize * config.max_sgls * SGL_DESCRIPTOR_LEN)?;
    let pool = RequestSlotPool::new(nelements);

    Ok(QueuePair::new(
        0,
        inbound,
        outbound,
        pool,
        sg_overflow,
        config.max_sgls,
        None,
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PqiError;
    use crate::queue::{DeviceIndexSource, DeviceQueue, Direction};
    use crate::request::RequestSlotPool;
    use crate::testutil::{FakeIo, VecDma};
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicUsize;

    /// A `Hal` whose only job is to count `dma_alloc` calls, so a test can
    /// assert that a failure before queue bring-up never mapped anything.
    struct CountingHal(Arc<AtomicUsize>);

    impl Hal for CountingHal {
        fn dma_alloc(&self, len: usize) -> PqiResult<Box<dyn crate::hal::DmaRegion>> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(VecDma::new(len))
        }
        fn delay_us(&self, _us: u32) {}
        fn uptime_ms(&self) -> u64 {
            0
        }
    }

    #[test]
    fn probe_fails_with_link_lost_and_maps_no_queues_when_signature_is_bad() {
        let io = FakeIo::new();
        io.write_u64_at(0x00, 0xdead_beef_dead_beef).unwrap();
        let allocs = Arc::new(AtomicUsize::new(0));
        let hal = Box::new(CountingHal(allocs.clone()));

        let err = Device::probe(Box::new(io), hal, PqiConfig::default(), 1).unwrap_err();

        assert_eq!(err, PqiError::LinkLost);
        assert_eq!(allocs.load(Ordering::Relaxed), 0);
    }

    fn make_test_pair(inbound_off: usize, outbound_off: usize, device_pi_mmio: usize) -> QueuePair {
        let element_len = 16u16;
        let n = 8u16;
        let inbound = DeviceQueue::new(
            1,
            Direction::ToDevice,
            VecDma::new(n as usize * element_len as usize),
            element_len,
            n,
            inbound_off,
            DeviceIndexSource::HostMemory(VecDma::new(8)),
        );
        let outbound = DeviceQueue::new(
            0,
            Direction::FromDevice,
            VecDma::new(n as usize * element_len as usize),
            element_len,
            n,
            outbound_off,
            DeviceIndexSource::Mmio(device_pi_mmio),
        );
        let pool = RequestSlotPool::new(n);
        let sg_overflow = VecDma::new(n as usize * 8 * crate::iu::SGL_DESCRIPTOR_LEN);
        QueuePair::new(0, inbound, outbound, pool, sg_overflow, 8, None, None)
    }

    fn write_cmd_success_element(pair: &QueuePair, request_id: u16) {
        let mut outbound = pair.lock_outbound();
        let element_len = outbound.element_len() as usize;
        let mut body = alloc::vec![0u8; element_len];
        body[0] = crate::iu::IU_TYPE_RESPONSE_CMD_SUCCESS;
        body[2..4].copy_from_slice(&(element_len as u16 - crate::iu::IU_HEADER_LEN).to_le_bytes());
        body[8..10].copy_from_slice(&request_id.to_le_bytes());
        outbound.element_bytes_mut(0).copy_from_slice(&body);
    }

    #[test]
    fn two_queue_pairs_complete_independently_regardless_of_drain_order() {
        let io = FakeIo::new();
        let pair_a = make_test_pair(0x2000, 0x2008, 0x3000);
        let pair_b = make_test_pair(0x2100, 0x2108, 0x3100);
        let registers = PqiRegisters::default();
        let stats = DeviceStats::default();

        let id_a = pair_a.lock_inbound().pool.alloc().unwrap();
        let id_b = pair_b.lock_inbound().pool.alloc().unwrap();

        // Pair B's response is posted and drained first even though pair A's
        // command was submitted first: each ring only ever yields its own
        // IUs, so draining order across pairs can't cross-complete a slot.
        write_cmd_success_element(&pair_b, id_b);
        io.write_u32_at(0x3100, 1).unwrap();
        let dispatched_b = crate::complete::drain(&pair_b, &io, &registers, &stats).unwrap();
        assert_eq!(dispatched_b, 1);
        assert!(!pair_b.lock_inbound().pool.is_allocated(id_b));
        assert!(pair_a.lock_inbound().pool.is_allocated(id_a));

        write_cmd_success_element(&pair_a, id_a);
        io.write_u32_at(0x3000, 1).unwrap();
        let dispatched_a = crate::complete::drain(&pair_a, &io, &registers, &stats).unwrap();
        assert_eq!(dispatched_a, 1);
        assert!(!pair_a.lock_inbound().pool.is_allocated(id_a));
    }
}

