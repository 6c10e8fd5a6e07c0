//! The submission path.

use crate::device::DeviceStats;
use crate::hal::PqiDeviceIo;
use crate::iu::{LimitedCmdIu, SglDescriptor};
use crate::queuepair::QueuePair;
use crate::registers::PqiRegisters;
use crate::upper::{SgSegment, UpperCommand};
use alloc::boxed::Box;
use core::sync::atomic::Ordering;
use log::warn;

/// Maps a CPU id to its I/O queue pair: `1 + (cpu mod (K-1))`, pair 0
/// reserved for admin.
pub fn cpu_to_pair_index(cpu: u32, io_pair_count: u16) -> u16 {
    1 + (cpu % io_pair_count as u32) as u16
}

/// Submits `cmd` on `pair`. Rejects anything not addressed to LUN 0
/// synchronously; on success the command completes later via the
/// interrupt path.
pub fn submit(
    pair: &QueuePair,
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    stats: &DeviceStats,
    mut cmd: Box<dyn UpperCommand>,
) {
    if cmd.lun() != 0 {
        cmd.on_no_connect();
        return;
    }

    let queue_id = pair.lock_inbound().inbound.queue_id();
    let xfer_size = cmd.transfer_size();
    let direction = cmd.direction();
    let cdb_copy: alloc::vec::Vec<u8> = cmd.cdb().to_vec();

    let mut locked = pair.lock_inbound();
    let request_id = match locked.pool.alloc() {
        Ok(id) => id,
        Err(_) => {
            drop(locked);
            warn!("no free request slot on queue pair {queue_id}, retrying command later");
            cmd.on_retry();
            return;
        }
    };
    let element_index = match locked.inbound.alloc_elements(io, registers, 1) {
        Ok(idx) => idx,
        Err(_) => {
            locked.pool.free(request_id);
            drop(locked);
            warn!("inbound ring full on queue pair {queue_id}, retrying command later");
            cmd.on_retry();
            return;
        }
    };

    let mut iu = LimitedCmdIu::new(request_id, queue_id, direction.as_flag(), &cdb_copy);

    let sg_segments: alloc::vec::Vec<SgSegment> = cmd.sg_list().to_vec();
    let sgl_count = sg_segments.len().min(2) as u16;
    match encode_sg(&mut locked, request_id, &sg_segments, &mut iu) {
        Ok(()) => {
            iu.set_xfer_size(xfer_size);
            iu.set_iu_length(
                crate::iu::LIMITED_CMD_IU_NO_SGL_LEN
                    + sgl_count * crate::iu::SGL_DESCRIPTOR_LEN as u16,
            );
            locked.pool.get_mut(request_id).upper_command = Some(cmd);
            locked.pool.get_mut(request_id).xfer_size = xfer_size;
            let element_len = locked.inbound.element_len() as usize;
            let dst = locked.inbound.element_bytes_mut(element_index);
            let n = iu.as_bytes().len().min(element_len);
            dst[..n].copy_from_slice(&iu.as_bytes()[..n]);
            let publish_result = locked.inbound.publish(io);
            drop(locked);
            if publish_result.is_ok() {
                stats.note_submitted();
            }
        }
        Err(()) => {
            // SG mapping failed after slot+element reserved — null the
            // element, free the slot, publish anyway, retry upstream.
            warn!("scatter/gather list too large for queue pair {queue_id}'s overflow area, retrying command later");
            locked.inbound.cancel_element(element_index);
            locked.pool.free(request_id);
            let _ = locked.inbound.publish(io);
            drop(locked);
            cmd.on_retry();
        }
    }
}

/// Encodes `segments` into `iu`'s inline slots, chaining into the
/// queue pair's SG overflow area for segments beyond two.
/// `Err(())` means the overflow area could not hold the list (`DmaMapFailed`
/// upstream; this crate has no independent mapping step to fail, so the only
/// failure is exceeding `max_sgls`).
fn encode_sg(
    locked: &mut crate::queuepair::LockedHalf,
    request_id: u16,
    segments: &[SgSegment],
    iu: &mut LimitedCmdIu,
) -> Result<(), ()> {
    match segments.len() {
        0 => Ok(()),
        1 => {
            iu.set_inline_sg(0, SglDescriptor::data_block(segments[0].bus_addr, segments[0].len));
            Ok(())
        }
        2 => {
            iu.set_inline_sg(0, SglDescriptor::data_block(segments[0].bus_addr, segments[0].len));
            iu.set_inline_sg(1, SglDescriptor::data_block(segments[1].bus_addr, segments[1].len));
            Ok(())
        }
        n => {
            if n - 1 > locked.max_sgls() {
                return Err(());
            }
            let chained = &segments[1..];
            iu.set_inline_sg(0, SglDescriptor::data_block(segments[0].bus_addr, segments[0].len));
            let chain_addr =
                locked.sg_overflow_bus_addr() + locked.sg_overflow_slot_offset(request_id) as u64;
            iu.set_inline_sg(
                1,
                SglDescriptor::chain(
                    chain_addr,
                    (chained.len() * crate::iu::SGL_DESCRIPTOR_LEN) as u32,
                ),
            );
            let overflow = locked.sg_overflow_bytes_mut(
                request_id,
                chained.len() * crate::iu::SGL_DESCRIPTOR_LEN,
            );
            for (i, seg) in chained.iter().enumerate() {
                let off = i * crate::iu::SGL_DESCRIPTOR_LEN;
                SglDescriptor::data_block(seg.bus_addr, seg.len)
                    .write_into(&mut overflow[off..off + crate::iu::SGL_DESCRIPTOR_LEN]);
            }
            Ok(())
        }
    }
}

impl DeviceStats {
    fn note_submitted(&self) {
        let new = self.curr_outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        let mut high = self.max_outstanding.lock();
        if new > *high {
            *high = new;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Direction, DeviceIndexSource, DeviceQueue};
    use crate::queuepair::QueuePair;
    use crate::request::RequestSlotPool;
    use crate::testutil::{FakeIo, VecDma};
    use crate::upper::{CommandOutcome, DataDirection};
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use spin::Mutex as SpinMutex;

    struct RecordingCommand {
        lun: u64,
        cdb: Vec<u8>,
        direction: DataDirection,
        sg: Vec<SgSegment>,
        xfer_size: u32,
        outcome: Arc<SpinMutex<Option<CommandOutcome>>>,
    }

    impl UpperCommand for RecordingCommand {
        fn lun(&self) -> u64 {
            self.lun
        }
        fn cdb(&self) -> &[u8] {
            &self.cdb
        }
        fn direction(&self) -> DataDirection {
            self.direction
        }
        fn sg_list(&self) -> &[SgSegment] {
            &self.sg
        }
        fn transfer_size(&self) -> u32 {
            self.xfer_size
        }
        fn unmap(&mut self) {}
        fn on_complete(self: Box<Self>, outcome: CommandOutcome) {
            *self.outcome.lock() = Some(outcome);
        }
        fn on_no_connect(self: Box<Self>) {
            *self.outcome.lock() = Some(CommandOutcome::transport_error());
        }
        fn on_retry(self: Box<Self>) {}
    }

    fn make_pair(max_sgls: usize) -> (QueuePair, FakeIo) {
        let io = FakeIo::new();
        let n = 8u16;
        let element_len = 64u16;
        let inbound = DeviceQueue::new(
            1,
            Direction::ToDevice,
            VecDma::new(n as usize * element_len as usize),
            element_len,
            n,
            0x2000,
            DeviceIndexSource::HostMemory(VecDma::new(8)),
        );
        let outbound = DeviceQueue::new(
            0,
            Direction::FromDevice,
            VecDma::new(n as usize * element_len as usize),
            element_len,
            n,
            0x2008,
            DeviceIndexSource::HostMemory(VecDma::new(8)),
        );
        let pool = RequestSlotPool::new(n);
        let sg_overflow = VecDma::new(n as usize * max_sgls * crate::iu::SGL_DESCRIPTOR_LEN);
        (
            QueuePair::new(0, inbound, outbound, pool, sg_overflow, max_sgls, None, None),
            io,
        )
    }

    #[test]
    fn lun_other_than_zero_gets_no_connect_without_touching_the_ring() {
        let (pair, io) = make_pair(8);
        let registers = PqiRegisters::default();
        let stats = DeviceStats::default();
        let outcome = Arc::new(SpinMutex::new(None));
        let cmd = Box::new(RecordingCommand {
            lun: 1,
            cdb: alloc::vec![0u8; 16],
            direction: DataDirection::None,
            sg: Vec::new(),
            xfer_size: 0,
            outcome: outcome.clone(),
        });
        submit(&pair, &io, &registers, &stats, cmd);
        assert!(outcome.lock().as_ref().unwrap().transport_error);
        assert_eq!(pair.lock_inbound().inbound.unposted_index(), 0);
    }

    #[test]
    fn five_segments_chain_the_first_descriptor_and_the_overflow_area() {
        let (pair, io) = make_pair(8);
        let registers = PqiRegisters::default();
        let stats = DeviceStats::default();
        let outcome = Arc::new(SpinMutex::new(None));
        let sg = alloc::vec![
            SgSegment { bus_addr: 0x1000, len: 512 },
            SgSegment { bus_addr: 0x2000, len: 512 },
            SgSegment { bus_addr: 0x3000, len: 512 },
            SgSegment { bus_addr: 0x4000, len: 512 },
            SgSegment { bus_addr: 0x5000, len: 512 },
        ];
        let cmd = Box::new(RecordingCommand {
            lun: 0,
            cdb: alloc::vec![0x28u8; 16],
            direction: DataDirection::FromDevice,
            sg,
            xfer_size: 512 * 5,
            outcome: outcome.clone(),
        });
        submit(&pair, &io, &registers, &stats, cmd);

        let locked = pair.lock_inbound();
        let element = locked.inbound.element_bytes(0);
        let first = SglDescriptor::read_from(&element[32..48]);
        assert_eq!(first.address, 0x1000);
        assert_eq!(first.length, 512);
        let chain = SglDescriptor::read_from(&element[48..64]);
        assert_eq!(chain.descriptor_type, crate::iu::SGL_TYPE_STANDARD_LAST_SEG);
        assert_eq!(chain.length as usize, 4 * crate::iu::SGL_DESCRIPTOR_LEN);
        drop(locked);

        assert_eq!(stats.curr_outstanding(), 1);
        let _ = io;
    }
}
