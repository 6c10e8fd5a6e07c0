//! The completion path: interrupt-handler-side draining of an outbound ring
//! and response decoding/dispatch.

use crate::device::DeviceStats;
use crate::error::PqiError;
use crate::hal::PqiDeviceIo;
use crate::iu::{
    self, CmdResponseHeader, ManagementResponseIu, TaskMgmtResponseIu, CMD_RESPONSE_DATA_OFFSET,
    RESP_DATA_INCORRECT_LUN, RESP_DATA_INVALID_FIELD_IN_IU, RESP_DATA_INVALID_IU_LENGTH,
    RESP_DATA_INVALID_IU_TYPE, RESP_DATA_INVALID_LENGTH_IN_IU, RESP_DATA_IU_TOO_LONG,
    RESP_DATA_MISALIGNED_LENGTH_IN_IU, RESP_DATA_OVERLAPPED_REQUEST_ID,
};
use crate::queuepair::QueuePair;
use crate::registers::PqiRegisters;
use crate::upper::CommandOutcome;
use alloc::vec;
use core::sync::atomic::Ordering;
use log::warn;

/// Drains every element currently available on `pair`'s outbound ring.
/// Called from the bound interrupt vector, never from the submission path.
/// Returns the number of IUs fully reassembled and dispatched.
pub fn drain(
    pair: &QueuePair,
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    stats: &DeviceStats,
) -> Result<u32, PqiError> {
    let mut dispatched = 0;
    loop {
        let mut outbound = pair.lock_outbound();
        let element_len = outbound.element_len() as usize;
        let mut chunk = vec![0u8; element_len];
        if !outbound.dequeue(io, registers, &mut chunk)? {
            break;
        }
        let request_id = iu::peek_request_id(&chunk);

        let mut locked = pair.lock_inbound();
        if !locked.pool.is_allocated(request_id) {
            // Response referencing a freed or never-issued slot; drop it
            // rather than indexing out of bounds.
            warn!("dropping response for unallocated request id {request_id}");
            outbound.notify_consumed(io)?;
            continue;
        }
        let slot = locked.pool.get_mut(request_id);
        if slot.response_accumulated == 0 {
            slot.response[..].fill(0);
        }
        let declared = iu::declared_iu_len(&chunk) as usize;
        let end = (slot.response_accumulated + element_len).min(slot.response.len());
        let n = end - slot.response_accumulated;
        slot.response[slot.response_accumulated..end].copy_from_slice(&chunk[..n]);
        slot.response_accumulated += n;
        outbound.notify_consumed(io)?;

        if slot.response_accumulated >= declared {
            let should_free = dispatch(locked.pool.get_mut(request_id));
            if should_free {
                locked.pool.free(request_id);
            }
            stats.note_completed();
            dispatched += 1;
        }
        drop(locked);
    }
    Ok(dispatched)
}

/// Decodes the accumulated response and delivers it to the waiting upper
/// command or synchronous waiter. Returns whether the caller should free the
/// request slot: a waiter-backed slot is freed by the submitter once it
/// wakes and reads the response in place, so `drain` must not free it too.
fn dispatch(slot: &mut crate::request::Request) -> bool {
    let response = &slot.response;
    let iu_type = iu::peek_iu_type(response);

    if let Some(waiter) = slot.waiter.take() {
        waiter.signal();
        return false;
    }

    let Some(mut cmd) = slot.upper_command.take() else {
        return true;
    };
    cmd.unmap();

    let outcome = match iu_type {
        iu::IU_TYPE_RESPONSE_CMD_SUCCESS => CommandOutcome::ok(0),
        iu::IU_TYPE_RESPONSE_CMD_RESPONSE => {
            let header = CmdResponseHeader::read_from(response);
            let sense_start = CMD_RESPONSE_DATA_OFFSET;
            let sense_end =
                (sense_start + header.sense_data_len as usize).min(response.len());

            let firmware_anomaly =
                header.data_in_xfer_result != 0 && header.data_out_xfer_result != 0;
            if firmware_anomaly {
                warn!("cmd response reports both data-in and data-out transferred");
            }
            let data_xferred = if header.data_in_xfer_result != 0 {
                header.data_in_xferred
            } else if header.data_out_xfer_result != 0 {
                header.data_out_xferred
            } else {
                slot.xfer_size
            };
            let residual = slot.xfer_size as i64 - data_xferred as i64;

            let transport_error = if header.response_data_len > 0 {
                let sub_code = response[CMD_RESPONSE_DATA_OFFSET + 3];
                warn!("cmd response carries response data: {}", response_data_message(sub_code));
                true
            } else {
                false
            };

            CommandOutcome {
                status: header.status,
                residual,
                sense: response[sense_start..sense_end].to_vec(),
                transport_error,
                firmware_anomaly,
            }
        }
        iu::IU_TYPE_RESPONSE_MANAGEMENT => {
            let mgmt = ManagementResponseIu::read_from(response);
            if mgmt.result == iu::MGMT_RESULT_GOOD {
                CommandOutcome::ok(0)
            } else {
                CommandOutcome::transport_error()
            }
        }
        iu::IU_TYPE_RESPONSE_TASK_MGMT => {
            // A TMF response on the main I/O path means this slot wasn't
            // actually a TMF waiter; flag it but still complete the command
            // rather than leaving it to hang.
            warn!("task management response arrived on the upper-command completion path");
            let tmf = TaskMgmtResponseIu::read_from(response);
            if tmf.response_code == iu::TMF_RESPONSE_COMPLETE
                || tmf.response_code == iu::TMF_RESPONSE_SUCCEEDED
            {
                CommandOutcome::ok(0)
            } else {
                CommandOutcome::transport_error()
            }
        }
        _ => {
            warn!("unexpected response IU type {iu_type:#x}, completing with transport error");
            CommandOutcome::transport_error()
        }
    };
    cmd.on_complete(outcome);
    true
}

/// Human-readable text for a `CmdResponse` sub-code, used only in the
/// `warn!` logged when the device reports one on the main I/O path.
fn response_data_message(sub_code: u8) -> &'static str {
    match sub_code {
        RESP_DATA_INCORRECT_LUN => "incorrect LUN",
        RESP_DATA_OVERLAPPED_REQUEST_ID => "overlapped request ID attempted",
        RESP_DATA_INVALID_IU_TYPE => "invalid IU type",
        RESP_DATA_INVALID_IU_LENGTH => "invalid IU length",
        RESP_DATA_INVALID_LENGTH_IN_IU => "invalid length in IU",
        RESP_DATA_MISALIGNED_LENGTH_IN_IU => "misaligned length in IU",
        RESP_DATA_INVALID_FIELD_IN_IU => "invalid field in IU",
        RESP_DATA_IU_TOO_LONG => "IU too long",
        _ => "unknown response data code",
    }
}

impl DeviceStats {
    fn note_completed(&self) {
        self.curr_outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Direction, DeviceIndexSource, DeviceQueue};
    use crate::queuepair::QueuePair;
    use crate::request::RequestSlotPool;
    use crate::testutil::{FakeIo, VecDma};

    const OUTBOUND_DEVICE_PI_OFFSET: usize = 0x3000;

    /// The outbound device-advanced index lives at a known MMIO offset so
    /// tests can move it directly with `io.write_u32_at`, standing in for
    /// the device producing elements.
    fn make_pair(element_len: u16, n: u16) -> (QueuePair, FakeIo) {
        let io = FakeIo::new();
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
            DeviceIndexSource::Mmio(OUTBOUND_DEVICE_PI_OFFSET),
        );
        let pool = RequestSlotPool::new(n);
        let sg_overflow = VecDma::new(n as usize * 8 * crate::iu::SGL_DESCRIPTOR_LEN);
        (
            QueuePair::new(0, inbound, outbound, pool, sg_overflow, 8, None, None),
            io,
        )
    }

    /// Writes one outbound element carrying the prologue for a
    /// `CmdSuccess` (or continuation-only) response.
    fn write_element(pair: &QueuePair, index: u16, request_id: u16, declared_len: u16, is_head: bool) {
        let mut outbound = pair.lock_outbound();
        let element_len = outbound.element_len() as usize;
        let mut body = alloc::vec![0u8; element_len];
        if is_head {
            body[0] = iu::IU_TYPE_RESPONSE_CMD_SUCCESS;
            body[2..4].copy_from_slice(&(declared_len - iu::IU_HEADER_LEN).to_le_bytes());
            body[8..10].copy_from_slice(&request_id.to_le_bytes());
        }
        outbound.element_bytes_mut(index).copy_from_slice(&body);
    }

    #[test]
    fn multi_element_response_does_not_signal_before_fully_accumulated() {
        let (pair, io) = make_pair(16, 8);
        let registers = PqiRegisters::default();
        let stats = DeviceStats::default();

        let request_id = pair.lock_inbound().pool.alloc().unwrap();
        // Declared length 48 spans 3 elements of 16 bytes each.
        write_element(&pair, 0, request_id, 48, true);
        write_element(&pair, 1, request_id, 48, false);
        write_element(&pair, 2, request_id, 48, false);

        io.write_u32_at(OUTBOUND_DEVICE_PI_OFFSET, 2).unwrap();
        let dispatched = drain(&pair, &io, &registers, &stats).unwrap();
        assert_eq!(dispatched, 0);
        assert!(pair.lock_inbound().pool.is_allocated(request_id));

        io.write_u32_at(OUTBOUND_DEVICE_PI_OFFSET, 3).unwrap();
        let dispatched = drain(&pair, &io, &registers, &stats).unwrap();
        assert_eq!(dispatched, 1);
        assert!(!pair.lock_inbound().pool.is_allocated(request_id));
    }

    #[test]
    fn unallocated_request_id_is_dropped_without_panicking() {
        let (pair, io) = make_pair(16, 8);
        let registers = PqiRegisters::default();
        let stats = DeviceStats::default();

        write_element(&pair, 0, 5, 16, true);
        io.write_u32_at(OUTBOUND_DEVICE_PI_OFFSET, 1).unwrap();
        let dispatched = drain(&pair, &io, &registers, &stats).unwrap();
        assert_eq!(dispatched, 0);
    }
}
