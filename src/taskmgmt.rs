//! Abort-task and LUN-reset task management functions.

use crate::admin::send_sync_iu;
use crate::error::{PqiError, PqiResult};
use crate::hal::PqiDeviceIo;
use crate::iu::{self, TaskMgmtIu, TaskMgmtResponseIu};
use crate::queuepair::QueuePair;
use crate::registers::PqiRegisters;

/// Requests the device abort the command identified by `request_id_to_manage`
/// on `pair`. Blocks until the device replies.
pub fn abort_task(
    pair: &QueuePair,
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    request_id_to_manage: u16,
) -> PqiResult<()> {
    let queue_id = pair.lock_inbound().inbound.queue_id();
    let response = send_sync_iu(pair, io, registers, |id| {
        TaskMgmtIu::abort_task(id, queue_id, request_id_to_manage)
            .as_bytes()
            .to_vec()
    })?;
    check_response(&response)
}

/// Requests a LUN reset on `pair`.
pub fn lun_reset(
    pair: &QueuePair,
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    lun: u64,
) -> PqiResult<()> {
    let queue_id = pair.lock_inbound().inbound.queue_id();
    let response = send_sync_iu(pair, io, registers, |id| {
        TaskMgmtIu::lun_reset(id, queue_id, lun).as_bytes().to_vec()
    })?;
    check_response(&response)
}

fn check_response(response: &[u8]) -> PqiResult<()> {
    let tmf = TaskMgmtResponseIu::read_from(response);
    match tmf.response_code {
        iu::TMF_RESPONSE_COMPLETE | iu::TMF_RESPONSE_SUCCEEDED => Ok(()),
        _ => Err(PqiError::DeviceRejected),
    }
}
