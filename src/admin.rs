//! The admin queue pair (queue pair 0): device bring-up handshake and
//! synchronous control IUs.

use crate::config::PqiConfig;
use crate::error::{PqiError, PqiResult};
use crate::hal::{Hal, PqiDeviceIo};
use crate::iu::{
    CreateOperationalQueueRequest, CreateOperationalQueueResponse, DeleteOperationalQueueRequest,
    DeleteOperationalQueueResponse, PqiDeviceCapabilities, ReportCapabilityRequest,
    ReportCapabilityResponse, PQI_DEVICE_CAPABILITIES_LEN,
};
use crate::queuepair::QueuePair;
use crate::registers::PqiRegisters;
use crate::request::Waiter;
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::warn;

/// `device_status` register values. Not named numerically by any protocol
/// description available to this driver; chosen to be dense and monotonic
/// in bring-up order.
pub const DEVICE_STATUS_RESET_PENDING: u32 = 0x00;
pub const DEVICE_STATUS_READY_FOR_ADMIN_FUNCTION: u32 = 0x01;
pub const DEVICE_STATUS_CREATING_ADMIN_QUEUES: u32 = 0x02;
pub const DEVICE_STATUS_READY_FOR_IO: u32 = 0x03;
pub const DEVICE_STATUS_DELETING_ADMIN_QUEUES: u32 = 0x04;

/// `process_admin_function` function codes.
pub const ADMIN_FUNCTION_CREATE_ADMIN_QUEUES: u64 = 0x01;
pub const ADMIN_FUNCTION_DELETE_ADMIN_QUEUES: u64 = 0x02;

/// Polls `condition` every `config`'s cadence until it returns `true` or
/// `timeout_ms` elapses.
fn poll_until(
    hal: &dyn Hal,
    config: &PqiConfig,
    timeout_ms: u32,
    mut condition: impl FnMut() -> PqiResult<bool>,
) -> PqiResult<()> {
    let deadline = hal.uptime_ms() + timeout_ms as u64;
    loop {
        if condition()? {
            return Ok(());
        }
        if hal.uptime_ms() >= deadline {
            warn!("admin poll timed out after {timeout_ms}ms");
            return Err(PqiError::TimedOut);
        }
        hal.delay_us(config.admin_poll_interval_min_us);
    }
}

/// Drives the reset handshake.
pub fn reset(
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    hal: &dyn Hal,
    config: &PqiConfig,
) -> PqiResult<()> {
    registers.check_signature(io)?;
    registers.start_soft_reset(io)?;
    poll_until(hal, config, config.reset_timeout_ms, || {
        registers.reset_completed(io)
    })
}

/// Waits for `process_admin_function`'s low byte to return to 0, which the
/// device clears once it has acknowledged the function.
fn wait_admin_ack(
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    hal: &dyn Hal,
    config: &PqiConfig,
) -> PqiResult<()> {
    poll_until(hal, config, config.admin_ack_timeout_ms, || {
        let raw = registers.process_admin_function.read(io)?;
        let raw = registers.safe_read_u64(io, raw)?;
        Ok(raw & 0xff == 0)
    })
}

fn wait_device_state(
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    hal: &dyn Hal,
    config: &PqiConfig,
    timeout_ms: u32,
    want: u32,
) -> PqiResult<()> {
    poll_until(hal, config, timeout_ms, || {
        let raw = registers.device_status.read(io)?;
        let raw = registers.safe_read_u32(io, raw)?;
        Ok(raw == want)
    })
}

/// Creates the admin queue pair on the device, driving `device_status`
/// from `CreatingAdminQueues` to `ReadyForIO`.
///
/// `iq_ci_host_addr`/`oq_pi_host_addr` are bus addresses of host-memory
/// words the device will write its indices into; the returned pair is the
/// MMIO offset (from the register base) the host must write its own IQ PI /
/// OQ CI to.
#[allow(clippy::too_many_arguments)]
pub fn create_admin_queues(
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    hal: &dyn Hal,
    config: &PqiConfig,
    iq_array_addr: u64,
    oq_array_addr: u64,
    iq_ci_host_addr: u64,
    oq_pi_host_addr: u64,
    nelements: u16,
    msix_vector: u16,
) -> PqiResult<(usize, usize)> {
    wait_device_state(
        io,
        registers,
        hal,
        config,
        config.admin_ack_timeout_ms,
        DEVICE_STATUS_READY_FOR_ADMIN_FUNCTION,
    )?;
    registers.admin_iq_addr.write(io, iq_array_addr)?;
    registers.admin_oq_addr.write(io, oq_array_addr)?;
    registers.admin_iq_ci_addr.write(io, iq_ci_host_addr)?;
    registers.admin_oq_pi_addr.write(io, oq_pi_host_addr)?;
    let param = (nelements as u32) | ((nelements as u32) << 8) | ((msix_vector as u32) << 16);
    registers.admin_queue_param.write(io, param)?;
    registers
        .process_admin_function
        .write(io, ADMIN_FUNCTION_CREATE_ADMIN_QUEUES)?;
    wait_admin_ack(io, registers, hal, config)?;
    wait_device_state(
        io,
        registers,
        hal,
        config,
        config.admin_ack_timeout_ms,
        DEVICE_STATUS_READY_FOR_IO,
    )?;
    let iq_pi_offset = registers.admin_iq_pi_offset.read(io)?;
    let oq_ci_offset = registers.admin_oq_ci_offset.read(io)?;
    Ok((iq_pi_offset as usize, oq_ci_offset as usize))
}

/// Tears the admin queue pair down, driving `device_status` to
/// `DeletingAdminQueues`.
pub fn delete_admin_queues(
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    hal: &dyn Hal,
    config: &PqiConfig,
) -> PqiResult<()> {
    registers
        .process_admin_function
        .write(io, ADMIN_FUNCTION_DELETE_ADMIN_QUEUES)?;
    wait_admin_ack(io, registers, hal, config)?;
    wait_device_state(
        io,
        registers,
        hal,
        config,
        config.admin_ack_timeout_ms,
        DEVICE_STATUS_DELETING_ADMIN_QUEUES,
    )
}

/// Sends one control IU on `pair`'s inbound ring and blocks for its
/// response. `build` receives the freshly allocated request id and returns
/// the IU's wire bytes. Also reused by task management, against an I/O
/// pair instead of the admin pair.
pub fn send_sync_iu(
    pair: &QueuePair,
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    build: impl FnOnce(u16) -> Vec<u8>,
) -> PqiResult<Vec<u8>> {
    let waiter = Arc::new(Waiter::new());
    let request_id = {
        let mut locked = pair.lock_inbound();
        let id = locked.pool.alloc()?;
        let idx = match locked.inbound.alloc_elements(io, registers, 1) {
            Ok(idx) => idx,
            Err(err) => {
                locked.pool.free(id);
                return Err(err);
            }
        };
        let iu = build(id);
        let element_len = locked.inbound.element_len() as usize;
        let dst = locked.inbound.element_bytes_mut(idx);
        let n = iu.len().min(element_len);
        dst[..n].copy_from_slice(&iu[..n]);
        locked.pool.get_mut(id).waiter = Some(waiter.clone());
        locked.inbound.publish(io)?;
        id
    };
    waiter.wait();
    let mut locked = pair.lock_inbound();
    let response = locked.pool.get(request_id).response.clone();
    locked.pool.free(request_id);
    Ok(response)
}

/// Requests the device's capability report.
pub fn report_capability(
    pair: &QueuePair,
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    hal: &dyn Hal,
) -> PqiResult<PqiDeviceCapabilities> {
    let buffer_size = PQI_DEVICE_CAPABILITIES_LEN as u32;
    let mut region = hal.dma_alloc(buffer_size as usize)?;
    let buffer_addr = region.bus_addr();
    let response = send_sync_iu(pair, io, registers, |id| {
        ReportCapabilityRequest::new(id, buffer_addr, buffer_size)
            .as_bytes()
            .to_vec()
    })?;
    let header = ReportCapabilityResponse::read_from(&response);
    if header.status != 0 {
        return Err(PqiError::DeviceRejected);
    }
    Ok(PqiDeviceCapabilities::read_from(region.as_bytes_mut()))
}

/// Sends `CreateOperationalQueue`.
#[allow(clippy::too_many_arguments)]
pub fn create_operational_queue(
    pair: &QueuePair,
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    to_device: bool,
    queue_id: u16,
    element_array_addr: u64,
    index_addr: u64,
    nelements: u16,
    element_length: u16,
    msix_vector: u16,
) -> PqiResult<usize> {
    let response = send_sync_iu(pair, io, registers, |id| {
        CreateOperationalQueueRequest::new(
            id,
            to_device,
            queue_id,
            element_array_addr,
            index_addr,
            nelements,
            element_length / 16,
            msix_vector,
        )
        .as_bytes()
        .to_vec()
    })?;
    let resp = CreateOperationalQueueResponse::read_from(&response);
    if resp.status != 0 {
        warn!("device rejected CreateOperationalQueue for queue {queue_id}: status {}", resp.status);
        return Err(PqiError::DeviceRejected);
    }
    Ok(resp.index_offset as usize)
}

/// Sends `DeleteOperationalQueue`.
pub fn delete_operational_queue(
    pair: &QueuePair,
    io: &dyn PqiDeviceIo,
    registers: &PqiRegisters,
    to_device: bool,
    queue_id: u16,
) -> PqiResult<()> {
    let response = send_sync_iu(pair, io, registers, |id| {
        DeleteOperationalQueueRequest::new(id, to_device, queue_id)
            .as_bytes()
            .to_vec()
    })?;
    let resp = DeleteOperationalQueueResponse::read_from(&response);
    if resp.status != 0 {
        return Err(PqiError::DeviceRejected);
    }
    Ok(())
}
