//! Wire formats for PQI/SOP Information Units.
//!
//! Every IU shares an 8-byte prologue followed by a 2-byte `request_id`;
//! declared length excludes the first 4 bytes of the prologue. This crate
//! forbids unsafe code, so each IU is a plain `[u8; N]` newtype with
//! explicit little-endian get/set accessors rather than a `#[repr(C)]`
//! struct read by pointer cast — the same bit-exactness the original
//! driver's `VERIFY_OFFSET`/`BUILD_BUG_ON` macros guarantee, done through
//! ordinary safe slice indexing. Field offset constants are the single
//! source of truth each accessor pair reads and writes through, with a
//! `const _: ()` bounds assertion alongside every one.

/// Bytes before the prologue's `length` field stop counting: declared
/// length always excludes these.
pub const IU_HEADER_LEN: u16 = 4;

// ---- IU type tags --------------------------------------------------------

pub const IU_TYPE_NULL: u8 = 0x00;
pub const IU_TYPE_LIMITED_CMD: u8 = 0x10;
pub const IU_TYPE_TASK_MGMT: u8 = 0x13;
pub const IU_TYPE_CREATE_OPERATIONAL_QUEUE: u8 = 0x60;
pub const IU_TYPE_DELETE_OPERATIONAL_QUEUE: u8 = 0x61;
pub const IU_TYPE_REPORT_PQI_DEVICE_CAPABILITY: u8 = 0x70;

pub const IU_TYPE_RESPONSE_CMD_SUCCESS: u8 = 0xF0;
pub const IU_TYPE_RESPONSE_CMD_RESPONSE: u8 = 0xF1;
pub const IU_TYPE_RESPONSE_TASK_MGMT: u8 = 0xF2;
pub const IU_TYPE_RESPONSE_MANAGEMENT: u8 = 0xF3;
pub const IU_TYPE_RESPONSE_CREATE_OPERATIONAL_QUEUE: u8 = 0xF4;
pub const IU_TYPE_RESPONSE_DELETE_OPERATIONAL_QUEUE: u8 = 0xF5;
pub const IU_TYPE_RESPONSE_REPORT_PQI_DEVICE_CAPABILITY: u8 = 0xF6;

// ---- function / response codes ------------------------------------------

pub const FUNCTION_CREATE_QUEUE_TO_DEVICE: u8 = 0x01;
pub const FUNCTION_CREATE_QUEUE_FROM_DEVICE: u8 = 0x02;
pub const FUNCTION_DELETE_QUEUE_TO_DEVICE: u8 = 0x03;
pub const FUNCTION_DELETE_QUEUE_FROM_DEVICE: u8 = 0x04;

pub const TMF_ABORT_TASK: u8 = 0x01;
pub const TMF_LUN_RESET: u8 = 0x08;

pub const TMF_RESPONSE_COMPLETE: u8 = 0x00;
pub const TMF_RESPONSE_SUCCEEDED: u8 = 0x01;
pub const TMF_RESPONSE_REJECTED: u8 = 0x02;
pub const TMF_RESPONSE_FAILED: u8 = 0x03;

pub const RESP_DATA_INCORRECT_LUN: u8 = 0x01;
pub const RESP_DATA_OVERLAPPED_REQUEST_ID: u8 = 0x02;
pub const RESP_DATA_INVALID_IU_TYPE: u8 = 0x03;
pub const RESP_DATA_INVALID_IU_LENGTH: u8 = 0x04;
pub const RESP_DATA_INVALID_LENGTH_IN_IU: u8 = 0x05;
pub const RESP_DATA_MISALIGNED_LENGTH_IN_IU: u8 = 0x06;
pub const RESP_DATA_INVALID_FIELD_IN_IU: u8 = 0x07;
pub const RESP_DATA_IU_TOO_LONG: u8 = 0x08;

pub const MGMT_RESULT_GOOD: u8 = 0x00;
pub const MGMT_RESULT_UNKNOWN_ERROR: u8 = 0x01;
pub const MGMT_RESULT_INVALID_FIELD_IN_REQUEST: u8 = 0x02;
pub const MGMT_RESULT_INVALID_FIELD_IN_DATA_OUT: u8 = 0x03;
pub const MGMT_RESULT_VENDOR_SPECIFIC: u8 = 0x04;

pub const SGL_TYPE_DATA_BLOCK: u8 = 0x00;
pub const SGL_TYPE_STANDARD_LAST_SEG: u8 = 0x01;

pub const DATA_DIR_NONE: u8 = 0x00;
pub const DATA_DIR_TO_DEVICE: u8 = 0x01;
pub const DATA_DIR_FROM_DEVICE: u8 = 0x02;
pub const DATA_DIR_BIDIRECTIONAL: u8 = 0x03;

/// `request_id`/`request_id_to_manage` value meaning "no request" where an
/// optional correlator is needed.
pub const NO_REQUEST_ID: u16 = u16::MAX;

// ---- small shared helpers -------------------------------------------------

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}
fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}
fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}
fn get_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}
fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
fn get_u64(buf: &[u8], off: usize) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(a)
}

/// Reads the 8-bit `iu_type` at offset 0 without interpreting the rest of
/// the buffer.
pub fn peek_iu_type(element: &[u8]) -> u8 {
    element[0]
}

/// Reads the `request_id` at offset 8.
pub fn peek_request_id(element: &[u8]) -> u16 {
    get_u16(element, 8)
}

/// Reads the declared `iu_length` at offset 2 and adds back the 4 header
/// bytes it excludes.
pub fn declared_iu_len(response: &[u8]) -> u16 {
    get_u16(response, 2) + IU_HEADER_LEN
}

fn write_prologue(buf: &mut [u8], iu_type: u8, iu_length: u16, field4: u16, work_area: u16, request_id: u16) {
    buf[0] = iu_type;
    buf[1] = 0;
    put_u16(buf, 2, iu_length);
    put_u16(buf, 4, field4);
    put_u16(buf, 6, work_area);
    put_u16(buf, 8, request_id);
}

// ---- SGL descriptor --------------------------------------------------

pub const SGL_DESCRIPTOR_LEN: usize = 16;

/// One scatter/gather descriptor: 16 bytes
/// `{bus_addr:u64, length:u32, reserved:u24, type:u8}`.
#[derive(Debug, Clone, Copy)]
pub struct SglDescriptor {
    pub address: u64,
    pub length: u32,
    pub descriptor_type: u8,
}

const _: () = assert!(8 + 4 + 3 + 1 == SGL_DESCRIPTOR_LEN);

impl SglDescriptor {
    pub fn data_block(address: u64, length: u32) -> Self {
        Self {
            address,
            length,
            descriptor_type: SGL_TYPE_DATA_BLOCK,
        }
    }

    pub fn chain(address: u64, length: u32) -> Self {
        Self {
            address,
            length,
            descriptor_type: SGL_TYPE_STANDARD_LAST_SEG,
        }
    }

    pub fn write_into(&self, buf: &mut [u8]) {
        put_u64(buf, 0, self.address);
        put_u32(buf, 8, self.length);
        buf[12] = 0;
        buf[13] = 0;
        buf[14] = 0;
        buf[15] = self.descriptor_type;
    }

    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            address: get_u64(buf, 0),
            length: get_u32(buf, 8),
            descriptor_type: buf[15],
        }
    }
}

// ---- create/delete operational queue -------------------------------------

pub const CREATE_OPERATIONAL_QUEUE_REQUEST_LEN: usize = 64;
pub const CREATE_OPERATIONAL_QUEUE_RESPONSE_LEN: usize = 64;

/// Admin control IU requesting creation of one operational queue. 64 bytes.
pub struct CreateOperationalQueueRequest([u8; CREATE_OPERATIONAL_QUEUE_REQUEST_LEN]);

impl CreateOperationalQueueRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: u16,
        to_device: bool,
        queue_id: u16,
        element_array_addr: u64,
        index_addr: u64,
        nelements: u16,
        element_length_div_16: u16,
        msix_vector: u16,
    ) -> Self {
        let mut b = [0u8; CREATE_OPERATIONAL_QUEUE_REQUEST_LEN];
        write_prologue(
            &mut b,
            IU_TYPE_CREATE_OPERATIONAL_QUEUE,
            CREATE_OPERATIONAL_QUEUE_REQUEST_LEN as u16 - IU_HEADER_LEN,
            0,
            0,
            request_id,
        );
        b[10] = if to_device {
            FUNCTION_CREATE_QUEUE_TO_DEVICE
        } else {
            FUNCTION_CREATE_QUEUE_FROM_DEVICE
        };
        put_u16(&mut b, 12, queue_id);
        put_u64(&mut b, 16, element_array_addr);
        put_u64(&mut b, 24, index_addr);
        put_u16(&mut b, 32, nelements);
        put_u16(&mut b, 34, element_length_div_16);
        if !to_device {
            put_u16(&mut b, 36, msix_vector);
        }
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Response to [`CreateOperationalQueueRequest`]. 64 bytes.
pub struct CreateOperationalQueueResponse {
    pub function_code: u8,
    pub status: u8,
    pub index_offset: u64,
}

impl CreateOperationalQueueResponse {
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            function_code: buf[10],
            status: buf[11],
            index_offset: get_u64(buf, 16),
        }
    }
}

pub const DELETE_OPERATIONAL_QUEUE_REQUEST_LEN: usize = 64;
pub const DELETE_OPERATIONAL_QUEUE_RESPONSE_LEN: usize = 64;

/// Admin control IU requesting deletion of one operational queue. 64 bytes.
pub struct DeleteOperationalQueueRequest([u8; DELETE_OPERATIONAL_QUEUE_REQUEST_LEN]);

impl DeleteOperationalQueueRequest {
    pub fn new(request_id: u16, to_device: bool, queue_id: u16) -> Self {
        let mut b = [0u8; DELETE_OPERATIONAL_QUEUE_REQUEST_LEN];
        write_prologue(
            &mut b,
            IU_TYPE_DELETE_OPERATIONAL_QUEUE,
            DELETE_OPERATIONAL_QUEUE_REQUEST_LEN as u16 - IU_HEADER_LEN,
            0,
            0,
            request_id,
        );
        b[10] = if to_device {
            FUNCTION_DELETE_QUEUE_TO_DEVICE
        } else {
            FUNCTION_DELETE_QUEUE_FROM_DEVICE
        };
        put_u16(&mut b, 12, queue_id);
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Response to [`DeleteOperationalQueueRequest`]. 64 bytes.
pub struct DeleteOperationalQueueResponse {
    pub status: u8,
}

impl DeleteOperationalQueueResponse {
    pub fn read_from(buf: &[u8]) -> Self {
        Self { status: buf[11] }
    }
}

// ---- report device capability --------------------------------------------

pub const REPORT_CAPABILITY_REQUEST_LEN: usize = 64;
pub const REPORT_CAPABILITY_RESPONSE_LEN: usize = 64;

/// Admin control IU requesting the capability report. 64 bytes.
pub struct ReportCapabilityRequest([u8; REPORT_CAPABILITY_REQUEST_LEN]);

const _: () = assert!(44 + 4 <= REPORT_CAPABILITY_REQUEST_LEN);
const _: () = assert!(48 + SGL_DESCRIPTOR_LEN <= REPORT_CAPABILITY_REQUEST_LEN);

impl ReportCapabilityRequest {
    pub fn new(request_id: u16, buffer_addr: u64, buffer_size: u32) -> Self {
        let mut b = [0u8; REPORT_CAPABILITY_REQUEST_LEN];
        write_prologue(
            &mut b,
            IU_TYPE_REPORT_PQI_DEVICE_CAPABILITY,
            REPORT_CAPABILITY_REQUEST_LEN as u16 - IU_HEADER_LEN,
            0,
            0,
            request_id,
        );
        put_u32(&mut b, 44, buffer_size);
        SglDescriptor::data_block(buffer_addr, buffer_size).write_into(&mut b[48..48 + SGL_DESCRIPTOR_LEN]);
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Response to [`ReportCapabilityRequest`]. 64 bytes.
pub struct ReportCapabilityResponse {
    pub status: u8,
    pub additional_status: u32,
}

impl ReportCapabilityResponse {
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            status: buf[11],
            additional_status: get_u32(buf, 12),
        }
    }
}

pub const PQI_DEVICE_CAPABILITIES_LEN: usize = 64;

/// Device capability data block pointed at by [`ReportCapabilityRequest`]'s
/// SG descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PqiDeviceCapabilities {
    pub length: u16,
    pub max_iqs: u16,
    pub max_iq_elements: u16,
    pub max_iq_element_length: u16,
    pub min_iq_element_length: u16,
    pub max_oqs: u16,
    pub max_oq_elements: u16,
    pub intr_coalescing_time_granularity: u16,
    pub max_oq_element_length: u16,
    pub min_oq_element_length: u16,
    pub iq_alignment_exponent: u8,
    pub oq_alignment_exponent: u8,
    pub iq_ci_alignment_exponent: u8,
    pub oq_pi_alignment_exponent: u8,
    pub protocol_support_bitmask: u32,
    pub admin_sgl_support_bitmask: u16,
}

impl PqiDeviceCapabilities {
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            length: get_u16(buf, 0),
            max_iqs: get_u16(buf, 16),
            max_iq_elements: get_u16(buf, 18),
            max_iq_element_length: get_u16(buf, 24),
            min_iq_element_length: get_u16(buf, 26),
            max_oqs: get_u16(buf, 28),
            max_oq_elements: get_u16(buf, 30),
            intr_coalescing_time_granularity: get_u16(buf, 34),
            max_oq_element_length: get_u16(buf, 36),
            min_oq_element_length: get_u16(buf, 38),
            iq_alignment_exponent: buf[40],
            oq_alignment_exponent: buf[41],
            iq_ci_alignment_exponent: buf[42],
            oq_pi_alignment_exponent: buf[43],
            protocol_support_bitmask: get_u32(buf, 44),
            admin_sgl_support_bitmask: get_u16(buf, 48),
        }
    }
}

// ---- limited command IU ---------------------------------------------------

pub const LIMITED_CMD_IU_LEN: usize = 64;
const CDB_OFFSET: usize = 16;
const CDB_LEN: usize = 16;
const SG_OFFSET: usize = 32;

const _: () = assert!(SG_OFFSET + 2 * SGL_DESCRIPTOR_LEN == LIMITED_CMD_IU_LEN);
const _: () = assert!(CDB_OFFSET + CDB_LEN == SG_OFFSET);

/// Size of [`LimitedCmdIu`] with zero SG descriptors present
/// with zero SG descriptors present.
pub const LIMITED_CMD_IU_NO_SGL_LEN: u16 =
    (LIMITED_CMD_IU_LEN as u16) - (2 * SGL_DESCRIPTOR_LEN as u16) - IU_HEADER_LEN;

/// The main SOP command carrier. 64 bytes, two inline SGL slots.
pub struct LimitedCmdIu([u8; LIMITED_CMD_IU_LEN]);

impl LimitedCmdIu {
    pub fn new(request_id: u16, queue_id: u16, data_dir: u8, cdb: &[u8]) -> Self {
        let mut b = [0u8; LIMITED_CMD_IU_LEN];
        write_prologue(
            &mut b,
            IU_TYPE_LIMITED_CMD,
            LIMITED_CMD_IU_NO_SGL_LEN,
            queue_id,
            0,
            request_id,
        );
        b[10] = data_dir;
        let n = cdb.len().min(CDB_LEN);
        b[CDB_OFFSET..CDB_OFFSET + n].copy_from_slice(&cdb[..n]);
        Self(b)
    }

    pub fn set_xfer_size(&mut self, xfer_size: u32) {
        put_u32(&mut self.0, 12, xfer_size);
    }

    pub fn set_iu_length(&mut self, no_header_len: u16) {
        put_u16(&mut self.0, 2, no_header_len);
    }

    /// Writes one inline SG descriptor (index 0 or 1).
    pub fn set_inline_sg(&mut self, slot: usize, descriptor: SglDescriptor) {
        let off = SG_OFFSET + slot * SGL_DESCRIPTOR_LEN;
        descriptor.write_into(&mut self.0[off..off + SGL_DESCRIPTOR_LEN]);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

// ---- command response ------------------------------------------------

/// Maximum bytes reserved for an accumulated response IU, including the
/// prologue. Sized generously for sense data.
pub const MAX_RESPONSE_IU_LEN: usize = 256;

/// Byte offset, within a response buffer, where the sense/response-data
/// payload begins.
pub const CMD_RESPONSE_DATA_OFFSET: usize = 32;

/// `CmdResponse` IU fixed header; trailing bytes from
/// [`CMD_RESPONSE_DATA_OFFSET`] hold sense or response data.
#[derive(Debug, Clone, Copy)]
pub struct CmdResponseHeader {
    pub nexus_id: u16,
    pub data_in_xfer_result: u8,
    pub data_out_xfer_result: u8,
    pub status: u8,
    pub status_qualifier: u16,
    pub sense_data_len: u16,
    pub response_data_len: u16,
    pub data_in_xferred: u32,
    pub data_out_xferred: u32,
}

impl CmdResponseHeader {
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            nexus_id: get_u16(buf, 10),
            data_in_xfer_result: buf[12],
            data_out_xfer_result: buf[13],
            status: buf[17],
            status_qualifier: get_u16(buf, 18),
            sense_data_len: get_u16(buf, 20),
            response_data_len: get_u16(buf, 22),
            data_in_xferred: get_u32(buf, 24),
            data_out_xferred: get_u32(buf, 28),
        }
    }
}

/// Small management-command response IU.
pub struct ManagementResponseIu {
    pub result: u8,
}

impl ManagementResponseIu {
    pub fn read_from(buf: &[u8]) -> Self {
        Self { result: buf[10] }
    }
}

// ---- task management -------------------------------------------------

pub const TASK_MGMT_IU_LEN: usize = 32;
pub const TASK_MGMT_RESPONSE_LEN: usize = 16;

/// Abort-task/LUN-reset request IU. 32 bytes.
pub struct TaskMgmtIu([u8; TASK_MGMT_IU_LEN]);

impl TaskMgmtIu {
    pub fn abort_task(request_id: u16, queue_id: u16, request_id_to_manage: u16) -> Self {
        Self::new(request_id, queue_id, 0, request_id_to_manage, TMF_ABORT_TASK)
    }

    pub fn lun_reset(request_id: u16, queue_id: u16, lun: u64) -> Self {
        Self::new(request_id, queue_id, lun, NO_REQUEST_ID, TMF_LUN_RESET)
    }

    fn new(
        request_id: u16,
        queue_id: u16,
        lun: u64,
        request_id_to_manage: u16,
        task_mgmt_function: u8,
    ) -> Self {
        let mut b = [0u8; TASK_MGMT_IU_LEN];
        write_prologue(
            &mut b,
            IU_TYPE_TASK_MGMT,
            TASK_MGMT_IU_LEN as u16 - IU_HEADER_LEN,
            queue_id,
            0,
            request_id,
        );
        put_u64(&mut b, 16, lun);
        put_u16(&mut b, 28, request_id_to_manage);
        b[30] = task_mgmt_function;
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Response to [`TaskMgmtIu`]. 16 bytes.
pub struct TaskMgmtResponseIu {
    pub response_code: u8,
}

impl TaskMgmtResponseIu {
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            response_code: buf[15],
        }
    }
}
