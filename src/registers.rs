//! The PQI memory-mapped register file, bit-exact against the offset table
//! the device is mandated to honor.
//!
//! One field per register, each a const-generic typed accessor documented
//! with its offset, plus the handful of stateful helpers (signature check,
//! reset handshake) that only make sense bundled with the register file.

use crate::error::{PqiError, PqiResult};
use crate::hal::PqiDeviceIo;
use crate::volatile::{ReadOnly, ReadWrite, WriteOnly};

/// ASCII "PQI DREG" read little-endian as a u64.
pub const SIGNATURE: u64 = u64::from_le_bytes(*b"PQI DREG");

/// What an MMIO read returns when the link has gone away.
pub const LINK_DEAD_U64: u64 = u64::MAX;
pub const LINK_DEAD_U32: u32 = u32::MAX;

pub const RESET_ACTION_SHIFT: u32 = 5;
pub const RESET_ACTION_MASK: u32 = 0x07 << RESET_ACTION_SHIFT;
pub const RESET_ACTION_START: u32 = 1 << RESET_ACTION_SHIFT;
pub const RESET_ACTION_COMPLETED: u32 = 2 << RESET_ACTION_SHIFT;
pub const RESET_SOFT: u32 = 1;

/// MMIO register layout.
pub struct PqiRegisters {
    /// 0x00 — must read `SIGNATURE` before any other register is trusted.
    pub signature: ReadOnly<0x00, u64>,
    /// 0x08 — command register: host writes a function code, device
    /// clears the low byte to acknowledge.
    pub process_admin_function: ReadWrite<0x08, u64>,
    /// 0x10 — snapshot-on-probe PQI capability word.
    pub capability: ReadOnly<0x10, u64>,
    /// 0x40 — device lifecycle state.
    pub device_status: ReadOnly<0x40, u32>,
    /// 0x48 — offset (from register base) of the admin IQ's PI register.
    pub admin_iq_pi_offset: ReadOnly<0x48, u64>,
    /// 0x50 — offset (from register base) of the admin OQ's CI register.
    pub admin_oq_ci_offset: ReadOnly<0x50, u64>,
    /// 0x58 — bus address of the admin inbound queue's element array.
    pub admin_iq_addr: WriteOnly<0x58, u64>,
    /// 0x60 — bus address of the admin outbound queue's element array.
    pub admin_oq_addr: WriteOnly<0x60, u64>,
    /// 0x68 — bus address of the host-memory admin IQ CI word.
    pub admin_iq_ci_addr: WriteOnly<0x68, u64>,
    /// 0x70 — bus address of the host-memory admin OQ PI word.
    pub admin_oq_pi_addr: WriteOnly<0x70, u64>,
    /// 0x78 — `iq_count | (oq_count << 8) | (msix_vector << 16)`.
    pub admin_queue_param: WriteOnly<0x78, u32>,
    /// 0x90 — reset action register.
    pub reset: ReadWrite<0x90, u32>,
}

impl Default for PqiRegisters {
    fn default() -> Self {
        Self {
            signature: ReadOnly::default(),
            process_admin_function: ReadWrite::default(),
            capability: ReadOnly::default(),
            device_status: ReadOnly::default(),
            admin_iq_pi_offset: ReadOnly::default(),
            admin_oq_ci_offset: ReadOnly::default(),
            admin_iq_addr: WriteOnly::default(),
            admin_oq_addr: WriteOnly::default(),
            admin_iq_ci_addr: WriteOnly::default(),
            admin_oq_pi_addr: WriteOnly::default(),
            admin_queue_param: WriteOnly::default(),
            reset: ReadWrite::default(),
        }
    }
}

impl PqiRegisters {
    /// Validates the signature register. `Ok(false)` (not an error) means
    /// the bytes simply don't match; callers combine this with a sentinel
    /// value on the register they actually wanted to decide `LinkLost`.
    pub fn signature_valid(&self, io: &dyn PqiDeviceIo) -> PqiResult<bool> {
        Ok(self.signature.read(io)? == SIGNATURE)
    }

    /// Signature constant must validate before any other access.
    pub fn check_signature(&self, io: &dyn PqiDeviceIo) -> PqiResult<()> {
        if self.signature_valid(io)? {
            Ok(())
        } else {
            Err(PqiError::LinkLost)
        }
    }

    /// A 64-bit register read that reports `LinkLost` instead of a bogus
    /// all-ones value when the signature has also gone bad.
    pub fn safe_read_u64(&self, io: &dyn PqiDeviceIo, value: u64) -> PqiResult<u64> {
        if value == LINK_DEAD_U64 && !self.signature_valid(io)? {
            return Err(PqiError::LinkLost);
        }
        Ok(value)
    }

    pub fn safe_read_u32(&self, io: &dyn PqiDeviceIo, value: u32) -> PqiResult<u32> {
        if value == LINK_DEAD_U32 && !self.signature_valid(io)? {
            return Err(PqiError::LinkLost);
        }
        Ok(value)
    }

    /// Writes `(START_RESET | SOFT_RESET)` to the reset register.
    pub fn start_soft_reset(&self, io: &dyn PqiDeviceIo) -> PqiResult<()> {
        self.check_signature(io)?;
        self.reset
            .write(io, RESET_ACTION_START | RESET_SOFT)
    }

    /// `true` once the reset-action field reads back `START_RESET_COMPLETED`.
    pub fn reset_completed(&self, io: &dyn PqiDeviceIo) -> PqiResult<bool> {
        let value = self.reset.read(io)?;
        let value = self.safe_read_u32(io, value)?;
        Ok(value & RESET_ACTION_MASK == RESET_ACTION_COMPLETED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_constant_matches_ascii() {
        assert_eq!(&SIGNATURE.to_le_bytes(), b"PQI DREG");
    }

    #[test]
    fn reset_word_combines_start_and_soft() {
        assert_eq!((RESET_ACTION_START | RESET_SOFT), 0x21);
        assert_eq!(RESET_ACTION_COMPLETED, 0x40);
    }
}
