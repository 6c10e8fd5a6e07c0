//! The device capability snapshot: write-once at probe, read-only
//! thereafter.

use crate::iu::PqiDeviceCapabilities;
use bitflags::bitflags;
use spin::Once;

bitflags! {
    /// Which wire protocols the device advertises support for
    /// advertised in the device's capability report.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    pub struct ProtocolSupport: u32 {
        const SOP = 1 << 0;
        const SMP = 1 << 1;
        const STP = 1 << 2;
        const NVME = 1 << 3;
    }
}

bitflags! {
    /// Which SGL descriptor types the device accepts on the admin queue.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    pub struct AdminSglSupport: u16 {
        const DATA_BLOCK = 1 << 0;
        const STANDARD_LAST_SEG = 1 << 1;
    }
}

/// Parsed, host-friendly view of [`PqiDeviceCapabilities`].
#[derive(Debug, Clone, Copy)]
pub struct Capability {
    pub max_iqs: u16,
    pub max_iq_elements: u16,
    pub max_iq_element_length: u16,
    pub min_iq_element_length: u16,
    pub max_oqs: u16,
    pub max_oq_elements: u16,
    pub max_oq_element_length: u16,
    pub min_oq_element_length: u16,
    pub iq_alignment_exponent: u8,
    pub oq_alignment_exponent: u8,
    pub iq_ci_alignment_exponent: u8,
    pub oq_pi_alignment_exponent: u8,
    pub protocol_support: ProtocolSupport,
    pub admin_sgl_support: AdminSglSupport,
}

impl From<&PqiDeviceCapabilities> for Capability {
    fn from(raw: &PqiDeviceCapabilities) -> Self {
        Self {
            max_iqs: raw.max_iqs,
            max_iq_elements: raw.max_iq_elements,
            max_iq_element_length: raw.max_iq_element_length,
            min_iq_element_length: raw.min_iq_element_length,
            max_oqs: raw.max_oqs,
            max_oq_elements: raw.max_oq_elements,
            max_oq_element_length: raw.max_oq_element_length,
            min_oq_element_length: raw.min_oq_element_length,
            iq_alignment_exponent: raw.iq_alignment_exponent,
            oq_alignment_exponent: raw.oq_alignment_exponent,
            iq_ci_alignment_exponent: raw.iq_ci_alignment_exponent,
            oq_pi_alignment_exponent: raw.oq_pi_alignment_exponent,
            protocol_support: ProtocolSupport::from_bits_truncate(raw.protocol_support_bitmask),
            admin_sgl_support: AdminSglSupport::from_bits_truncate(raw.admin_sgl_support_bitmask),
        }
    }
}

/// Holds the capability report after it is parsed once during probe.
/// `spin::Once` gives write-once, read-many semantics without a lock on the
/// read path: the capability report is written exactly once during probe
/// and read many times afterward.
#[derive(Default)]
pub struct CapabilityCell(Once<Capability>);

impl CapabilityCell {
    pub const fn new() -> Self {
        Self(Once::new())
    }

    pub fn set(&self, capability: Capability) {
        self.0.call_once(|| capability);
    }

    pub fn get(&self) -> Option<&Capability> {
        self.0.get()
    }
}
