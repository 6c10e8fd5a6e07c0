use core::fmt;
use core::fmt::{Display, Formatter};

/// The type returned by driver methods.
pub type PqiResult<T> = Result<T, PqiError>;

/// The error taxonomy of the PQI/SOP driver core.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PqiError {
    /// The host collaborator failed to provide DMA-coherent memory.
    OutOfMemory,
    /// Not enough free elements in a `DeviceQueue` to satisfy the request.
    QueueFull,
    /// No free request-slot id in a queue pair's bitmap.
    Busy,
    /// An MMIO read returned the link-dead sentinel, or the signature
    /// register failed to validate.
    LinkLost,
    /// An admin or reset polling loop exceeded its wall-clock budget.
    TimedOut,
    /// The device returned an IU type, length, or field the host did not
    /// expect.
    ProtocolViolation,
    /// The upper layer's scatter/gather list failed to map to bus
    /// addresses.
    DmaMapFailed,
    /// The device responded to a control IU with a non-zero status.
    DeviceRejected,
}

impl Display for PqiError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "failed to allocate DMA-coherent memory"),
            Self::QueueFull => write!(f, "device queue is full"),
            Self::Busy => write!(f, "no free request slot"),
            Self::LinkLost => write!(f, "PCIe link is down or signature is invalid"),
            Self::TimedOut => write!(f, "admin/reset polling loop timed out"),
            Self::ProtocolViolation => write!(f, "unexpected IU type, length, or field"),
            Self::DmaMapFailed => write!(f, "failed to map scatter/gather list"),
            Self::DeviceRejected => write!(f, "device rejected control IU with non-zero status"),
        }
    }
}
