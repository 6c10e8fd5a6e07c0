//! Host-tunable parameters. The embedding collaborator may override these
//! defaults before calling [`crate::device::Device::probe`].

/// Admin polling cadence and timeouts.
#[derive(Copy, Clone, Debug)]
pub struct PqiConfig {
    /// Minimum microseconds to sleep between admin polls (default 100).
    pub admin_poll_interval_min_us: u32,
    /// Maximum microseconds to sleep between admin polls (default 150).
    pub admin_poll_interval_max_us: u32,
    /// Wall-clock budget for an admin command ack, in milliseconds
    /// (default 100).
    pub admin_ack_timeout_ms: u32,
    /// Wall-clock budget for a full device reset, in milliseconds
    /// (default 3000).
    pub reset_timeout_ms: u32,
    /// Number of elements in each admin queue (default 64).
    pub admin_queue_elements: u16,
    /// Upper bound on SG descriptors carried inline plus chained per
    /// command.
    pub max_sgls: usize,
}

impl Default for PqiConfig {
    fn default() -> Self {
        Self {
            admin_poll_interval_min_us: 100,
            admin_poll_interval_max_us: 150,
            admin_ack_timeout_ms: 100,
            reset_timeout_ms: 3_000,
            admin_queue_elements: 64,
            max_sgls: 64,
        }
    }
}
