//! A host-side PQI (PCI Queuing Interface) / SOP (SCSI over PCI) driver
//! core: ring-buffer queue management, the admin bring-up handshake,
//! command submission, and interrupt-driven completion.
//!
//! The PCI enumeration/BAR-mapping shim, upper-layer SCSI dispatch, and DMA
//! allocation are supplied by an embedding collaborator through the
//! [`hal::PqiDeviceIo`]/[`hal::Hal`]/[`hal::DmaRegion`] traits; this crate
//! only implements the queue engine and command lifecycle above them.
#![no_std]
#![forbid(unsafe_code)]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod admin;
pub mod capability;
pub mod complete;
pub mod config;
pub mod device;
pub mod error;
pub mod hal;
pub mod iu;
pub mod queue;
pub mod queuepair;
pub mod registers;
pub mod request;
pub mod submit;
pub mod taskmgmt;
#[cfg(test)]
mod testutil;
pub mod upper;
mod volatile;

pub use config::PqiConfig;
pub use device::{Device, DeviceStats};
pub use error::{PqiError, PqiResult};
pub use upper::{CommandOutcome, DataDirection, SgSegment, UpperCommand};
