#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

//! ARM64 board bring-up for the Meshvisor hypervisor: brings EL2 and the
//! generic timer into the state the core coherence engine assumes, and
//! supplies the concrete stage-2 table type it allocates per VM.

#[cfg(target_arch = "aarch64")]
use meshvisor_hal::{Cpu, HalError};

#[cfg(target_arch = "aarch64")]
pub mod timer;

#[cfg(target_arch = "aarch64")]
pub use meshvisor_hal::ArchCpu;
#[cfg(target_arch = "aarch64")]
pub use meshvisor_hal::ArchStage2Table as Stage2Table;

#[cfg(target_arch = "aarch64")]
/// Bring up this physical core's EL2 state: detect virtualization support,
/// enable it, and zero the virtual timer offset.
pub fn init() -> Result<(), HalError> {
    let mut cpu = ArchCpu::init().map_err(|_| HalError::HardwareNotSupported)?;
    cpu.enable_virtualization()
        .map_err(|_| HalError::InitializationFailed)?;
    timer::init()?;
    Ok(())
}

#[cfg(not(target_arch = "aarch64"))]
pub fn init() -> Result<(), ()> {
    Ok(())
}

/// ARM64 specific error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm64Error {
    UnsupportedCpu,
    VirtualizationNotSupported,
    MemoryError,
}

#[cfg(target_arch = "aarch64")]
impl From<Arm64Error> for HalError {
    fn from(err: Arm64Error) -> Self {
        match err {
            Arm64Error::UnsupportedCpu | Arm64Error::VirtualizationNotSupported => {
                HalError::HardwareNotSupported
            }
            Arm64Error::MemoryError => HalError::InitializationFailed,
        }
    }
}
