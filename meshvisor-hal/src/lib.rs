#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

//! Hardware Abstraction Layer for the Meshvisor hypervisor.
//!
//! Provides the architecture-independent trait surface the core coherence
//! engine, fault dispatcher and vGIC are written against, plus the concrete
//! AArch64 implementation of the CPU and stage-2 traits.

extern crate alloc;

pub use alloc::{boxed::Box, string::String, vec, vec::Vec};

pub mod arch;
pub mod cpu;
pub mod irqchip;
pub mod memory;
pub mod nic;
pub mod stage2;
pub mod timer;

pub use cpu::{Cpu, CpuFeatures, CpuState};
pub use irqchip::{IrqChip, IrqChipError, PendingIrq};
pub use memory::{MemoryManager, MemoryRegion, MemoryType, PhysicalAddress, VirtualAddress};
pub use nic::{EthernetNic, NicError};
pub use stage2::{Stage2Error, Stage2Perms, Stage2Table};
pub use timer::{Timer, TimerCallback};

#[cfg(target_arch = "aarch64")]
pub use arch::arm64::ArmCpu as ArchCpu;

#[cfg(target_arch = "aarch64")]
pub use arch::arm64::Stage2Manager as ArchStage2Table;

/// Initialize the HAL for the current architecture.
pub fn init() -> Result<(), HalError> {
    #[cfg(target_arch = "aarch64")]
    {
        let _cpu = ArchCpu::init().map_err(|_| HalError::HardwareNotSupported)?;
        return Ok(());
    }

    #[cfg(not(target_arch = "aarch64"))]
    {
        Ok(())
    }
}

/// HAL-specific error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    UnsupportedArchitecture,
    HardwareNotSupported,
    InitializationFailed,
    InvalidConfiguration,
}
