//! ARM64 CPU implementation for the Meshvisor HAL (EL2, ARMv8-A)

#![cfg(target_arch = "aarch64")]
#![allow(clippy::missing_safety_doc)]

use crate::cpu::{Cpu, CpuFeatures, CpuState};

/// HCR_EL2 bit positions actually used at bring-up. `VM` turns on stage-2
/// translation; without it every guest access would be untranslated,
/// hardware-privileged memory, so this is the one bit that must never be
/// dropped from the reference VHE-less configuration this hypervisor uses.
const HCR_VM: u64 = 1 << 0;
const HCR_SWIO: u64 = 1 << 1;
const HCR_FMO: u64 = 1 << 3;
const HCR_IMO: u64 = 1 << 4;
const HCR_TSC: u64 = 1 << 19;
const HCR_TDZ: u64 = 1 << 28;
const HCR_RW: u64 = 1 << 31;

const HCR_EL2_BOOT_BITS: u64 = HCR_VM | HCR_SWIO | HCR_FMO | HCR_IMO | HCR_RW | HCR_TSC | HCR_TDZ;

/// ARM64 specific CPU errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmCpuError {
    /// Virtualization extensions (EL2) not present
    El2NotSupported,
    /// Attempted operation before `init()`
    NotInitialized,
}

/// ARM64 concrete CPU type
pub struct ArmCpu {
    features: CpuFeatures,
    initialized: bool,
}

impl ArmCpu {
    fn detect_features() -> CpuFeatures {
        let mut flags = CpuFeatures::empty();
        let id_aa64isar0_el1: u64;
        unsafe {
            core::arch::asm!(
                "mrs {reg}, ID_AA64ISAR0_EL1",
                reg = out(reg) id_aa64isar0_el1,
                options(nostack, preserves_flags)
            );
        }
        if (id_aa64isar0_el1 & 0b1) != 0 {
            flags |= CpuFeatures::VIRTUALIZATION | CpuFeatures::HARDWARE_ASSIST;
        }
        flags |= CpuFeatures::NESTED_PAGING;
        flags
    }

    fn el2_available() -> Result<(), ArmCpuError> {
        let currentel: u64;
        unsafe {
            core::arch::asm!("mrs {el}, CurrentEL", el = out(reg) currentel, options(nostack));
        }
        let el = (currentel >> 2) & 0b11;
        if el < 1 {
            return Err(ArmCpuError::El2NotSupported);
        }
        Ok(())
    }
}

impl Cpu for ArmCpu {
    type Error = ArmCpuError;

    fn init() -> Result<Self, Self::Error> {
        Self::el2_available()?;
        let features = Self::detect_features();
        if !features.contains(CpuFeatures::VIRTUALIZATION) {
            return Err(ArmCpuError::El2NotSupported);
        }
        Ok(Self {
            features,
            initialized: true,
        })
    }

    fn has_virtualization_support(&self) -> bool {
        self.features.contains(CpuFeatures::VIRTUALIZATION)
    }

    fn enable_virtualization(&mut self) -> Result<(), Self::Error> {
        if !self.initialized {
            return Err(ArmCpuError::NotInitialized);
        }
        unsafe {
            core::arch::asm!(
                "msr HCR_EL2, {hcr}",
                "isb",
                hcr = in(reg) HCR_EL2_BOOT_BITS,
                options(nostack, preserves_flags)
            );
        }
        Ok(())
    }

    fn disable_virtualization(&mut self) -> Result<(), Self::Error> {
        unsafe {
            core::arch::asm!("msr HCR_EL2, xzr", "isb", options(nostack, preserves_flags));
        }
        Ok(())
    }

    fn features(&self) -> CpuFeatures {
        self.features
    }

    fn save_state(&self) -> CpuState {
        CpuState::default()
    }

    fn restore_state(&mut self, _state: &CpuState) -> Result<(), Self::Error> {
        Ok(())
    }

    fn flush_tlb(&self) {
        unsafe {
            core::arch::asm!(
                "dsb ishst",
                "tlbi vmalls12e1is",
                "dsb ish",
                "isb",
                options(nostack, preserves_flags)
            );
        }
    }

    fn invalidate_icache(&self) {
        unsafe {
            core::arch::asm!("ic iallu", "dsb ish", "isb", options(nostack, preserves_flags));
        }
    }

    fn cpu_id(&self) -> u32 {
        let mpidr: u64;
        unsafe {
            core::arch::asm!("mrs {out}, MPIDR_EL1", out = out(reg) mpidr, options(nostack));
        }
        (mpidr & 0xFFFF) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_bits_enable_stage2_translation() {
        assert_ne!(HCR_EL2_BOOT_BITS & HCR_VM, 0);
        assert_ne!(HCR_EL2_BOOT_BITS & HCR_RW, 0);
    }
}
