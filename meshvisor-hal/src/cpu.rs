//! CPU abstraction layer (ARMv8-A, EL2)

use bitflags::bitflags;

/// Physical address type
pub type PhysicalAddress = u64;

/// Virtual address type
pub type VirtualAddress = u64;

/// CPU register value type
pub type RegisterValue = u64;

/// CPU abstraction trait for the hypervisor's host exception level
pub trait Cpu {
    /// CPU-specific error type
    type Error;

    /// Initialize the CPU for hypervisor operation
    fn init() -> Result<Self, Self::Error>
    where
        Self: Sized;

    /// Check if virtualization extensions are available
    fn has_virtualization_support(&self) -> bool;

    /// Enable virtualization extensions (set HCR_EL2.VM and friends)
    fn enable_virtualization(&mut self) -> Result<(), Self::Error>;

    /// Disable virtualization extensions
    fn disable_virtualization(&mut self) -> Result<(), Self::Error>;

    /// Get current CPU features
    fn features(&self) -> CpuFeatures;

    /// Save vCPU guest register state
    fn save_state(&self) -> CpuState;

    /// Restore vCPU guest register state
    fn restore_state(&mut self, state: &CpuState) -> Result<(), Self::Error>;

    /// Flush TLB entries (stage-1 and stage-2)
    fn flush_tlb(&self);

    /// Invalidate instruction cache
    fn invalidate_icache(&self);

    /// Get the physical CPU's affinity value (MPIDR_EL1 aff bits)
    fn cpu_id(&self) -> u32;
}

bitflags! {
    /// CPU feature flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuFeatures: u64 {
        const VIRTUALIZATION = 1 << 0;
        const NESTED_PAGING = 1 << 1;
        const HARDWARE_ASSIST = 1 << 2;
        const GICV3_SYSREGS = 1 << 3;
        const VHE = 1 << 4;
    }
}

/// Guest vCPU register file, matching the data model's `{31 GPRs, PC, SPSR,
/// system regs}` shape. Saved/restored on every world switch.
#[derive(Debug, Clone, Copy)]
pub struct CpuState {
    /// x0..=x30
    pub gpr: [u64; 31],
    pub sp_el1: u64,
    pub pc: u64,
    pub spsr_el2: u64,
    pub elr_el2: u64,
    pub esr_el2: u64,
    pub far_el2: u64,
    pub hpfar_el2: u64,
    pub vttbr_el2: u64,
    pub sctlr_el1: u64,
    pub tcr_el1: u64,
    pub ttbr0_el1: u64,
    pub ttbr1_el1: u64,
    pub mair_el1: u64,
    pub vbar_el1: u64,
    pub cntv_ctl_el0: u64,
    pub cntv_cval_el0: u64,
    pub cntvoff_el2: u64,
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            gpr: [0; 31],
            sp_el1: 0,
            pc: 0,
            spsr_el2: 0,
            elr_el2: 0,
            esr_el2: 0,
            far_el2: 0,
            hpfar_el2: 0,
            vttbr_el2: 0,
            sctlr_el1: 0,
            tcr_el1: 0,
            ttbr0_el1: 0,
            ttbr1_el1: 0,
            mair_el1: 0,
            vbar_el1: 0,
            cntv_ctl_el0: 0,
            cntv_cval_el0: 0,
            cntvoff_el2: 0,
        }
    }
}
