//! ARM generic timer bring-up (CNTV, EL2 view).
#![cfg(target_arch = "aarch64")]
#![deny(unsafe_op_in_unsafe_fn)]

use meshvisor_hal::HalError;

/// Zero the virtual-timer offset so the guest and host see the same counter.
pub fn init() -> Result<(), HalError> {
    unsafe {
        core::arch::asm!("msr cntvoff_el2, xzr", options(nostack, preserves_flags));
    }
    Ok(())
}

/// Read the physical counter (CNTPCT_EL0), used to timestamp fetch timeouts.
pub fn now_ticks() -> u64 {
    let val: u64;
    unsafe {
        core::arch::asm!("mrs {v}, cntpct_el0", v = out(reg) val, options(nostack));
    }
    val
}

/// Counter frequency in Hz (CNTFRQ_EL0), fixed by firmware at boot.
pub fn frequency() -> u64 {
    let val: u64;
    unsafe {
        core::arch::asm!("mrs {v}, cntfrq_el0", v = out(reg) val, options(nostack));
    }
    val
}
