//! Stage-2 and system-register fault dispatcher.
//!
//! Reads `ESR_EL2` (already captured into the vCPU's saved state by the
//! architecture-specific exception entry) and routes on its Exception Class:
//! `WFx` retires immediately, `HVC`/`SMC` reach PSCI, system-register traps
//! reach the vGIC's `ICC_SGI1R_EL1` fast path, and instruction/data aborts
//! reach the coherence engine and, failing that, the vGIC distributor's
//! MMIO window.

use meshvisor_hal::cpu::CpuState;
use meshvisor_hal::stage2::Stage2Table as HalStage2Table;

use crate::psci::{self, PsciArgs, PsciOps};
use crate::vgic::{self, VcpuLocator, VgicCpu, VgicDist};
use crate::vsm::VsmEngine;

pub const EC_WFX: u64 = 0x01;
pub const EC_HVC64: u64 = 0x16;
pub const EC_SMC64: u64 = 0x17;
pub const EC_SYSREG: u64 = 0x18;
pub const EC_IABORT_LOW: u64 = 0x20;
pub const EC_DABORT_LOW: u64 = 0x24;

const PAGE_SIZE: u64 = 0x1000;

pub fn ec_of(esr: u64) -> u64 {
    (esr >> 26) & 0x3f
}

pub fn iss_of(esr: u64) -> u64 {
    esr & 0x01ff_ffff
}

/// ICC_SGI1R_EL1's system-register encoding: Op0=3, Op1=0, CRn=12, CRm=11,
/// Op2=5. Any other register hits the generic (currently no-op) fallback.
const SGI1R_OP0: u64 = 3;
const SGI1R_OP1: u64 = 0;
const SGI1R_CRN: u64 = 12;
const SGI1R_CRM: u64 = 11;
const SGI1R_OP2: u64 = 5;

struct SysregIss {
    direction_write: bool,
    rt: usize,
    crm: u64,
    crn: u64,
    op1: u64,
    op2: u64,
    op0: u64,
}

fn decode_sysreg_iss(iss: u64) -> SysregIss {
    SysregIss {
        direction_write: iss & 0x1 == 0,
        crm: (iss >> 1) & 0xf,
        rt: ((iss >> 5) & 0x1f) as usize,
        crn: (iss >> 10) & 0xf,
        op1: (iss >> 14) & 0x7,
        op2: (iss >> 17) & 0x7,
        op0: (iss >> 20) & 0x3,
    }
}

fn gpr_read(state: &CpuState, rt: usize) -> u64 {
    if rt == 31 {
        0
    } else {
        state.gpr[rt]
    }
}

fn gpr_write(state: &mut CpuState, rt: usize, val: u64) {
    if rt != 31 {
        state.gpr[rt] = val;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapError {
    UnknownEc(u64),
    UnhandledAbort,
    CoherenceFailure,
}

/// Whether the dispatcher wants the faulting instruction retried (stage-2
/// fault resolved, no `ELR` advance) or the next one run (`ELR += 4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retire {
    Redo,
    Advance,
}

/// Everything a guest access might need to reach: the coherence engine
/// (for RAM), the vGIC distributor (for its MMIO window), and PSCI/SGI
/// routing. Bundled so `dispatch` takes one argument per concern instead of
/// five.
pub struct TrapContext<'a, T: HalStage2Table + 'static> {
    pub vsm: &'a VsmEngine<T>,
    pub psci: &'a dyn PsciOps,
    pub locator: &'a dyn VcpuLocator,
    pub dist: &'a VgicDist,
    pub local_vgic: &'a VgicCpu,
    /// Base IPA of the emulated GICv2 distributor's MMIO window.
    pub gicd_base: u64,
}

pub fn dispatch<T: HalStage2Table + 'static>(
    state: &mut CpuState,
    ctx: &TrapContext<T>,
) -> Result<Retire, TrapError> {
    let ec = ec_of(state.esr_el2);
    let iss = iss_of(state.esr_el2);

    match ec {
        EC_WFX => Ok(Retire::Advance),

        EC_HVC64 | EC_SMC64 => {
            let args = PsciArgs {
                funcid: gpr_read(state, 0) as u32,
                x1: gpr_read(state, 1),
                x2: gpr_read(state, 2),
                x3: gpr_read(state, 3),
            };
            let ret = psci::emulate(ctx.psci, args);
            gpr_write(state, 0, ret as u64);
            Ok(Retire::Advance)
        }

        EC_SYSREG => {
            let s = decode_sysreg_iss(iss);
            if s.op0 == SGI1R_OP0
                && s.op1 == SGI1R_OP1
                && s.crn == SGI1R_CRN
                && s.crm == SGI1R_CRM
                && s.op2 == SGI1R_OP2
                && s.direction_write
            {
                let sgir = gpr_read(state, s.rt);
                let _ = vgic::emulate_sgir(ctx.locator, ctx.dist, sgir);
            } else if !s.direction_write {
                gpr_write(state, s.rt, 0);
            }
            Ok(Retire::Advance)
        }

        EC_IABORT_LOW => {
            let s1ptw = (iss >> 7) & 0x1 != 0;
            let page = state.far_el2 & !(PAGE_SIZE - 1);
            let _ = s1ptw;
            ctx.vsm.read_fault(page).map_err(|_| TrapError::CoherenceFailure)?;
            Ok(Retire::Redo)
        }

        EC_DABORT_LOW => {
            let s1ptw = (iss >> 7) & 0x1 != 0;
            let wnr = (iss >> 6) & 0x1 != 0;
            let srt = ((iss >> 16) & 0x1f) as usize;
            let page = state.far_el2 & !(PAGE_SIZE - 1);

            if s1ptw {
                ctx.vsm.read_fault(page).map_err(|_| TrapError::CoherenceFailure)?;
                return Ok(Retire::Redo);
            }

            let outcome = if wnr { ctx.vsm.write_fault(page) } else { ctx.vsm.read_fault(page) };
            match outcome {
                Ok(_) => Ok(Retire::Redo),
                Err(_) => dispatch_mmio(state, ctx, state.far_el2, srt, wnr),
            }
        }

        other => Err(TrapError::UnknownEc(other)),
    }
}

fn dispatch_mmio<T: HalStage2Table + 'static>(
    state: &mut CpuState,
    ctx: &TrapContext<T>,
    ipa: u64,
    srt: usize,
    wnr: bool,
) -> Result<Retire, TrapError> {
    if ipa < ctx.gicd_base || ipa >= ctx.gicd_base + 0x1_0000 {
        return Err(TrapError::UnhandledAbort);
    }
    let offset = ipa - ctx.gicd_base;

    if wnr {
        let val = gpr_read(state, srt) as u32;
        vgic::mmio_write(ctx.local_vgic, ctx.dist, offset, val);
    } else {
        let val = vgic::mmio_read(ctx.local_vgic, ctx.dist, offset).unwrap_or(0);
        gpr_write(state, srt, val as u64);
    }
    Ok(Retire::Advance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec_and_iss_split_correctly() {
        let esr = (0x24u64 << 26) | 0x1abcd;
        assert_eq!(ec_of(esr), 0x24);
        assert_eq!(iss_of(esr), 0x1abcd);
    }

    #[test]
    fn sgi1r_encoding_matches_architecture() {
        let iss = (SGI1R_OP0 << 20) | (SGI1R_OP2 << 17) | (SGI1R_OP1 << 14) | (SGI1R_CRN << 10) | (SGI1R_CRM << 1);
        let s = decode_sysreg_iss(iss);
        assert!(s.direction_write);
        assert_eq!(s.op0, SGI1R_OP0);
        assert_eq!(s.op1, SGI1R_OP1);
        assert_eq!(s.crn, SGI1R_CRN);
        assert_eq!(s.crm, SGI1R_CRM);
        assert_eq!(s.op2, SGI1R_OP2);
    }

    #[test]
    fn gpr31_reads_as_zero_and_ignores_writes() {
        let mut state = CpuState::default();
        assert_eq!(gpr_read(&state, 31), 0);
        gpr_write(&mut state, 31, 0xdead);
        assert!(state.gpr.iter().all(|&v| v != 0xdead));
    }
}
