//! Virtual GIC (GICv2-distributor-style) emulation.
//!
//! Interrupt id space: SGIs 0-15 and PPIs 16-31 are per-vCPU; SPIs 32.. are
//! cluster-global and each carries a home vCPU. Injection appends to a
//! 4-slot pending ring per vCPU; a full ring drops the interrupt rather
//! than blocking (there is no backpressure path to the guest).

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use spin::Mutex;

use meshvisor_hal::irqchip::{IrqChip, PendingIrq};

use crate::cluster::{self, NodeId};
use crate::transport::{self, MsgType};

pub const GIC_NSGI: usize = 16;
pub const GIC_NPPI: usize = 16;
const PENDING_RING: usize = 4;

pub fn is_sgi(intid: u32) -> bool {
    intid < 16
}
pub fn is_ppi(intid: u32) -> bool {
    (16..32).contains(&intid)
}
pub fn is_spi(intid: u32) -> bool {
    intid >= 32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqConfig {
    Level,
    Edge,
}

#[derive(Debug, Clone, Copy)]
pub struct VgicIrq {
    pub intid: u32,
    pub enabled: bool,
    pub igroup: u8,
    pub priority: u8,
    pub cfg: IrqConfig,
    /// Home vCPU for an SPI; unused for SGI/PPI (always the owning vCPU).
    pub vcpuid: u32,
}

impl VgicIrq {
    const fn sgi(intid: u32) -> Self {
        Self { intid, enabled: true, igroup: 1, priority: 0, cfg: IrqConfig::Edge, vcpuid: 0 }
    }
    const fn ppi(intid: u32, vcpuid: u32) -> Self {
        Self { intid, enabled: false, igroup: 1, priority: 0, cfg: IrqConfig::Level, vcpuid }
    }
    const fn spi(intid: u32) -> Self {
        Self { intid, enabled: false, igroup: 1, priority: 0, cfg: IrqConfig::Level, vcpuid: 0 }
    }
}

struct PendingRing {
    slots: [Option<PendingIrq>; PENDING_RING],
    head: usize,
    tail: usize,
}

impl PendingRing {
    const fn new() -> Self {
        Self { slots: [None, None, None, None], head: 0, tail: 0 }
    }

    fn push(&mut self, irq: PendingIrq) {
        let next = (self.tail + 1) % PENDING_RING;
        if next == self.head {
            crate::fatal!("vgic: pending ring full, dropping virq {}", irq.virq);
        }
        self.slots[self.tail] = Some(irq);
        self.tail = next;
    }

    fn pop(&mut self) -> Option<PendingIrq> {
        if self.head == self.tail {
            return None;
        }
        let irq = self.slots[self.head].take();
        self.head = (self.head + 1) % PENDING_RING;
        irq
    }
}

/// Per-vCPU interrupt state: its own SGIs/PPIs plus the pending injection
/// ring the physical irqchip drains on guest entry.
pub struct VgicCpu {
    pub vcpuid: u32,
    sgis: Mutex<[VgicIrq; GIC_NSGI]>,
    ppis: Mutex<[VgicIrq; GIC_NPPI]>,
    pending: Mutex<PendingRing>,
}

impl VgicCpu {
    pub fn new(vcpuid: u32) -> Self {
        let mut sgis = [VgicIrq::sgi(0); GIC_NSGI];
        for (i, s) in sgis.iter_mut().enumerate() {
            *s = VgicIrq::sgi(i as u32);
        }
        let mut ppis = [VgicIrq::ppi(16, vcpuid); GIC_NPPI];
        for (i, p) in ppis.iter_mut().enumerate() {
            *p = VgicIrq::ppi(16 + i as u32, vcpuid);
        }
        Self { vcpuid, sgis: Mutex::new(sgis), ppis: Mutex::new(ppis), pending: Mutex::new(PendingRing::new()) }
    }

    fn local_irq(&self, intid: u32) -> Option<VgicIrq> {
        if is_sgi(intid) {
            Some(self.sgis.lock()[intid as usize])
        } else if is_ppi(intid) {
            Some(self.ppis.lock()[(intid - 16) as usize])
        } else {
            None
        }
    }

    fn set_enabled(&self, intid: u32, enabled: bool) {
        if is_sgi(intid) {
            self.sgis.lock()[intid as usize].enabled = enabled;
        } else if is_ppi(intid) {
            self.ppis.lock()[(intid - 16) as usize].enabled = enabled;
        }
    }

    fn set_priority(&self, intid: u32, priority: u8) {
        if is_sgi(intid) {
            self.sgis.lock()[intid as usize].priority = priority;
        } else if is_ppi(intid) {
            self.ppis.lock()[(intid - 16) as usize].priority = priority;
        }
    }

    fn set_group(&self, intid: u32, group1: bool) {
        let g = group1 as u8;
        if is_sgi(intid) {
            self.sgis.lock()[intid as usize].igroup = g;
        } else if is_ppi(intid) {
            self.ppis.lock()[(intid - 16) as usize].igroup = g;
        }
    }

    fn set_cfg(&self, intid: u32, cfg: IrqConfig) {
        if is_sgi(intid) {
            self.sgis.lock()[intid as usize].cfg = cfg;
        } else if is_ppi(intid) {
            self.ppis.lock()[(intid - 16) as usize].cfg = cfg;
        }
    }

    fn enqueue(&self, irq: PendingIrq) {
        self.pending.lock().push(irq)
    }

    /// Drain every pending injection into the physical irqchip. Called on
    /// guest entry for the running vCPU.
    pub fn drain_pending(&self, chip: &dyn IrqChip) {
        while let Some(irq) = self.pending.lock().pop() {
            let _ = chip.inject_guest_irq(irq);
        }
    }
}

/// Cluster-global SPI state, allocated once at boot from the physical
/// irqchip's reported interrupt count.
pub struct VgicDist {
    spis: Vec<Mutex<VgicIrq>>,
    spi_targets: Mutex<alloc::collections::BTreeMap<u32, u32>>,
}

impl VgicDist {
    pub fn new(nspis: usize) -> Self {
        let spis = (0..nspis).map(|i| Mutex::new(VgicIrq::spi(32 + i as u32))).collect();
        Self { spis, spi_targets: Mutex::new(alloc::collections::BTreeMap::new()) }
    }

    fn spi(&self, intid: u32) -> Option<&Mutex<VgicIrq>> {
        self.spis.get((intid - 32) as usize)
    }

    pub fn set_target(&self, intid: u32, vcpuid: u32) {
        self.spi_targets.lock().insert(intid, vcpuid);
    }

    pub fn target_of(&self, intid: u32) -> Option<u32> {
        self.spi_targets.lock().get(&intid).copied()
    }

    fn set_enabled(&self, intid: u32, enabled: bool) {
        if let Some(irq) = self.spi(intid) {
            irq.lock().enabled = enabled;
        }
    }

    fn set_priority(&self, intid: u32, priority: u8) {
        if let Some(irq) = self.spi(intid) {
            irq.lock().priority = priority;
        }
    }

    fn set_group(&self, intid: u32, group1: bool) {
        if let Some(irq) = self.spi(intid) {
            irq.lock().igroup = group1 as u8;
        }
    }

    fn set_cfg(&self, intid: u32, cfg: IrqConfig) {
        if let Some(irq) = self.spi(intid) {
            irq.lock().cfg = cfg;
        }
    }

    /// `GICD_TYPER`'s `ITLinesNumber` field: `(N / 32) - 1`, where `N` is the
    /// total interrupt line count rounded up to the next multiple of 32.
    fn typer_value(&self) -> u32 {
        let total_lines = 32 + self.spis.len() as u32;
        let it_lines_number = (total_lines + 31) / 32 - 1;
        it_lines_number & 0x1f
    }
}

/// Resolves which node currently hosts a given vCPU id, so SGI/SPI
/// injection can tell local delivery from cross-node routing apart.
/// Implemented by the per-node vCPU supervisor.
pub trait VcpuLocator {
    fn local_vcpu(&self, vcpuid: u32) -> Option<&VgicCpu>;
    fn node_of_vcpu(&self, vcpuid: u32) -> Option<NodeId>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SgiMsg {
    target: u32,
    sgi_id: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct InterruptMsg {
    target: u32,
    intid: u32,
}

/// Inject `virqno` into vCPU `target`, whether it lives on this node or a
/// remote one.
pub fn inject_virq(locator: &dyn VcpuLocator, dist: &VgicDist, target: u32, virqno: u32) -> Result<(), ()> {
    let (priority, pirq) = if is_sgi(virqno) {
        (0u8, None)
    } else if is_ppi(virqno) {
        match locator.local_vcpu(target).and_then(|c| c.local_irq(virqno)) {
            Some(irq) if irq.enabled => (irq.priority, Some(virqno)),
            _ => return Err(()),
        }
    } else if is_spi(virqno) {
        let irq = match dist.spi(virqno) {
            Some(m) => *m.lock(),
            None => return Err(()),
        };
        if !irq.enabled {
            return Err(());
        }
        (irq.priority, Some(virqno))
    } else {
        return Err(());
    };

    let pending = PendingIrq { virq: virqno, pirq, priority, group: 1 };

    match locator.local_vcpu(target) {
        Some(cpu) => {
            cpu.enqueue(pending);
            Ok(())
        }
        None => inject_virq_remote(locator, target, virqno),
    }
}

/// Cross-node delivery: the owning node is sent an `MSG_INTERRUPT` and
/// enqueues the pending IRQ itself on receipt (see [`handle_interrupt`]).
/// Completed per design (the reference implementation left this as a
/// `panic("inject remote")` stub).
fn inject_virq_remote(locator: &dyn VcpuLocator, target: u32, virqno: u32) -> Result<(), ()> {
    let node = locator.node_of_vcpu(target).ok_or(())?;
    let msg = InterruptMsg { target, intid: virqno };
    let payload = postcard::to_allocvec(&msg).map_err(|_| ())?;
    transport::send(node, MsgType::Interrupt, &payload).map_err(|_| ())
}

/// Handler for an inbound `MSG_INTERRUPT`: enqueue the pending IRQ for the
/// named local vCPU.
pub fn handle_interrupt(locator: &dyn VcpuLocator, _src: NodeId, payload: &[u8]) {
    let Ok(msg) = postcard::from_bytes::<InterruptMsg>(payload) else { return };
    if let Some(cpu) = locator.local_vcpu(msg.target) {
        let pending = PendingIrq { virq: msg.intid, pirq: Some(msg.intid), priority: 0, group: 1 };
        cpu.enqueue(pending);
    }
}

/// Handler for an inbound `MSG_SGI`: deliver to the named local vCPU.
pub fn handle_sgi(locator: &dyn VcpuLocator, dist: &VgicDist, _src: NodeId, payload: &[u8]) {
    let Ok(msg) = postcard::from_bytes::<SgiMsg>(payload) else { return };
    let _ = inject_virq(locator, dist, msg.target, msg.sgi_id);
}

/// Decode and route an `ICC_SGI1R_EL1` system register write: fan the SGI
/// out to every targeted vCPU in the cluster, local or remote.
pub fn emulate_sgir(locator: &dyn VcpuLocator, dist: &VgicDist, sgir: u64) -> Result<(), ()> {
    let targets = ((sgir >> 0) & 0xffff) as u16;
    let intid = ((sgir >> 24) & 0xf) as u32;
    let irm = (sgir >> 40) & 0x1;
    if irm == 1 {
        return Err(()); // broadcast-to-all-but-self not modeled
    }

    let mut any_failed = false;
    cluster::global().each_member(|node| {
        for i in 0..node.vcpu_count as u32 {
            if targets & (1 << i) != 0 {
                let vcpuid = i; // TODO: real affinity-aware vcpu numbering
                if inject_virq(locator, dist, vcpuid, intid).is_err() {
                    any_failed = true;
                }
            }
        }
    });
    if any_failed {
        Err(())
    } else {
        Ok(())
    }
}

/// Distributor register offsets this emulation answers (GICv2 layout).
pub mod regs {
    pub const GICD_CTLR: u64 = 0x000;
    pub const GICD_TYPER: u64 = 0x004;
    pub const GICD_IIDR: u64 = 0x008;
    pub const GICD_IGROUPR: u64 = 0x080;
    pub const GICD_ISENABLER: u64 = 0x100;
    pub const GICD_ICENABLER: u64 = 0x180;
    pub const GICD_ISPENDR: u64 = 0x200;
    pub const GICD_ICPENDR: u64 = 0x280;
    pub const GICD_IPRIORITYR: u64 = 0x400;
    pub const GICD_ITARGETSR: u64 = 0x800;
    pub const GICD_ICFGR: u64 = 0xc00;
}

/// `0x19 << ProductID_SHIFT | archrev << Revision_SHIFT | implementer`: a
/// GICv2 distributor, architecture revision 2, JEP106 code `0x43b` (Arm).
const GICD_IIDR_VALUE: u32 = (0x19 << 24) | (2 << 12) | 0x43b;

/// Distributor MMIO read. `vcpu_irq` resolves SGI/PPI against the faulting
/// vCPU; SPIs come from `dist` directly.
pub fn mmio_read(local: &VgicCpu, dist: &VgicDist, offset: u64) -> Option<u32> {
    use regs::*;
    match offset {
        GICD_CTLR => Some(0),
        GICD_TYPER => Some(dist.typer_value()),
        GICD_IIDR => Some(GICD_IIDR_VALUE),
        GICD_IGROUPR..=0x0ff => {
            let base = ((offset - GICD_IGROUPR) / 4 * 32) as u32;
            Some(word_of(base, |i| irq_group1(local, dist, base + i)))
        }
        GICD_ISENABLER..=0x17f => {
            let base = ((offset - GICD_ISENABLER) / 4 * 32) as u32;
            Some(word_of(base, |i| irq_enabled(local, dist, base + i)))
        }
        GICD_ICENABLER..=0x1ff => {
            let base = ((offset - GICD_ICENABLER) / 4 * 32) as u32;
            Some(word_of(base, |i| irq_enabled(local, dist, base + i)))
        }
        // ISPENDR/ICPENDR are read-only zero in this emulation: pending
        // state lives in the per-vCPU ring, not a level the guest can poll.
        GICD_ISPENDR..=0x27f | GICD_ICPENDR..=0x2ff => Some(0),
        GICD_IPRIORITYR..=0x7ff => {
            let base = ((offset - GICD_IPRIORITYR) / 4 * 4) as u32;
            let mut w = 0u32;
            for i in 0..4 {
                w |= (irq_priority(local, dist, base + i) as u32) << (i * 8);
            }
            Some(w)
        }
        GICD_ITARGETSR..=0xbff => {
            let base = ((offset - GICD_ITARGETSR) / 4 * 4) as u32;
            let mut w = 0u32;
            for i in 0..4 {
                w |= (irq_target(dist, base + i) as u32) << (i * 8);
            }
            Some(w)
        }
        GICD_ICFGR..=0xcff => {
            let base = ((offset - GICD_ICFGR) / 4 * 16) as u32;
            let mut w = 0u32;
            for i in 0..16 {
                if irq_cfg(local, dist, base + i) == IrqConfig::Edge {
                    w |= 0b10 << (i * 2);
                }
            }
            Some(w)
        }
        _ => None,
    }
}

fn word_of(base: u32, f: impl Fn(u32) -> bool) -> u32 {
    let mut w = 0u32;
    for i in 0..32 {
        if f(i) {
            w |= 1 << i;
        }
    }
    let _ = base;
    w
}

fn irq_enabled(local: &VgicCpu, dist: &VgicDist, intid: u32) -> bool {
    if is_sgi(intid) || is_ppi(intid) {
        local.local_irq(intid).map(|i| i.enabled).unwrap_or(false)
    } else if is_spi(intid) {
        dist.spi(intid).map(|m| m.lock().enabled).unwrap_or(false)
    } else {
        false
    }
}

fn irq_group1(local: &VgicCpu, dist: &VgicDist, intid: u32) -> bool {
    if is_sgi(intid) || is_ppi(intid) {
        local.local_irq(intid).map(|i| i.igroup != 0).unwrap_or(false)
    } else if is_spi(intid) {
        dist.spi(intid).map(|m| m.lock().igroup != 0).unwrap_or(false)
    } else {
        false
    }
}

fn irq_priority(local: &VgicCpu, dist: &VgicDist, intid: u32) -> u8 {
    if is_sgi(intid) || is_ppi(intid) {
        local.local_irq(intid).map(|i| i.priority).unwrap_or(0)
    } else if is_spi(intid) {
        dist.spi(intid).map(|m| m.lock().priority).unwrap_or(0)
    } else {
        0
    }
}

fn irq_cfg(local: &VgicCpu, dist: &VgicDist, intid: u32) -> IrqConfig {
    if is_sgi(intid) || is_ppi(intid) {
        local.local_irq(intid).map(|i| i.cfg).unwrap_or(IrqConfig::Level)
    } else if is_spi(intid) {
        dist.spi(intid).map(|m| m.lock().cfg).unwrap_or(IrqConfig::Level)
    } else {
        IrqConfig::Level
    }
}

/// SGIs/PPIs are banked per vCPU, so `ITARGETSR` reads as "this vCPU" (bit
/// 0) for them; only SPI bytes carry a real, settable target.
fn irq_target(dist: &VgicDist, intid: u32) -> u8 {
    if is_spi(intid) {
        dist.target_of(intid).unwrap_or(0) as u8
    } else {
        1
    }
}

/// Distributor MMIO write.
pub fn mmio_write(local: &VgicCpu, dist: &VgicDist, offset: u64, val: u32) {
    use regs::*;
    match offset {
        GICD_IGROUPR..=0x0ff => {
            let base = ((offset - GICD_IGROUPR) / 4 * 32) as u32;
            for i in 0..32 {
                set_group(local, dist, base + i, val & (1 << i) != 0);
            }
        }
        GICD_ISENABLER..=0x17f => {
            let base = ((offset - GICD_ISENABLER) / 4 * 32) as u32;
            for i in 0..32 {
                if val & (1 << i) != 0 {
                    set_enabled(local, dist, base + i, true);
                }
            }
        }
        GICD_ICENABLER..=0x1ff => {
            let base = ((offset - GICD_ICENABLER) / 4 * 32) as u32;
            for i in 0..32 {
                if val & (1 << i) != 0 {
                    set_enabled(local, dist, base + i, false);
                }
            }
        }
        GICD_IPRIORITYR..=0x7ff => {
            let base = ((offset - GICD_IPRIORITYR) / 4 * 4) as u32;
            for i in 0..4 {
                let byte = ((val >> (i * 8)) & 0xff) as u8;
                set_priority(local, dist, base + i, byte);
            }
        }
        GICD_ITARGETSR..=0xbff => {
            let base = ((offset - GICD_ITARGETSR) / 4 * 4) as u32;
            for i in 0..4 {
                let byte = ((val >> (i * 8)) & 0xff) as u8;
                if is_spi(base + i) {
                    dist.set_target(base + i, byte as u32);
                }
            }
        }
        GICD_ICFGR..=0xcff => {
            let base = ((offset - GICD_ICFGR) / 4 * 16) as u32;
            for i in 0..16 {
                let bits = (val >> (i * 2)) & 0b11;
                let cfg = if bits & 0b10 != 0 { IrqConfig::Edge } else { IrqConfig::Level };
                set_cfg(local, dist, base + i, cfg);
            }
        }
        _ => {}
    }
}

fn set_enabled(local: &VgicCpu, dist: &VgicDist, intid: u32, enabled: bool) {
    if is_sgi(intid) || is_ppi(intid) {
        local.set_enabled(intid, enabled);
    } else if is_spi(intid) {
        dist.set_enabled(intid, enabled);
    }
}

fn set_group(local: &VgicCpu, dist: &VgicDist, intid: u32, group1: bool) {
    if is_sgi(intid) || is_ppi(intid) {
        local.set_group(intid, group1);
    } else if is_spi(intid) {
        dist.set_group(intid, group1);
    }
}

fn set_priority(local: &VgicCpu, dist: &VgicDist, intid: u32, priority: u8) {
    if is_sgi(intid) || is_ppi(intid) {
        local.set_priority(intid, priority);
    } else if is_spi(intid) {
        dist.set_priority(intid, priority);
    }
}

fn set_cfg(local: &VgicCpu, dist: &VgicDist, intid: u32, cfg: IrqConfig) {
    if is_sgi(intid) || is_ppi(intid) {
        local.set_cfg(intid, cfg);
    } else if is_spi(intid) {
        dist.set_cfg(intid, cfg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SingleNodeLocator {
        cpus: alloc::collections::BTreeMap<u32, VgicCpu>,
    }
    impl VcpuLocator for SingleNodeLocator {
        fn local_vcpu(&self, vcpuid: u32) -> Option<&VgicCpu> {
            self.cpus.get(&vcpuid)
        }
        fn node_of_vcpu(&self, vcpuid: u32) -> Option<NodeId> {
            if self.cpus.contains_key(&vcpuid) { Some(NodeId(0)) } else { None }
        }
    }

    #[test]
    fn ppi_injection_requires_enabled() {
        let mut cpus = alloc::collections::BTreeMap::new();
        cpus.insert(0, VgicCpu::new(0));
        let locator = SingleNodeLocator { cpus };
        let dist = VgicDist::new(0);
        assert!(inject_virq(&locator, &dist, 0, 17).is_err());
        locator.cpus.get(&0).unwrap().set_enabled(17, true);
        assert!(inject_virq(&locator, &dist, 0, 17).is_ok());
    }

    #[test]
    fn sgi_injection_always_allowed() {
        let mut cpus = alloc::collections::BTreeMap::new();
        cpus.insert(0, VgicCpu::new(0));
        let locator = SingleNodeLocator { cpus };
        let dist = VgicDist::new(0);
        assert!(inject_virq(&locator, &dist, 0, 2).is_ok());
    }

    #[test]
    fn remote_target_is_not_an_error_path() {
        let cpus = alloc::collections::BTreeMap::new();
        let locator = SingleNodeLocator { cpus };
        let dist = VgicDist::new(0);
        // no local vCPU 0 registered and no cluster configured: routing
        // itself must fail cleanly rather than panic.
        assert!(inject_virq(&locator, &dist, 0, 2).is_err());
    }

    #[test]
    #[should_panic]
    fn pending_ring_overflow_is_fatal() {
        let cpu = VgicCpu::new(0);
        for _ in 0..PENDING_RING {
            cpu.enqueue(PendingIrq { virq: 17, pirq: Some(17), priority: 0, group: 1 });
        }
    }

    #[test]
    fn igroupr_mmio_round_trips_per_intid_bit() {
        let local = VgicCpu::new(0);
        let dist = VgicDist::new(32);
        mmio_write(&local, &dist, regs::GICD_IGROUPR, 1 << 17);
        mmio_write(&local, &dist, regs::GICD_IGROUPR + 4, 1 << 1); // intid 33

        let word0 = mmio_read(&local, &dist, regs::GICD_IGROUPR).unwrap();
        assert_eq!(word0 & (1 << 17), 1 << 17);
        assert_eq!(word0 & (1 << 2), 0);
        let word1 = mmio_read(&local, &dist, regs::GICD_IGROUPR + 4).unwrap();
        assert_eq!(word1 & (1 << 1), 1 << 1);
    }

    #[test]
    fn ipriorityr_mmio_is_byte_granular() {
        let local = VgicCpu::new(0);
        let dist = VgicDist::new(0);
        // SGI 0..3 packed into the first IPRIORITYR word.
        mmio_write(&local, &dist, regs::GICD_IPRIORITYR, 0x40_30_20_10);
        assert_eq!(irq_priority(&local, &dist, 0), 0x10);
        assert_eq!(irq_priority(&local, &dist, 1), 0x20);
        assert_eq!(irq_priority(&local, &dist, 2), 0x30);
        assert_eq!(irq_priority(&local, &dist, 3), 0x40);
    }

    #[test]
    fn icfgr_mmio_tracks_level_vs_edge() {
        let local = VgicCpu::new(0);
        let dist = VgicDist::new(0);
        // PPI 16 lives at bit-pair 0 of the second ICFGR word (16 intids/word).
        mmio_write(&local, &dist, regs::GICD_ICFGR + 4, 0b10);
        assert_eq!(irq_cfg(&local, &dist, 16), IrqConfig::Edge);
        assert_eq!(irq_cfg(&local, &dist, 17), IrqConfig::Level);
    }

    #[test]
    fn itargetsr_mmio_routes_spis_only() {
        let local = VgicCpu::new(0);
        let dist = VgicDist::new(4);
        // Byte 0 of the word at +32 covers intid 32, the first SPI.
        mmio_write(&local, &dist, regs::GICD_ITARGETSR + 32, 5);
        assert_eq!(dist.target_of(32), Some(5));
        // SGI/PPI bytes are read-only, banked to "self".
        assert_eq!(irq_target(&dist, 0), 1);
    }

    #[test]
    fn typer_and_iidr_report_real_identity() {
        let local = VgicCpu::new(0);
        let dist = VgicDist::new(32);
        assert_eq!(mmio_read(&local, &dist, regs::GICD_TYPER), Some(1));
        assert_eq!(mmio_read(&local, &dist, regs::GICD_IIDR), Some(GICD_IIDR_VALUE));
    }
}
