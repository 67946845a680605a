//! Local node supervisor: owns this node's vCPU register files and vGIC
//! per-vCPU state, and implements the cross-module trait objects
//! ([`PsciOps`], [`VcpuLocator`]) the fault dispatcher drives.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use spin::Mutex;

use meshvisor_hal::cpu::CpuState;

use crate::cluster::{self, NodeId};
use crate::psci::{self, PsciOps};
use crate::transport::{self, MsgType};
use crate::vgic::{self, VcpuLocator, VgicCpu, VgicDist};

struct VcpuSlot {
    id: u32,
    state: Mutex<CpuState>,
    vgic: VgicCpu,
    online: AtomicBool,
}

/// Everything this node runs locally: its vCPUs and their vGIC state, plus
/// the cluster-global SPI table (one copy per node, kept consistent by the
/// distributor MMIO trap path).
pub struct LocalNode {
    vcpus: Vec<VcpuSlot>,
    base_vcpuid: u32,
    dist: VgicDist,
    current_vcpu: AtomicU32,
}

impl LocalNode {
    pub fn new(base_vcpuid: u32, vcpu_count: u32, nspis: usize) -> Self {
        let vcpus = (0..vcpu_count)
            .map(|i| VcpuSlot {
                id: base_vcpuid + i,
                state: Mutex::new(CpuState::default()),
                vgic: VgicCpu::new(base_vcpuid + i),
                online: AtomicBool::new(false),
            })
            .collect();
        Self { vcpus, base_vcpuid, dist: VgicDist::new(nspis), current_vcpu: AtomicU32::new(base_vcpuid) }
    }

    fn slot(&self, vcpuid: u32) -> Option<&VcpuSlot> {
        if vcpuid < self.base_vcpuid {
            return None;
        }
        self.vcpus.get((vcpuid - self.base_vcpuid) as usize)
    }

    pub fn dist(&self) -> &VgicDist {
        &self.dist
    }

    pub fn vgic_of(&self, vcpuid: u32) -> Option<&VgicCpu> {
        self.slot(vcpuid).map(|s| &s.vgic)
    }

    pub fn state_of(&self, vcpuid: u32) -> Option<&Mutex<CpuState>> {
        self.slot(vcpuid).map(|s| &s.state)
    }

    pub fn is_online(&self, vcpuid: u32) -> bool {
        self.slot(vcpuid).map(|s| s.online.load(Ordering::Acquire)).unwrap_or(false)
    }

    /// Record which vCPU the calling physical core is currently running, so
    /// a subsequent `PSCI_CPU_OFF` from that guest context knows which
    /// slot to park. Called by the world-switch loop before entering the
    /// guest.
    pub fn set_current(&self, vcpuid: u32) {
        self.current_vcpu.store(vcpuid, Ordering::Release);
    }

    fn start_vcpu(&self, vcpuid: u32, entry: u64, context_id: u64) -> i64 {
        match self.slot(vcpuid) {
            Some(slot) => {
                if slot.online.swap(true, Ordering::AcqRel) {
                    return psci::ALREADY_ON;
                }
                let mut state = slot.state.lock();
                *state = CpuState { pc: entry, ..CpuState::default() };
                state.gpr[0] = context_id;
                psci::SUCCESS
            }
            None => psci::INVALID_PARAMETERS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CpuWakeupMsg {
    vcpuid: u32,
    entry: u64,
    context_id: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CpuWakeupAckMsg {
    status: i64,
}

impl VcpuLocator for LocalNode {
    fn local_vcpu(&self, vcpuid: u32) -> Option<&VgicCpu> {
        self.slot(vcpuid).filter(|s| s.online.load(Ordering::Acquire)).map(|s| &s.vgic)
    }

    fn node_of_vcpu(&self, vcpuid: u32) -> Option<NodeId> {
        cluster::global().vcpu_owner(vcpuid)
    }
}

impl PsciOps for LocalNode {
    fn cpu_on(&self, target_mpidr: u64, entry: u64, context_id: u64) -> i64 {
        let vcpuid = (target_mpidr & 0xff) as u32;
        match cluster::global().vcpu_owner(vcpuid) {
            None => psci::INVALID_PARAMETERS,
            Some(owner) if owner == cluster::global().local_nodeid() => {
                self.start_vcpu(vcpuid, entry, context_id)
            }
            Some(owner) => {
                let msg = CpuWakeupMsg { vcpuid, entry, context_id };
                let Ok(payload) = postcard::to_allocvec(&msg) else { return psci::DENIED };
                match transport::send_and_wait_reply(owner, MsgType::CpuWakeup, &payload, MsgType::CpuWakeupAck, 200_000) {
                    Ok(raw) => postcard::from_bytes::<CpuWakeupAckMsg>(&raw).map(|a| a.status).unwrap_or(psci::DENIED),
                    Err(_) => psci::DENIED,
                }
            }
        }
    }

    fn cpu_off(&self) -> i64 {
        let vcpuid = self.current_vcpu.load(Ordering::Acquire);
        match self.slot(vcpuid) {
            Some(slot) => {
                slot.online.store(false, Ordering::Release);
                psci::SUCCESS
            }
            None => psci::DENIED,
        }
    }

    fn system_off(&self) -> i64 {
        for slot in &self.vcpus {
            slot.online.store(false, Ordering::Release);
        }
        cluster::global().set_status(cluster::global().local_nodeid(), cluster::NodeStatus::Dead);
        psci::SUCCESS
    }

    fn system_reset(&self) -> i64 {
        for slot in &self.vcpus {
            slot.online.store(false, Ordering::Release);
            *slot.state.lock() = CpuState::default();
        }
        psci::SUCCESS
    }
}

/// Handler for an inbound `MSG_CPU_WAKEUP`: start the named local vCPU and
/// ack the result back to the requester.
pub fn handle_cpu_wakeup(src: NodeId, payload: &[u8]) {
    let Ok(msg) = postcard::from_bytes::<CpuWakeupMsg>(payload) else { return };
    let status = global().start_vcpu(msg.vcpuid, msg.entry, msg.context_id);
    let ack = CpuWakeupAckMsg { status };
    if let Ok(reply) = postcard::to_allocvec(&ack) {
        let _ = transport::send(src, MsgType::CpuWakeupAck, &reply);
    }
}

/// Handler for an inbound `MSG_INTERRUPT`: `vgic::handle_interrupt` needs a
/// `VcpuLocator` to resolve the target, which only exists once this node is
/// brought up, so this just binds it against the global node and forwards.
pub fn handle_interrupt(src: NodeId, payload: &[u8]) {
    vgic::handle_interrupt(global(), src, payload);
}

/// Handler for an inbound `MSG_SGI`: same binding as [`handle_interrupt`],
/// plus this node's SPI table for the target lookup `handle_sgi` needs.
pub fn handle_sgi(src: NodeId, payload: &[u8]) {
    vgic::handle_sgi(global(), global().dist(), src, payload);
}

static NODE: spin::Once<LocalNode> = spin::Once::new();

pub fn init_global(node: LocalNode) {
    NODE.call_once(|| node);
}

pub fn global() -> &'static LocalNode {
    NODE.get().expect("local node not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, NodeConfig};

    fn setup() {
        let cfg = ClusterConfig::from_nodes(&[NodeConfig {
            nodeid: NodeId(0),
            mac: [0; 6],
            vcpu_count: 2,
            mem_base: 0x4000_0000,
            mem_size: 0x1000_0000,
        }]);
        cluster::init(NodeId(0), &cfg);
    }

    // vcpuid 0 is used throughout: `cluster::global()` is a process-wide
    // `Once` shared with other modules' tests, so these assertions must
    // hold regardless of which config (and thus which `vcpu_count`) won
    // the race to initialize it. vcpuid 0 is in range for any nonempty
    // node.

    #[test]
    fn cpu_on_starts_offline_vcpu_once() {
        setup();
        let node = LocalNode::new(0, 2, 0);
        assert_eq!(node.cpu_on(0, 0x4000_1000, 0x42), psci::SUCCESS);
        assert!(node.is_online(0));
        assert_eq!(node.cpu_on(0, 0x4000_1000, 0x42), psci::ALREADY_ON);
    }

    #[test]
    fn cpu_off_parks_current_vcpu() {
        setup();
        let node = LocalNode::new(0, 2, 0);
        node.cpu_on(0, 0x4000_1000, 0);
        node.set_current(0);
        assert_eq!(node.cpu_off(), psci::SUCCESS);
        assert!(!node.is_online(0));
    }
}
