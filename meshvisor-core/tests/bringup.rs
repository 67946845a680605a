//! Integration-level smoke tests against the crate's public surface.
//!
//! The directory coherence scenarios (a remote read miss, a write-to-owner
//! upgrade, a write steal, three-party forwarding, cross-node SGI, a raced
//! invalidate) are expressed as regression tests inside `vsm.rs` and
//! `vgic.rs` against a fake stage-2 table, since `transport`'s NIC/handler
//! tables are process-wide singletons and a single test binary can only
//! stand up one logical node. Driving the literal multi-node scenarios
//! end-to-end would need a per-node transport instance, which is out of
//! scope here; see `DESIGN.md`.

use meshvisor_core::cluster::NodeId;
use meshvisor_core::config::{ClusterConfig, NodeConfig};
use meshvisor_core::vgic::{self, VcpuLocator, VgicCpu, VgicDist};

struct OneNodeLocator {
    cpu: VgicCpu,
}

impl VcpuLocator for OneNodeLocator {
    fn local_vcpu(&self, vcpuid: u32) -> Option<&VgicCpu> {
        (vcpuid == 0).then_some(&self.cpu)
    }
    fn node_of_vcpu(&self, vcpuid: u32) -> Option<NodeId> {
        (vcpuid == 0).then_some(NodeId(0))
    }
}

#[test]
fn sgi_to_local_vcpu_lands_in_its_pending_ring() {
    let locator = OneNodeLocator { cpu: VgicCpu::new(0) };
    let dist = VgicDist::new(0);
    vgic::inject_virq(&locator, &dist, 0, 5).unwrap();
}

#[test]
fn cluster_config_round_trips_node_table() {
    let cfg = ClusterConfig::from_nodes(&[
        NodeConfig { nodeid: NodeId(0), mac: [1; 6], vcpu_count: 2, mem_base: 0x4000_0000, mem_size: 0x1000_0000 },
        NodeConfig { nodeid: NodeId(1), mac: [2; 6], vcpu_count: 2, mem_base: 0x5000_0000, mem_size: 0x1000_0000 },
    ]);
    assert_eq!(cfg.node_count, 2);
    let ids: Vec<_> = cfg.iter().map(|n| n.nodeid).collect();
    assert_eq!(ids, vec![NodeId(0), NodeId(1)]);
}
