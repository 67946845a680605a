//! Cluster directory: node identity, MAC/vCPU lookup tables, and the
//! manager computation the VSM engine consults for every page fault.

use core::sync::atomic::{AtomicU8, Ordering};

use spin::Once;

use crate::config::{ClusterConfig, NodeConfig, NODE_MAX};

/// Cluster-wide node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// Bring-up state of a cluster member, mirroring the reference source's
/// `node_status` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeStatus {
    Null = 0,
    Ack = 1,
    Online = 2,
    Dead = 3,
}

impl NodeStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => NodeStatus::Ack,
            2 => NodeStatus::Online,
            3 => NodeStatus::Dead,
            _ => NodeStatus::Null,
        }
    }
}

struct NodeEntry {
    cfg: NodeConfig,
    status: AtomicU8,
}

/// Cluster directory: immutable node table plus mutable per-node bring-up
/// status. Built once at boot from a [`ClusterConfig`] and never resized.
pub struct Cluster {
    local: NodeId,
    nodes: [Option<NodeEntry>; NODE_MAX],
    node_count: usize,
}

static CLUSTER: Once<Cluster> = Once::new();

impl Cluster {
    fn build(local: NodeId, cfg: &ClusterConfig) -> Self {
        let mut nodes: [Option<NodeEntry>; NODE_MAX] = Default::default();
        for (i, n) in cfg.iter().enumerate() {
            let status = if n.nodeid == local {
                AtomicU8::new(NodeStatus::Online as u8)
            } else {
                AtomicU8::new(NodeStatus::Null as u8)
            };
            nodes[i] = Some(NodeEntry { cfg: *n, status });
        }
        Self {
            local,
            nodes,
            node_count: cfg.node_count,
        }
    }

    pub fn local_nodeid(&self) -> NodeId {
        self.local
    }

    fn entries(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes[..self.node_count].iter().filter_map(|n| n.as_ref())
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeConfig> {
        self.entries().find(|e| e.cfg.nodeid == id).map(|e| &e.cfg)
    }

    pub fn node_by_mac(&self, mac: [u8; 6]) -> Option<&NodeConfig> {
        self.entries().find(|e| e.cfg.mac == mac).map(|e| &e.cfg)
    }

    pub fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.entries()
            .find(|e| e.cfg.nodeid == id)
            .map(|e| NodeStatus::from_u8(e.status.load(Ordering::Acquire)))
    }

    pub fn set_status(&self, id: NodeId, status: NodeStatus) {
        if let Some(e) = self.entries().find(|e| e.cfg.nodeid == id) {
            e.status.store(status as u8, Ordering::Release);
        }
    }

    /// The node whose configured memory range covers `ipa`, i.e. the
    /// manager for that page. Linear scan: cluster sizes are small.
    pub fn manager_of(&self, ipa: u64) -> Option<NodeId> {
        self.entries()
            .find(|e| ipa >= e.cfg.mem_base && ipa < e.cfg.mem_base + e.cfg.mem_size)
            .map(|e| e.cfg.nodeid)
    }

    /// Invoke `f` for every node currently `Online`, skipping nodes that
    /// never completed bring-up or that have been marked dead. Missing the
    /// `CLUSTER_INFO` broadcast leaves a node `Null` forever; this is a
    /// known, accepted failure mode (see the design ledger).
    pub fn each_member<F: FnMut(&NodeConfig)>(&self, mut f: F) {
        for e in self.entries() {
            if NodeStatus::from_u8(e.status.load(Ordering::Acquire)) == NodeStatus::Online {
                f(&e.cfg);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Global vCPU ids are assigned by concatenating each node's local
    /// range in table order: node 0 gets `[0, vcpu_count)`, node 1 the
    /// next range, and so on.
    pub fn vcpu_owner(&self, vcpuid: u32) -> Option<NodeId> {
        let mut base = 0u32;
        for e in self.entries() {
            let count = e.cfg.vcpu_count as u32;
            if vcpuid < base + count {
                return Some(e.cfg.nodeid);
            }
            base += count;
        }
        None
    }

    /// This node's own slice of the global vCPU id space: `(base, count)`.
    pub fn local_vcpu_range(&self) -> (u32, u32) {
        let mut base = 0u32;
        for e in self.entries() {
            if e.cfg.nodeid == self.local {
                return (base, e.cfg.vcpu_count as u32);
            }
            base += e.cfg.vcpu_count as u32;
        }
        (0, 0)
    }
}

/// Initialize the global cluster directory. Idempotent.
pub fn init(local: NodeId, cfg: &ClusterConfig) {
    CLUSTER.call_once(|| Cluster::build(local, cfg));
}

/// Access the global cluster directory. Panics if [`init`] was not called.
pub fn global() -> &'static Cluster {
    CLUSTER.get().expect("cluster directory not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn cfg() -> ClusterConfig {
        ClusterConfig::from_nodes(&[
            NodeConfig { nodeid: NodeId(0), mac: [0, 0, 0, 0, 0, 0], vcpu_count: 1, mem_base: 0x4000_0000, mem_size: 0x1000_0000 },
            NodeConfig { nodeid: NodeId(1), mac: [0, 0, 0, 0, 0, 1], vcpu_count: 1, mem_base: 0x5000_0000, mem_size: 0x1000_0000 },
        ])
    }

    #[test]
    fn manager_of_resolves_by_memrange() {
        let c = Cluster::build(NodeId(0), &cfg());
        assert_eq!(c.manager_of(0x4080_3000), Some(NodeId(0)));
        assert_eq!(c.manager_of(0x5000_1000), Some(NodeId(1)));
        assert_eq!(c.manager_of(0x9000_0000), None);
    }

    #[test]
    fn each_member_skips_null_nodes() {
        let c = Cluster::build(NodeId(0), &cfg());
        let mut seen = 0;
        c.each_member(|_| seen += 1);
        assert_eq!(seen, 1); // only the local node starts Online
        c.set_status(NodeId(1), NodeStatus::Online);
        seen = 0;
        c.each_member(|_| seen += 1);
        assert_eq!(seen, 2);
    }
}
