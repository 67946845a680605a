//! Guest stage-2 table plus the copyset side table the coherence engine
//! consults on every fault.
//!
//! The underlying architecture table (`meshvisor_hal::stage2::Stage2Table`)
//! only knows about IPA -> PA mappings and read/write/execute bits. Which
//! other nodes hold a read-only copy of a page is protocol state, not
//! translation state, so it lives here rather than packed into spare PTE
//! bits (seen as unnecessary coupling to a specific page-table format).

use alloc::collections::BTreeMap;

use spin::Mutex;

use meshvisor_hal::stage2::{Stage2Error, Stage2Perms, Stage2Table as HalStage2Table};

use crate::cluster::NodeId;

/// Bitmask of nodes holding a read-only copy of a page; bit `i` set means
/// node `i` is in the copyset. `NODE_MAX` (16) fits in a `u16`.
pub type Copyset = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteState {
    Invalid,
    ReadOnly(Copyset),
    ReadWrite,
}

pub struct Stage2<T: HalStage2Table> {
    table: Mutex<T>,
    copysets: Mutex<BTreeMap<u64, Copyset>>,
}

impl<T: HalStage2Table> Stage2<T> {
    pub fn new() -> Result<Self, Stage2Error> {
        Ok(Self {
            table: Mutex::new(T::new()?),
            copysets: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn phys_root(&self) -> u64 {
        self.table.lock().phys_root()
    }

    /// Current directory state for `ipa`, derived from the architecture
    /// table's permission bits plus the copyset side table.
    pub fn pte_for(&self, ipa: u64) -> PteState {
        let page = ipa & !0xfff;
        match self.table.lock().translate(page) {
            None => PteState::Invalid,
            Some((_, perms)) if perms.write => PteState::ReadWrite,
            Some(_) => PteState::ReadOnly(self.copysets.lock().get(&page).copied().unwrap_or(0)),
        }
    }

    /// Current host physical address backing `ipa`, if any.
    pub fn translate(&self, ipa: u64) -> Option<(u64, Stage2Perms)> {
        let page = ipa & !0xfff;
        self.table.lock().translate(page)
    }

    pub fn map_page(&self, ipa: u64, pa: u64, perms: Stage2Perms) -> Result<(), Stage2Error> {
        let page = ipa & !0xfff;
        self.table.lock().map_page(page, pa, perms)
    }

    pub fn set_permissions(&self, ipa: u64, perms: Stage2Perms) -> Result<(), Stage2Error> {
        let page = ipa & !0xfff;
        self.table.lock().set_permissions(page, perms)
    }

    pub fn invalidate(&self, ipa: u64) -> Result<(), Stage2Error> {
        let page = ipa & !0xfff;
        self.table.lock().unmap(page)?;
        self.copysets.lock().remove(&page);
        self.table.lock().invalidate_ipa(page);
        Ok(())
    }

    pub fn add_to_copyset(&self, ipa: u64, node: NodeId) {
        let page = ipa & !0xfff;
        let mut sets = self.copysets.lock();
        let entry = sets.entry(page).or_insert(0);
        *entry |= 1u16 << (node.0 as u16 % 16);
    }

    pub fn set_copyset(&self, ipa: u64, members: Copyset) {
        let page = ipa & !0xfff;
        self.copysets.lock().insert(page, members);
    }

    pub fn clear_copyset(&self, ipa: u64) {
        let page = ipa & !0xfff;
        self.copysets.lock().remove(&page);
    }

    pub fn copyset_members(&self, ipa: u64) -> Copyset {
        let page = ipa & !0xfff;
        self.copysets.lock().get(&page).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTable {
        mapped: BTreeMap<u64, (u64, Stage2Perms)>,
    }

    impl HalStage2Table for FakeTable {
        fn new() -> Result<Self, Stage2Error> {
            Ok(Self { mapped: BTreeMap::new() })
        }
        fn phys_root(&self) -> u64 {
            0
        }
        fn map_page(&mut self, ipa: u64, pa: u64, perms: Stage2Perms) -> Result<(), Stage2Error> {
            self.mapped.insert(ipa, (pa, perms));
            Ok(())
        }
        fn set_permissions(&mut self, ipa: u64, perms: Stage2Perms) -> Result<(), Stage2Error> {
            let (pa, _) = self.mapped.get(&ipa).copied().ok_or(Stage2Error::NotMapped)?;
            self.mapped.insert(ipa, (pa, perms));
            Ok(())
        }
        fn unmap(&mut self, ipa: u64) -> Result<(), Stage2Error> {
            self.mapped.remove(&ipa);
            Ok(())
        }
        fn translate(&self, ipa: u64) -> Option<(u64, Stage2Perms)> {
            self.mapped.get(&ipa).copied()
        }
        fn invalidate_ipa(&self, _ipa: u64) {}
        fn invalidate_all(&self) {}
    }

    #[test]
    fn copyset_tracks_readers_until_writable() {
        let s2: Stage2<FakeTable> = Stage2::new().unwrap();
        s2.map_page(0x1000, 0x2000, Stage2Perms::RO).unwrap();
        assert_eq!(s2.pte_for(0x1000), PteState::ReadOnly(0));
        s2.add_to_copyset(0x1000, NodeId(1));
        s2.add_to_copyset(0x1000, NodeId(2));
        assert_eq!(s2.pte_for(0x1000), PteState::ReadOnly(0b110));
        s2.set_permissions(0x1000, Stage2Perms::RW).unwrap();
        assert_eq!(s2.pte_for(0x1000), PteState::ReadWrite);
    }

    #[test]
    fn invalidate_clears_copyset_and_mapping() {
        let s2: Stage2<FakeTable> = Stage2::new().unwrap();
        s2.map_page(0x3000, 0x4000, Stage2Perms::RO).unwrap();
        s2.add_to_copyset(0x3000, NodeId(3));
        s2.invalidate(0x3000).unwrap();
        assert_eq!(s2.pte_for(0x3000), PteState::Invalid);
        assert_eq!(s2.copyset_members(0x3000), 0);
    }
}
