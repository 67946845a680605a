//! Cluster-wide virtual shared memory: a single-writer/multiple-reader
//! directory coherence protocol over 4 KiB guest physical pages.
//!
//! Each page is in one of three states, tracked by [`crate::stage2::Stage2`]:
//! `Invalid` (no local copy), `ReadOnly(copyset)` (a read-only copy; a
//! nonzero copyset additionally marks this node as the page's *owner*,
//! tracking who else holds a read-only copy), or `ReadWrite` (sole owner,
//! exclusive). Manager assignment is static, by memory range
//! ([`crate::cluster::Cluster::manager_of`]); ownership migrates with every
//! write fault.
//!
//! Each page also has a [`PageDescriptor`]: a packed `(lock, wqlock)`
//! half-word plus a queue of server requests that arrived while `lock` was
//! held. A local fault blocks on `lock` ([`PageLock::lock`]); an inbound
//! network request makes one [`PageLock::trylock`] attempt and, on failure,
//! enqueues itself under `wqlock` for whoever is holding `lock` to run at
//! release. Release always drains the queue first and then clears both
//! sub-bytes in a single half-word store, so no handler can observe `lock`
//! free with requests still waiting.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU16, Ordering};

use serde::{Deserialize, Serialize};
use spin::Mutex;

use meshvisor_hal::memory::{MemoryError, PhysicalAllocator};
use meshvisor_hal::stage2::{Stage2Perms, Stage2Table as HalStage2Table};

use crate::cluster::{self, NodeId};
use crate::stage2::{PteState, Stage2};
use crate::transport::{self, MsgType};

const PAGE_SIZE: u64 = 0x1000;
/// Fetch replies must arrive within this many transport polls, matching the
/// reference implementation's 3 second fetch timeout in spirit (an exact
/// wall-clock bound needs a tick source the core crate doesn't have).
const FETCH_TIMEOUT_SPINS: u32 = 200_000;

/// Placeholder caller tag for [`PageLock`]: this crate has no per-physical-
/// core id it can thread through the fault and request dispatch paths yet.
/// The locking algorithm only needs "free" (0) vs. "held" (nonzero); it does
/// not depend on distinct callers having distinct tags.
const LOCAL_HOLDER: u8 = 1;

pub const fn page_align(ipa: u64) -> u64 {
    ipa & !(PAGE_SIZE - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VsmError {
    NoManager,
    OutOfMemory,
    Timeout,
    Transport,
    NotMapped,
}

impl From<MemoryError> for VsmError {
    fn from(_: MemoryError) -> Self {
        VsmError::OutOfMemory
    }
}

impl From<transport::TransportError> for VsmError {
    fn from(e: transport::TransportError) -> Self {
        match e {
            transport::TransportError::Timeout => VsmError::Timeout,
            _ => VsmError::Transport,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FetchReqMsg {
    ipa: u64,
    req_nodeid: u32,
    write: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FetchReplyMsg {
    ipa: u64,
    copyset: u16,
    write: bool,
    page: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct InvalidateMsg {
    ipa: u64,
    copyset: u16,
    from_nodeid: u32,
}

const WQLOCK_BIT: u16 = 0x100;

/// Packed per-page lock. Byte 0 (`lock`) marks the page held by whichever
/// path is currently servicing it; byte 1 (`wqlock`) guards the wait queue.
/// `aarch64` uses the reference implementation's exclusive-access
/// instructions directly; other targets fall back to an `AtomicU16` CAS
/// loop with identical semantics, since `ldaxrb`/`stxrb`/`stlrh` have no
/// portable equivalent.
struct PageLock(AtomicU16);

impl PageLock {
    const fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// Single-attempt acquire of `lock`. `holder` must be nonzero.
    fn trylock(&self, holder: u8) -> bool {
        debug_assert_ne!(holder, 0);
        #[cfg(target_arch = "aarch64")]
        {
            unsafe { claim_byte(self.0.as_ptr() as *mut u8, holder) }
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            let cur = self.0.load(Ordering::Acquire);
            if cur & 0xff != 0 {
                return false;
            }
            let want = (cur & 0xff00) | holder as u16;
            self.0.compare_exchange(cur, want, Ordering::AcqRel, Ordering::Relaxed).is_ok()
        }
    }

    /// Blocking acquire, for local fault handlers where spinning is safe
    /// (unlike the network-arrival path, which must never block).
    fn lock(&self, holder: u8) {
        while !self.trylock(holder) {
            core::hint::spin_loop();
        }
    }

    /// Acquire `wqlock` regardless of whether `lock` is held, reporting
    /// whether `lock` was free at that instant. If it was, the CPU that
    /// held it is gone (it already ran its release path before we got
    /// here) and the caller must drain the queue itself.
    fn wqlock(&self) -> bool {
        loop {
            let cur = self.0.load(Ordering::Acquire);
            if cur & WQLOCK_BIT != 0 {
                core::hint::spin_loop();
                continue;
            }
            let want = cur | WQLOCK_BIT;
            if self.0.compare_exchange_weak(cur, want, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
                return cur & 0xff == 0;
            }
        }
    }

    fn wqunlock(&self) {
        self.0.fetch_and(!WQLOCK_BIT, Ordering::Release);
    }

    /// Clear `lock` and `wqlock` together in one half-word store-release.
    /// The CPU that calls this must be the one that holds `lock`.
    fn unlock_and_wqunlock(&self) {
        #[cfg(target_arch = "aarch64")]
        {
            unsafe { release_halfword(self.0.as_ptr()) };
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            self.0.store(0, Ordering::Release);
        }
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn claim_byte(ptr: *mut u8, holder: u8) -> bool {
    let status: u64;
    unsafe {
        core::arch::asm!(
            "ldaxrb {old:w}, [{ptr}]",
            "cbz {old:w}, 3f",
            "clrex",
            "mov {status:w}, #1",
            "b 4f",
            "3:",
            "stxrb {status:w}, {holder:w}, [{ptr}]",
            "4:",
            ptr = in(reg) ptr,
            holder = in(reg) holder as u64,
            old = out(reg) _,
            status = out(reg) status,
            options(nostack),
        );
    }
    status == 0
}

#[cfg(target_arch = "aarch64")]
unsafe fn release_halfword(ptr: *mut u16) {
    unsafe {
        core::arch::asm!("stlrh wzr, [{ptr}]", ptr = in(reg) ptr, options(nostack));
    }
}

/// A server procedure deferred behind `wqlock` because `lock` was held when
/// it arrived.
enum ServerRequest {
    Fetch { req_nodeid: NodeId, write: bool },
    Invalidate,
}

/// Per-page lock plus its wait queue. Never removed from
/// [`VsmEngine::pages`] once created, so `&PageDescriptor`s handed out by
/// [`VsmEngine::page_desc`] stay valid for the engine's lifetime.
struct PageDescriptor {
    lock: PageLock,
    wq: UnsafeCell<VecDeque<ServerRequest>>,
}

// SAFETY: `wq` is only ever touched while `wqlock` is held, which is the
// synchronization `PageLock` itself provides.
unsafe impl Send for PageDescriptor {}
unsafe impl Sync for PageDescriptor {}

impl PageDescriptor {
    fn new() -> Self {
        Self { lock: PageLock::new(), wq: UnsafeCell::new(VecDeque::new()) }
    }

    /// SAFETY: caller must currently hold `wqlock`.
    unsafe fn wq_mut(&self) -> &mut VecDeque<ServerRequest> {
        unsafe { &mut *self.wq.get() }
    }

    /// Append `req` under `wqlock`. Returns whether `lock` was already free
    /// at that moment, per [`PageLock::wqlock`].
    fn enqueue(&self, req: ServerRequest) -> bool {
        let page_was_free = self.lock.wqlock();
        unsafe { self.wq_mut() }.push_back(req);
        self.lock.wqunlock();
        page_was_free
    }

    /// Run every request queued while `lock` was held, then release `lock`
    /// and `wqlock` together. Must be called by the holder of `lock`.
    fn release_and_drain(&self, mut process: impl FnMut(ServerRequest)) {
        self.lock.wqlock();
        loop {
            let batch = {
                let q = unsafe { self.wq_mut() };
                if q.is_empty() {
                    break;
                }
                core::mem::take(q)
            };
            self.lock.wqunlock();
            for req in batch {
                process(req);
            }
            self.lock.wqlock();
        }
        self.lock.unlock_and_wqunlock();
    }

    #[cfg(test)]
    fn queued_len(&self) -> usize {
        unsafe { self.wq_mut() }.len()
    }
}

/// The coherence engine for one node. Generic over the concrete stage-2
/// table implementation so the same logic runs against the real ARM64
/// table or a fake one in tests.
pub struct VsmEngine<T: HalStage2Table + 'static> {
    s2: Stage2<T>,
    /// Current owner of each page this node manages. Meaningless (and
    /// unconsulted) for pages managed elsewhere.
    manager_owner: Mutex<BTreeMap<u64, NodeId>>,
    pages: Mutex<BTreeMap<u64, Box<PageDescriptor>>>,
    allocator: Mutex<Box<dyn PhysicalAllocator<Error = MemoryError> + Send>>,
}

impl<T: HalStage2Table + Send + 'static> VsmEngine<T> {
    pub fn new(
        allocator: Box<dyn PhysicalAllocator<Error = MemoryError> + Send>,
    ) -> Result<Self, VsmError> {
        Ok(Self {
            s2: Stage2::new().map_err(|_| VsmError::OutOfMemory)?,
            manager_owner: Mutex::new(BTreeMap::new()),
            pages: Mutex::new(BTreeMap::new()),
            allocator: Mutex::new(allocator),
        })
    }

    /// The lock/wait-queue descriptor for `page`, creating it on first
    /// touch. The returned reference stays valid for `self`'s lifetime:
    /// entries are never removed or replaced once inserted.
    fn page_desc(&self, page: u64) -> &PageDescriptor {
        let mut pages = self.pages.lock();
        let boxed = pages.entry(page).or_insert_with(|| Box::new(PageDescriptor::new()));
        let ptr: *const PageDescriptor = boxed.as_ref();
        // SAFETY: the map only ever grows; `boxed` is never moved or
        // dropped once inserted, so `ptr` outlives this lock guard.
        unsafe { &*ptr }
    }

    /// Seed this node as the initial owner of `ipa`'s page. Called once at
    /// node bring-up for every page in this node's own memory range.
    pub fn set_local_owner(&self, ipa: u64) {
        self.manager_owner
            .lock()
            .insert(page_align(ipa), cluster::global().local_nodeid());
    }

    fn owner_of(&self, ipa: u64) -> Option<NodeId> {
        self.manager_owner.lock().get(&page_align(ipa)).copied()
    }

    fn set_owner(&self, ipa: u64, node: NodeId) {
        self.manager_owner.lock().insert(page_align(ipa), node);
    }

    fn alloc_page(&self) -> Result<u64, VsmError> {
        Ok(self.allocator.lock().allocate_pages(1)?)
    }

    fn free_page(&self, pa: u64) {
        let _ = self.allocator.lock().free_pages(pa, 1);
    }

    /// Current stage-2 + copyset state, for diagnostics and tests.
    pub fn pte_for(&self, ipa: u64) -> PteState {
        self.s2.pte_for(page_align(ipa))
    }

    /// Handle a stage-2 data abort with no write permission: the vCPU read
    /// an invalid page. Returns the host physical address now backing it.
    pub fn read_fault(&self, ipa: u64) -> Result<u64, VsmError> {
        let page = page_align(ipa);
        let desc = self.page_desc(page);
        desc.lock.lock(LOCAL_HOLDER);
        let result = self.read_fault_locked(page);
        desc.release_and_drain(|req| self.run_request(page, req));
        result
    }

    fn read_fault_locked(&self, page: u64) -> Result<u64, VsmError> {
        let local = cluster::global().local_nodeid();

        if !matches!(self.s2.pte_for(page), PteState::Invalid) {
            if let Some(pa) = self.current_pa(page) {
                return Ok(pa);
            }
        }

        let manager = cluster::global().manager_of(page).ok_or(VsmError::NoManager)?;
        let target = if manager == local {
            self.owner_of(page).unwrap_or(local)
        } else {
            manager
        };
        if target == local {
            return Err(VsmError::NotMapped);
        }

        self.fetch_remote(page, target, false)?;

        self.current_pa(page).ok_or(VsmError::NotMapped)
    }

    /// Handle a stage-2 permission fault: the vCPU wrote a read-only or
    /// invalid page. Returns the host physical address now mapped read-write.
    pub fn write_fault(&self, ipa: u64) -> Result<u64, VsmError> {
        let page = page_align(ipa);
        let desc = self.page_desc(page);
        desc.lock.lock(LOCAL_HOLDER);
        let result = self.write_fault_locked(page);
        desc.release_and_drain(|req| self.run_request(page, req));
        result
    }

    fn write_fault_locked(&self, page: u64) -> Result<u64, VsmError> {
        let local = cluster::global().local_nodeid();

        if let PteState::ReadWrite = self.s2.pte_for(page) {
            return self.current_pa(page).ok_or(VsmError::NotMapped);
        }

        if let PteState::ReadOnly(copyset) = self.s2.pte_for(page) {
            if copyset != 0 {
                // owner with outstanding readers: invalidate them and upgrade in place
                self.invalidate_copyset(page, copyset);
                self.s2.clear_copyset(page);
                self.s2.set_permissions(page, Stage2Perms::RW).map_err(|_| VsmError::NotMapped)?;
                return self.current_pa(page).ok_or(VsmError::NotMapped);
            }
            // plain reader, not owner: drop the stale copy before fetching write access
            if let Some(pa) = self.current_pa(page) {
                let _ = self.s2.invalidate(page);
                self.free_page(pa);
            }
        }

        let manager = cluster::global().manager_of(page).ok_or(VsmError::NoManager)?;
        let target = if manager == local {
            self.owner_of(page).unwrap_or(local)
        } else {
            manager
        };
        if target == local {
            return Err(VsmError::NotMapped);
        }

        self.fetch_remote(page, target, true)?;

        let copyset = self.s2.copyset_members(page);
        self.invalidate_copyset(page, copyset);
        self.s2.clear_copyset(page);

        self.current_pa(page).ok_or(VsmError::NotMapped)
    }

    fn current_pa(&self, page: u64) -> Option<u64> {
        self.s2.translate(page).map(|(pa, _)| pa)
    }

    /// Ask `target` for this page and block until its reply arrives,
    /// installing the resulting mapping locally.
    fn fetch_remote(&self, page: u64, target: NodeId, write: bool) -> Result<(), VsmError> {
        let local = cluster::global().local_nodeid();
        let req = FetchReqMsg { ipa: page, req_nodeid: local.0, write };
        let payload = postcard::to_allocvec(&req).map_err(|_| VsmError::Transport)?;

        let raw = transport::send_and_wait_reply(
            target,
            MsgType::Fetch,
            &payload,
            MsgType::FetchReply,
            FETCH_TIMEOUT_SPINS,
        )?;
        let reply: FetchReplyMsg = postcard::from_bytes(&raw).map_err(|_| VsmError::Transport)?;

        let pa = self.alloc_page()?;
        if let Some(bytes) = &reply.page {
            unsafe {
                let dst = meshvisor_hal::memory::phys_to_virt(pa) as *mut u8;
                let n = bytes.len().min(PAGE_SIZE as usize);
                core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, n);
            }
        }

        self.s2
            .map_page(page, pa, if write { Stage2Perms::RW } else { Stage2Perms::RO })
            .map_err(|_| VsmError::NotMapped)?;
        if write {
            self.set_owner(page, local);
            self.s2.set_copyset(page, reply.copyset);
        }
        Ok(())
    }

    fn invalidate_copyset(&self, page: u64, copyset: u16) {
        if copyset == 0 {
            return;
        }
        let local = cluster::global().local_nodeid();
        let msg = InvalidateMsg { ipa: page, copyset, from_nodeid: local.0 };
        let Ok(payload) = postcard::to_allocvec(&msg) else { return };
        for bit in 0..16u32 {
            if copyset & (1 << bit) != 0 && bit != local.0 {
                let _ = transport::send(NodeId(bit), MsgType::Invalidate, &payload);
            }
        }
    }

    fn run_request(&self, page: u64, req: ServerRequest) {
        match req {
            ServerRequest::Fetch { req_nodeid, write } => self.serve_fetch_inner(req_nodeid, page, write),
            ServerRequest::Invalidate => self.serve_invalidate_inner(page),
        }
    }

    /// Network arrival of a fetch request: try to run it inline, and queue
    /// it behind `wqlock` instead if the page is currently held by a local
    /// fault. Never blocks.
    pub fn serve_fetch(&self, req_nodeid: NodeId, page: u64, write: bool) {
        let page = page_align(page);
        let desc = self.page_desc(page);
        if desc.lock.trylock(LOCAL_HOLDER) {
            self.run_request(page, ServerRequest::Fetch { req_nodeid, write });
            desc.release_and_drain(|req| self.run_request(page, req));
        } else if desc.enqueue(ServerRequest::Fetch { req_nodeid, write }) {
            desc.release_and_drain(|req| self.run_request(page, req));
        }
    }

    /// Network arrival of an invalidate request. Same trylock-or-enqueue
    /// discipline as [`Self::serve_fetch`].
    pub fn serve_invalidate(&self, page: u64) {
        let page = page_align(page);
        let desc = self.page_desc(page);
        if desc.lock.trylock(LOCAL_HOLDER) {
            self.run_request(page, ServerRequest::Invalidate);
            desc.release_and_drain(|req| self.run_request(page, req));
        } else if desc.enqueue(ServerRequest::Invalidate) {
            desc.release_and_drain(|req| self.run_request(page, req));
        }
    }

    /// Service a fetch request for a page this node currently owns, or
    /// forward it on if this node is only the manager. Assumes `lock` is
    /// already held by the caller.
    fn serve_fetch_inner(&self, req_nodeid: NodeId, page: u64, write: bool) {
        let local = cluster::global().local_nodeid();
        let manager = match cluster::global().manager_of(page) {
            Some(m) => m,
            None => return,
        };

        let have_ownership = matches!(self.s2.pte_for(page), PteState::ReadWrite)
            || matches!(self.s2.pte_for(page), PteState::ReadOnly(c) if c != 0);

        if have_ownership {
            let pa = match self.current_pa(page) {
                Some(pa) => pa,
                None => return,
            };
            let page_bytes = unsafe {
                let src = meshvisor_hal::memory::phys_to_virt(pa) as *const u8;
                core::slice::from_raw_parts(src, PAGE_SIZE as usize).to_vec()
            };

            let reply = if write {
                let copyset = self.s2.copyset_members(page);
                let _ = self.s2.invalidate(page);
                self.free_page(pa);
                if local == manager {
                    self.set_owner(page, req_nodeid);
                }
                FetchReplyMsg { ipa: page, copyset, write: true, page: Some(page_bytes) }
            } else {
                let _ = self.s2.set_permissions(page, Stage2Perms::RO);
                self.s2.add_to_copyset(page, req_nodeid);
                FetchReplyMsg { ipa: page, copyset: 0, write: false, page: Some(page_bytes) }
            };

            if let Ok(payload) = postcard::to_allocvec(&reply) {
                let _ = transport::send(req_nodeid, MsgType::FetchReply, &payload);
            }
        } else if local == manager {
            let owner = self.owner_of(page).unwrap_or(local);
            if owner == req_nodeid {
                return;
            }
            // Only a write transfers ownership here; a forwarded read
            // leaves the directory's owner entry untouched, since the
            // requester only gets a read-only copy.
            if write {
                self.set_owner(page, req_nodeid);
            }
            let fwd = FetchReqMsg { ipa: page, req_nodeid: req_nodeid.0, write };
            if let Ok(payload) = postcard::to_allocvec(&fwd) {
                let _ = transport::send(owner, MsgType::Fetch, &payload);
            }
        }
    }

    /// Drop our copy of `page` unless we turn out to already be the owner
    /// (a race the directory protocol allows). Assumes `lock` is already
    /// held by the caller.
    fn serve_invalidate_inner(&self, page: u64) {
        match self.s2.pte_for(page) {
            PteState::Invalid => {}
            PteState::ReadWrite => {}
            PteState::ReadOnly(c) if c != 0 => {}
            PteState::ReadOnly(_) => {
                if let Some(pa) = self.current_pa(page) {
                    let _ = self.s2.invalidate(page);
                    self.free_page(pa);
                }
            }
        }
    }
}

// SAFETY: all mutable state is behind `Mutex`/`Stage2`'s own locking.
unsafe impl<T: HalStage2Table + Send> Sync for VsmEngine<T> {}

/// The node-wide coherence engine instance, over the architecture's concrete
/// stage-2 table. Message handlers are free functions (the transport's
/// `Handler` type), so they reach this through a global rather than a
/// captured reference.
#[cfg(target_arch = "aarch64")]
pub type ConcreteVsm = VsmEngine<meshvisor_hal::ArchStage2Table>;

#[cfg(target_arch = "aarch64")]
static VSM: spin::Once<ConcreteVsm> = spin::Once::new();

#[cfg(target_arch = "aarch64")]
pub fn init_global(engine: ConcreteVsm) {
    VSM.call_once(|| engine);
}

#[cfg(target_arch = "aarch64")]
pub fn global() -> &'static ConcreteVsm {
    VSM.get().expect("vsm engine not initialized")
}

#[cfg(target_arch = "aarch64")]
pub fn handle_fetch(_src: NodeId, payload: &[u8]) {
    if let Ok(req) = postcard::from_bytes::<FetchReqMsg>(payload) {
        global().serve_fetch(NodeId(req.req_nodeid), req.ipa, req.write);
    }
}

#[cfg(target_arch = "aarch64")]
pub fn handle_invalidate(_src: NodeId, payload: &[u8]) {
    if let Ok(msg) = postcard::from_bytes::<InvalidateMsg>(payload) {
        global().serve_invalidate(msg.ipa);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, NodeConfig};

    struct FakeTable {
        mapped: BTreeMap<u64, (u64, Stage2Perms)>,
    }

    impl HalStage2Table for FakeTable {
        fn new() -> Result<Self, meshvisor_hal::stage2::Stage2Error> {
            Ok(Self { mapped: BTreeMap::new() })
        }
        fn phys_root(&self) -> u64 {
            0
        }
        fn map_page(&mut self, ipa: u64, pa: u64, perms: Stage2Perms) -> Result<(), meshvisor_hal::stage2::Stage2Error> {
            self.mapped.insert(ipa, (pa, perms));
            Ok(())
        }
        fn set_permissions(&mut self, ipa: u64, perms: Stage2Perms) -> Result<(), meshvisor_hal::stage2::Stage2Error> {
            let (pa, _) = self.mapped.get(&ipa).copied().ok_or(meshvisor_hal::stage2::Stage2Error::NotMapped)?;
            self.mapped.insert(ipa, (pa, perms));
            Ok(())
        }
        fn unmap(&mut self, ipa: u64) -> Result<(), meshvisor_hal::stage2::Stage2Error> {
            self.mapped.remove(&ipa);
            Ok(())
        }
        fn translate(&self, ipa: u64) -> Option<(u64, Stage2Perms)> {
            self.mapped.get(&ipa).copied()
        }
        fn invalidate_ipa(&self, _ipa: u64) {}
        fn invalidate_all(&self) {}
    }

    struct FakeAllocator { next: u64 }
    impl PhysicalAllocator for FakeAllocator {
        type Error = MemoryError;
        fn init(_regions: &[meshvisor_hal::memory::MemoryRegion]) -> Result<Self, Self::Error> {
            Ok(Self { next: 0x1000 })
        }
        fn allocate_pages(&mut self, count: usize) -> Result<u64, Self::Error> {
            let pa = self.next;
            self.next += (count as u64) * PAGE_SIZE;
            Ok(pa)
        }
        fn free_pages(&mut self, _addr: u64, _count: usize) -> Result<(), Self::Error> {
            Ok(())
        }
        fn total_memory(&self) -> usize { 0 }
        fn free_memory(&self) -> usize { 0 }
        fn used_memory(&self) -> usize { 0 }
    }

    fn setup(local: u32) {
        let cfg = ClusterConfig::from_nodes(&[
            NodeConfig { nodeid: NodeId(0), mac: [0; 6], vcpu_count: 1, mem_base: 0x4000_0000, mem_size: 0x1000_0000 },
        ]);
        cluster::init(NodeId(local), &cfg);
    }

    #[test]
    fn manager_owns_page_locally_after_set_local_owner() {
        setup(0);
        let engine: VsmEngine<FakeTable> = VsmEngine::new(Box::new(FakeAllocator { next: 0x1000 })).unwrap();
        engine.set_local_owner(0x4000_1000);
        assert_eq!(engine.owner_of(0x4000_1000), Some(NodeId(0)));
    }

    #[test]
    fn page_align_masks_offset() {
        assert_eq!(page_align(0x4000_1234), 0x4000_1000);
    }

    #[test]
    fn page_lock_trylock_is_exclusive_until_released() {
        let lock = PageLock::new();
        assert!(lock.trylock(1));
        assert!(!lock.trylock(2));
        lock.unlock_and_wqunlock();
        assert!(lock.trylock(2));
    }

    #[test]
    fn wqlock_reports_whether_the_page_lock_was_already_free() {
        let lock = PageLock::new();
        assert!(lock.trylock(1));
        assert!(!lock.wqlock()); // lock still held
        lock.wqunlock();
        lock.unlock_and_wqunlock();
        assert!(lock.wqlock()); // lock free this time
    }

    #[test]
    fn network_fetch_is_queued_while_the_page_lock_is_held() {
        setup(0);
        let engine: VsmEngine<FakeTable> = VsmEngine::new(Box::new(FakeAllocator { next: 0x1000 })).unwrap();
        let page = 0x4000_1000;
        engine.set_local_owner(page);

        let desc = engine.page_desc(page);
        assert!(desc.lock.trylock(2)); // simulate a local fault holding the page

        engine.serve_fetch(NodeId(0), page, false);
        assert_eq!(desc.queued_len(), 1);

        desc.release_and_drain(|req| engine.run_request(page, req));
        assert_eq!(desc.queued_len(), 0);
    }

    #[test]
    fn forwarded_read_does_not_transfer_ownership_but_forwarded_write_does() {
        setup(0);
        let engine: VsmEngine<FakeTable> = VsmEngine::new(Box::new(FakeAllocator { next: 0x1000 })).unwrap();
        let page = 0x4000_1000;
        // Local node is the manager but some other node owns the page.
        engine.set_owner(page, NodeId(1));

        engine.serve_fetch(NodeId(2), page, false);
        assert_eq!(engine.owner_of(page), Some(NodeId(1)));

        engine.serve_fetch(NodeId(2), page, true);
        assert_eq!(engine.owner_of(page), Some(NodeId(2)));
    }
}
