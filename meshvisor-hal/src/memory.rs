//! Memory management abstraction layer

use bitflags::bitflags;

/// Physical address type
pub type PhysicalAddress = u64;

/// Virtual address type
pub type VirtualAddress = u64;

/// Page size type
pub type PageSize = usize;

/// Translate a host physical address to the hypervisor's own virtual
/// address for it. EL2 runs with a flat identity map of all hypervisor
/// memory, so this is the identity function; it exists as a named
/// crossing point so callers don't bake that assumption in directly.
#[inline]
pub const fn phys_to_virt(pa: PhysicalAddress) -> usize {
    pa as usize
}

/// Memory management trait for different architectures
pub trait MemoryManager {
    /// Memory manager specific error type
    type Error;
    
    /// Initialize the memory manager
    fn init() -> Result<Self, Self::Error> where Self: Sized;
    
    /// Allocate physical memory
    fn allocate_physical(&mut self, size: usize, alignment: usize) -> Result<PhysicalAddress, Self::Error>;
    
    /// Free physical memory
    fn free_physical(&mut self, addr: PhysicalAddress, size: usize) -> Result<(), Self::Error>;
    
    /// Map virtual to physical address
    fn map_virtual(&mut self, virt: VirtualAddress, phys: PhysicalAddress, flags: MemoryFlags) -> Result<(), Self::Error>;
    
    /// Unmap virtual address
    fn unmap_virtual(&mut self, virt: VirtualAddress) -> Result<(), Self::Error>;
    
    /// Translate virtual to physical address
    fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress>;
    
    /// Get page size for the architecture
    fn page_size(&self) -> PageSize;
    
    /// Flush TLB for specific address
    fn flush_tlb_address(&self, addr: VirtualAddress);
    
    /// Flush entire TLB
    fn flush_tlb_all(&self);
    
    /// Check if address is valid
    fn is_valid_address(&self, addr: VirtualAddress) -> bool;
}

bitflags! {
    /// Memory mapping flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryFlags: u64 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const EXECUTABLE = 1 << 2;
        const USER_ACCESSIBLE = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const WRITE_THROUGH = 1 << 5;
        const GLOBAL = 1 << 6;
        const NO_EXECUTE = 1 << 7;
        const ENCRYPTED = 1 << 8;
        const LARGE_PAGE = 1 << 9;
    }
}

/// Memory region descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: PhysicalAddress,
    pub size: usize,
    pub region_type: MemoryType,
    pub flags: MemoryFlags,
}

/// Memory region types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Available,
    Reserved,
    Bootloader,
    Kernel,
    Hypervisor,
}

/// Physical memory allocator trait
pub trait PhysicalAllocator {
    type Error;
    
    /// Initialize the allocator with available memory regions
    fn init(regions: &[MemoryRegion]) -> Result<Self, Self::Error> where Self: Sized;
    
    /// Allocate contiguous physical pages
    fn allocate_pages(&mut self, count: usize) -> Result<PhysicalAddress, Self::Error>;
    
    /// Free physical pages
    fn free_pages(&mut self, addr: PhysicalAddress, count: usize) -> Result<(), Self::Error>;
    
    /// Get total available memory
    fn total_memory(&self) -> usize;
    
    /// Get free memory
    fn free_memory(&self) -> usize;
    
    /// Get used memory
    fn used_memory(&self) -> usize;
}

/// Memory allocation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    OutOfMemory,
    InvalidAlignment,
    InvalidSize,
}

/// Allocate aligned memory for hypervisor use
pub fn allocate_aligned(size: usize, align: usize) -> Result<*mut u8, MemoryError> {
    // For now, use a simple static allocation approach
    // In a real implementation, this would use a proper allocator
    static mut HEAP: [u8; 1024 * 1024] = [0; 1024 * 1024]; // 1MB heap
    static mut HEAP_OFFSET: usize = 0;
    
    unsafe {
        // Align the current offset
        let aligned_offset = (HEAP_OFFSET + align - 1) & !(align - 1);
        
        if aligned_offset + size > HEAP.len() {
            return Err(MemoryError::OutOfMemory);
        }
        
        let ptr = HEAP.as_mut_ptr().add(aligned_offset);
        HEAP_OFFSET = aligned_offset + size;
        
        // Zero the allocated memory
        core::ptr::write_bytes(ptr, 0, size);
        
        Ok(ptr)
    }
}