//! Physical page allocator and kernel heap.
//!
//! Two things live here and they are not the same allocator:
//!
//! - [`heap`] backs `alloc` (`Vec`, `BTreeMap`, ...) with a small byte-
//!   granular arena, the way the teacher's `memory::init` wires up
//!   `linked_list_allocator` over a linker-reserved range.
//! - [`PageAllocator`] is the subject of this crate: it parcels out
//!   page-aligned blocks from one contiguous managed region, with
//!   metadata kept in-band at the front of that region. It never goes
//!   through `alloc`.

#[cfg(feature = "buddy-allocator")]
mod buddy;
#[cfg(feature = "simple-allocator")]
mod simple;

use spin::Mutex;

pub const PAGE_SIZE: usize = 4096;

#[cfg(feature = "buddy-allocator")]
pub use buddy::BuddyAllocator as PageAllocatorImpl;
#[cfg(feature = "simple-allocator")]
pub use simple::SimpleAllocator as PageAllocatorImpl;

/// Shared contract both allocator strategies implement. See spec §4.1.
pub trait PageAllocator {
    /// Page-aligns `[start, start + size)` inward, reserves whatever
    /// whole pages its metadata needs at the front, and marks the rest
    /// free. A second call fully reinitializes state.
    fn create(&mut self, start: usize, size: usize);

    /// Rounds `size` up to whole pages and returns the base of a
    /// contiguous free run, or `None` if `size == 0`, the allocator is
    /// uninitialized, or no run fits.
    fn alloc(&mut self, size: usize) -> Option<usize>;

    /// Releases the block whose head is `address`. A silent no-op for
    /// null, unaligned, out-of-range, non-head, or already-free
    /// addresses.
    fn free(&mut self, address: usize);

    fn stats(&self) -> AllocatorStats;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllocatorStats {
    pub initialized: bool,
    pub total_pages: usize,
    pub free_pages: usize,
    pub base: usize,
    pub end: usize,
}

pub const STATUS_MAX_LEN: usize = 160;

/// Renders `consultMemory`'s status string into `buf`, returning the
/// number of bytes written (NUL-terminated, `<= STATUS_MAX_LEN`).
pub fn format_status(stats: &AllocatorStats, buf: &mut [u8; STATUS_MAX_LEN]) -> usize {
    use core::fmt::Write;

    struct Cursor<'a> {
        buf: &'a mut [u8],
        len: usize,
    }
    impl<'a> Write for Cursor<'a> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let bytes = s.as_bytes();
            if self.len + bytes.len() >= self.buf.len() {
                return Err(core::fmt::Error);
            }
            self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
            Ok(())
        }
    }

    let mut cursor = Cursor { buf, len: 0 };
    if stats.initialized {
        let _ = write!(
            cursor,
            "total={} free={} base={:#x} end={:#x}",
            stats.total_pages, stats.free_pages, stats.base, stats.end
        );
    } else {
        let _ = write!(cursor, "manager=uninitialized");
    }
    let len = cursor.len;
    buf[len] = 0;
    len
}

lazy_static::lazy_static! {
    static ref PAGE_ALLOCATOR: Mutex<PageAllocatorImpl> = Mutex::new(PageAllocatorImpl::new());
}

pub fn create_memory(start: usize, size: usize) {
    PAGE_ALLOCATOR.lock().create(start, size);
}

pub fn alloc_memory(size: usize) -> Option<usize> {
    PAGE_ALLOCATOR.lock().alloc(size)
}

pub fn free_memory(address: usize) {
    PAGE_ALLOCATOR.lock().free(address);
}

pub fn consult_memory(buf: &mut [u8; STATUS_MAX_LEN]) -> usize {
    let stats = PAGE_ALLOCATOR.lock().stats();
    format_status(&stats, buf)
}

pub fn stats() -> AllocatorStats {
    PAGE_ALLOCATOR.lock().stats()
}

/// Default stack size handed to a process whose `createProcess` call did
/// not request one explicitly.
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

pub mod heap {
    use linked_list_allocator::LockedHeap;

    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    const HEAP_SIZE: usize = 256 * 1024;

    #[repr(align(4096))]
    struct HeapArena([u8; HEAP_SIZE]);
    static mut HEAP_ARENA: HeapArena = HeapArena([0; HEAP_SIZE]);

    /// Initializes the allocator backing `alloc::*` for kernel-internal
    /// bookkeeping. Distinct from [`super::PageAllocator`], which manages
    /// physical pages handed to processes.
    pub fn init() {
        unsafe {
            let start = core::ptr::addr_of_mut!(HEAP_ARENA) as *mut u8;
            ALLOCATOR.lock().init(start, HEAP_SIZE);
        }
    }
}
