// =============================================================================
// MinimalOS NextGen — Physical Memory Manager (Freelist Frame Allocator)
// =============================================================================
//
// The PMM tracks free physical page frames (4 KiB each) using an intrusive
// freelist: every free frame's first 8 bytes (read through its HHDM image)
// hold the HHDM virtual address of the next free frame. The head of the
// list is the only bookkeeping we keep outside the frames themselves.
//
// WHY A FREELIST INSTEAD OF A BITMAP?
//   A bitmap needs O(frames / 64) memory and scans to find a free bit.
//   An intrusive freelist needs zero separate storage — the free frames
//   store their own linkage — and alloc/free are both O(1): pop/push the
//   head pointer. The tradeoff is that we can't do a cheap "is this frame
//   free?" query or contiguous-run allocation; this kernel doesn't need
//   either for the PMM layer (contiguous physical runs, where needed, are
//   built page-by-page higher up in KALLOC's heap_alloc_pages).
//
// INITIALIZATION:
//   For every USABLE entry in the Limine memory map, page-align the region
//   inward (base up, end down) and push each page onto the freelist in
//   order. Because we push sequentially and pop from the head, the first
//   allocations come from the end of the first usable region walked — the
//   exact order doesn't matter since nothing depends on frame adjacency.
//
// THREAD SAFETY:
//   The global PMM state is protected by a SpinLock. All public functions
//   acquire the lock before touching the freelist.
//
// =============================================================================

use core::ptr;

use crate::kprintln;
use crate::memory::address::{PhysAddr, VirtAddr, PAGE_SIZE};
use crate::sync::spinlock::SpinLock;

// =============================================================================
// Public types
// =============================================================================

/// Snapshot of physical memory usage statistics.
///
/// Returned by `stats()` for boot-time reporting and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    /// Total number of physical frames ever added to the freelist.
    pub total_pages: usize,

    /// Number of frames currently sitting on the freelist.
    pub free_pages: usize,
}

// =============================================================================
// Global PMM state
// =============================================================================

/// The global physical memory manager, protected by a ticket spinlock.
///
/// `None` before `init()` is called. All public functions panic if the
/// PMM is not yet initialized.
static PMM: SpinLock<Option<FreeListAllocator>> = SpinLock::new(None);

// =============================================================================
// Freelist internals
// =============================================================================

/// An intrusive node occupying the first 8 bytes of a free page.
///
/// We never construct this as an owned value — we only ever write/read
/// through a raw pointer into the page's HHDM image.
#[repr(C)]
struct FreePage {
    next: *mut FreePage,
}

/// The freelist-based physical frame allocator.
///
/// All bookkeeping besides the two counters lives inside the free pages
/// themselves via `FreePage::next`. Not exposed publicly — all access
/// goes through the module-level functions which hold the spinlock.
struct FreeListAllocator {
    /// Head of the freelist, or null if exhausted. Always an HHDM address.
    head: *mut FreePage,

    /// Total number of frames ever pushed onto the freelist (never
    /// decremented — a lifetime capacity counter, not a live count).
    total_pages: usize,

    /// Number of frames currently on the freelist.
    free_pages: usize,
}

// SAFETY: The freelist pointers are only dereferenced while holding the
// PMM spinlock. No other code walks the list concurrently.
unsafe impl Send for FreeListAllocator {}

impl FreeListAllocator {
    /// Creates an empty allocator with no frames registered yet.
    const fn empty() -> Self {
        Self {
            head: ptr::null_mut(),
            total_pages: 0,
            free_pages: 0,
        }
    }

    /// Pushes every page-aligned frame within `[base, base + length)` onto
    /// the freelist.
    ///
    /// `base` is rounded up and `base + length` is rounded down to the
    /// nearest page boundary — a region smaller than one page after
    /// rounding contributes nothing.
    fn add_region(&mut self, base: u64, length: u64) {
        let start = (base + (PAGE_SIZE - 1)) & !(PAGE_SIZE - 1);
        let end = (base + length) & !(PAGE_SIZE - 1);
        if end <= start {
            return;
        }

        let mut phys = start;
        while phys < end {
            let virt = PhysAddr::new(phys).to_virt();
            // SAFETY: `phys` is within a USABLE region reported by Limine
            // and is page-aligned; its HHDM image is valid, writable
            // memory we have exclusive access to during single-core boot.
            unsafe {
                let node = virt.as_mut_ptr::<FreePage>();
                (*node).next = self.head;
                self.head = node;
            }
            self.total_pages += 1;
            self.free_pages += 1;
            phys += PAGE_SIZE;
        }
    }

    /// Pops a frame off the freelist.
    ///
    /// # Returns
    /// `Some(VirtAddr)` — the HHDM virtual address of the frame.
    /// `None` — the freelist is empty (out of memory).
    fn alloc(&mut self) -> Option<VirtAddr> {
        if self.head.is_null() {
            kprintln!("[pmm] Out of memory!");
            return None;
        }

        // SAFETY: `head` points at a frame we previously pushed; its first
        // 8 bytes hold a valid `next` pointer (or null).
        let virt = unsafe {
            let node = self.head;
            self.head = (*node).next;
            VirtAddr::new(node as u64)
        };

        self.free_pages -= 1;
        Some(virt)
    }

    /// Pushes a previously allocated frame back onto the freelist.
    ///
    /// `virt` must be the exact HHDM address returned by a prior `alloc()`.
    fn free(&mut self, virt: VirtAddr) {
        // SAFETY: caller guarantees `virt` is a frame this allocator handed
        // out and is not currently referenced elsewhere.
        unsafe {
            let node = virt.as_mut_ptr::<FreePage>();
            (*node).next = self.head;
            self.head = node;
        }
        self.free_pages += 1;
    }

    fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_pages: self.total_pages,
            free_pages: self.free_pages,
        }
    }
}

// =============================================================================
// Public API — module-level functions that acquire the spinlock
// =============================================================================

/// Initializes the physical memory manager from the Limine memory map.
///
/// Walks every `USABLE` entry and pushes its pages onto the freelist.
/// Must be called exactly once during early boot, after
/// `address::init_hhdm()` and before any allocation.
///
/// # Panics
/// If called more than once.
pub fn init(memory_map: &[&limine::memory_map::Entry]) {
    let mut slot = PMM.lock();
    assert!(slot.is_none(), "PMM: init called more than once");

    let mut allocator = FreeListAllocator::empty();
    for entry in memory_map {
        if entry.entry_type == limine::memory_map::EntryType::USABLE {
            allocator.add_region(entry.base, entry.length);
        }
    }

    kprintln!(
        "[pmm] {} pages free ({} MiB)",
        allocator.free_pages,
        allocator.free_pages as u64 * PAGE_SIZE / 1024 / 1024
    );

    *slot = Some(allocator);
}

/// Allocates a single 4 KiB physical frame.
///
/// Returns the frame's HHDM virtual address — this is the direct Rust
/// analogue of the original `pmm_alloc()`, which hands back a pointer the
/// caller can dereference immediately without a separate phys-to-virt step.
///
/// # Returns
/// `Some(VirtAddr)` on success, `None` if out of memory.
///
/// # Panics
/// If the PMM is not initialized.
pub fn alloc() -> Option<VirtAddr> {
    PMM.lock()
        .as_mut()
        .expect("PMM: not initialized — call pmm::init() first")
        .alloc()
}

/// Frees a previously allocated physical frame.
///
/// A `None` address is a no-op, matching the original `pmm_free(NULL)`
/// behavior. There is no double-free detection — the freelist design has
/// no spare bit to record "in use" separately from the linkage itself.
///
/// # Panics
/// If the PMM is not initialized.
pub fn free(virt: Option<VirtAddr>) {
    let Some(virt) = virt else { return };
    PMM.lock()
        .as_mut()
        .expect("PMM: not initialized — call pmm::init() first")
        .free(virt);
}

/// Allocates a single 4 KiB physical frame, returning its physical address.
///
/// Convenience wrapper over `alloc()` for callers (chiefly the VMM) that
/// need a `PhysAddr` to install into a page table entry rather than an
/// HHDM pointer to write through directly.
///
/// # Returns
/// `Some(PhysAddr)` on success, `None` if out of memory.
pub fn alloc_frame_zeroed() -> Option<PhysAddr> {
    let virt = alloc()?;
    // SAFETY: `virt` is a freshly allocated frame's HHDM address; writing
    // a full page of zeros to it is always valid.
    unsafe {
        ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, PAGE_SIZE as usize);
    }
    Some(virt.to_phys_hhdm())
}

/// Frees a frame previously obtained from `alloc_frame_zeroed()`.
pub fn free_frame(phys: PhysAddr) {
    free(Some(phys.to_virt()));
}

/// Returns a snapshot of current physical memory statistics.
///
/// # Panics
/// If the PMM is not initialized.
pub fn stats() -> MemoryStats {
    PMM.lock()
        .as_ref()
        .expect("PMM: not initialized — call pmm::init() first")
        .stats()
}

#[cfg(test)]
mod tests {
    //! These tests exercise the freelist bookkeeping in isolation, backed
    //! by a plain heap-allocated arena standing in for physical RAM (the
    //! HHDM offset is simply 0 in this configuration, so "physical" and
    //! "virtual" addresses coincide).
    use super::*;

    fn with_arena(pages: usize, f: impl FnOnce(&mut FreeListAllocator, u64)) {
        let mut arena = vec![0u8; pages * PAGE_SIZE as usize];
        let base = arena.as_mut_ptr() as u64;
        unsafe { crate::memory::address::init_hhdm(0) };
        let mut allocator = FreeListAllocator::empty();
        allocator.add_region(base, (pages as u64) * PAGE_SIZE);
        f(&mut allocator, base);
    }

    #[test]
    fn add_region_counts_every_page() {
        with_arena(4, |allocator, _base| {
            assert_eq!(allocator.total_pages, 4);
            assert_eq!(allocator.free_pages, 4);
        });
    }

    #[test]
    fn alloc_then_free_restores_count() {
        with_arena(2, |allocator, _base| {
            let a = allocator.alloc().unwrap();
            assert_eq!(allocator.free_pages, 1);
            allocator.free(a);
            assert_eq!(allocator.free_pages, 2);
        });
    }

    #[test]
    fn freelist_is_lifo() {
        with_arena(3, |allocator, _base| {
            let a = allocator.alloc().unwrap();
            let b = allocator.alloc().unwrap();
            allocator.free(b);
            allocator.free(a);
            // Most recently freed (`a`) must come back first.
            let reused = allocator.alloc().unwrap();
            assert_eq!(reused.as_u64(), a.as_u64());
        });
    }

    #[test]
    fn exhaustion_returns_none() {
        with_arena(1, |allocator, _base| {
            assert!(allocator.alloc().is_some());
            assert!(allocator.alloc().is_none());
        });
    }
}
