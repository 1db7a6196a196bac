// =============================================================================
// MinimalOS NextGen — Memory Core Self-Tests
// =============================================================================
//
// A boot-time exercise of the PMM/VMM/KALLOC contracts (spec.md §8),
// running against the live, booted kernel rather than a host-side test
// double. Gated behind the `selftest` feature so a normal boot doesn't pay
// for it — enable with `cargo build --features selftest` for a QEMU run
// that self-checks before idling.
//
// Every assertion failure panics (halting the hart) rather than returning
// a pass/fail code — there is no test harness to report back to once the
// kernel is the only thing running.
// =============================================================================

use crate::kprintln;
use crate::memory::address::VirtAddr;
use crate::memory::vmm::PageTableFlags;
use crate::memory::{kalloc, pmm, vmm};

/// Runs every self-test in sequence. Called once from `_start`, after
/// `kalloc::init()` and before the idle loop.
pub fn run() {
    kprintln!("[selftest] running memory core self-tests");
    pmm_lifo_reuse();
    vmm_round_trip();
    cache_dispatch_and_reuse();
    read_back_full_size();
    krealloc_preserves_prefix();
    large_allocation_round_trip();
    kfree_null_is_noop();
    kprintln!("[selftest] all self-tests passed");
}

/// Property 2 (spec.md §8): freeing a page and immediately re-allocating
/// returns the same address (LIFO freelist).
fn pmm_lifo_reuse() {
    let a = pmm::alloc().expect("selftest: pmm::alloc() #1 unexpectedly out of memory");
    pmm::free(Some(a));
    let b = pmm::alloc().expect("selftest: pmm::alloc() #2 unexpectedly out of memory");
    assert_eq!(a, b, "selftest: PMM did not reuse the most recently freed page");
    pmm::free(Some(b));
    kprintln!("[selftest] PMM LIFO reuse: OK");
}

/// Property 3: a mapped page translates to the installed physical address;
/// after unmapping, it's no longer translatable, and a second unmap fails
/// without side effects.
fn vmm_round_trip() {
    // Scratch address far above anything KALLOC's bump cursor has reached,
    // so this test can't collide with a real heap allocation.
    let vaddr = VirtAddr::new(crate::memory::address::HEAP_START + 0x1000_0000);

    let phys = pmm::alloc_frame_zeroed().expect("selftest: out of memory allocating VMM test frame");
    vmm::map(vaddr, phys, PageTableFlags::WRITABLE).expect("selftest: vmm::map failed");

    let translated = vmm::translate_current(vaddr).expect("selftest: freshly mapped page did not translate");
    assert_eq!(translated, phys, "selftest: VMM round-trip returned the wrong physical address");

    vmm::unmap(vaddr).expect("selftest: vmm::unmap failed on a present mapping");
    assert!(
        vmm::translate_current(vaddr).is_none(),
        "selftest: page still translates after unmap"
    );
    assert!(
        vmm::unmap(vaddr).is_err(),
        "selftest: unmapping an already-unmapped page should fail"
    );

    pmm::free_frame(phys);
    kprintln!("[selftest] VMM round-trip: OK");
}

/// Scenario S2 (spec.md §8): two 16-byte objects land 16 bytes apart in the
/// same slab, and freeing one makes it the next allocation from that cache.
fn cache_dispatch_and_reuse() {
    let p1 = kalloc::kmalloc(10).expect("selftest: kmalloc(10) failed");
    let p2 = kalloc::kmalloc(16).expect("selftest: kmalloc(16) failed");
    assert_ne!(p1, p2, "selftest: two live allocations returned the same address");

    let stride = if p1.as_u64() > p2.as_u64() { p1 - p2 } else { p2 - p1 };
    assert_eq!(stride, 16, "selftest: adjacent 16-byte cache objects should be 16 bytes apart");

    kalloc::kfree(Some(p1));
    let p3 = kalloc::kmalloc(16).expect("selftest: kmalloc(16) reuse failed");
    assert_eq!(p3, p1, "selftest: freed object was not reused LIFO");

    kalloc::kfree(Some(p2));
    kalloc::kfree(Some(p3));
    kprintln!("[selftest] cache dispatch + LIFO reuse: OK");
}

/// Property 7: a freshly allocated region supports a full write/read-back
/// over its entire effective size (16 bytes for a 10-byte request).
fn read_back_full_size() {
    let vaddr = kalloc::kmalloc(10).expect("selftest: kmalloc(10) for read-back failed");
    // SAFETY: the 16-byte cache backing a 10-byte request guarantees at
    // least 16 writable bytes at `vaddr`.
    unsafe {
        let bytes = vaddr.as_mut_ptr::<u8>();
        for i in 0..16u8 {
            *bytes.add(i as usize) = i;
        }
        for i in 0..16u8 {
            assert_eq!(*bytes.add(i as usize), i, "selftest: read-back mismatch at offset {}", i);
        }
    }
    kalloc::kfree(Some(vaddr));
    kprintln!("[selftest] full-size read-back: OK");
}

/// Property 8: growing an allocation with `krealloc` preserves the
/// original bytes in the returned region's prefix.
fn krealloc_preserves_prefix() {
    let original = kalloc::kmalloc(16).expect("selftest: kmalloc(16) for krealloc failed");
    // SAFETY: freshly allocated 16-byte object.
    unsafe {
        let bytes = original.as_mut_ptr::<u8>();
        for i in 0..16u8 {
            *bytes.add(i as usize) = i + 1;
        }
    }

    let grown = kalloc::krealloc(Some(original), 64).expect("selftest: krealloc to 64 bytes failed");
    // SAFETY: `grown` is at least 64 bytes, so reading the first 16 is sound.
    unsafe {
        let bytes = grown.as_ptr::<u8>();
        for i in 0..16u8 {
            assert_eq!(*bytes.add(i as usize), i + 1, "selftest: krealloc lost byte at offset {}", i);
        }
    }

    kalloc::kfree(Some(grown));
    kprintln!("[selftest] krealloc prefix preservation: OK");
}

/// Scenario S4 (spec.md §8): an 8192-byte allocation spans two pages, both
/// of which translate while live and neither of which translates after
/// `kfree`.
fn large_allocation_round_trip() {
    let vaddr = kalloc::kmalloc(8192).expect("selftest: kmalloc(8192) failed");

    assert!(
        vmm::translate_current(vaddr).is_some(),
        "selftest: large allocation page 0 is not mapped"
    );
    assert!(
        vmm::translate_current(vaddr + 4096).is_some(),
        "selftest: large allocation page 1 is not mapped"
    );

    kalloc::kfree(Some(vaddr));

    assert!(
        vmm::translate_current(vaddr).is_none(),
        "selftest: large allocation page 0 still mapped after kfree"
    );
    assert!(
        vmm::translate_current(vaddr + 4096).is_none(),
        "selftest: large allocation page 1 still mapped after kfree"
    );
    kprintln!("[selftest] large allocation round-trip: OK");
}

/// Scenario S5: `kfree(None)` is a no-op.
fn kfree_null_is_noop() {
    kalloc::kfree(None);
    kprintln!("[selftest] kfree(None) no-op: OK");
}
