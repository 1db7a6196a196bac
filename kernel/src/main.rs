// =============================================================================
// MinimalOS NextGen — Kernel Entry Point
// =============================================================================
//
// `_start` is the very first Rust code to run after Limine hands off
// control. It brings the memory core up in strict dependency order:
//
//   1. Serial (no init needed — works the instant I/O ports are usable)
//   2. address::init_hhdm — latch the HHDM offset Limine gave us
//   3. pmm::init          — build the physical freelist from the memory map
//   4. vmm::init          — print-only; the bootloader's PML4 is already live
//   5. kalloc::init       — construct the ten SLAB caches
//
// Nothing after step 5 may allocate before it returns. Once `_start` falls
// through to the idle loop, the rest of the kernel (not part of this core)
// is expected to take over.
//
// `#![cfg_attr(not(test), no_std)]`/`no_main` let `cargo test` build and
// run the `#[cfg(test)]` modules scattered through `memory/` against the
// host's standard library — `_start`, the panic handler, and the global
// allocator only exist in the real `no_std` build.
// =============================================================================

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![feature(alloc_error_handler)]

extern crate alloc;

mod arch;
mod memory;
mod sync;
mod util;

use arch::{boot, cpu};
use memory::{address, kalloc, pmm, vmm};

/// Kernel entry point called by the Limine bootloader.
///
/// # Safety
/// Must be invoked exactly once, by the bootloader, before any other code
/// runs. Relies on Limine having already set up long mode, the HHDM, and
/// the initial PML4 referenced by CR3.
#[cfg(not(test))]
#[unsafe(no_mangle)]
unsafe extern "C" fn _start() -> ! {
    boot::verify_base_revision();

    // SAFETY: called exactly once, before any PhysAddr::to_virt()/
    // VirtAddr::to_phys_hhdm() call and before any other core could race us.
    unsafe {
        address::init_hhdm(boot::get_hhdm_offset());
    }

    pmm::init(boot::get_memory_map());
    vmm::init();
    kalloc::init();

    let (kernel_phys, kernel_virt) = boot::get_kernel_address();
    kprintln!(
        "[boot] kernel image: phys={:#018X} virt={:#018X}",
        kernel_phys,
        kernel_virt
    );
    kprintln!("[boot] memory core initialized");

    #[cfg(feature = "selftest")]
    selftest::run();

    loop {
        cpu::halt();
    }
}

#[cfg(feature = "selftest")]
mod selftest;
