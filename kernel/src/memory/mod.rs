// =============================================================================
// MinimalOS NextGen — Memory Subsystem
// =============================================================================
//
// The memory subsystem manages all physical and virtual memory in the kernel.
// It's organized into layers, leaves first:
//
//   address.rs — PhysAddr/VirtAddr newtypes (type safety for addresses)
//   pmm.rs     — Physical Memory Manager (intrusive freelist over HHDM)
//   vmm.rs     — Virtual Memory Manager (4-level page table operations)
//   kalloc.rs  — Kernel heap allocator (SLAB caches + large-object path)
//
// This module only exposes what's needed. Internal details stay private.
// =============================================================================

pub mod address;
pub mod kalloc;
pub mod pmm;
pub mod vmm;

