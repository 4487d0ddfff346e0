//! The UEFI pool allocator as the global allocator of the boot manager binary.
//!
//! Enabled with the `global_allocator` feature, so that host builds keep the system allocator.

#![cfg(feature = "global_allocator")]

/// Every heap allocation of the boot manager comes from boot services pool memory.
#[global_allocator]
static ALLOCATOR: uefi::allocator::Allocator = uefi::allocator::Allocator;
