//! The MinnowOS virtual-memory subsystem.
//!
//! Gives each process a sparse virtual address space backed lazily by
//! executable images, anonymous storage, or memory-mapped files, and
//! reclaims physical frames under pressure by evicting pages to swap or
//! writing them back to their backing file.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
pub mod mem;
pub mod sync;
pub mod vfs;
