// https://wiki.osdev.org/Paging
//
// The VM layer drives per-process mappings through PageManager, which
// models one entry per mapped user page. Only the fields the kernel
// inspects are represented; the MMU (or, under test, the user-copy path)
// is what sets the accessed and dirty bits.

#![allow(clippy::cast_possible_truncation)]

use crate::mem::{is_page_aligned, page_round_down};
use alloc::collections::BTreeMap;
use arbitrary_int::u20;
use bitbybit::bitfield;

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

/// Per-process virtual→physical mapping table.
///
/// Keys are page-aligned user virtual addresses; values hold the frame
/// number and the hardware-maintained flag bits.
#[derive(Default)]
pub struct PageManager {
    entries: BTreeMap<usize, PageTableEntry>,
}

impl PageManager {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Install a mapping from `va` to frame number `frame`.
    ///
    /// Panics if `va` is already mapped: the claim protocol never
    /// installs over a live entry, so a collision is a kernel bug.
    pub fn map(&mut self, va: usize, frame: usize, writable: bool) {
        assert!(is_page_aligned(va), "mapping unaligned address {va:#x}");
        assert!(frame < 1 << 20, "frame number {frame} out of range");
        let entry = PageTableEntry::DEFAULT
            .with_present(true)
            .with_read_write(writable)
            .with_user_supervisor(true)
            .with_page_frame_address(u20::new(frame as u32));
        let old = self.entries.insert(va, entry);
        assert!(old.is_none(), "address {va:#x} is already mapped");
    }

    /// Remove the mapping for `va`, if any.
    pub fn unmap(&mut self, va: usize) {
        self.entries.remove(&page_round_down(va));
    }

    /// Frame number that `va` is mapped to, or `None`.
    pub fn mapping(&self, va: usize) -> Option<usize> {
        self.entries
            .get(&page_round_down(va))
            .map(|entry| entry.page_frame_address().value() as usize)
    }

    pub fn is_mapped(&self, va: usize) -> bool {
        self.entries.contains_key(&page_round_down(va))
    }

    pub fn is_writable(&self, va: usize) -> bool {
        self.entries
            .get(&page_round_down(va))
            .is_some_and(|entry| entry.read_write())
    }

    pub fn is_accessed(&self, va: usize) -> bool {
        self.entries
            .get(&page_round_down(va))
            .is_some_and(|entry| entry.accessed())
    }

    pub fn set_accessed(&mut self, va: usize) {
        if let Some(entry) = self.entries.get_mut(&page_round_down(va)) {
            *entry = entry.with_accessed(true);
        }
    }

    pub fn clear_accessed(&mut self, va: usize) {
        if let Some(entry) = self.entries.get_mut(&page_round_down(va)) {
            *entry = entry.with_accessed(false);
        }
    }

    pub fn is_dirty(&self, va: usize) -> bool {
        self.entries
            .get(&page_round_down(va))
            .is_some_and(|entry| entry.dirty())
    }

    pub fn set_dirty(&mut self, va: usize) {
        if let Some(entry) = self.entries.get_mut(&page_round_down(va)) {
            *entry = entry.with_dirty(true);
        }
    }

    pub fn clear_dirty(&mut self, va: usize) {
        if let Some(entry) = self.entries.get_mut(&page_round_down(va)) {
            *entry = entry.with_dirty(false);
        }
    }

    pub fn mapped_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::PAGE_FRAME_SIZE;

    #[test]
    fn map_and_unmap() {
        let mut pm = PageManager::new();
        assert!(!pm.is_mapped(0x8000));
        pm.map(0x8000, 3, true);
        assert_eq!(pm.mapping(0x8000), Some(3));
        assert_eq!(pm.mapping(0x8000 + PAGE_FRAME_SIZE - 1), Some(3));
        assert!(pm.is_writable(0x8000));
        pm.unmap(0x8000);
        assert!(!pm.is_mapped(0x8000));
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn double_map_panics() {
        let mut pm = PageManager::new();
        pm.map(0x8000, 1, false);
        pm.map(0x8000, 2, false);
    }

    #[test]
    fn hardware_bits() {
        let mut pm = PageManager::new();
        pm.map(0x4000, 7, true);
        assert!(!pm.is_accessed(0x4000));
        pm.set_accessed(0x4321); // any address in the page
        assert!(pm.is_accessed(0x4000));
        pm.clear_accessed(0x4000);
        assert!(!pm.is_accessed(0x4000));
        pm.set_dirty(0x4000);
        assert!(pm.is_dirty(0x4000));
        pm.clear_dirty(0x4000);
        assert!(!pm.is_dirty(0x4000));
        // bits on unmapped addresses read as clear and ignore writes
        pm.set_accessed(0x9000);
        assert!(!pm.is_accessed(0x9000));
    }
}
