use super::page::PageId;
use alloc::collections::BTreeMap;
use minnowos_shared::mem::{page_round_down, PAGE_FRAME_SIZE};

/// Per-process map from page-aligned virtual address to page record.
///
/// This is the authoritative description of the process's virtual memory;
/// the hardware table only caches the resident subset. Lookups accept any
/// address inside a page.
#[derive(Default)]
pub struct SupplementalPageTable {
    entries: BTreeMap<usize, PageId>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, addr: usize) -> Option<PageId> {
        self.entries.get(&page_round_down(addr)).copied()
    }

    /// `addr` must be page-aligned. Returns false if the slot is taken.
    pub(crate) fn insert(&mut self, addr: usize, page: PageId) -> bool {
        debug_assert_eq!(addr % PAGE_FRAME_SIZE, 0);
        match self.entries.entry(addr) {
            alloc::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(page);
                true
            }
            alloc::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    pub(crate) fn remove(&mut self, addr: usize) -> Option<PageId> {
        self.entries.remove(&page_round_down(addr))
    }

    /// True when no entry falls in `[start, end)`.
    pub(crate) fn range_is_free(&self, start: usize, end: usize) -> bool {
        self.entries.range(start..end).next().is_none()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, PageId)> + '_ {
        self.entries.iter().map(|(&addr, &page)| (addr, page))
    }

    /// Empties the table, yielding every entry. Used at process exit.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (usize, PageId)> {
        core::mem::take(&mut self.entries).into_iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
