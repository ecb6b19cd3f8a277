use super::frame::{FrameId, FrameTable};
use super::swap::SwapSlot;
use super::{PageTableRef, VmState};
use crate::vfs::FileRef;
use alloc::vec::Vec;

/// Index of a page record in the arena.
pub type PageId = usize;

/// A byte range of a file feeding the start of one page; bytes past
/// `read_bytes` are zero-filled.
#[derive(Clone)]
pub struct FileSpan {
    pub file: FileRef,
    pub offset: usize,
    pub read_bytes: usize,
}

/// What an uninitialized page turns into on first fault.
#[derive(Clone)]
pub enum Backing {
    /// Anonymous memory, optionally seeded from an executable image.
    /// The seed is read once; after that the page lives in frames and
    /// swap only.
    Anon { load: Option<FileSpan> },
    /// A window of a memory-mapped file, written back when dirty.
    File(FileSpan),
}

/// Lifecycle state of a page. A page starts `Uninit` and converts to its
/// final variant on first fault; it never converts back or sideways.
pub(crate) enum PageKind {
    Uninit(Backing),
    /// `slot` is the swap slot holding the content while evicted; `None`
    /// means the content is all zeroes (never evicted, or resident).
    Anon { slot: Option<SwapSlot> },
    File(FileSpan),
}

pub(crate) struct Page {
    pub va: usize,
    pub writable: bool,
    /// Created by stack growth (or the initial stack page).
    pub stack: bool,
    pub kind: PageKind,
    pub frame: Option<FrameId>,
    /// Hardware table of the owning process, kept here so eviction can
    /// unmap the page without reaching the owner.
    pub table: PageTableRef,
}

impl Page {
    /// The mapping file, for pages created by mmap. Used to walk the
    /// extent of a mapping during munmap.
    pub fn mapping_file(&self) -> Option<&FileRef> {
        match &self.kind {
            PageKind::File(span) | PageKind::Uninit(Backing::File(span)) => Some(&span.file),
            _ => None,
        }
    }
}

/// Slab of page records, addressed by [`PageId`]. Ids are recycled, so a
/// stale id is a logic error the arena panics on.
pub(crate) struct PageArena {
    slots: Vec<Option<Page>>,
    free: Vec<PageId>,
}

impl PageArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, page: Page) -> PageId {
        if let Some(id) = self.free.pop() {
            self.slots[id] = Some(page);
            id
        } else {
            self.slots.push(Some(page));
            self.slots.len() - 1
        }
    }

    pub fn get(&self, id: PageId) -> &Page {
        self.slots[id].as_ref().expect("stale page id")
    }

    pub fn get_mut(&mut self, id: PageId) -> &mut Page {
        self.slots[id].as_mut().expect("stale page id")
    }

    pub fn remove(&mut self, id: PageId) -> Page {
        let page = self.slots[id].take().expect("stale page id");
        self.free.push(id);
        page
    }
}

/// Fills `buf` from a file span; bytes past the span stay as they were.
/// `buf` is zeroed by the callers first, so a short read leaves zeroes.
fn read_span(span: &FileSpan, buf: &mut [u8]) -> Result<(), super::VmError> {
    let n = span.read_bytes.min(buf.len());
    if n == 0 {
        return Ok(());
    }
    span.file.lock().read_at(&mut buf[..n], span.offset)?;
    Ok(())
}

impl VmState {
    /// Populates frame `frame` with the content of page `id`.
    ///
    /// First fault on an `Uninit` page also fixes its final variant.
    /// An `Anon` page with no swap slot is all zeroes; one with a slot
    /// reads the slot back and frees it.
    pub(crate) fn swap_in(&mut self, id: PageId, frame: FrameId) -> Result<(), super::VmError> {
        let VmState { pages, frames, swap } = self;
        let page = pages.get_mut(id);
        let buf = frames.data_mut(frame);
        match &mut page.kind {
            PageKind::Uninit(backing) => {
                buf.fill(0);
                let fixed = match backing {
                    Backing::Anon { load } => {
                        if let Some(span) = load {
                            read_span(span, buf)?;
                        }
                        PageKind::Anon { slot: None }
                    }
                    Backing::File(span) => {
                        read_span(span, buf)?;
                        PageKind::File(span.clone())
                    }
                };
                page.kind = fixed;
            }
            PageKind::Anon { slot } => {
                buf.fill(0);
                // The page keeps its slot until the read succeeds, so a
                // failed read leaves the slot owned and teardown can
                // still free it.
                if let Some(s) = *slot {
                    swap.read_slot(s, buf)?;
                    swap.free(s);
                    *slot = None;
                }
            }
            PageKind::File(span) => {
                buf.fill(0);
                read_span(span, buf)?;
            }
        }
        Ok(())
    }

    /// Writes the resident content of page `id` out and unmaps it.
    ///
    /// Anonymous pages always go to swap; file pages go back to their
    /// span, and only when the hardware dirty bit is set. The frame is
    /// detached but not returned to the free list, so the caller can
    /// hand it straight to the next owner.
    pub(crate) fn swap_out(&mut self, id: PageId) -> Result<(), super::VmError> {
        let VmState { pages, frames, swap } = self;
        let page = pages.get_mut(id);
        let frame = page.frame.expect("swapping out a non-resident page");
        match &mut page.kind {
            PageKind::Uninit(_) => unreachable!("uninitialized pages are never resident"),
            PageKind::Anon { slot } => {
                let Some(s) = swap.allocate() else {
                    panic!("swap space exhausted");
                };
                swap.write_slot(s, frames.data(frame))?;
                *slot = Some(s);
                log::trace!("page {:#x} written to swap slot {s}", page.va);
            }
            PageKind::File(span) => {
                let dirty = page.table.lock().is_dirty(page.va);
                if dirty && span.read_bytes > 0 {
                    let data = &frames.data(frame)[..span.read_bytes];
                    span.file.lock().write_at(data, span.offset)?;
                }
                page.table.lock().clear_dirty(page.va);
            }
        }
        page.table.lock().unmap(page.va);
        page.frame = None;
        frames.detach(frame);
        Ok(())
    }

    /// Tears the page down: flushes a dirty file page back, frees its
    /// swap slot if it holds one, and returns its frame to the pool.
    ///
    /// Runs on munmap and process exit, where there is nobody left to
    /// report a writeback failure to, so failures are logged and the
    /// teardown continues.
    pub(crate) fn destroy_page(&mut self, id: PageId) {
        let VmState { pages, frames, swap } = self;
        let page = pages.remove(id);
        if let Some(frame) = page.frame {
            flush_if_dirty(&page, frames, frame);
            page.table.lock().unmap(page.va);
            frames.release(frame);
        }
        if let PageKind::Anon { slot: Some(s) } = page.kind {
            swap.free(s);
        }
    }
}

fn flush_if_dirty(page: &Page, frames: &FrameTable, frame: FrameId) {
    let PageKind::File(span) = &page.kind else {
        return;
    };
    if !page.table.lock().is_dirty(page.va) || span.read_bytes == 0 {
        return;
    }
    let data = &frames.data(frame)[..span.read_bytes];
    if let Err(e) = span.file.lock().write_at(data, span.offset) {
        log::error!("writeback of page {:#x} failed: {e}", page.va);
    }
}
