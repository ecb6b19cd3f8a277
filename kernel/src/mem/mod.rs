//! Demand-paged virtual memory.
//!
//! Pages are declared lazily and only acquire a frame on first fault.
//! Under frame pressure a second-chance clock scan evicts a resident
//! page: anonymous pages go to swap, file-backed pages go back to their
//! file. One lock around [`VmState`] covers the frame pool, the page
//! arena and the swap map, so scan-select-evict is a single critical
//! section.

pub mod error;
pub mod fault;
pub mod frame;
pub mod loader;
pub mod mmap;
pub mod page;
pub mod spt;
pub mod swap;
pub mod user;

pub use error::{MmapError, VmError};
pub use page::{Backing, FileSpan};
pub use spt::SupplementalPageTable;

use crate::block::BlockDevice;
use crate::sync::Mutex;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use frame::FrameTable;
use minnowos_shared::mem::{is_kernel_vaddr, is_page_aligned, USER_STACK_TOP};
use minnowos_shared::paging::PageManager;
use page::{Page, PageArena, PageId, PageKind};
use swap::SwapTable;

/// Shared handle to one process's hardware-table model. Each page record
/// keeps a clone, so eviction can unmap without reaching the owner.
pub type PageTableRef = Arc<Mutex<PageManager>>;

/// The per-process half of the VM layer: the supplemental page table,
/// the hardware table, and the low-water mark of the grown stack.
pub struct ProcessVm {
    pub(crate) spt: SupplementalPageTable,
    pub(crate) page_table: PageTableRef,
    pub(crate) stack_bottom: usize,
}

impl ProcessVm {
    pub fn new() -> Self {
        Self {
            spt: SupplementalPageTable::new(),
            page_table: Arc::new(Mutex::new(PageManager::new())),
            stack_bottom: USER_STACK_TOP,
        }
    }

    pub fn page_table(&self) -> &PageTableRef {
        &self.page_table
    }

    /// Lowest address the stack has grown to.
    pub fn stack_bottom(&self) -> usize {
        self.stack_bottom
    }

    pub fn page_count(&self) -> usize {
        self.spt.len()
    }
}

impl Default for ProcessVm {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the global lock protects.
pub(crate) struct VmState {
    pub(crate) pages: PageArena,
    pub(crate) frames: FrameTable,
    pub(crate) swap: SwapTable,
}

impl VmState {
    /// Registers a page in the arena and the process's table. The sole
    /// creation path; `va` must be page-aligned.
    pub(crate) fn create_page(
        &mut self,
        proc: &mut ProcessVm,
        va: usize,
        writable: bool,
        stack: bool,
        kind: PageKind,
    ) -> Result<PageId, VmError> {
        debug_assert!(is_page_aligned(va));
        if proc.spt.get(va).is_some() {
            return Err(VmError::AlreadyMapped);
        }
        let id = self.pages.insert(Page {
            va,
            writable,
            stack,
            kind,
            frame: None,
            table: Arc::clone(&proc.page_table),
        });
        let inserted = proc.spt.insert(va, id);
        debug_assert!(inserted);
        Ok(id)
    }
}

/// Machine-wide VM system: frame pool, page arena and swap device.
///
/// Processes hand their [`ProcessVm`] in with each call; the system
/// itself holds no per-process references.
pub struct Vm {
    pub(crate) state: Mutex<VmState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    pub frames_in_use: usize,
    pub frame_capacity: usize,
    pub evictions: u64,
    pub swap_slots_in_use: usize,
}

enum CopyTemplate {
    Uninit(Backing),
    Anon,
    File(FileSpan),
}

impl Vm {
    /// A VM system with `user_frames` frames of pool and `swap_device`
    /// as the swap backing store.
    pub fn new(user_frames: usize, swap_device: Box<dyn BlockDevice + Send>) -> Self {
        let swap = SwapTable::new(swap_device);
        log::debug!(
            "vm: {user_frames} user frames, {} swap slots",
            swap.slot_count()
        );
        Self {
            state: Mutex::new(VmState {
                pages: PageArena::new(),
                frames: FrameTable::new(user_frames),
                swap,
            }),
        }
    }

    /// Declares a page at `va` without allocating a frame; content
    /// arrives on first fault per `backing`. `va` must name a non-null
    /// user page: a kernel-space entry could never be faulted in.
    pub fn alloc_page(
        &self,
        proc: &mut ProcessVm,
        va: usize,
        writable: bool,
        backing: Backing,
    ) -> Result<(), VmError> {
        if va == 0 || is_kernel_vaddr(va) {
            return Err(VmError::BadAddress);
        }
        let mut state = self.state.lock();
        state
            .create_page(proc, va, writable, false, PageKind::Uninit(backing))
            .map(|_| ())
    }

    /// Duplicates `src`'s address space into `dst` eagerly: every page
    /// present in `src` exists in `dst` afterwards with the same
    /// content, and the spaces share no frames or swap slots.
    ///
    /// Uninitialized pages are duplicated as uninitialized and share the
    /// deferred-load descriptor; everything else is copied byte for
    /// byte into a freshly claimed frame.
    pub fn copy_address_space(
        &self,
        dst: &mut ProcessVm,
        src: &ProcessVm,
    ) -> Result<(), VmError> {
        let mut state = self.state.lock();
        let entries: Vec<(usize, PageId)> = src.spt.iter().collect();
        for (va, src_id) in entries {
            let (writable, stack, template) = {
                let page = state.pages.get(src_id);
                let template = match &page.kind {
                    PageKind::Uninit(backing) => CopyTemplate::Uninit(backing.clone()),
                    PageKind::Anon { .. } => CopyTemplate::Anon,
                    PageKind::File(span) => CopyTemplate::File(span.clone()),
                };
                (page.writable, page.stack, template)
            };
            let kind = match template {
                CopyTemplate::Uninit(backing) => {
                    state.create_page(dst, va, writable, stack, PageKind::Uninit(backing))?;
                    continue;
                }
                CopyTemplate::Anon => PageKind::Anon { slot: None },
                CopyTemplate::File(span) => PageKind::File(span),
            };
            // Snapshot the source bytes before claiming for the
            // destination: that claim may evict the source page.
            if state.pages.get(src_id).frame.is_none() {
                state.claim(src_id)?;
            }
            let src_frame = state.pages.get(src_id).frame.expect("just claimed");
            let snapshot = state.frames.data(src_frame).to_vec();
            let src_dirty = src.page_table.lock().is_dirty(va);
            let dst_id = state.create_page(dst, va, writable, stack, kind)?;
            state.claim(dst_id)?;
            let dst_frame = state.pages.get(dst_id).frame.expect("just claimed");
            state.frames.data_mut(dst_frame).copy_from_slice(&snapshot);
            if src_dirty {
                // The copy diverges from its backing file just as the
                // source did; it must not be dropped as clean.
                dst.page_table.lock().set_dirty(va);
            }
        }
        Ok(())
    }

    /// Tears down every page of the process: dirty file pages are
    /// flushed, swap slots and frames are returned to their pools.
    pub fn destroy_address_space(&self, proc: &mut ProcessVm) {
        let mut state = self.state.lock();
        for (_va, id) in proc.spt.drain() {
            state.destroy_page(id);
        }
    }

    pub fn stats(&self) -> VmStats {
        let state = self.state.lock();
        VmStats {
            frames_in_use: state.frames.in_use(),
            frame_capacity: state.frames.capacity(),
            evictions: state.frames.evictions(),
            swap_slots_in_use: state.swap.in_use(),
        }
    }
}
